//! Error handling for the netrecon engine.

use thiserror::Error;

/// Main error type for reconnaissance operations.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("capture error: {0}")]
    Capture(String),

    #[error("unsupported link type: {0}")]
    LinkType(u32),

    #[error("fingerprint database error: {0}")]
    Fingerprint(String),

    #[error("signature parse error: {0}")]
    Signature(#[from] SignatureError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output error: {0}")]
    Output(String),
}

/// Result type alias for reconnaissance operations.
pub type ReconResult<T> = Result<T, ReconError>;

/// Errors raised while parsing a single TCP fingerprint line.
///
/// The fingerprint format is `ver:ittl:olen:mss:wsize,wscale:olayout:quirks:pclass`;
/// each variant names the field that failed so a bad database line can be
/// reported precisely.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("expected 8 colon-separated fields")]
    FieldCount,

    #[error("expected wsize,wscale")]
    WindowFormat,

    #[error("invalid ip version: {0:?}")]
    Version(String),

    #[error("invalid ittl {0:?}: expected integer in 1..=255")]
    InitialTtl(String),

    #[error("invalid olen {0:?}: expected integer in 0..=255")]
    OptionLength(String),

    #[error("invalid mss {0:?}: expected `*` or integer in 0..=65535")]
    Mss(String),

    #[error("invalid wsize {0:?}")]
    WindowSize(String),

    #[error("invalid wscale {0:?}: expected `*` or integer in 0..=255")]
    WindowScale(String),

    #[error("malformed option layout token {0:?}")]
    OptionLayout(String),

    #[error("unknown quirk: {0:?}")]
    Quirk(String),

    #[error("invalid payload class: {0:?}")]
    PayloadClass(String),
}
