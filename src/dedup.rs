//! Stream deduplication and weighting.
//!
//! The deduper assigns weights to events based on how many duplicates were
//! seen in the stream, so anomalous observations are out-weighed by
//! frequent ones: seeing the same OS ten thousand times and a different
//! one once should still report the frequent OS.

use log::trace;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::event::Event;

/// Default number of dedup slots.
pub const DEDUP_SLOTS: usize = 1 << 20;

#[derive(Default)]
struct Slot {
    hash: u64,
    count: u64,
    event: Option<Event>,
}

/// A fixed-size table of event counters indexed by content hash. Hash
/// collisions treat the colliding events as duplicates; with the default
/// slot count that is rare enough to ignore.
pub struct Deduper {
    slots: Vec<Slot>,
}

impl Deduper {
    pub fn new() -> Self {
        Self::with_slots(DEDUP_SLOTS)
    }

    pub fn with_slots(slots: usize) -> Self {
        // Indexing needs at least one slot.
        let slots = slots.max(1);
        let mut table = Vec::with_capacity(slots);
        table.resize_with(slots, Slot::default);
        Deduper { slots: table }
    }

    /// Feed one event through the table. The first occurrence is emitted
    /// immediately with weight 1; duplicates are only counted. When a new
    /// event displaces a tracked one, the displaced event is re-emitted
    /// carrying its duplicate count as weight.
    pub fn offer(&mut self, mut event: Event, emit: &mut impl FnMut(Event)) {
        let hash = event.content_hash();
        let index = (hash % self.slots.len() as u64) as usize;
        let slot = &mut self.slots[index];

        if slot.event.is_some() && slot.hash == hash {
            slot.count += 1;
            return;
        }

        if slot.count > 0 {
            if let Some(mut old) = slot.event.take() {
                old.weight = slot.count;
                emit(old);
            }
        }

        event.weight = 1;
        emit(event.clone());
        slot.hash = hash;
        slot.event = Some(event);
        slot.count = 0;
    }

    /// Emit every tracked event that accumulated duplicates, stamped with
    /// its duplicate count as weight, and clear the table.
    pub fn flush(&mut self, emit: &mut impl FnMut(Event)) {
        for slot in &mut self.slots {
            if slot.count > 0 {
                if let Some(mut event) = slot.event.take() {
                    event.weight = slot.count;
                    emit(event);
                }
            }
            *slot = Slot::default();
        }
    }
}

impl Default for Deduper {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline stage: dedup events from `rx` into `tx`. Flushes when the
/// sender side hangs up, then drops `tx` to propagate the shutdown.
pub async fn dedup_stage(
    mut rx: UnboundedReceiver<Event>,
    tx: UnboundedSender<Event>,
    slots: usize,
) {
    let mut deduper = Deduper::with_slots(slots);
    let mut emit = |event: Event| {
        let _ = tx.send(event);
    };

    while let Some(event) = rx.recv().await {
        deduper.offer(event, &mut emit);
    }

    trace!("event stream closed, flushing dedup table");
    deduper.flush(&mut emit);
}
