//! The sequential replay that turns decoded heap events into a dated
//! free-heap timeline.
use std::fmt;

use crate::date::TraceDate;
use crate::ledger::AllocationLedger;
use crate::utils::*;

/// One line of the final ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineEntry {
    pub date:       TraceDate,
    pub time:       TimeOfDay,
    pub free_heap:  i64,
}

impl fmt::Display for TimelineEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}, {:08}", self.date, self.time, self.free_heap)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub events:             usize,
    pub emitted:            usize,
    /// Allocations and frees replayed before the gate opened.
    pub suppressed:         usize,
    /// Frees whose address was not in the ledger.
    pub unmatched_frees:    usize,
    /// Allocations that overwrote a still-live block at the same address.
    pub overwrites:         usize,
    pub date_rollovers:     usize,
    pub saw_init:           bool,
}

/// Replay state carried across every shard of a run.
#[derive(Debug)]
pub struct Reconstructor {
    free_heap:      i64,
    ledger:         AllocationLedger,
    date:           TraceDate,
    tracked_hour:   Option<u8>,
    gate_on_init:   bool,
    stats:          ReplayStats,
}

impl Reconstructor {
    /// `gate_on_init` suppresses every entry until the first heap init
    /// record shows up.
    pub fn new(start_capacity: i64, gate_on_init: bool, date: TraceDate) -> Self {
        Self {
            free_heap: start_capacity,
            ledger: AllocationLedger::new(),
            date,
            tracked_hour: None,
            gate_on_init,
            stats: ReplayStats::default(),
        }
    }

    pub fn free_heap(&self) -> i64 {
        self.free_heap
    }

    pub fn date(&self) -> TraceDate {
        self.date
    }

    pub fn tracked_hour(&self) -> Option<u8> {
        self.tracked_hour
    }

    pub fn ledger(&self) -> &AllocationLedger {
        &self.ledger
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    fn gate_open(&self) -> bool {
        !self.gate_on_init || self.stats.saw_init
    }

    /// Feeds one event. Returns the timeline entry it produced, if any:
    /// init records never produce one, and neither does anything before
    /// the gate opened.
    pub fn apply(&mut self, r: &TraceRecord) -> Option<TimelineEntry> {
        self.stats.events += 1;
        self.track_hour(r.time.hour());

        match r.kind {
            RecordKind::Init                            => {
                if !self.stats.saw_init {
                    tracing::debug!(time = %r.time, "heap init found");
                }
                self.stats.saw_init = true;
                return None;
            },
            RecordKind::Allocate { address, size, .. }  => {
                if self.ledger.insert(address, size).is_some() {
                    self.stats.overwrites += 1;
                }
                self.free_heap -= size as i64;
            },
            RecordKind::Deallocate { address, .. }      => {
                let recovered = match self.ledger.take(address) {
                    Some(size)  => size,
                    None        => {
                        tracing::debug!(address = %format_args!("{address:#x}"), time = %r.time, "free of unknown block");
                        self.stats.unmatched_frees += 1;
                        0
                    }
                };
                self.free_heap += recovered as i64;
            }
        };

        if !self.gate_open() {
            self.stats.suppressed += 1;
            return None;
        }
        self.stats.emitted += 1;

        Some(TimelineEntry {
            date: self.date,
            time: r.time,
            free_heap: self.free_heap,
        })
    }

    // Timestamps carry no date. The tracked hour moves one step per
    // observed hour change and the date rolls once it reaches 24. A gap
    // of several hours between two events is under-counted.
    fn track_hour(&mut self, hour: u8) {
        let next = match self.tracked_hour {
            None                    => hour,
            Some(h) if h != hour    => h + 1,
            Some(h)                 => h,
        };
        if next >= HOURS_PER_DAY {
            self.date = self.date.next_day();
            self.stats.date_rollovers += 1;
            self.tracked_hour = Some(hour);
            tracing::debug!(date = %self.date, "day boundary crossed");
        } else {
            self.tracked_hour = Some(next);
        }
    }
}
