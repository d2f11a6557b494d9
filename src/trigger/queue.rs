// src/trigger/queue.rs

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// What happens to schedule ticks that come due while a run is executing.
///
/// - `Backfill`: remember every tick and run them in order (`catchup = true`).
/// - `LatestOnly`: keep only the newest tick; older pending ticks are dropped
///   (`catchup = false`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatchupBehaviour {
    Backfill,
    #[default]
    LatestOnly,
}

impl CatchupBehaviour {
    pub fn from_catchup(catchup: bool) -> Self {
        if catchup {
            CatchupBehaviour::Backfill
        } else {
            CatchupBehaviour::LatestOnly
        }
    }
}

/// Logical timestamps waiting to be run, oldest first.
///
/// `max_runs` bounds the backlog; when it is exceeded the oldest ticks are
/// dropped. Duplicate ticks are ignored.
#[derive(Debug)]
pub struct RunQueue {
    behaviour: CatchupBehaviour,
    max_runs: usize,
    pending: VecDeque<DateTime<Utc>>,
}

impl RunQueue {
    /// `max_runs` is clamped to at least 1.
    pub fn new(behaviour: CatchupBehaviour, max_runs: usize) -> Self {
        Self {
            behaviour,
            max_runs: max_runs.max(1),
            pending: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn behaviour(&self) -> CatchupBehaviour {
        self.behaviour
    }

    /// Record that the schedule fired for `tick`.
    pub fn record_tick(&mut self, tick: DateTime<Utc>) {
        match self.behaviour {
            CatchupBehaviour::Backfill => {
                if self.pending.contains(&tick) {
                    debug!(%tick, "tick already queued");
                    return;
                }
                // Keep the queue sorted even if ticks arrive out of order.
                let pos = self.pending.partition_point(|t| *t < tick);
                self.pending.insert(pos, tick);
                debug!(%tick, queued = self.pending.len(), "queued tick (backfill)");

                if self.pending.len() > self.max_runs {
                    warn!(
                        queued = self.pending.len(),
                        max_runs = self.max_runs,
                        "run backlog exceeded; dropping oldest ticks"
                    );
                    while self.pending.len() > self.max_runs {
                        self.pending.pop_front();
                    }
                }
            }
            CatchupBehaviour::LatestOnly => {
                if self.pending.back().is_some_and(|last| *last >= tick) {
                    debug!(%tick, "newer tick already queued; ignoring");
                    return;
                }
                if !self.pending.is_empty() {
                    debug!(dropped = self.pending.len(), "dropping older queued ticks (latest only)");
                }
                self.pending.clear();
                self.pending.push_back(tick);
            }
        }
    }

    /// Take the oldest pending tick.
    pub fn pop_next(&mut self) -> Option<DateTime<Utc>> {
        self.pending.pop_front()
    }
}
