//! Faults reported by the media pipeline.
//!
//! The pipeline reports a closed set of variants; classification is an
//! exhaustive match, never string inspection.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFault {
    ManifestLoad,
    ManifestTimeout,
    SegmentLoad,
    SegmentTimeout,
    KeyLoad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFault {
    Decode,
    BufferAppend,
    BufferStall,
    SegmentParsing,
}

/// A delivery fault as reported by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Network { kind: NetworkFault, fatal: bool },
    Media { kind: MediaFault, fatal: bool },
    /// Anything outside the network and decode paths
    Other { detail: String },
}

impl Fault {
    pub fn network(kind: NetworkFault) -> Self {
        Fault::Network { kind, fatal: false }
    }

    pub fn media(kind: MediaFault) -> Self {
        Fault::Media { kind, fatal: false }
    }

    pub fn class(&self) -> FaultClass {
        match self {
            Fault::Network { fatal: false, .. } => FaultClass::Network,
            Fault::Media { fatal: false, .. } => FaultClass::Media,
            Fault::Network { fatal: true, .. } | Fault::Media { fatal: true, .. } | Fault::Other { .. } => {
                FaultClass::Fatal
            }
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Network { kind, fatal } => {
                write!(f, "{}network fault: {:?}", if *fatal { "fatal " } else { "" }, kind)
            }
            Fault::Media { kind, fatal } => {
                write!(f, "{}media fault: {:?}", if *fatal { "fatal " } else { "" }, kind)
            }
            Fault::Other { detail } => write!(f, "playback fault: {}", detail),
        }
    }
}

/// How the controller responds to a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Restart the load loop
    Network,
    /// Re-initialize the decode path
    Media,
    /// Tear down and wait for the user
    Fatal,
}

/// Sliding-window fault counter.
///
/// Tolerates `limit` faults inside `window`; the next one inside the same
/// window exhausts the budget.
#[derive(Debug, Clone)]
pub struct FaultBudget {
    limit: u32,
    window: Duration,
    recent: VecDeque<Instant>,
}

impl FaultBudget {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            recent: VecDeque::new(),
        }
    }

    /// Record a fault at `now`. Returns `false` once the budget is exhausted.
    pub fn record(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.recent.front() {
            if now.duration_since(*oldest) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.push_back(now);
        self.recent.len() as u32 <= self.limit
    }

    /// Faults currently inside the window
    pub fn count(&self) -> usize {
        self.recent.len()
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }
}
