//! Internal events.
//!
//! The set of events is closed: routing matches exhaustively on [`EventKind`],
//! so adding an event forces every dispatch site to be revisited.

use std::fmt;

use crate::types::{Repository, SyncWindow};

/// An internal pipeline event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Ingest commits of `repository` over `window`.
    AddCommit {
        repository: Repository,
        window: SyncWindow,
    },

    /// Start the periodic monitoring loop if it is not already running.
    StartMonitor,
}

impl Event {
    pub fn add_commit(repository: Repository, window: SyncWindow) -> Self {
        Event::AddCommit { repository, window }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::AddCommit { .. } => EventKind::AddCommit,
            Event::StartMonitor => EventKind::StartMonitor,
        }
    }
}

/// Routing key of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    AddCommit,
    StartMonitor,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AddCommit => "add_commit",
            EventKind::StartMonitor => "start_monitor",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
