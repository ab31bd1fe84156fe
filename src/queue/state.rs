//! Item status enumeration and transition table.
//!
//! Each status is a singleton implementing `ItemState`, looked up through a
//! factory, so "is this transition legal" and "what actions are available"
//! live next to the state they describe instead of in one large match
//! statement.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Preparing,
    Downloading,
    Postprocessing,
    Finished,
    Error,
    Cancelled,
    Paused,
    NotLive,
    Skip,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Finished | Status::Error | Status::Cancelled | Status::Skip | Status::NotLive)
    }

    pub fn initial(auto_start: bool) -> Status {
        if auto_start {
            Status::Pending
        } else {
            Status::Paused
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Preparing => "preparing",
            Status::Downloading => "downloading",
            Status::Postprocessing => "postprocessing",
            Status::Finished => "finished",
            Status::Error => "error",
            Status::Cancelled => "cancelled",
            Status::Paused => "paused",
            Status::NotLive => "not_live",
            Status::Skip => "skip",
        }
    }
}

pub trait ItemState: Send + Sync {
    fn status(&self) -> Status;
    fn can_transition_to(&self, target: Status) -> bool;
    fn can_pause(&self) -> bool {
        false
    }
    fn can_resume(&self) -> bool {
        false
    }
    fn can_cancel(&self) -> bool {
        false
    }
    fn can_delete(&self) -> bool {
        true
    }
}

struct PendingState;
impl ItemState for PendingState {
    fn status(&self) -> Status {
        Status::Pending
    }
    fn can_transition_to(&self, target: Status) -> bool {
        matches!(target, Status::Preparing | Status::Cancelled)
    }
    fn can_pause(&self) -> bool {
        true
    }
    fn can_cancel(&self) -> bool {
        true
    }
}

struct PreparingState;
impl ItemState for PreparingState {
    fn status(&self) -> Status {
        Status::Preparing
    }
    fn can_transition_to(&self, target: Status) -> bool {
        matches!(target, Status::Downloading | Status::Error | Status::Skip | Status::NotLive)
    }
}

struct DownloadingState;
impl ItemState for DownloadingState {
    fn status(&self) -> Status {
        Status::Downloading
    }
    fn can_transition_to(&self, target: Status) -> bool {
        matches!(target, Status::Postprocessing | Status::Error | Status::Cancelled)
    }
    fn can_cancel(&self) -> bool {
        true
    }
}

struct PostprocessingState;
impl ItemState for PostprocessingState {
    fn status(&self) -> Status {
        Status::Postprocessing
    }
    fn can_transition_to(&self, target: Status) -> bool {
        matches!(target, Status::Finished | Status::Error)
    }
}

struct TerminalState(Status);
impl ItemState for TerminalState {
    fn status(&self) -> Status {
        self.0
    }
    fn can_transition_to(&self, _target: Status) -> bool {
        false
    }
    fn can_delete(&self) -> bool {
        true
    }
}

struct PausedState;
impl ItemState for PausedState {
    fn status(&self) -> Status {
        Status::Paused
    }
    fn can_transition_to(&self, target: Status) -> bool {
        matches!(target, Status::Pending | Status::Cancelled)
    }
    fn can_resume(&self) -> bool {
        true
    }
    fn can_cancel(&self) -> bool {
        true
    }
}

static PENDING: Lazy<Arc<dyn ItemState>> = Lazy::new(|| Arc::new(PendingState));
static PREPARING: Lazy<Arc<dyn ItemState>> = Lazy::new(|| Arc::new(PreparingState));
static DOWNLOADING: Lazy<Arc<dyn ItemState>> = Lazy::new(|| Arc::new(DownloadingState));
static POSTPROCESSING: Lazy<Arc<dyn ItemState>> = Lazy::new(|| Arc::new(PostprocessingState));
static FINISHED: Lazy<Arc<dyn ItemState>> = Lazy::new(|| Arc::new(TerminalState(Status::Finished)));
static ERROR: Lazy<Arc<dyn ItemState>> = Lazy::new(|| Arc::new(TerminalState(Status::Error)));
static CANCELLED: Lazy<Arc<dyn ItemState>> = Lazy::new(|| Arc::new(TerminalState(Status::Cancelled)));
static NOT_LIVE: Lazy<Arc<dyn ItemState>> = Lazy::new(|| Arc::new(TerminalState(Status::NotLive)));
static SKIP: Lazy<Arc<dyn ItemState>> = Lazy::new(|| Arc::new(TerminalState(Status::Skip)));
static PAUSED: Lazy<Arc<dyn ItemState>> = Lazy::new(|| Arc::new(PausedState));

pub struct StateFactory;

impl StateFactory {
    pub fn get(status: Status) -> Arc<dyn ItemState> {
        match status {
            Status::Pending => Arc::clone(&PENDING),
            Status::Preparing => Arc::clone(&PREPARING),
            Status::Downloading => Arc::clone(&DOWNLOADING),
            Status::Postprocessing => Arc::clone(&POSTPROCESSING),
            Status::Finished => Arc::clone(&FINISHED),
            Status::Error => Arc::clone(&ERROR),
            Status::Cancelled => Arc::clone(&CANCELLED),
            Status::NotLive => Arc::clone(&NOT_LIVE),
            Status::Skip => Arc::clone(&SKIP),
            Status::Paused => Arc::clone(&PAUSED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_be_claimed_or_cancelled_not_finished_directly() {
        let s = StateFactory::get(Status::Pending);
        assert!(s.can_transition_to(Status::Preparing));
        assert!(s.can_transition_to(Status::Cancelled));
        assert!(!s.can_transition_to(Status::Finished));
    }

    #[test]
    fn terminal_states_accept_no_further_transition() {
        for status in [Status::Finished, Status::Error, Status::Cancelled, Status::Skip, Status::NotLive] {
            let s = StateFactory::get(status);
            assert!(s.is_terminal_via_status());
            assert!(!s.can_transition_to(Status::Pending));
        }
    }

    trait TestExt {
        fn is_terminal_via_status(&self) -> bool;
    }
    impl TestExt for Arc<dyn ItemState> {
        fn is_terminal_via_status(&self) -> bool {
            self.status().is_terminal()
        }
    }

    #[test]
    fn there_is_no_automatic_retry_edge_from_error() {
        let s = StateFactory::get(Status::Error);
        assert!(!s.can_transition_to(Status::Pending));
    }

    #[test]
    fn paused_resumes_to_pending_not_directly_downloading() {
        let s = StateFactory::get(Status::Paused);
        assert!(s.can_transition_to(Status::Pending));
        assert!(!s.can_transition_to(Status::Downloading));
    }

    #[test]
    fn factory_returns_singletons() {
        let a = StateFactory::get(Status::Pending);
        let b = StateFactory::get(Status::Pending);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
