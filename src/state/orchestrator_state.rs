/// Orchestrator state machine
///
/// The coordinator moves through these states while driving a run. Every
/// transition goes through [`OrchestratorState::can_transition_to`].
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestratorState {
    // ===== Setup =====
    /// Loading an existing run or creating a fresh one
    Init,

    /// Determining the total page count
    DiscoverPages,

    // ===== Page loop =====
    /// Handing pages to workers and waiting for their results
    Dispatch,

    /// At least one page is being fetched
    Fetching,

    /// At least one page is being extracted
    Extracting,

    /// Persisting a finished page
    Record,

    // ===== Terminal =====
    /// Every page is done or failed and the dataset was written
    Complete,

    /// Cancellation stopped the run with pages remaining
    Interrupted,

    /// A fatal error stopped the run
    Aborted,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Interrupted | Self::Aborted)
    }

    /// Returns true if moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: OrchestratorState) -> bool {
        use OrchestratorState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Aborted {
            return true;
        }

        matches!(
            (self, next),
            (Init, DiscoverPages)
                | (DiscoverPages, Dispatch)
                | (Dispatch, Fetching | Extracting | Record | Complete | Interrupted)
                | (Fetching, Extracting | Dispatch | Record)
                | (Extracting, Dispatch | Record)
                | (Record, Dispatch | Complete | Interrupted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::DiscoverPages => "discover_pages",
            Self::Dispatch => "dispatch",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Record => "record",
            Self::Complete => "complete",
            Self::Interrupted => "interrupted",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
