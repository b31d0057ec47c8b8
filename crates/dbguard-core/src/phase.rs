//! Per-call state machine for a scoped-access call.
//!
//! ```text
//! Idle -> Acquiring -> Opening -> Executing -> Closing -> Releasing -> Done
//!             |            |                       |           |
//!             v            +-----------------------+--> Releasing -> Failed
//!           Failed
//! ```
//!
//! A failure before the lock is held goes straight to `Failed`; any failure
//! after it still passes through `Releasing`.

use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Idle,
    Acquiring,
    Opening,
    Executing,
    Closing,
    Releasing,
    Done,
    Failed,
}

impl Phase {
    /// Whether the lock token is held while in this phase.
    pub const fn holds_lock(self) -> bool {
        matches!(
            self,
            Self::Opening | Self::Executing | Self::Closing | Self::Releasing
        )
    }

    /// Legal successor on the happy path.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Acquiring),
            Self::Acquiring => Some(Self::Opening),
            Self::Opening => Some(Self::Executing),
            Self::Executing => Some(Self::Closing),
            Self::Closing => Some(Self::Releasing),
            Self::Releasing => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// Where a failure observed in this phase leads.
    ///
    /// Once the lock is held, release is never skipped.
    pub const fn on_failure(self) -> Self {
        if self.holds_lock() && !matches!(self, Self::Releasing) {
            Self::Releasing
        } else {
            Self::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_happy_path_reaches_done() {
        let mut phase = Phase::Idle;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            phase = next;
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                Phase::Idle,
                Phase::Acquiring,
                Phase::Opening,
                Phase::Executing,
                Phase::Closing,
                Phase::Releasing,
                Phase::Done,
            ]
        );
        assert_eq!(phase, Phase::Done);
    }

    #[test]
    fn test_failures_while_holding_pass_through_releasing() {
        for phase in [Phase::Opening, Phase::Executing, Phase::Closing] {
            assert_eq!(phase.on_failure(), Phase::Releasing, "{phase}");
        }
        assert_eq!(Phase::Acquiring.on_failure(), Phase::Failed);
        assert_eq!(Phase::Releasing.on_failure(), Phase::Failed);
    }

    #[test]
    fn test_failed_has_no_successor() {
        assert_eq!(Phase::Failed.next(), None);
        assert!(!Phase::Failed.holds_lock());
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(Phase::Executing.to_string(), "executing");
        assert_eq!(Phase::from_str("releasing").ok(), Some(Phase::Releasing));
    }
}
