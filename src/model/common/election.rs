use chrono::{DateTime, Utc};
use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// Where an election sits relative to the wall clock.
///
/// This is always derived from the start/end dates at the moment of asking,
/// never stored, so it can't go stale.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionPhase {
    /// Voting has not opened yet.
    Pending,
    /// Voting is open.
    Ongoing,
    /// Voting has closed.
    Closed,
}

impl ElectionPhase {
    /// Derive the phase of an election running from `start` to `end`.
    pub fn at(now: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if now < start {
            Self::Pending
        } else if now <= end {
            Self::Ongoing
        } else {
            Self::Closed
        }
    }
}

/// Super-admin sign-off state of an election workspace.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Approval {
    Pending,
    Approved,
    Rejected,
}

impl From<Approval> for Bson {
    fn from(approval: Approval) -> Self {
        to_bson(&approval).expect("Serialisation is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    #[test]
    fn phase_follows_the_clock() {
        let now = Utc::now();
        let start = now + Duration::hours(1);
        let end = now + Duration::hours(2);
        assert_eq!(ElectionPhase::at(now, start, end), ElectionPhase::Pending);
        assert_eq!(
            ElectionPhase::at(now + Duration::minutes(90), start, end),
            ElectionPhase::Ongoing
        );
        assert_eq!(
            ElectionPhase::at(now + Duration::hours(3), start, end),
            ElectionPhase::Closed
        );
    }

    #[test]
    fn phase_boundaries_are_inclusive_of_start_and_end() {
        let now = Utc::now();
        let end = now + Duration::hours(1);
        assert_eq!(ElectionPhase::at(now, now, end), ElectionPhase::Ongoing);
        assert_eq!(ElectionPhase::at(end, now, end), ElectionPhase::Ongoing);
    }
}
