use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{Approval, ElectionPhase},
    mongodb::Id,
};

/// Length of the random suffix of a generated join code.
const JOIN_CODE_SUFFIX_LEN: usize = 6;

/// Core election data, as stored in the database.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ElectionCore {
    pub title: String,
    pub description: String,
    /// Owning organization slug.
    pub org_id: String,
    /// Public join code voters use to find and join this election.
    pub join_code: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end: DateTime<Utc>,
    /// Super-admin sign-off; only approved elections can be joined or voted in.
    pub approval: Approval,
    /// Whether non-admins may see full tallies (given the election has ended).
    pub results_visible: bool,
    /// Expected electorate size; a capacity hint only, never enforced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_voters: Option<u32>,
    pub created_by: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl ElectionCore {
    /// Create a new election workspace, pending super-admin approval.
    pub fn new(
        title: String,
        description: String,
        org_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        total_voters: Option<u32>,
        created_by: Id,
    ) -> Self {
        let join_code = generate_join_code(&org_id);
        Self {
            title,
            description,
            org_id,
            join_code,
            start,
            end,
            approval: Approval::Pending,
            results_visible: false,
            total_voters,
            created_by,
            created_at: Utc::now(),
        }
    }

    /// Where this election sits relative to the given instant.
    pub fn phase(&self, now: DateTime<Utc>) -> ElectionPhase {
        ElectionPhase::at(now, self.start, self.end)
    }

    /// Is this election currently accepting votes?
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.approval == Approval::Approved && self.phase(now) == ElectionPhase::Ongoing
    }

    /// Has this election's voting window closed?
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == ElectionPhase::Closed
    }
}

/// Generate a join code: the org slug plus a short random suffix.
/// Global uniqueness is backstopped by the unique index on `join_code`.
fn generate_join_code(org_id: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(JOIN_CODE_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}-{}", org_id, suffix.to_lowercase())
}

/// An election without an ID.
pub type NewElection = ElectionCore;

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    use chrono::Duration;

    impl ElectionCore {
        /// An approved election whose voting window is currently open.
        pub fn ongoing_example(created_by: Id) -> Self {
            let mut election = Self::new(
                "Student Union Elections".to_string(),
                "Annual officer elections".to_string(),
                "warwick-su".to_string(),
                Utc::now() - Duration::hours(1),
                Utc::now() + Duration::days(7),
                Some(500),
                created_by,
            );
            election.approval = Approval::Approved;
            election
        }

        /// An approved election whose voting window has already closed.
        pub fn closed_example(created_by: Id) -> Self {
            let mut election = Self::new(
                "Last Year's Elections".to_string(),
                "Already over".to_string(),
                "warwick-su".to_string(),
                Utc::now() - Duration::days(14),
                Utc::now() - Duration::days(7),
                None,
                created_by,
            );
            election.approval = Approval::Approved;
            election
        }

        /// A workspace still awaiting super-admin sign-off.
        pub fn pending_example(created_by: Id) -> Self {
            Self::new(
                "Chess Club Committee".to_string(),
                "Committee election request".to_string(),
                "chess-club".to_string(),
                Utc::now() + Duration::days(1),
                Utc::now() + Duration::days(8),
                None,
                created_by,
            )
        }
    }

    #[test]
    fn join_codes_carry_the_org_slug() {
        let code = generate_join_code("chess-club");
        assert!(code.starts_with("chess-club-"));
        assert_eq!(code.len(), "chess-club-".len() + JOIN_CODE_SUFFIX_LEN);
    }

    #[test]
    fn join_codes_are_random() {
        assert_ne!(generate_join_code("org"), generate_join_code("org"));
    }
}
