pub mod audit;
pub mod candidate;
pub mod election;
pub mod role;

pub use audit::AuditAction;
pub use candidate::{CandidateStatus, PositionStatus};
pub use election::{Approval, ElectionPhase};
pub use role::{RoleKind, RoleStatus};
