//! External-call side of AuditGraph: the resilient-call wrapper every node uses
//! for its collaborators, the completion-provider abstraction, and evaluators
//! built on top of it.

pub mod judge;
pub mod provider;
pub mod resilient;
pub mod structured;

pub use judge::*;
pub use provider::*;
pub use resilient::*;
pub use structured::*;
