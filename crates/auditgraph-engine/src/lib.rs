//! The audit engine proper.
//!
//! - `integrity`: path normalization and the manifest cross-reference
//! - `synthesis`: deterministic per-criterion conflict resolution and aggregate scoring
//! - `report`: executive summary and remediation assembled at finalization
//! - `manifest`: ground-truth file list sources
//! - `pipeline`: graph nodes wrapping the collaborators, and `AuditPipeline`
//!   which wires them into the two-stage graph

pub mod integrity;
pub mod manifest;
pub mod pipeline;
pub mod report;
pub mod synthesis;
pub mod telemetry;

pub use integrity::*;
pub use manifest::*;
pub use pipeline::*;
pub use report::*;
pub use synthesis::*;
pub use telemetry::*;
