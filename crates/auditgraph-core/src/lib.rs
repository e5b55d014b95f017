//! Core types for the AuditGraph engine
//!
//! - `types`: criteria, evidence, opinions, integrity sets and verdicts
//! - `node`: the closed set of graph node identifiers
//! - `state`: the run state, its per-field reducers and the serialized commit path
//! - `traits`: contracts for the external collaborators invoked by graph nodes
//! - `config`: run policy (synthesis constants, routing strictness, retry bounds)

pub mod config;
pub mod error;
pub mod node;
pub mod rubric;
pub mod state;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use node::*;
pub use rubric::*;
pub use state::*;
pub use traits::*;
pub use types::*;
