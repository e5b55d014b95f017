//! Graph definition and execution for AuditGraph
//!
//! - `node`: the node execution contract
//! - `graph`: builder with construction-time validation (dangling edges, cycles,
//!   undeclared reducers, duplicate single-writer fields, missing route alternatives)
//! - `scheduler`: maximal-parallelism executor with barrier fan-in, conditional
//!   routing and run-level cancellation

pub mod error;
pub mod graph;
pub mod node;
pub mod scheduler;

pub use error::*;
pub use graph::*;
pub use node::*;
pub use scheduler::*;
