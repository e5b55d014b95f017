//! Run state, per-field reducers and the serialized commit path.

mod fragment;
mod reducers;
mod store;

pub use fragment::{FieldWrite, StateFragment};
pub use reducers::{AppendLog, ReducerKind, UnionSet, WriteOnce};
pub use store::{RunState, StateField, StateSchema, StateStore};
