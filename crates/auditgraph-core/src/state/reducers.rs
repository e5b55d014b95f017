use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

use crate::{NodeId, StateError, StateField};

/// Merge function governing how a committed fragment combines with a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReducerKind {
    /// List concatenation, ordered by (producer name, per-producer sequence).
    Append,
    /// Idempotent set union.
    Union,
    /// Single designated writer; a second write is rejected.
    OverwriteOnce,
}

impl fmt::Display for ReducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReducerKind::Append => "append",
            ReducerKind::Union => "union",
            ReducerKind::OverwriteOnce => "overwrite-once",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Sequenced<T> {
    origin: NodeId,
    seq: usize,
    item: T,
}

/// Append-only list whose order does not depend on commit timing.
///
/// Entries are kept sorted by the producing node's name, then by the position
/// the producer emitted them in, so any interleaving of commits yields the
/// same list.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendLog<T> {
    entries: Vec<Sequenced<T>>,
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> AppendLog<T> {
    pub fn append(&mut self, origin: NodeId, items: Vec<T>) {
        let base = self.entries.iter().filter(|e| e.origin == origin).count();
        self.entries
            .extend(items.into_iter().enumerate().map(|(i, item)| Sequenced {
                origin,
                seq: base + i,
                item,
            }));
        self.entries.sort_by(|a, b| {
            a.origin
                .name()
                .cmp(b.origin.name())
                .then(a.seq.cmp(&b.seq))
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter().map(|e| &e.item)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Serialize> Serialize for AppendLog<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UnionSet<T: Ord> {
    items: BTreeSet<T>,
}

impl<T: Ord> Default for UnionSet<T> {
    fn default() -> Self {
        Self {
            items: BTreeSet::new(),
        }
    }
}

impl<T: Ord> UnionSet<T> {
    pub fn union(&mut self, items: BTreeSet<T>) {
        self.items.extend(items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Field with exactly one designated writer.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOnce<T> {
    slot: Option<(NodeId, T)>,
}

impl<T> Default for WriteOnce<T> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<T> WriteOnce<T> {
    pub fn get(&self) -> Option<&T> {
        self.slot.as_ref().map(|(_, value)| value)
    }

    pub fn writer(&self) -> Option<NodeId> {
        self.slot.as_ref().map(|(writer, _)| *writer)
    }

    pub fn is_written(&self) -> bool {
        self.slot.is_some()
    }

    pub(crate) fn check(&self, field: StateField, origin: NodeId) -> Result<(), StateError> {
        match self.writer() {
            Some(writer) => Err(StateError::AlreadyWritten {
                field,
                writer,
                attempted: origin,
            }),
            None => Ok(()),
        }
    }

    pub fn set(&mut self, field: StateField, origin: NodeId, value: T) -> Result<(), StateError> {
        self.check(field, origin)?;
        self.slot = Some((origin, value));
        Ok(())
    }
}

impl<T: Serialize> Serialize for WriteOnce<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}
