//! The writer tree's storage: a flat arena of [`Writer`] nodes addressed
//! by [`WriterId`], rather than an owned `Box`-tree. Later passes need to
//! revisit writers by type-group membership (not by tree position) and
//! cross-reference siblings' final offsets once every writer has one, so
//! a flat arena with index-based edges is a more natural fit than
//! recursive ownership.

use bufferql_schema::Value;

pub type WriterId = usize;

/// Allocator counters snapshotted at the moment a writer was allocated
/// (Pass 3), before that writer's own contribution grows them further.
#[derive(Clone, Copy, Debug, Default)]
pub struct Allocated {
    pub index_size: i64,
    pub length_size: i64,
    pub unit_size: i64,
    pub max_length: i64,
}

/// The bitmask payload computed during spawn but not yet encoded to
/// bytes. Encoding (and the Data Tape `put`) happens in Pass 3, since the
/// tape's total size feeds directly into width selection.
pub enum PendingBitmask {
    Optional { toggles: Vec<i64>, domain: i64 },
    OneOf { rle: Vec<i64>, domain: i64, k: usize },
}

/// A writer node's shape: either a plain node carrying its own branches
/// and (for Optional/OneOf) bitmask payload, or a group aggregating
/// several same-type sibling nodes produced by different parent rows
/// (e.g. each row of an Array-of-Array has its own, possibly
/// differently-sized, child Array).
pub enum WriterKind {
    Node {
        branches: Vec<WriterId>,
        bitmask: Option<PendingBitmask>,
    },
    Group {
        members: Vec<WriterId>,
    },
}

pub struct Writer {
    pub type_label: String,
    /// The column of source values this writer carries. Empty for a
    /// `Group`, whose members each carry their own source.
    pub source: Vec<Value>,
    pub kind: WriterKind,
    /// -1 until Pass 4 positions it.
    pub offset: i64,
    pub allocated: Allocated,
}

impl Writer {
    pub fn count(&self) -> i64 {
        self.source.len() as i64
    }
}

/// Walks `id`'s subtree, collecting every `Node` writer reachable
/// through nested `Group`s. A plain `Node` flattens to itself; a `Group`
/// flattens to its members (recursively, in case a group's member is
/// itself a group, which deep Array-of-Array-of-Array nesting can
/// produce at a single column position).
pub fn flatten(arena: &[Writer], id: WriterId, out: &mut Vec<WriterId>) {
    match &arena[id].kind {
        WriterKind::Node { .. } => out.push(id),
        WriterKind::Group { members } => {
            for &member in members {
                flatten(arena, member, out);
            }
        }
    }
}
