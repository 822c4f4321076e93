//! Passes 2 through 5: group-by-type collation, width-selecting
//! allocation, alignment positioning, and byte emission. No direct
//! teacher counterpart for the n/m width-selection scheme (that's the
//! redesign spec.md's §4.3 introduces over
//! `original_source/python/buffer_ql/core/writer.py`'s fixed int32
//! offsets); the group-by-type-then-sort-by-size shape is grounded on
//! that same file's `ordered_writers` dict plus the allocate/write
//! dispatch-by-tag structure.

use std::collections::HashMap;

use bufferql_base::{err, Result};
use bufferql_core::{
    encode_bitmask, encode_one_of, size_varint, size_varint_signed, write_varint_fixed_signed,
    write_varint_fixed_unsigned, write_varint_unsigned, DataTape, TapeKey,
};
use bufferql_schema::{PrimitiveSize, Schema, TypeTag};
use tracing::debug;

use crate::arena::{flatten, Allocated, Writer, WriterId, WriterKind};
use crate::spawn::RefTable;

/// One type label's writers, already flattened out of any `Group`
/// wrapping, in the order Pass 2 will emit them.
pub struct Group {
    pub type_label: String,
    pub writers: Vec<WriterId>,
    fixed_primitive_size: Option<i64>,
}

/// Collates writers by type label (first-seen order) then stable-sorts
/// the groups ascending by size, non-Primitive groups sorting first
/// (sort key 0) ahead of Primitives ordered by their fixed byte width.
/// Ties keep first-discovery order, per DESIGN NOTES §9.
pub fn build_groups(
    schema: &Schema,
    arena: &[Writer],
    order_keys: Vec<String>,
    ordered: HashMap<String, Vec<WriterId>>,
) -> Result<Vec<Group>> {
    let mut groups = Vec::with_capacity(order_keys.len());
    for type_label in order_keys {
        let top_ids = ordered
            .get(&type_label)
            .ok_or_else(|| err(format!("internal: group {type_label} missing from spawn order")))?;
        let mut writers = Vec::new();
        for &id in top_ids {
            flatten(arena, id, &mut writers);
        }
        let fixed_primitive_size = schema
            .get(&type_label)
            .and_then(|r| r.primitive.as_ref())
            .and_then(|p| match p.size() {
                PrimitiveSize::Fixed(s) => Some(s as i64),
                PrimitiveSize::Variable => None,
            });
        groups.push(Group {
            type_label,
            writers,
            fixed_primitive_size,
        });
    }
    groups.sort_by_key(|g| g.fixed_primitive_size.unwrap_or(0));
    Ok(groups)
}

/// The running allocator state threaded across Pass 3.
#[derive(Clone, Copy, Debug, Default)]
pub struct Allocator {
    pub index_size: i64,
    pub length_size: i64,
    pub unit_size: i64,
    pub max_length: i64,
}

/// Concatenates the K per-class bitmasks [`bufferql_core::encode_one_of`]
/// produces into the single Data Tape blob a OneOf writer puts, each
/// prefixed by its own length so the classes remain distinguishable. A
/// single combined entry matches Pass 3's "put the encoded one-of to the
/// Data Tape" (singular) and Pass 5's single `tape-get` read back, rather
/// than `encode_one_of`'s own K-separate-blobs return shape.
fn encode_one_of_blob(rle: &[i64], domain: i64, k: usize) -> Vec<u8> {
    let per_class = encode_one_of(rle, domain, k);
    let mut out = Vec::new();
    for blob in per_class {
        write_varint_unsigned(&mut out, blob.len() as u64);
        out.extend_from_slice(&blob);
    }
    out
}

/// Pass 3: snapshots the allocator into each writer, then grows it by
/// that writer's type-dependent contribution. Variable-size Primitives
/// and Optional/OneOf bitmask payloads are put on the Data Tape here
/// (not deferred to Pass 5) since the tape's final size feeds directly
/// into width selection below.
pub fn allocate_all(
    schema: &Schema,
    arena: &mut [Writer],
    groups: &[Group],
    tape: &mut DataTape<TapeKey>,
) -> Result<Allocator> {
    let mut alloc = Allocator::default();
    for group in groups {
        let record = schema
            .get(&group.type_label)
            .ok_or_else(|| err(format!("unknown type in allocate: {}", group.type_label)))?;
        for &id in &group.writers {
            let count = arena[id].count();
            arena[id].allocated = Allocated {
                index_size: alloc.index_size,
                length_size: alloc.length_size,
                unit_size: alloc.unit_size,
                max_length: alloc.max_length,
            };
            match record.tag {
                TypeTag::Primitive => {
                    let kind = record
                        .primitive
                        .as_ref()
                        .ok_or_else(|| err(format!("{} has no primitive kind", group.type_label)))?;
                    match kind.size() {
                        PrimitiveSize::Fixed(s) => alloc.unit_size += s as i64 * count,
                        PrimitiveSize::Variable => {
                            for v in &arena[id].source {
                                kind.encode_variable(v, tape);
                            }
                            alloc.index_size += count;
                        }
                    }
                }
                TypeTag::Tuple | TypeTag::NamedTuple => {
                    alloc.index_size += record.children.len() as i64;
                }
                TypeTag::Array => {
                    alloc.index_size += count;
                    alloc.length_size += count;
                }
                TypeTag::Map => {
                    alloc.index_size += 2 * count;
                    alloc.length_size += count;
                }
                // Pass 5 writes a Ref cell as two n-width varints (target
                // offset, target index) with no m-width field at all, so
                // both halves of the reservation go through index_size;
                // spec.md's literal "index_size += count, length_size +=
                // count" would under/over-reserve whenever n != m.
                TypeTag::Ref => alloc.index_size += 2 * count,
                TypeTag::Link => alloc.unit_size += 8 * count,
                TypeTag::Optional => {
                    if let WriterKind::Node {
                        bitmask: Some(crate::arena::PendingBitmask::Optional { toggles, domain }),
                        ..
                    } = &arena[id].kind
                    {
                        let encoded = encode_bitmask(toggles.iter().copied(), *domain);
                        tape.put(TapeKey::Bitmask(id), &encoded);
                    }
                    alloc.index_size += 2;
                }
                TypeTag::OneOf => {
                    let k = record.children.len();
                    if let WriterKind::Node {
                        bitmask: Some(crate::arena::PendingBitmask::OneOf { rle, domain, .. }),
                        ..
                    } = &arena[id].kind
                    {
                        let blob = encode_one_of_blob(rle, *domain, k);
                        tape.put(TapeKey::Bitmask(id), &blob);
                    }
                    alloc.index_size += k as i64 + 1;
                }
                TypeTag::Alias => {
                    return Err(err(format!(
                        "unresolved alias reached allocate: {}",
                        group.type_label
                    )))
                }
            }
            alloc.max_length = alloc.max_length.max(count);
        }
    }
    Ok(alloc)
}

/// Chooses the smallest offset width `n` in `1..=4` bytes such that the
/// total fixed-region-plus-tape size still fits in a signed varint of
/// `n` bytes, with `m` the unsigned varint width of the largest column
/// length seen. Padding isn't folded into this estimate (it's computed
/// by Pass 4, which itself needs `n`/`m` first); in practice padding is
/// bounded by the number of distinct fixed-size Primitive groups times
/// their size, negligible next to `total_size` for any schema wide
/// enough to need a second width tier.
pub fn select_width(alloc: &Allocator, tape_size: i64) -> Result<(i64, i64)> {
    let m = size_varint(alloc.max_length.max(0) as u64) as i64;
    for n in 1..=4i64 {
        let total = alloc.index_size * n + alloc.length_size * m + alloc.unit_size + tape_size;
        if size_varint_signed(total) as i64 <= n {
            return Ok((n, m));
        }
    }
    Err(err("Index overflow, split data into smaller chunks"))
}

/// Pass 4: assigns every writer its final offset, padding each
/// fixed-size Primitive group's start so it falls on a multiple of that
/// Primitive's size. Returns the total padding inserted.
pub fn position_all(arena: &mut [Writer], groups: &[Group], n: i64, m: i64) -> i64 {
    let mut sum_padding = 0i64;
    for group in groups {
        if let (Some(size), Some(&first)) = (group.fixed_primitive_size, group.writers.first()) {
            let snap = arena[first].allocated;
            let start = snap.index_size * n + snap.length_size * m + snap.unit_size + sum_padding;
            let rem = start % size;
            if rem != 0 {
                sum_padding += size - rem;
            }
        }
        for &id in &group.writers {
            let snap = arena[id].allocated;
            arena[id].offset = snap.index_size * n + snap.length_size * m + snap.unit_size + sum_padding;
        }
    }
    sum_padding
}

fn node_branches(kind: &WriterKind) -> &[WriterId] {
    match kind {
        WriterKind::Node { branches, .. } => branches,
        WriterKind::Group { .. } => &[],
    }
}

/// The id of the writer covering row `i` of a possibly-grouped branch: a
/// plain `Node` covers row 0 only (the branch's parent had exactly one
/// row), a `Group`'s members cover one row each.
fn branch_member(arena: &[Writer], branch: WriterId, i: usize) -> WriterId {
    match &arena[branch].kind {
        WriterKind::Node { .. } => branch,
        WriterKind::Group { members } => members[i],
    }
}

fn write_array_cell(arena: &[Writer], child: WriterId, base: i64, n: i64, m: i64, buf: &mut [u8]) {
    match &arena[child].kind {
        WriterKind::Node { .. } => {
            write_varint_fixed_signed(buf, base as usize, n as usize, arena[child].offset);
            write_varint_fixed_unsigned(buf, (base + n) as usize, m as usize, arena[child].count() as u64);
        }
        WriterKind::Group { members } => {
            for (i, &member) in members.iter().enumerate() {
                let pos = base + i as i64 * (n + m);
                write_varint_fixed_signed(buf, pos as usize, n as usize, arena[member].offset);
                write_varint_fixed_unsigned(
                    buf,
                    (pos + n) as usize,
                    m as usize,
                    arena[member].count() as u64,
                );
            }
        }
    }
}

fn write_map_cells(
    arena: &[Writer],
    key_branch: WriterId,
    val_branch: WriterId,
    base: i64,
    n: i64,
    m: i64,
    count: usize,
    buf: &mut [u8],
) {
    for i in 0..count {
        let key_id = branch_member(arena, key_branch, i);
        let val_id = branch_member(arena, val_branch, i);
        let pos = base + i as i64 * (2 * n + m);
        write_varint_fixed_signed(buf, pos as usize, n as usize, arena[key_id].offset);
        write_varint_fixed_signed(buf, (pos + n) as usize, n as usize, arena[val_id].offset);
        write_varint_fixed_unsigned(
            buf,
            (pos + 2 * n) as usize,
            m as usize,
            arena[val_id].count() as u64,
        );
    }
}

fn write_writer(
    schema: &Schema,
    arena: &[Writer],
    id: WriterId,
    refs: &RefTable,
    tape: &mut DataTape<TapeKey>,
    n: i64,
    m: i64,
    buf: &mut [u8],
) -> Result<()> {
    let writer = &arena[id];
    let record = schema
        .get(&writer.type_label)
        .ok_or_else(|| err(format!("unknown type in write: {}", writer.type_label)))?;
    // +1: byte 0 of the buffer is the header, the fixed region starts
    // right after it (see the Buffer Format byte ranges).
    let base = 1 + writer.offset;

    match record.tag {
        TypeTag::Primitive => {
            let kind = record
                .primitive
                .as_ref()
                .ok_or_else(|| err(format!("{} has no primitive kind", writer.type_label)))?;
            match kind.size() {
                PrimitiveSize::Fixed(size) => {
                    for (i, v) in writer.source.iter().enumerate() {
                        let pos = (base + i as i64 * size as i64) as usize;
                        kind.encode_fixed(&mut buf[pos..pos + size], v);
                    }
                }
                PrimitiveSize::Variable => {
                    for (i, v) in writer.source.iter().enumerate() {
                        let tape_pos = kind.encode_variable(v, tape);
                        let pos = (base + i as i64 * n) as usize;
                        write_varint_fixed_signed(buf, pos, n as usize, tape_pos);
                    }
                }
            }
        }
        TypeTag::Tuple | TypeTag::NamedTuple => {
            for (j, &child_id) in node_branches(&writer.kind).iter().enumerate() {
                let pos = (base + j as i64 * n) as usize;
                write_varint_fixed_signed(buf, pos, n as usize, arena[child_id].offset);
            }
        }
        TypeTag::Array => {
            let branches = node_branches(&writer.kind);
            if let Some(&child) = branches.first() {
                write_array_cell(arena, child, base, n, m, buf);
            }
        }
        TypeTag::Map => {
            let branches = node_branches(&writer.kind);
            if branches.len() == 2 {
                write_map_cells(
                    arena,
                    branches[0],
                    branches[1],
                    base,
                    n,
                    m,
                    writer.source.len(),
                    buf,
                );
            }
        }
        TypeTag::Optional => {
            let tape_pos = tape.get(&TapeKey::Bitmask(id));
            write_varint_fixed_signed(buf, base as usize, n as usize, tape_pos);
            let branches = node_branches(&writer.kind);
            let child_offset = branches.first().map(|&c| arena[c].offset).unwrap_or(-1);
            write_varint_fixed_signed(buf, (base + n) as usize, n as usize, child_offset);
        }
        TypeTag::OneOf => {
            let tape_pos = tape.get(&TapeKey::Bitmask(id));
            write_varint_fixed_signed(buf, base as usize, n as usize, tape_pos);
            for (i, &child_id) in node_branches(&writer.kind).iter().enumerate() {
                let pos = (base + n * (i as i64 + 1)) as usize;
                write_varint_fixed_signed(buf, pos, n as usize, arena[child_id].offset);
            }
        }
        TypeTag::Ref => {
            for (i, v) in writer.source.iter().enumerate() {
                let identity = v.identity().unwrap_or(0);
                let &(target_id, index) = refs
                    .get(&identity)
                    .ok_or_else(|| err("Reference object outside of scope"))?;
                let pos = base + i as i64 * 2 * n;
                write_varint_fixed_signed(buf, pos as usize, n as usize, arena[target_id].offset);
                write_varint_fixed_signed(buf, (pos + n) as usize, n as usize, index as i64);
            }
        }
        TypeTag::Link => {
            for i in 0..writer.source.len() {
                let pos = (base + i as i64 * 8) as usize;
                buf[pos..pos + 4].copy_from_slice(&(-1i32).to_le_bytes());
                buf[pos + 4..pos + 8].copy_from_slice(&(-1i32).to_le_bytes());
            }
        }
        TypeTag::Alias => {
            return Err(err(format!(
                "unresolved alias reached write: {}",
                writer.type_label
            )))
        }
    }
    Ok(())
}

/// Pass 5: allocates the fixed-region buffer (plus one leading header
/// byte), shifts the Data Tape so its `get` calls already return final
/// absolute positions, then emits every writer's cells.
pub fn write_all(
    schema: &Schema,
    arena: &[Writer],
    groups: &[Group],
    refs: &RefTable,
    tape: &mut DataTape<TapeKey>,
    n: i64,
    m: i64,
    header: u8,
    fixed_size: i64,
) -> Result<Vec<u8>> {
    tape.shift(1 + fixed_size);
    let mut buf = vec![0u8; 1 + fixed_size as usize];
    buf[0] = header;
    for group in groups {
        for &id in &group.writers {
            write_writer(schema, arena, id, refs, tape, n, m, &mut buf)?;
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_width_picks_smallest_fitting_n() {
        let alloc = Allocator {
            index_size: 2,
            length_size: 0,
            unit_size: 10,
            max_length: 1,
        };
        let (n, m) = select_width(&alloc, 0).unwrap();
        assert_eq!(m, 1);
        assert!(n >= 1 && n <= 4);
        assert!(size_varint_signed(alloc.index_size * n + alloc.unit_size) as i64 <= n);
    }

    #[test]
    fn select_width_overflows_when_nothing_fits() {
        let alloc = Allocator {
            index_size: i64::MAX / 2,
            length_size: 0,
            unit_size: 0,
            max_length: 0,
        };
        assert!(select_width(&alloc, 0).is_err());
    }
}
