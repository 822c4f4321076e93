//! Pass 1 of the encoder pipeline: building the writer tree.
//!
//! Grounded on `original_source/python/buffer_ql/core/writer.py`'s
//! `Writer`/`WriterGroup` classes and the stack-based `encode()` driver
//! for the overall shape (per-type-tag child construction, `WriterGroup`
//! wrapping ragged same-position siblings, a `references` table keyed by
//! value identity). The per-writer byte-layout bookkeeping that file
//! does inline (fixed int32 offsets, no Data Tape) is not carried over;
//! this pass only builds the tree and records the bitmask/RLE payload
//! Pass 3 will later encode and place on the tape.

use std::collections::HashMap;

use bufferql_base::{err, Result};
use bufferql_core::{backward_map_indexes, backward_map_one_of, bit_to_index, one_of_to_index};
use bufferql_schema::{Schema, TypeRecord, TypeTag, Value};

use crate::arena::{PendingBitmask, Writer, WriterId, WriterKind};

/// Where a value was registered into the reference table: the writer
/// holding it as a source element, and its index within that writer's
/// column.
pub type RefTable = HashMap<usize, (WriterId, usize)>;

pub struct Spawner<'s> {
    schema: &'s Schema,
    pub arena: Vec<Writer>,
    pub refs: RefTable,
}

impl<'s> Spawner<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Spawner {
            schema,
            arena: Vec::new(),
            refs: HashMap::new(),
        }
    }

    fn record(&self, label: &str) -> Result<&TypeRecord> {
        self.schema
            .get(label)
            .ok_or_else(|| err(format!("unknown type in writer tree: {label}")))
    }

    fn alloc(&mut self, type_label: &str, source: Vec<Value>) -> WriterId {
        let id = self.arena.len();
        self.arena.push(Writer {
            type_label: type_label.to_string(),
            source,
            kind: WriterKind::Node {
                branches: Vec::new(),
                bitmask: None,
            },
            offset: -1,
            allocated: Default::default(),
        });
        id
    }

    fn alloc_group(&mut self, type_label: &str, members: Vec<WriterId>) -> WriterId {
        let id = self.arena.len();
        self.arena.push(Writer {
            type_label: type_label.to_string(),
            source: Vec::new(),
            kind: WriterKind::Group { members },
            offset: -1,
            allocated: Default::default(),
        });
        id
    }

    /// One child per sibling, unless there's only one sibling, in which
    /// case no grouping indirection is needed.
    fn collapse(&mut self, type_label: &str, ids: Vec<WriterId>) -> WriterId {
        if ids.len() > 1 {
            self.alloc_group(type_label, ids)
        } else {
            ids.into_iter()
                .next()
                .unwrap_or_else(|| self.alloc(type_label, Vec::new()))
        }
    }

    fn register_refs(&mut self, id: WriterId) {
        let label = self.arena[id].type_label.clone();
        let is_ref_target = self
            .schema
            .get(&label)
            .map(|r| r.is_ref_target)
            .unwrap_or(false);
        if !is_ref_target {
            return;
        }
        for (i, v) in self.arena[id].source.iter().enumerate() {
            if let Some(identity) = v.identity() {
                self.refs.insert(identity, (id, i));
            }
        }
    }

    /// Runs the full depth-first spawn, returning the root writer id, the
    /// type labels in first-discovery order, and every top-level writer
    /// (Node or Group) the external stack walk produced, keyed by type
    /// label. Group members are never pushed onto this stack themselves
    /// (only reachable through their owning `Group`'s own spawn), exactly
    /// as in the grounding source.
    pub fn spawn_all(
        &mut self,
        root_label: &str,
        root_value: Value,
    ) -> Result<(WriterId, Vec<String>, HashMap<String, Vec<WriterId>>)> {
        let root = self.alloc(root_label, vec![root_value]);
        let mut ordered: HashMap<String, Vec<WriterId>> = HashMap::new();
        let mut order_keys: Vec<String> = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let type_label = self.arena[id].type_label.clone();
            if !ordered.contains_key(&type_label) {
                order_keys.push(type_label.clone());
            }
            ordered.entry(type_label).or_default().push(id);
            let children = self.spawn_dispatch(id)?;
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
        Ok((root, order_keys, ordered))
    }

    fn spawn_dispatch(&mut self, id: WriterId) -> Result<Vec<WriterId>> {
        let is_group = matches!(self.arena[id].kind, WriterKind::Group { .. });
        if is_group {
            self.spawn_group(id)
        } else {
            self.spawn_node(id)
        }
    }

    /// Spawns a `Group` writer by spawning every member directly
    /// (members never go through the external stack, matching
    /// `WriterGroup.spawn` in the grounding source), then transposes
    /// each member's per-position children into this group's own
    /// branches, wrapping ragged positions into further groups.
    fn spawn_group(&mut self, id: WriterId) -> Result<Vec<WriterId>> {
        let members = match &self.arena[id].kind {
            WriterKind::Group { members } => members.clone(),
            WriterKind::Node { .. } => unreachable!("spawn_group called on a Node"),
        };
        let mut per_position: Vec<Vec<WriterId>> = Vec::new();
        for member in members {
            let children = self.spawn_node(member)?;
            for (i, child) in children.into_iter().enumerate() {
                if per_position.len() <= i {
                    per_position.push(Vec::new());
                }
                per_position[i].push(child);
            }
        }
        let mut branches = Vec::with_capacity(per_position.len());
        for ids in per_position {
            let type_label = self.arena[ids[0]].type_label.clone();
            branches.push(self.collapse(&type_label, ids));
        }
        Ok(branches)
    }

    /// Spawns a plain `Node` writer: computes its children per the
    /// type-tag rules, applying a declared transform first, and records
    /// reference-table entries if this type is a ref target.
    fn spawn_node(&mut self, id: WriterId) -> Result<Vec<WriterId>> {
        let type_label = self.arena[id].type_label.clone();
        let record = self.record(&type_label)?.clone();

        if self.arena[id].source.is_empty() {
            return Ok(Vec::new());
        }

        match record.tag {
            TypeTag::Primitive | TypeTag::Ref | TypeTag::Link => {
                self.register_refs(id);
                return Ok(Vec::new());
            }
            TypeTag::Alias => {
                return Err(err(format!(
                    "unresolved alias reached the writer tree: {type_label}"
                )))
            }
            _ => {}
        }

        let mut source = self.arena[id].source.clone();
        if let Some(transform) = &record.transform {
            source = source.iter().map(|v| transform(v)).collect();
        }

        let branches = match record.tag {
            TypeTag::Tuple => self.spawn_tuple(&record.children, &source),
            TypeTag::NamedTuple => self.spawn_named_tuple(&record.children, &record.keys, &source),
            TypeTag::Array => self.spawn_array(&record.children[0], &source),
            TypeTag::Map => self.spawn_map(&record.children[0], &source),
            TypeTag::Optional => self.spawn_optional(id, &record.children[0], &source),
            TypeTag::OneOf => self.spawn_one_of(id, &record, &source)?,
            TypeTag::Primitive | TypeTag::Ref | TypeTag::Link | TypeTag::Alias => unreachable!(),
        };

        if let WriterKind::Node {
            branches: stored, ..
        } = &mut self.arena[id].kind
        {
            *stored = branches.clone();
        }
        self.register_refs(id);
        Ok(branches)
    }

    fn spawn_tuple(&mut self, children: &[String], source: &[Value]) -> Vec<WriterId> {
        children
            .iter()
            .enumerate()
            .map(|(i, child_label)| {
                let column: Vec<Value> = source
                    .iter()
                    .map(|row| row.as_list().and_then(|l| l.get(i)).cloned().unwrap_or(Value::Unit))
                    .collect();
                self.alloc(child_label, column)
            })
            .collect()
    }

    fn spawn_named_tuple(
        &mut self,
        children: &[String],
        keys: &[String],
        source: &[Value],
    ) -> Vec<WriterId> {
        children
            .iter()
            .zip(keys.iter())
            .map(|(child_label, key)| {
                let column: Vec<Value> = source
                    .iter()
                    .map(|row| {
                        row.as_map()
                            .and_then(|m| m.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()))
                            .unwrap_or(Value::Unit)
                    })
                    .collect();
                self.alloc(child_label, column)
            })
            .collect()
    }

    fn spawn_array(&mut self, child_label: &str, source: &[Value]) -> Vec<WriterId> {
        let member_ids: Vec<WriterId> = source
            .iter()
            .map(|row| {
                let elems = row.as_list().map(|l| l.to_vec()).unwrap_or_default();
                self.alloc(child_label, elems)
            })
            .collect();
        vec![self.collapse(child_label, member_ids)]
    }

    fn spawn_map(&mut self, child_label: &str, source: &[Value]) -> Vec<WriterId> {
        let mut key_ids = Vec::with_capacity(source.len());
        let mut val_ids = Vec::with_capacity(source.len());
        for row in source {
            let entries = row.as_map().unwrap_or(&[]);
            let keys: Vec<Value> = entries.iter().map(|(k, _)| Value::str(k.as_str())).collect();
            let vals: Vec<Value> = entries.iter().map(|(_, v)| v.clone()).collect();
            key_ids.push(self.alloc("String", keys));
            val_ids.push(self.alloc(child_label, vals));
        }
        let key_branch = self.collapse("String", key_ids);
        let val_branch = self.collapse(child_label, val_ids);
        vec![key_branch, val_branch]
    }

    fn spawn_optional(&mut self, id: WriterId, child_label: &str, source: &[Value]) -> Vec<WriterId> {
        let discriminator: Vec<bool> = source.iter().map(|v| !matches!(v, Value::Unit)).collect();
        let toggles = bit_to_index(discriminator.iter().copied());
        let domain = source.len() as i64;
        let positions = backward_map_indexes(domain, toggles.iter().copied(), true);
        let column: Vec<Value> = positions.iter().map(|&p| source[p as usize].clone()).collect();
        let child = self.alloc(child_label, column);
        if let WriterKind::Node { bitmask, .. } = &mut self.arena[id].kind {
            *bitmask = Some(PendingBitmask::Optional { toggles, domain });
        }
        vec![child]
    }

    fn spawn_one_of(
        &mut self,
        id: WriterId,
        record: &TypeRecord,
        source: &[Value],
    ) -> Result<Vec<WriterId>> {
        let k = record.children.len();
        let mut classes = Vec::with_capacity(source.len());
        for v in source {
            let mut found = None;
            for (ci, child_label) in record.children.iter().enumerate() {
                let child_record = self.record(child_label)?;
                if child_record.check.as_ref().map(|c| c(v)).unwrap_or(false) {
                    found = Some(ci);
                    break;
                }
            }
            classes.push(found.ok_or_else(|| err("Value does not match any OneOf"))?);
        }
        let domain = source.len() as i64;
        let rle = one_of_to_index(classes.iter().copied());
        let partitions = backward_map_one_of(&rle, k);

        let branches: Vec<WriterId> = record
            .children
            .iter()
            .enumerate()
            .map(|(ci, child_label)| {
                let column: Vec<Value> = partitions[ci]
                    .iter()
                    .map(|&p| source[p as usize].clone())
                    .collect();
                self.alloc(child_label, column)
            })
            .collect();

        if let WriterKind::Node { bitmask, .. } = &mut self.arena[id].kind {
            *bitmask = Some(PendingBitmask::OneOf { rle, domain, k });
        }
        Ok(branches)
    }
}
