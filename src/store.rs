//! In-memory tag container indexed three ways: by local id, by parent and by
//! case-insensitive name. Records live once, in the id map; the other two
//! indices hold local ids only.

use crate::error::TagError;
use crate::tag::{TagRecord, name_key};
use std::collections::{BTreeMap, BTreeSet};

/// Bucket a record sits in within the parent index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParentKey {
    /// The user's own top-level tags.
    Root,
    /// Top-level tags of one linked notebook.
    LinkedRoot(String),
    /// Children of a tag.
    Tag(String),
}

impl ParentKey {
    pub fn of(record: &TagRecord) -> Self {
        Self::for_parent(record.parent_local_id.as_deref(), record.linked_scope())
    }

    pub fn for_parent(parent: Option<&str>, linked: Option<&str>) -> Self {
        match (parent, linked) {
            (Some(p), _) => ParentKey::Tag(p.to_string()),
            (None, Some(l)) => ParentKey::LinkedRoot(l.to_string()),
            (None, None) => ParentKey::Root,
        }
    }

    pub fn parent_local_id(&self) -> Option<&str> {
        match self {
            ParentKey::Tag(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct TagStore {
    records: BTreeMap<String, TagRecord>,
    by_parent: BTreeMap<ParentKey, Vec<String>>,
    by_name: BTreeMap<String, BTreeSet<String>>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, local_id: &str) -> bool {
        self.records.contains_key(local_id)
    }

    pub fn get(&self, local_id: &str) -> Option<&TagRecord> {
        self.records.get(local_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagRecord> {
        self.records.values()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_parent.clear();
        self.by_name.clear();
    }

    /// Append a record to the end of its parent's children.
    pub fn insert(&mut self, record: TagRecord) -> Result<usize, TagError> {
        self.insert_at(record, None)
    }

    /// Insert a record at `row` among its siblings (clamped; `None` appends).
    /// Returns the row it landed on. Duplicate names are tolerated here.
    pub fn insert_at(
        &mut self,
        record: TagRecord,
        row: Option<usize>,
    ) -> Result<usize, TagError> {
        if self.records.contains_key(&record.local_id) {
            return Err(TagError::Internal(format!(
                "duplicate local id {}",
                record.local_id
            )));
        }
        let id = record.local_id.clone();
        self.by_name.entry(record.name_key()).or_default().insert(id.clone());
        let siblings = self.by_parent.entry(ParentKey::of(&record)).or_default();
        let row = row.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(row, id.clone());
        self.records.insert(id, record);
        Ok(row)
    }

    /// Remove a record from all indices. Children keep pointing at the erased
    /// parent; callers cascade explicitly.
    pub fn erase(&mut self, local_id: &str) -> Option<TagRecord> {
        let record = self.records.remove(local_id)?;
        self.unlink_parent(&ParentKey::of(&record), local_id);
        self.unlink_name(&record.name_key(), local_id);
        Some(record)
    }

    fn unlink_parent(&mut self, key: &ParentKey, local_id: &str) {
        if let Some(siblings) = self.by_parent.get_mut(key) {
            siblings.retain(|id| id != local_id);
            if siblings.is_empty() {
                self.by_parent.remove(key);
            }
        }
    }

    fn unlink_name(&mut self, key: &str, local_id: &str) {
        if let Some(ids) = self.by_name.get_mut(key) {
            ids.remove(local_id);
            if ids.is_empty() {
                self.by_name.remove(key);
            }
        }
    }

    pub fn child_ids(&self, key: &ParentKey) -> &[String] {
        self.by_parent.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Children of a parent in display order.
    pub fn children_of(&self, key: &ParentKey) -> Vec<&TagRecord> {
        self.child_ids(key)
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    pub fn row_of(&self, local_id: &str) -> Option<usize> {
        let record = self.records.get(local_id)?;
        self.child_ids(&ParentKey::of(record))
            .iter()
            .position(|id| id == local_id)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&TagRecord> {
        self.by_name
            .get(&name_key(name))
            .and_then(|ids| ids.iter().next())
            .and_then(|id| self.records.get(id))
    }

    /// A record other than `except` already using `name`, if any.
    pub fn name_conflict(
        &self,
        name: &str,
        except: Option<&str>,
    ) -> Option<&TagRecord> {
        self.by_name
            .get(&name_key(name))?
            .iter()
            .find(|id| Some(id.as_str()) != except)
            .and_then(|id| self.records.get(id))
    }

    /// Change a record's name, re-keying the name index only.
    pub fn rename(&mut self, local_id: &str, name: &str) -> Result<(), TagError> {
        let record = self
            .records
            .get_mut(local_id)
            .ok_or_else(|| TagError::NotFound(local_id.to_string()))?;
        let old_key = record.name_key();
        record.name = name.to_string();
        let new_key = record.name_key();
        if old_key != new_key {
            self.unlink_name(&old_key, local_id);
            self.by_name.entry(new_key).or_default().insert(local_id.to_string());
        }
        Ok(())
    }

    pub fn set_dirty(&mut self, local_id: &str, dirty: bool) {
        if let Some(record) = self.records.get_mut(local_id) {
            record.is_dirty = dirty;
        }
    }

    pub fn set_favorited(&mut self, local_id: &str, favorited: bool) {
        if let Some(record) = self.records.get_mut(local_id) {
            record.is_favorited = favorited;
        }
    }

    /// Move a record under `parent` at `row` (clamped; `None` appends). Moving
    /// within the same parent reorders. Returns the new row.
    pub fn reparent(
        &mut self,
        local_id: &str,
        parent: Option<&str>,
        row: Option<usize>,
    ) -> Result<usize, TagError> {
        let record = self
            .records
            .get_mut(local_id)
            .ok_or_else(|| TagError::NotFound(local_id.to_string()))?;
        let old_key = ParentKey::of(record);
        record.parent_local_id = parent.map(str::to_string);
        let new_key = ParentKey::of(record);
        self.unlink_parent(&old_key, local_id);
        let siblings = self.by_parent.entry(new_key).or_default();
        let row = row.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(row, local_id.to_string());
        Ok(row)
    }

    /// Overwrite a record's fields, keeping the indices in step. A changed
    /// parent appends the record to its new siblings.
    pub fn replace(&mut self, record: TagRecord) -> Result<(), TagError> {
        let current = self
            .records
            .get(&record.local_id)
            .ok_or_else(|| TagError::NotFound(record.local_id.clone()))?;
        let id = record.local_id.clone();
        let name_changed = current.name != record.name;
        let old_key = ParentKey::of(current);
        let new_key = ParentKey::of(&record);
        if name_changed {
            self.rename(&id, &record.name)?;
        }
        if old_key != new_key {
            self.unlink_parent(&old_key, &id);
            self.by_parent.entry(new_key).or_default().push(id.clone());
        }
        self.records.insert(id, record);
        Ok(())
    }

    /// Replace the display order of one parent's children. `order` must be a
    /// permutation of the current children.
    pub fn set_child_order(
        &mut self,
        key: &ParentKey,
        order: Vec<String>,
    ) -> Result<(), TagError> {
        let current = self.child_ids(key);
        let mut expected: Vec<&String> = current.iter().collect();
        let mut given: Vec<&String> = order.iter().collect();
        expected.sort();
        given.sort();
        if expected != given {
            return Err(TagError::Internal(format!(
                "child order for {key:?} is not a permutation"
            )));
        }
        if !order.is_empty() {
            self.by_parent.insert(key.clone(), order);
        }
        Ok(())
    }

    pub fn parent_keys(&self) -> Vec<ParentKey> {
        self.by_parent.keys().cloned().collect()
    }

    /// Linked notebooks that have at least one top-level tag.
    pub fn linked_scopes(&self) -> Vec<String> {
        self.by_parent
            .keys()
            .filter_map(|key| match key {
                ParentKey::LinkedRoot(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Parent chain of a record, nearest first. Stops on a missing parent and
    /// never loops more than the store size.
    pub fn ancestors(&self, local_id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self
            .records
            .get(local_id)
            .and_then(|r| r.parent_local_id.clone());
        while let Some(id) = current {
            if chain.len() > self.records.len() || id == local_id {
                break;
            }
            current = self.records.get(&id).and_then(|r| r.parent_local_id.clone());
            chain.push(id);
        }
        chain
    }

    /// True if `ancestor` appears in the parent chain of `local_id`.
    pub fn is_ancestor(&self, ancestor: &str, local_id: &str) -> bool {
        self.ancestors(local_id).iter().any(|id| id == ancestor)
    }

    /// All descendants of a record in pre-order.
    pub fn descendants(&self, local_id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack: Vec<String> = self
            .child_ids(&ParentKey::Tag(local_id.to_string()))
            .iter()
            .rev()
            .cloned()
            .collect();
        while let Some(id) = stack.pop() {
            if out.contains(&id) {
                continue;
            }
            stack.extend(
                self.child_ids(&ParentKey::Tag(id.clone())).iter().rev().cloned(),
            );
            out.push(id);
        }
        out
    }
}
