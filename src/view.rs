//! Tree view adapter: the row/column/parent contract a tree widget consumes,
//! expressed in position tokens. The invisible root is `None`.

use crate::error::TagError;
use crate::model::TagModel;
use crate::store::ParentKey;
use crate::tokens::{NodeKey, PositionToken};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const TAG_MIME_TYPE: &str = "application/x-quick-tags-tokens";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Name,
    Synchronizable,
    Dirty,
    FromLinkedNotebook,
    NoteCount,
}

impl Column {
    pub const ALL: [Column; 5] = [
        Column::Name,
        Column::Synchronizable,
        Column::Dirty,
        Column::FromLinkedNotebook,
        Column::NoteCount,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Column::Name => "Name",
            Column::Synchronizable => "Sync",
            Column::Dirty => "Dirty",
            Column::FromLinkedNotebook => "Linked",
            Column::NoteCount => "Notes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Text(String),
    Flag(bool),
    Count(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemFlags {
    pub selectable: bool,
    pub editable: bool,
    pub drag_enabled: bool,
    pub drop_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct DragPayload {
    tokens: Vec<PositionToken>,
}

impl TagModel {
    pub fn column_count(&self) -> usize {
        Column::ALL.len()
    }

    fn bucket_of(&self, parent: Option<PositionToken>) -> Option<ParentKey> {
        match parent {
            None => Some(ParentKey::Root),
            Some(token) => match self.tokens.node_for(token)? {
                NodeKey::Tag(id) if self.store.contains(id) => {
                    Some(ParentKey::Tag(id.clone()))
                }
                NodeKey::Tag(_) => None,
                NodeKey::LinkedNotebook(linked) => {
                    Some(ParentKey::LinkedRoot(linked.clone()))
                }
            },
        }
    }

    pub fn row_count(&self, parent: Option<PositionToken>) -> usize {
        match self.bucket_of(parent) {
            Some(ParentKey::Root) => {
                self.store.child_ids(&ParentKey::Root).len()
                    + self.store.linked_scopes().len()
            }
            Some(key) => self.store.child_ids(&key).len(),
            None => 0,
        }
    }

    /// Token of the node at `row` under `parent`, allocating it if needed.
    pub fn index(&mut self, row: usize, parent: Option<PositionToken>) -> Option<PositionToken> {
        let key = self.bucket_of(parent)?;
        let children = self.store.child_ids(&key);
        if let Some(id) = children.get(row) {
            let id = id.clone();
            return Some(self.tokens.token_for_tag(&id));
        }
        if key != ParentKey::Root {
            return None;
        }
        let linked = self.store.linked_scopes().get(row - children.len())?.clone();
        Some(self.tokens.token_for(NodeKey::LinkedNotebook(linked)))
    }

    pub fn parent(&mut self, token: PositionToken) -> Option<PositionToken> {
        let id = self.tokens.id_for(token)?;
        let key = ParentKey::of(self.store.get(id)?);
        self.parent_token(&key)
    }

    pub fn row(&self, token: PositionToken) -> Option<usize> {
        match self.tokens.node_for(token)? {
            NodeKey::Tag(id) => self.store.row_of(id),
            NodeKey::LinkedNotebook(linked) => self
                .store
                .linked_scopes()
                .contains(linked)
                .then(|| self.group_row(linked)),
        }
    }

    pub fn data(&self, token: PositionToken, column: Column) -> Option<CellValue> {
        match self.tokens.node_for(token)? {
            NodeKey::LinkedNotebook(linked) => match column {
                Column::Name => Some(CellValue::Text(linked.clone())),
                Column::FromLinkedNotebook => Some(CellValue::Flag(true)),
                _ => None,
            },
            NodeKey::Tag(id) => {
                let tag = self.store.get(id)?;
                Some(match column {
                    Column::Name => CellValue::Text(tag.name.clone()),
                    Column::Synchronizable => CellValue::Flag(tag.is_synchronizable()),
                    Column::Dirty => CellValue::Flag(tag.is_dirty),
                    Column::FromLinkedNotebook => {
                        CellValue::Flag(tag.linked_scope().is_some())
                    }
                    Column::NoteCount => {
                        CellValue::Count(self.note_counts.get(id).copied().unwrap_or(0))
                    }
                })
            }
        }
    }

    pub fn flags(&self, token: PositionToken) -> ItemFlags {
        match self.tokens.node_for(token) {
            Some(NodeKey::Tag(id)) => {
                let Some(tag) = self.store.get(id) else {
                    return ItemFlags::default();
                };
                let writable = self.restrictions.can_update(tag.linked_scope());
                ItemFlags {
                    selectable: true,
                    editable: writable,
                    drag_enabled: writable,
                    drop_enabled: writable,
                }
            }
            Some(NodeKey::LinkedNotebook(_)) => {
                ItemFlags { selectable: true, ..ItemFlags::default() }
            }
            None => ItemFlags::default(),
        }
    }

    /// Rename through the Name column.
    pub fn set_name(&mut self, token: PositionToken, name: &str) -> Result<PositionToken, TagError> {
        let local_id = self.resolve_token(token)?;
        self.rename_tag(&local_id, name)
    }

    pub fn mime_types(&self) -> &'static [&'static str] {
        &[TAG_MIME_TYPE]
    }

    /// Encode dragged tags as a token list.
    pub fn mime_data(&self, tokens: &[PositionToken]) -> Result<String, TagError> {
        if let Some(stale) = tokens.iter().find(|t| self.tokens.id_for(**t).is_none()) {
            debug!(token = %stale, "refusing to drag a non-tag node");
            return Err(TagError::InvalidToken);
        }
        serde_json::to_string(&DragPayload { tokens: tokens.to_vec() })
            .map_err(|e| TagError::BadPayload(e.to_string()))
    }

    /// Apply a drop: onto a tag re-parents, onto the root detaches. Stops at
    /// the first refused move; earlier moves stay applied.
    pub fn drop_mime_data(
        &mut self,
        payload: &str,
        parent: Option<PositionToken>,
    ) -> Result<Vec<PositionToken>, TagError> {
        let payload: DragPayload =
            serde_json::from_str(payload).map_err(|e| TagError::BadPayload(e.to_string()))?;
        let target_name = match parent {
            None => None,
            Some(token) => {
                let id = self.resolve_token(token)?;
                let target = self.existing(&id)?;
                if !self.restrictions.can_update(target.linked_scope()) {
                    return Err(TagError::UpdateRestricted(target.name));
                }
                Some(target.name)
            }
        };
        let mut moved = Vec::new();
        for token in payload.tokens {
            let local_id = self.resolve_token(token)?;
            let tag = self.existing(&local_id)?;
            let result = match &target_name {
                Some(name) => self.move_to_parent(token, name)?,
                None if tag.parent_local_id.is_none() => token,
                None => self.remove_from_parent(token)?,
            };
            moved.push(result);
        }
        Ok(moved)
    }
}
