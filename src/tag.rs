use crate::error::TagError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_NAME_LEN: usize = 100;

/// One tag of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub local_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_local_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_notebook_id: Option<String>,
    #[serde(default)]
    pub is_dirty: bool,
    #[serde(default)]
    pub is_favorited: bool,
    /// Local-only tags are never synchronized with the remote service.
    #[serde(default)]
    pub is_local: bool,
}

impl TagRecord {
    /// A fresh local tag with a generated local id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            remote_id: None,
            name: name.into(),
            parent_local_id: None,
            linked_notebook_id: None,
            is_dirty: true,
            is_favorited: false,
            is_local: false,
        }
    }

    pub fn with_parent(mut self, parent: Option<&str>) -> Self {
        self.parent_local_id = parent.map(str::to_string);
        self
    }

    pub fn with_linked_notebook(mut self, linked: Option<&str>) -> Self {
        self.linked_notebook_id = linked.map(str::to_string);
        self
    }

    pub fn is_synchronized(&self) -> bool {
        self.remote_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn is_synchronizable(&self) -> bool {
        !self.is_local
    }

    /// The linked notebook scope; an empty id counts as the user's own scope.
    pub fn linked_scope(&self) -> Option<&str> {
        self.linked_notebook_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }
}

/// Case-insensitive key used for name lookups and alphabetical ordering.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Trim a user supplied name and check it is acceptable as a tag name.
pub fn validate_name(name: &str) -> Result<String, TagError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TagError::EmptyName);
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(TagError::NameTooLong { max: MAX_NAME_LEN });
    }
    if let Some(ch) = trimmed.chars().find(|c| *c == ',' || c.is_control()) {
        return Err(TagError::ForbiddenChar(ch));
    }
    Ok(trimmed.to_string())
}

/// Hash a tag name for deterministic color selection
pub fn hash_tag(name: &str) -> u64 {
    let mut h: u64 = 5381;
    for b in name_key(name).bytes() {
        h = (h.wrapping_shl(5)).wrapping_add(h) ^ u64::from(b);
    }
    h
}

/// Get color for a tag based on hash
pub fn color_for_tag(name: &str) -> (u8, u8, u8) {
    const PALETTE: &[(u8, u8, u8)] = &[
        (137, 180, 250),
        (166, 227, 161),
        (249, 226, 175),
        (245, 194, 231),
        (255, 169, 167),
        (148, 226, 213),
        (198, 160, 246),
        (240, 198, 198),
        (181, 232, 224),
        (183, 189, 248),
        (255, 214, 165),
        (179, 255, 171),
        (196, 181, 255),
        (186, 225, 255),
        (255, 241, 173),
        (204, 255, 229),
    ];
    let h = hash_tag(name);
    PALETTE[(h as usize) % PALETTE.len()]
}
