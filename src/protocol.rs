//! Messages exchanged with the local storage service and the notebook
//! collaborator. Every request carries a correlation id that the matching
//! response echoes back.

use crate::tag::TagRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RequestId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    #[default]
    ByName,
    /// The order records were added to the catalog in.
    NoOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Which linked notebook scopes a listing covers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkedScope {
    #[default]
    All,
    OwnOnly,
    Linked(String),
}

impl LinkedScope {
    pub fn matches(&self, tag: &TagRecord) -> bool {
        match self {
            LinkedScope::All => true,
            LinkedScope::OwnOnly => tag.linked_scope().is_none(),
            LinkedScope::Linked(id) => tag.linked_scope() == Some(id.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    AddTag {
        request_id: RequestId,
        tag: TagRecord,
    },
    UpdateTag {
        request_id: RequestId,
        tag: TagRecord,
    },
    ExpungeTag {
        request_id: RequestId,
        tag: TagRecord,
    },
    ListTags {
        request_id: RequestId,
        offset: usize,
        limit: usize,
        order: ListOrder,
        direction: SortDirection,
        scope: LinkedScope,
    },
    NoteCountForTag {
        request_id: RequestId,
        tag: TagRecord,
    },
}

impl Request {
    pub fn request_id(&self) -> RequestId {
        match self {
            Request::AddTag { request_id, .. }
            | Request::UpdateTag { request_id, .. }
            | Request::ExpungeTag { request_id, .. }
            | Request::ListTags { request_id, .. }
            | Request::NoteCountForTag { request_id, .. } => *request_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    AddTagComplete {
        request_id: RequestId,
        tag: TagRecord,
    },
    AddTagFailed {
        request_id: RequestId,
        tag: TagRecord,
        reason: String,
    },
    UpdateTagComplete {
        request_id: RequestId,
        tag: TagRecord,
    },
    UpdateTagFailed {
        request_id: RequestId,
        tag: TagRecord,
        reason: String,
    },
    ExpungeTagComplete {
        request_id: RequestId,
        tag: TagRecord,
        expunged_child_ids: Vec<String>,
    },
    ExpungeTagFailed {
        request_id: RequestId,
        tag: TagRecord,
        reason: String,
    },
    ListTagsComplete {
        request_id: RequestId,
        tags: Vec<TagRecord>,
    },
    ListTagsFailed {
        request_id: RequestId,
        reason: String,
    },
    NoteCountComplete {
        request_id: RequestId,
        count: usize,
    },
    NoteCountFailed {
        request_id: RequestId,
        reason: String,
    },
}

impl Response {
    pub fn request_id(&self) -> RequestId {
        match self {
            Response::AddTagComplete { request_id, .. }
            | Response::AddTagFailed { request_id, .. }
            | Response::UpdateTagComplete { request_id, .. }
            | Response::UpdateTagFailed { request_id, .. }
            | Response::ExpungeTagComplete { request_id, .. }
            | Response::ExpungeTagFailed { request_id, .. }
            | Response::ListTagsComplete { request_id, .. }
            | Response::ListTagsFailed { request_id, .. }
            | Response::NoteCountComplete { request_id, .. }
            | Response::NoteCountFailed { request_id, .. } => *request_id,
        }
    }
}

/// Notebook-level restriction flags that matter for tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotebookRestrictions {
    #[serde(default)]
    pub no_create_tags: bool,
    #[serde(default)]
    pub no_update_tags: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookRecord {
    pub local_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_notebook_id: Option<String>,
    #[serde(default)]
    pub restrictions: NotebookRestrictions,
}

/// Notifications pushed by the notebook collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotebookEvent {
    Updated(NotebookRecord),
    Expunged(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linked_scope_filter() {
        let own = TagRecord::new("own");
        let shared = TagRecord::new("shared").with_linked_notebook(Some("nb"));
        assert!(LinkedScope::All.matches(&own));
        assert!(LinkedScope::OwnOnly.matches(&own));
        assert!(!LinkedScope::OwnOnly.matches(&shared));
        assert!(LinkedScope::Linked("nb".into()).matches(&shared));
        assert!(!LinkedScope::Linked("other".into()).matches(&shared));
    }

    #[test]
    fn test_response_carries_request_id() {
        let id = Uuid::new_v4();
        let response = Response::NoteCountComplete { request_id: id, count: 3 };
        assert_eq!(response.request_id(), id);
    }
}
