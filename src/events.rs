use crate::tokens::PositionToken;

/// Change notifications emitted by the tag model, drained by views and the
/// CLI. Row events use `None` for the invisible root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    FullCatalogListed,
    AboutToAddTag,
    AddedTag(PositionToken),
    AboutToUpdateTag(PositionToken),
    UpdatedTag(PositionToken),
    AboutToRemoveTags,
    RemovedTags,
    TagParentChanged(PositionToken),
    AboutToInsertRows {
        parent: Option<PositionToken>,
        first: usize,
        last: usize,
    },
    RowsInserted {
        parent: Option<PositionToken>,
        first: usize,
        last: usize,
    },
    AboutToRemoveRows {
        parent: Option<PositionToken>,
        first: usize,
        last: usize,
    },
    RowsRemoved {
        parent: Option<PositionToken>,
        first: usize,
        last: usize,
    },
    LayoutAboutToChange,
    LayoutChanged,
    ModelReset,
    Error(String),
}

impl ModelEvent {
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ModelEvent::Error(message) => Some(message),
            _ => None,
        }
    }
}
