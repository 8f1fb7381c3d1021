use thiserror::Error;

/// Why a tag operation was refused. The `Display` text doubles as the
/// human-readable reason surfaced to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("tag name is empty")]
    EmptyName,

    #[error("tag name is longer than {max} characters")]
    NameTooLong { max: usize },

    #[error("tag name can't contain '{0}'")]
    ForbiddenChar(char),

    #[error("a tag named \"{0}\" already exists")]
    DuplicateName(String),

    #[error("tag name \"{0}\" is held by a pending change")]
    NameReserved(String),

    #[error("tag not found: {0}")]
    NotFound(String),

    #[error("no tag is associated with this position")]
    InvalidToken,

    #[error("tag \"{0}\" is already at the top level")]
    AlreadyTopLevel(String),

    #[error("tag \"{0}\" has no preceding sibling to become its parent")]
    NoPrecedingSibling(String),

    #[error("moving \"{tag}\" under \"{parent}\" would create a cycle")]
    WouldCreateCycle { tag: String, parent: String },

    #[error("tag \"{0}\" can't leave its linked notebook scope")]
    ScopeMismatch(String),

    #[error("tags can't be created in linked notebook {0}")]
    CreateRestricted(String),

    #[error("tag \"{0}\" can't be updated: its linked notebook restricts tag updates")]
    UpdateRestricted(String),

    #[error("tag \"{0}\" is synchronized and can't be deleted locally")]
    Synchronized(String),

    #[error("tag \"{tag}\" has synchronized descendant \"{descendant}\"")]
    SynchronizedDescendant { tag: String, descendant: String },

    #[error("a listing of the tag catalog is still in progress")]
    ListingInProgress,

    #[error("malformed drag and drop payload: {0}")]
    BadPayload(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TagError {
    /// Validation failures are detected before any backing-store request.
    pub fn is_validation(&self) -> bool {
        !matches!(self, TagError::Internal(_))
    }
}

/// Failures of the file backed local storage service.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_human_readable() {
        let err = TagError::NoPrecedingSibling("Billing".into());
        assert!(err.to_string().contains("no preceding sibling"));
        let err = TagError::DuplicateName("Work".into());
        assert_eq!(err.to_string(), "a tag named \"Work\" already exists");
    }

    #[test]
    fn internal_errors_are_not_validation() {
        assert!(TagError::EmptyName.is_validation());
        assert!(!TagError::Internal("x".into()).is_validation());
    }
}
