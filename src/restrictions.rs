use crate::protocol::{NotebookEvent, NotebookRecord};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagRestrictions {
    pub can_create_tags: bool,
    pub can_update_tags: bool,
}

/// Per linked notebook write permissions for tags. The user's own tags are
/// always writable; linked notebooks nobody told us about are not.
#[derive(Debug, Default)]
pub struct RestrictionEngine {
    by_linked_notebook: HashMap<String, TagRestrictions>,
    linked_by_notebook: HashMap<String, String>,
}

impl RestrictionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: NotebookEvent) {
        match event {
            NotebookEvent::Updated(record) => self.notebook_updated(&record),
            NotebookEvent::Expunged(local_id) => self.notebook_expunged(&local_id),
        }
    }

    pub fn notebook_updated(&mut self, notebook: &NotebookRecord) {
        let Some(linked) =
            notebook.linked_notebook_id.as_deref().filter(|id| !id.is_empty())
        else {
            return;
        };
        let restrictions = TagRestrictions {
            can_create_tags: !notebook.restrictions.no_create_tags,
            can_update_tags: !notebook.restrictions.no_update_tags,
        };
        debug!(linked, ?restrictions, "tag restrictions updated");
        self.linked_by_notebook
            .insert(notebook.local_id.clone(), linked.to_string());
        self.by_linked_notebook.insert(linked.to_string(), restrictions);
    }

    pub fn notebook_expunged(&mut self, notebook_local_id: &str) {
        if let Some(linked) = self.linked_by_notebook.remove(notebook_local_id) {
            debug!(linked, "tag restrictions dropped");
            self.by_linked_notebook.remove(&linked);
        }
    }

    pub fn restrictions(&self, linked: Option<&str>) -> TagRestrictions {
        match linked {
            None => TagRestrictions { can_create_tags: true, can_update_tags: true },
            Some(id) => self.by_linked_notebook.get(id).copied().unwrap_or(
                TagRestrictions { can_create_tags: false, can_update_tags: false },
            ),
        }
    }

    pub fn can_create(&self, linked: Option<&str>) -> bool {
        self.restrictions(linked).can_create_tags
    }

    pub fn can_update(&self, linked: Option<&str>) -> bool {
        self.restrictions(linked).can_update_tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NotebookRestrictions;

    fn notebook(id: &str, linked: &str, no_update: bool) -> NotebookRecord {
        NotebookRecord {
            local_id: id.to_string(),
            linked_notebook_id: Some(linked.to_string()),
            restrictions: NotebookRestrictions {
                no_create_tags: false,
                no_update_tags: no_update,
            },
        }
    }

    #[test]
    fn test_own_tags_always_writable() {
        let engine = RestrictionEngine::new();
        assert!(engine.can_create(None));
        assert!(engine.can_update(None));
    }

    #[test]
    fn test_unknown_linked_notebook_is_read_only() {
        let engine = RestrictionEngine::new();
        assert!(!engine.can_create(Some("nb")));
        assert!(!engine.can_update(Some("nb")));
    }

    #[test]
    fn test_updates_and_expunge() {
        let mut engine = RestrictionEngine::new();
        engine.apply(NotebookEvent::Updated(notebook("n1", "nb", true)));
        assert!(engine.can_create(Some("nb")));
        assert!(!engine.can_update(Some("nb")));
        engine.apply(NotebookEvent::Updated(notebook("n1", "nb", false)));
        assert!(engine.can_update(Some("nb")));
        engine.apply(NotebookEvent::Expunged("n1".into()));
        assert!(!engine.can_create(Some("nb")));
    }

    #[test]
    fn test_own_notebooks_are_ignored() {
        let mut engine = RestrictionEngine::new();
        engine.notebook_updated(&NotebookRecord {
            local_id: "n".into(),
            linked_notebook_id: None,
            restrictions: NotebookRestrictions {
                no_create_tags: true,
                no_update_tags: true,
            },
        });
        assert!(engine.can_create(None));
    }
}
