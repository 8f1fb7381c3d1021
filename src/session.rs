//! Drives a [`TagModel`] against [`FileTagStorage`] for one CLI invocation.

use crate::config::Config;
use crate::error::{StorageError, TagError};
use crate::model::TagModel;
use crate::protocol::NotebookEvent;
use crate::storage::FileTagStorage;
use crate::tokens::PositionToken;
use std::error::Error;
use tracing::{debug, info};

pub struct Session {
    storage: FileTagStorage,
    model: TagModel,
    errors: Vec<String>,
}

impl Session {
    /// Open storage, load notebook restrictions and list the whole catalog.
    pub fn open(config: &Config) -> Result<Self, StorageError> {
        let storage = FileTagStorage::open(&config.dir)?;
        let mut model = TagModel::new(config.model_config());
        for notebook in storage.notebooks()? {
            model.apply_notebook_event(NotebookEvent::Updated(notebook));
        }
        let mut session = Self { storage, model, errors: Vec::new() };
        session.model.start_listing();
        session.pump();
        info!(tags = session.model.store().len(), "tag catalog loaded");
        Ok(session)
    }

    pub fn model(&self) -> &TagModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut TagModel {
        &mut self.model
    }

    pub fn storage(&self) -> &FileTagStorage {
        &self.storage
    }

    /// Serve queued requests until the model stops issuing them. Returns the
    /// number of requests served.
    pub fn pump(&mut self) -> usize {
        let mut served = 0;
        loop {
            let requests = self.model.take_requests();
            if requests.is_empty() {
                break;
            }
            for request in requests {
                let response = self.storage.handle(request);
                self.model.handle_response(response);
                served += 1;
            }
        }
        for event in self.model.take_events() {
            if let Some(message) = event.error_message() {
                self.errors.push(message.to_string());
            }
        }
        debug!(served, "request queue drained");
        served
    }

    /// Local id and position token of the tag called `name`.
    pub fn find(&mut self, name: &str) -> Result<(String, PositionToken), TagError> {
        let local_id = self
            .model
            .tag_by_name(name)
            .map(|t| t.local_id.clone())
            .ok_or_else(|| TagError::NotFound(name.to_string()))?;
        let token = self
            .model
            .token_for(&local_id)
            .ok_or_else(|| TagError::NotFound(name.to_string()))?;
        Ok((local_id, token))
    }

    /// Drain remaining work; any error the model reported fails the run.
    pub fn finish(&mut self) -> Result<(), Box<dyn Error>> {
        self.pump();
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(&mut self.errors).join("\n").into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> Config {
        Config { dir: dir.to_path_buf(), page_size: 2, use_color: false }
    }

    #[test]
    fn test_created_tags_survive_reopen() {
        let tmp = tempdir().unwrap();
        let mut session = Session::open(&config(tmp.path())).unwrap();
        session.model_mut().create_tag("Work", None, None).unwrap();
        session.finish().unwrap();
        let (work, _) = session.find("work").unwrap();
        for name in ["Urgent", "Billing", "Invoices"] {
            session.model_mut().create_tag(name, Some(&work), None).unwrap();
        }
        session.finish().unwrap();

        let mut reopened = Session::open(&config(tmp.path())).unwrap();
        assert_eq!(reopened.model().store().len(), 4);
        let (_, urgent) = reopened.find("Urgent").unwrap();
        assert!(!reopened.model().tag_by_name("Urgent").unwrap().is_dirty);
        reopened.model_mut().promote(urgent).unwrap();
        reopened.finish().unwrap();
        assert!(reopened.model().tag_by_name("Urgent").unwrap().parent_local_id.is_none());
    }

    #[test]
    fn test_storage_rejections_fail_the_run() {
        let tmp = tempdir().unwrap();
        let mut session = Session::open(&config(tmp.path())).unwrap();
        session.model_mut().create_tag("Work", None, None).unwrap();
        session.finish().unwrap();

        let mut other = Session::open(&config(tmp.path())).unwrap();
        session.model_mut().create_tag("Home", None, None).unwrap();
        session.finish().unwrap();
        other.model_mut().create_tag("home", None, None).unwrap();
        assert!(other.finish().is_err());
        assert!(other.model().tag_by_name("home").is_none());
    }

    #[test]
    fn test_find_unknown_tag() {
        let tmp = tempdir().unwrap();
        let mut session = Session::open(&config(tmp.path())).unwrap();
        assert_eq!(session.find("nope"), Err(TagError::NotFound("nope".into())));
    }
}
