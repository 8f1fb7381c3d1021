//! File backed local storage service. It answers tag model requests against
//! a JSON catalog kept in the tags directory, next to a notebook file with
//! linked notebook restrictions and any markdown notes used for counts.

use crate::error::StorageError;
use crate::protocol::{
    ListOrder, NotebookRecord, Request, Response, SortDirection,
};
use crate::tag::{TagRecord, name_key};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CATALOG_FILE: &str = "tags.json";
pub const NOTEBOOKS_FILE: &str = "notebooks.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: Vec<TagRecord>,
}

#[derive(Debug)]
pub struct FileTagStorage {
    dir: PathBuf,
    catalog: Catalog,
}

impl FileTagStorage {
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        let path = dir.join(CATALOG_FILE);
        let catalog = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Catalog::default()
        };
        debug!(dir = %dir.display(), tags = catalog.tags.len(), "opened tag storage");
        Ok(Self { dir: dir.to_path_buf(), catalog })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.catalog.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.tags.is_empty()
    }

    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.catalog.saved_at
    }

    pub fn notebooks(&self) -> Result<Vec<NotebookRecord>, StorageError> {
        let path = self.dir.join(NOTEBOOKS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Insert or replace a notebook record, keyed by its linked notebook id.
    pub fn save_notebook(&self, notebook: NotebookRecord) -> Result<(), StorageError> {
        let mut notebooks = self.notebooks()?;
        notebooks.retain(|n| n.linked_notebook_id != notebook.linked_notebook_id);
        notebooks.push(notebook);
        fs::write(
            self.dir.join(NOTEBOOKS_FILE),
            serde_json::to_string_pretty(&notebooks)?,
        )?;
        Ok(())
    }

    /// Pick up changes written by other processes since the last read.
    fn reload(&mut self) -> Result<(), StorageError> {
        let path = self.dir.join(CATALOG_FILE);
        if path.exists() {
            self.catalog = serde_json::from_str(&fs::read_to_string(path)?)?;
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<(), StorageError> {
        self.catalog.saved_at = Some(Utc::now());
        fs::write(
            self.dir.join(CATALOG_FILE),
            serde_json::to_string_pretty(&self.catalog)?,
        )?;
        Ok(())
    }

    fn position(&self, local_id: &str) -> Option<usize> {
        self.catalog.tags.iter().position(|t| t.local_id == local_id)
    }

    fn name_taken(&self, tag: &TagRecord) -> bool {
        let key = tag.name_key();
        self.catalog
            .tags
            .iter()
            .any(|t| t.local_id != tag.local_id && t.name_key() == key)
    }

    /// Why `tag`'s parent link is unacceptable, if it is.
    fn parent_problem(&self, tag: &TagRecord) -> Option<String> {
        let parent_id = tag.parent_local_id.as_deref()?;
        let mut seen = HashSet::new();
        let mut current = Some(parent_id.to_string());
        while let Some(id) = current {
            if id == tag.local_id || !seen.insert(id.clone()) {
                return Some(format!("tag \"{}\" would become its own ancestor", tag.name));
            }
            let Some(parent) = self.catalog.tags.iter().find(|t| t.local_id == id) else {
                return Some(format!("parent tag {id} does not exist"));
            };
            current = parent.parent_local_id.clone();
        }
        None
    }

    fn descendants(&self, local_id: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut frontier = vec![local_id.to_string()];
        while let Some(id) = frontier.pop() {
            for tag in &self.catalog.tags {
                if tag.parent_local_id.as_deref() == Some(id.as_str())
                    && !out.contains(&tag.local_id)
                {
                    out.push(tag.local_id.clone());
                    frontier.push(tag.local_id.clone());
                }
            }
        }
        out
    }

    /// Count markdown notes whose `Tags:` header line names the tag.
    fn count_notes(&self, tag: &TagRecord) -> Result<usize, StorageError> {
        let key = tag.name_key();
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("md") {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            let header = raw.split("\n---\n").next().unwrap_or_default();
            let tagged = header
                .lines()
                .filter_map(|line| line.strip_prefix("Tags:"))
                .flat_map(|tags| tags.split(','))
                .map(|t| name_key(t.trim().trim_start_matches('#')))
                .any(|t| t == key);
            if tagged {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Serve one request. Every request yields exactly one response.
    pub fn handle(&mut self, request: Request) -> Response {
        match request {
            Request::AddTag { request_id, tag } => match self.add(tag.clone()) {
                Ok(tag) => Response::AddTagComplete { request_id, tag },
                Err(reason) => {
                    warn!(name = %tag.name, reason = %reason, "add rejected");
                    Response::AddTagFailed { request_id, tag, reason }
                }
            },
            Request::UpdateTag { request_id, tag } => match self.update(tag.clone()) {
                Ok(tag) => Response::UpdateTagComplete { request_id, tag },
                Err(reason) => {
                    warn!(name = %tag.name, reason = %reason, "update rejected");
                    Response::UpdateTagFailed { request_id, tag, reason }
                }
            },
            Request::ExpungeTag { request_id, tag } => match self.expunge(&tag) {
                Ok(expunged_child_ids) => {
                    Response::ExpungeTagComplete { request_id, tag, expunged_child_ids }
                }
                Err(reason) => {
                    warn!(name = %tag.name, reason = %reason, "expunge rejected");
                    Response::ExpungeTagFailed { request_id, tag, reason }
                }
            },
            Request::ListTags { request_id, offset, limit, order, direction, scope } => {
                // A listing cycle starts at offset 0; later pages read the
                // same snapshot so offsets stay stable.
                if offset == 0 {
                    if let Err(err) = self.reload() {
                        warn!(%err, "catalog reload failed");
                        return Response::ListTagsFailed { request_id, reason: err.to_string() };
                    }
                }
                let mut tags: Vec<TagRecord> =
                    self.catalog.tags.iter().filter(|t| scope.matches(t)).cloned().collect();
                match order {
                    ListOrder::ByName => tags.sort_by_key(|t| t.name_key()),
                    ListOrder::NoOrder => {}
                }
                if direction == SortDirection::Descending {
                    tags.reverse();
                }
                let tags = tags.into_iter().skip(offset).take(limit).collect();
                Response::ListTagsComplete { request_id, tags }
            }
            Request::NoteCountForTag { request_id, tag } => match self.count_notes(&tag) {
                Ok(count) => Response::NoteCountComplete { request_id, count },
                Err(err) => Response::NoteCountFailed { request_id, reason: err.to_string() },
            },
        }
    }

    fn add(&mut self, mut tag: TagRecord) -> Result<TagRecord, String> {
        self.reload().map_err(|e| e.to_string())?;
        if self.position(&tag.local_id).is_some() {
            return Err(format!("tag {} already exists", tag.local_id));
        }
        if self.name_taken(&tag) {
            return Err(format!("a tag named \"{}\" already exists", tag.name));
        }
        if let Some(problem) = self.parent_problem(&tag) {
            return Err(problem);
        }
        tag.is_dirty = false;
        self.catalog.tags.push(tag.clone());
        if let Err(err) = self.persist() {
            self.catalog.tags.pop();
            return Err(err.to_string());
        }
        Ok(tag)
    }

    fn update(&mut self, mut tag: TagRecord) -> Result<TagRecord, String> {
        self.reload().map_err(|e| e.to_string())?;
        let idx = self
            .position(&tag.local_id)
            .ok_or_else(|| format!("tag {} does not exist", tag.local_id))?;
        if self.name_taken(&tag) {
            return Err(format!("a tag named \"{}\" already exists", tag.name));
        }
        if let Some(problem) = self.parent_problem(&tag) {
            return Err(problem);
        }
        tag.is_dirty = false;
        let previous = std::mem::replace(&mut self.catalog.tags[idx], tag.clone());
        if let Err(err) = self.persist() {
            self.catalog.tags[idx] = previous;
            return Err(err.to_string());
        }
        Ok(tag)
    }

    fn expunge(&mut self, tag: &TagRecord) -> Result<Vec<String>, String> {
        self.reload().map_err(|e| e.to_string())?;
        if self.position(&tag.local_id).is_none() {
            return Err(format!("tag {} does not exist", tag.local_id));
        }
        let children = self.descendants(&tag.local_id);
        let previous = self.catalog.tags.clone();
        self.catalog
            .tags
            .retain(|t| t.local_id != tag.local_id && !children.contains(&t.local_id));
        if let Err(err) = self.persist() {
            self.catalog.tags = previous;
            return Err(err.to_string());
        }
        Ok(children)
    }
}
