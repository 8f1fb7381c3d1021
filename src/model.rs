//! The tag model: an in-memory tag tree kept consistent with the local
//! storage service through correlated, fire-and-forget requests.
//!
//! Callers mutate through the methods here and in `mutator`, drain outgoing
//! requests with [`TagModel::take_requests`], feed responses back through
//! [`TagModel::handle_response`] and drain change notifications with
//! [`TagModel::take_events`].

use crate::error::TagError;
use crate::events::ModelEvent;
use crate::pending::{
    ListingProgress, PendingOp, PendingTracker, Settlement, UndoRecord, UpdateLedger,
};
use crate::protocol::{
    LinkedScope, ListOrder, NotebookEvent, Request, RequestId, Response,
    SortDirection,
};
use crate::restrictions::RestrictionEngine;
use crate::store::{ParentKey, TagStore};
use crate::tag::{TagRecord, validate_name};
use crate::tokens::{NodeKey, PositionBridge, PositionToken};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    #[default]
    Name,
    NoteCount,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub page_size: usize,
    pub sort_column: SortColumn,
    pub sort_direction: SortDirection,
    pub fetch_note_counts: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            sort_column: SortColumn::Name,
            sort_direction: SortDirection::Ascending,
            fetch_note_counts: true,
        }
    }
}

#[derive(Debug)]
pub struct TagModel {
    pub(crate) store: TagStore,
    pub(crate) tokens: PositionBridge,
    pub(crate) pending: PendingTracker,
    updates: UpdateLedger,
    pub(crate) restrictions: RestrictionEngine,
    pub(crate) note_counts: HashMap<String, usize>,
    pub(crate) sort_column: SortColumn,
    pub(crate) sort_direction: SortDirection,
    fetch_note_counts: bool,
    outbox: VecDeque<Request>,
    pub(crate) events: Vec<ModelEvent>,
}

impl TagModel {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            store: TagStore::new(),
            tokens: PositionBridge::new(),
            pending: PendingTracker::new(config.page_size),
            updates: UpdateLedger::new(),
            restrictions: RestrictionEngine::new(),
            note_counts: HashMap::new(),
            sort_column: config.sort_column,
            sort_direction: config.sort_direction,
            fetch_note_counts: config.fetch_note_counts,
            outbox: VecDeque::new(),
            events: Vec::new(),
        }
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    pub fn restrictions(&self) -> &RestrictionEngine {
        &self.restrictions
    }

    pub fn tag(&self, local_id: &str) -> Option<&TagRecord> {
        self.store.get(local_id)
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&TagRecord> {
        self.store.lookup_by_name(name)
    }

    pub fn note_count(&self, local_id: &str) -> Option<usize> {
        self.note_counts.get(local_id).copied()
    }

    pub fn sort_order(&self) -> (SortColumn, SortDirection) {
        (self.sort_column, self.sort_direction)
    }

    /// Token for a tag currently in the store.
    pub fn token_for(&mut self, local_id: &str) -> Option<PositionToken> {
        if !self.store.contains(local_id) {
            return None;
        }
        Some(self.tokens.token_for_tag(local_id))
    }

    /// Local id behind a token; `None` once the tag is gone.
    pub fn local_id_for(&self, token: PositionToken) -> Option<&str> {
        self.tokens.id_for(token)
    }

    pub fn take_requests(&mut self) -> Vec<Request> {
        self.outbox.drain(..).collect()
    }

    pub fn take_events(&mut self) -> Vec<ModelEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn has_pending_requests(&self) -> bool {
        !self.pending.is_empty() || !self.outbox.is_empty()
    }

    pub fn all_pending_listings_complete(&self) -> bool {
        self.pending.all_pending_listings_complete()
    }

    pub fn apply_notebook_event(&mut self, event: NotebookEvent) {
        self.restrictions.apply(event);
    }

    /// Begin a full paginated listing of the catalog.
    pub fn start_listing(&mut self) {
        info!(page_size = self.pending.page_size(), "listing tag catalog");
        self.pending.begin_listing();
        self.request_page(0);
    }

    /// Tear everything down (e.g. on account switch) and list from scratch.
    /// Responses to requests issued before the reset are ignored.
    pub fn reset(&mut self) {
        self.pending.evict_all();
        self.updates.clear();
        self.outbox.clear();
        self.store.clear();
        self.tokens.clear();
        self.note_counts.clear();
        self.events.push(ModelEvent::ModelReset);
        self.start_listing();
    }

    fn request_page(&mut self, offset: usize) {
        let limit = self.pending.page_size();
        let request_id = self.pending.register(PendingOp::ListPage { offset });
        debug!(%request_id, offset, limit, "requesting tag page");
        self.outbox.push_back(Request::ListTags {
            request_id,
            offset,
            limit,
            order: ListOrder::ByName,
            direction: SortDirection::Ascending,
            scope: LinkedScope::All,
        });
    }

    pub fn request_note_count(&mut self, local_id: &str) -> Result<(), TagError> {
        let tag = self
            .store
            .get(local_id)
            .cloned()
            .ok_or_else(|| TagError::NotFound(local_id.to_string()))?;
        let request_id = self
            .pending
            .register(PendingOp::NoteCount { local_id: local_id.to_string() });
        self.outbox.push_back(Request::NoteCountForTag { request_id, tag });
        Ok(())
    }

    fn ensure_listed(&self) -> Result<(), TagError> {
        if self.pending.all_pending_listings_complete() {
            Ok(())
        } else {
            Err(TagError::ListingInProgress)
        }
    }

    /// A name is free when no other tag holds it and no pending update
    /// would give it back to another tag on rejection.
    fn ensure_name_free(&self, name: &str, except: Option<&str>) -> Result<(), TagError> {
        if let Some(other) = self.store.name_conflict(name, except) {
            return Err(TagError::DuplicateName(other.name.clone()));
        }
        if let Some(held) = self.updates.reserved_name(name, except) {
            return Err(TagError::NameReserved(held.to_string()));
        }
        Ok(())
    }

    pub(crate) fn ensure_updatable(&self, tag: &TagRecord) -> Result<(), TagError> {
        if self.restrictions.can_update(tag.linked_scope()) {
            Ok(())
        } else {
            Err(TagError::UpdateRestricted(tag.name.clone()))
        }
    }

    /// Look up a record that must exist; a miss is an internal error.
    pub(crate) fn existing(&self, local_id: &str) -> Result<TagRecord, TagError> {
        self.store.get(local_id).cloned().ok_or_else(|| {
            error!(local_id, "tag referenced by the tree is missing");
            TagError::Internal(format!("tag {local_id} is missing"))
        })
    }

    pub(crate) fn resolve_token(&self, token: PositionToken) -> Result<String, TagError> {
        self.tokens
            .id_for(token)
            .map(str::to_string)
            .ok_or(TagError::InvalidToken)
    }

    /// Create a tag optimistically. The speculative record is removed again
    /// if storage rejects it.
    pub fn create_tag(
        &mut self,
        name: &str,
        parent: Option<&str>,
        linked_notebook: Option<&str>,
    ) -> Result<PositionToken, TagError> {
        self.ensure_listed()?;
        let name = validate_name(name)?;
        self.ensure_name_free(&name, None)?;
        let linked = linked_notebook.filter(|id| !id.is_empty());
        if let Some(parent_id) = parent {
            let parent = self
                .store
                .get(parent_id)
                .ok_or_else(|| TagError::NotFound(parent_id.to_string()))?;
            if parent.linked_scope() != linked {
                return Err(TagError::ScopeMismatch(name));
            }
        }
        if !self.restrictions.can_create(linked) {
            return Err(TagError::CreateRestricted(
                linked.unwrap_or_default().to_string(),
            ));
        }

        let tag = TagRecord::new(name)
            .with_parent(parent)
            .with_linked_notebook(linked);
        let local_id = tag.local_id.clone();
        let row = self.row_for_new_item(&ParentKey::of(&tag), &tag);
        self.events.push(ModelEvent::AboutToAddTag);
        self.insert_record(tag.clone(), Some(row))?;
        let token = self.tokens.token_for_tag(&local_id);
        self.events.push(ModelEvent::AddedTag(token));

        let request_id = self.pending.register(PendingOp::Add { local_id });
        debug!(%request_id, name = %tag.name, "requesting tag add");
        self.outbox.push_back(Request::AddTag { request_id, tag });
        Ok(token)
    }

    pub fn rename_tag(
        &mut self,
        local_id: &str,
        new_name: &str,
    ) -> Result<PositionToken, TagError> {
        self.ensure_listed()?;
        let current = self
            .store
            .get(local_id)
            .cloned()
            .ok_or_else(|| TagError::NotFound(local_id.to_string()))?;
        let name = validate_name(new_name)?;
        let token = self.tokens.token_for_tag(local_id);
        if name == current.name {
            return Ok(token);
        }
        self.ensure_name_free(&name, Some(local_id))?;
        self.ensure_updatable(&current)?;

        let undo = self.snapshot(&current)?;
        self.events.push(ModelEvent::AboutToUpdateTag(token));
        self.store.rename(local_id, &name)?;
        self.store.set_dirty(local_id, true);
        self.events.push(ModelEvent::UpdatedTag(token));
        self.issue_update(local_id, undo)?;
        Ok(token)
    }

    pub fn set_favorited(
        &mut self,
        local_id: &str,
        favorited: bool,
    ) -> Result<PositionToken, TagError> {
        self.ensure_listed()?;
        let current = self
            .store
            .get(local_id)
            .cloned()
            .ok_or_else(|| TagError::NotFound(local_id.to_string()))?;
        let token = self.tokens.token_for_tag(local_id);
        if current.is_favorited == favorited {
            return Ok(token);
        }
        self.ensure_updatable(&current)?;
        let undo = self.snapshot(&current)?;
        self.events.push(ModelEvent::AboutToUpdateTag(token));
        self.store.set_favorited(local_id, favorited);
        self.store.set_dirty(local_id, true);
        self.events.push(ModelEvent::UpdatedTag(token));
        self.issue_update(local_id, undo)?;
        Ok(token)
    }

    /// Ask storage to expunge a tag. Nothing is removed from memory until the
    /// expunge is confirmed.
    pub fn expunge_tag(&mut self, local_id: &str) -> Result<PositionToken, TagError> {
        let tag = self
            .store
            .get(local_id)
            .cloned()
            .ok_or_else(|| TagError::NotFound(local_id.to_string()))?;
        if tag.is_synchronized() {
            return Err(TagError::Synchronized(tag.name));
        }
        if let Some(descendant) = self
            .store
            .descendants(local_id)
            .iter()
            .filter_map(|id| self.store.get(id))
            .find(|d| d.is_synchronized())
        {
            return Err(TagError::SynchronizedDescendant {
                tag: tag.name.clone(),
                descendant: descendant.name.clone(),
            });
        }
        self.ensure_updatable(&tag)?;

        let token = self.tokens.token_for_tag(local_id);
        let request_id = self
            .pending
            .register(PendingOp::Expunge { local_id: local_id.to_string() });
        debug!(%request_id, name = %tag.name, "requesting tag expunge");
        self.outbox.push_back(Request::ExpungeTag { request_id, tag });
        Ok(token)
    }

    pub(crate) fn snapshot(&self, tag: &TagRecord) -> Result<UndoRecord, TagError> {
        let row = self.store.row_of(&tag.local_id).ok_or_else(|| {
            TagError::Internal(format!("tag {} has no row", tag.local_id))
        })?;
        Ok(UndoRecord { previous: tag.clone(), row: Some(row) })
    }

    pub(crate) fn issue_update(
        &mut self,
        local_id: &str,
        undo: UndoRecord,
    ) -> Result<(), TagError> {
        let tag = self.existing(local_id)?;
        let seq = self.updates.begin(local_id, undo);
        let request_id = self.pending.register(PendingOp::Update {
            local_id: local_id.to_string(),
            seq,
        });
        debug!(%request_id, seq, name = %tag.name, "requesting tag update");
        self.outbox.push_back(Request::UpdateTag { request_id, tag });
        Ok(())
    }

    /// Route a storage response to the operation that issued it.
    pub fn handle_response(&mut self, response: Response) {
        let request_id = response.request_id();
        let Some(op) = self.pending.take(&request_id) else {
            debug!(%request_id, "ignoring response to unknown request");
            return;
        };
        match (op, response) {
            (PendingOp::Add { local_id }, Response::AddTagComplete { tag, .. }) => {
                self.on_add_complete(&local_id, tag)
            }
            (PendingOp::Add { local_id }, Response::AddTagFailed { reason, .. }) => {
                self.on_add_failed(&local_id, &reason)
            }
            (
                PendingOp::Update { local_id, seq },
                Response::UpdateTagComplete { tag, .. },
            ) => self.on_update_complete(&local_id, seq, tag),
            (
                PendingOp::Update { local_id, .. },
                Response::UpdateTagFailed { reason, .. },
            ) => self.on_update_failed(&local_id, &reason),
            (
                PendingOp::Expunge { local_id },
                Response::ExpungeTagComplete { expunged_child_ids, .. },
            ) => self.on_expunge_complete(&local_id, &expunged_child_ids),
            (
                PendingOp::Expunge { local_id },
                Response::ExpungeTagFailed { reason, .. },
            ) => {
                warn!(local_id, reason, "tag expunge rejected");
                self.report(format!("Can't delete tag: {reason}"));
            }
            (PendingOp::ListPage { offset }, Response::ListTagsComplete { tags, .. }) => {
                self.on_page_listed(request_id, offset, tags)
            }
            (PendingOp::ListPage { offset }, Response::ListTagsFailed { reason, .. }) => {
                warn!(offset, reason, "tag listing failed");
                self.pending.listing_failed();
                self.report(format!("Can't list tags: {reason}"));
            }
            (
                PendingOp::NoteCount { local_id },
                Response::NoteCountComplete { count, .. },
            ) => self.on_note_count(&local_id, count),
            (
                PendingOp::NoteCount { local_id },
                Response::NoteCountFailed { reason, .. },
            ) => {
                warn!(local_id, reason, "note count failed");
            }
            (op, response) => {
                error!(%request_id, ?op, ?response, "response does not match request");
                self.report(format!(
                    "internal error: unexpected response to request {request_id}"
                ));
            }
        }
    }

    pub(crate) fn report(&mut self, message: String) {
        self.events.push(ModelEvent::Error(message));
    }

    fn on_add_complete(&mut self, local_id: &str, mut tag: TagRecord) {
        if !self.store.contains(local_id) {
            warn!(local_id, "added tag is no longer in the model");
            return;
        }
        tag.is_dirty = false;
        if self.updates.is_tracking(local_id) {
            // Updates issued since the add settle the record.
            self.updates.rebase(local_id, &tag);
        } else {
            self.apply_confirmed(tag);
        }
        if self.fetch_note_counts {
            // The tag was just confirmed, so the lookup can't miss.
            let _ = self.request_note_count(local_id);
        }
    }

    fn on_add_failed(&mut self, local_id: &str, reason: &str) {
        warn!(local_id, reason, "tag add rejected");
        if self.store.contains(local_id) {
            self.events.push(ModelEvent::AboutToRemoveTags);
            self.remove_subtree(local_id);
            self.events.push(ModelEvent::RemovedTags);
        }
        self.report(format!("Can't add tag: {reason}"));
    }

    fn on_update_complete(&mut self, local_id: &str, seq: u64, mut tag: TagRecord) {
        tag.is_dirty = false;
        let settlement = self.updates.confirmed(local_id, seq, tag);
        self.settle(local_id, settlement);
    }

    fn on_update_failed(&mut self, local_id: &str, reason: &str) {
        warn!(local_id, reason, "tag update rejected");
        let settlement = self.updates.rejected(local_id);
        self.settle(local_id, settlement);
        self.report(format!("Can't update tag: {reason}"));
    }

    /// Once every update of a tag is answered, bring the record to the
    /// newest state storage accepted.
    fn settle(&mut self, local_id: &str, settlement: Settlement) {
        if settlement == Settlement::Waiting {
            return;
        }
        if !self.store.contains(local_id) {
            warn!(local_id, "updated tag is no longer in the model");
            return;
        }
        match settlement {
            Settlement::Waiting => {}
            Settlement::Confirmed(tag) => self.apply_confirmed(tag),
            Settlement::RolledBack(undo) => {
                debug!(local_id, "rolling back tag update");
                let token = self.tokens.token_for_tag(local_id);
                self.events.push(ModelEvent::AboutToUpdateTag(token));
                if let Err(err) = self.restore(undo) {
                    error!(local_id, %err, "rollback failed");
                }
                self.events.push(ModelEvent::UpdatedTag(token));
            }
        }
    }

    /// Put back a rolled-back record. A parent that is gone or now sits
    /// below the tag is replaced by the top level of the tag's scope, and a
    /// name taken meanwhile by another tag is kept as it is now. Either
    /// adjustment is reported and persisted as a fresh update.
    fn restore(&mut self, undo: UndoRecord) -> Result<(), TagError> {
        let mut previous = undo.previous;
        let local_id = previous.local_id.clone();
        let current = self.existing(&local_id)?;
        let mut adjustments = Vec::new();

        let mut row = undo.row;
        if let Some(parent) = previous.parent_local_id.clone() {
            if parent == local_id
                || !self.store.contains(&parent)
                || self.store.is_ancestor(&local_id, &parent)
            {
                warn!(%local_id, %parent, "restored parent would break the tree");
                previous.parent_local_id = None;
                row = None;
                adjustments.push(format!(
                    "Tag \"{}\" was moved to the top level: its previous parent is no longer above it",
                    current.name
                ));
            }
        }
        if let Some(other) = self.store.name_conflict(&previous.name, Some(&local_id)) {
            warn!(name = %other.name, "restored name collides with another tag");
            adjustments.push(format!(
                "Tag \"{}\" keeps its name: \"{}\" is taken by another tag",
                current.name, other.name
            ));
            previous.name = current.name.clone();
        }

        let parent_changed = current.parent_local_id != previous.parent_local_id;
        let row_changed = row.is_some_and(|row| self.store.row_of(&local_id) != Some(row));
        if parent_changed || row_changed {
            self.move_record(&local_id, previous.parent_local_id.as_deref(), row)?;
            if parent_changed {
                let token = self.tokens.token_for_tag(&local_id);
                self.events.push(ModelEvent::TagParentChanged(token));
            }
        }
        if adjustments.is_empty() {
            return self.store.replace(previous);
        }

        previous.is_dirty = true;
        self.store.replace(previous.clone())?;
        for message in adjustments {
            self.report(message);
        }
        let undo = self.snapshot(&previous)?;
        self.issue_update(&local_id, undo)
    }

    fn on_expunge_complete(&mut self, local_id: &str, expunged_child_ids: &[String]) {
        if !self.store.contains(local_id) {
            warn!(local_id, "expunged tag is no longer in the model");
            return;
        }
        self.events.push(ModelEvent::AboutToRemoveTags);
        self.remove_subtree(local_id);
        for child in expunged_child_ids {
            if self.store.contains(child) {
                self.remove_subtree(child);
            }
        }
        self.events.push(ModelEvent::RemovedTags);
    }

    fn on_page_listed(&mut self, request_id: RequestId, offset: usize, tags: Vec<TagRecord>) {
        debug!(%request_id, offset, count = tags.len(), "tag page listed");
        let received = tags.len();
        for tag in tags {
            let local_id = tag.local_id.clone();
            if self.store.contains(&local_id) {
                if !self.updates.is_tracking(&local_id) {
                    self.apply_confirmed(tag);
                }
            } else {
                let row = self.row_for_new_item(&ParentKey::of(&tag), &tag);
                self.events.push(ModelEvent::AboutToAddTag);
                if let Err(err) = self.insert_record(tag, Some(row)) {
                    error!(local_id, %err, "listed tag could not be inserted");
                    continue;
                }
                let token = self.tokens.token_for_tag(&local_id);
                self.events.push(ModelEvent::AddedTag(token));
            }
            if self.fetch_note_counts {
                let _ = self.request_note_count(&local_id);
            }
        }
        match self.pending.page_received(offset, received) {
            ListingProgress::NextPage(next) => self.request_page(next),
            ListingProgress::Complete => {
                info!(tags = self.store.len(), "tag catalog fully listed");
                self.events.push(ModelEvent::FullCatalogListed);
            }
            ListingProgress::Stale => {}
        }
    }

    fn on_note_count(&mut self, local_id: &str, count: usize) {
        if !self.store.contains(local_id) {
            debug!(local_id, "note count for a tag that is gone");
            return;
        }
        self.note_counts.insert(local_id.to_string(), count);
        let token = self.tokens.token_for_tag(local_id);
        self.events.push(ModelEvent::UpdatedTag(token));
    }

    /// Bring an existing record in line with what storage reports.
    fn apply_confirmed(&mut self, mut tag: TagRecord) {
        let local_id = tag.local_id.clone();
        let Some(current) = self.store.get(&local_id) else {
            return;
        };
        if let Some(parent) = tag.parent_local_id.as_deref() {
            if parent == local_id || self.store.is_ancestor(&local_id, parent) {
                warn!(local_id, parent, "confirmed parent sits below the tag, keeping placement");
                tag.parent_local_id = current.parent_local_id.clone();
            }
        }
        if *current == tag {
            return;
        }
        let moved = ParentKey::of(current) != ParentKey::of(&tag);
        let token = self.tokens.token_for_tag(&local_id);
        self.events.push(ModelEvent::AboutToUpdateTag(token));
        if moved {
            if let Err(err) = self.move_record(&local_id, tag.parent_local_id.as_deref(), None) {
                error!(local_id, %err, "could not move confirmed tag");
                return;
            }
            self.events.push(ModelEvent::TagParentChanged(token));
        }
        if let Err(err) = self.store.replace(tag) {
            error!(local_id, %err, "could not apply confirmed tag");
        }
        self.events.push(ModelEvent::UpdatedTag(token));
    }

    // Structural helpers. Each one announces the change, applies it to the
    // store and then confirms it, so a view re-querying in between sees a
    // consistent tree.

    /// Whether nodes in this bucket are reachable from the root.
    pub(crate) fn is_reachable(&self, key: &ParentKey) -> bool {
        let ParentKey::Tag(first) = key else {
            return true;
        };
        let mut current = first.clone();
        for _ in 0..=self.store.len() {
            let Some(record) = self.store.get(&current) else {
                return false;
            };
            match ParentKey::of(record) {
                ParentKey::Tag(next) => current = next,
                _ => return true,
            }
        }
        false
    }

    pub(crate) fn parent_token(&mut self, key: &ParentKey) -> Option<PositionToken> {
        match key {
            ParentKey::Root => None,
            ParentKey::LinkedRoot(linked) => {
                Some(self.tokens.token_for(NodeKey::LinkedNotebook(linked.clone())))
            }
            ParentKey::Tag(id) => Some(self.tokens.token_for_tag(id)),
        }
    }

    /// Row of a linked notebook group node under the root.
    pub(crate) fn group_row(&self, linked: &str) -> usize {
        self.store.child_ids(&ParentKey::Root).len()
            + self
                .store
                .linked_scopes()
                .iter()
                .filter(|scope| scope.as_str() < linked)
                .count()
    }

    fn insertion_site(
        &mut self,
        key: &ParentKey,
        row: usize,
    ) -> Option<(Option<PositionToken>, usize)> {
        if !self.is_reachable(key) {
            return None;
        }
        match key {
            ParentKey::LinkedRoot(linked) if self.store.child_ids(key).is_empty() => {
                Some((None, self.group_row(linked)))
            }
            _ => Some((self.parent_token(key), row)),
        }
    }

    fn removal_site(
        &mut self,
        key: &ParentKey,
        row: usize,
    ) -> Option<(Option<PositionToken>, usize)> {
        if !self.is_reachable(key) {
            return None;
        }
        match key {
            ParentKey::LinkedRoot(linked) if self.store.child_ids(key).len() == 1 => {
                Some((None, self.group_row(linked)))
            }
            _ => Some((self.parent_token(key), row)),
        }
    }

    fn release_empty_group(&mut self, key: &ParentKey) {
        if let ParentKey::LinkedRoot(linked) = key {
            if self.store.child_ids(key).is_empty() {
                self.tokens.release(&NodeKey::LinkedNotebook(linked.clone()));
            }
        }
    }

    pub(crate) fn insert_record(
        &mut self,
        tag: TagRecord,
        row: Option<usize>,
    ) -> Result<usize, TagError> {
        if self.store.contains(&tag.local_id) {
            error!(local_id = %tag.local_id, "duplicate local id");
            return Err(TagError::Internal(format!(
                "duplicate local id {}",
                tag.local_id
            )));
        }
        let key = ParentKey::of(&tag);
        let len = self.store.child_ids(&key).len();
        let row = row.unwrap_or(len).min(len);
        let site = self.insertion_site(&key, row);
        if let Some((parent, first)) = site {
            self.events.push(ModelEvent::AboutToInsertRows { parent, first, last: first });
        }
        let row = self.store.insert_at(tag, Some(row))?;
        if let Some((parent, first)) = site {
            self.events.push(ModelEvent::RowsInserted { parent, first, last: first });
        }
        Ok(row)
    }

    /// Erase a tag and everything below it, releasing their tokens.
    pub(crate) fn remove_subtree(&mut self, local_id: &str) -> Option<TagRecord> {
        let tag = self.store.get(local_id)?.clone();
        let key = ParentKey::of(&tag);
        let row = self.store.row_of(local_id)?;
        let site = self.removal_site(&key, row);
        if let Some((parent, first)) = site {
            self.events.push(ModelEvent::AboutToRemoveRows { parent, first, last: first });
        }
        for descendant in self.store.descendants(local_id) {
            self.store.erase(&descendant);
            self.tokens.release(&NodeKey::Tag(descendant.clone()));
            self.note_counts.remove(&descendant);
        }
        let removed = self.store.erase(local_id);
        self.tokens.release(&NodeKey::Tag(local_id.to_string()));
        self.note_counts.remove(local_id);
        self.release_empty_group(&key);
        if let Some((parent, first)) = site {
            self.events.push(ModelEvent::RowsRemoved { parent, first, last: first });
        }
        removed
    }

    /// Move a tag (with its subtree) under `parent` at `row`, as a
    /// remove-rows / insert-rows pair. The tag keeps its token.
    pub(crate) fn move_record(
        &mut self,
        local_id: &str,
        parent: Option<&str>,
        row: Option<usize>,
    ) -> Result<usize, TagError> {
        let mut tag = self.existing(local_id)?;
        let key = ParentKey::of(&tag);
        let old_row = self.store.row_of(local_id).ok_or_else(|| {
            TagError::Internal(format!("tag {local_id} has no row"))
        })?;
        let site = self.removal_site(&key, old_row);
        if let Some((parent, first)) = site {
            self.events.push(ModelEvent::AboutToRemoveRows { parent, first, last: first });
        }
        self.store.erase(local_id);
        self.release_empty_group(&key);
        if let Some((parent, first)) = site {
            self.events.push(ModelEvent::RowsRemoved { parent, first, last: first });
        }
        tag.parent_local_id = parent.map(str::to_string);
        self.insert_record(tag, row)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn tag(id: &str, name: &str, parent: Option<&str>) -> TagRecord {
        TagRecord {
            local_id: id.to_string(),
            remote_id: None,
            name: name.to_string(),
            parent_local_id: parent.map(str::to_string),
            linked_notebook_id: None,
            is_dirty: false,
            is_favorited: false,
            is_local: false,
        }
    }

    pub fn config() -> ModelConfig {
        ModelConfig { fetch_note_counts: false, ..ModelConfig::default() }
    }

    /// A model whose full listing returned `tags` in one page.
    pub fn loaded(tags: Vec<TagRecord>) -> TagModel {
        let mut model = TagModel::new(config());
        model.start_listing();
        let requests = model.take_requests();
        assert_eq!(requests.len(), 1);
        model.handle_response(Response::ListTagsComplete {
            request_id: requests[0].request_id(),
            tags,
        });
        assert!(model.all_pending_listings_complete());
        model.take_events();
        model
    }

    /// Work, with children Urgent, Billing and Invoices.
    pub fn work_catalog() -> TagModel {
        loaded(vec![
            tag("w", "Work", None),
            tag("u", "Urgent", Some("w")),
            tag("b", "Billing", Some("w")),
            tag("i", "Invoices", Some("w")),
        ])
    }

    /// Answer every outstanding request the way storage would on success.
    pub fn confirm_all(model: &mut TagModel) {
        for request in model.take_requests() {
            let response = match request {
                Request::AddTag { request_id, tag } => {
                    Response::AddTagComplete { request_id, tag }
                }
                Request::UpdateTag { request_id, tag } => {
                    Response::UpdateTagComplete { request_id, tag }
                }
                Request::ExpungeTag { request_id, tag } => {
                    Response::ExpungeTagComplete {
                        request_id,
                        tag,
                        expunged_child_ids: Vec::new(),
                    }
                }
                Request::ListTags { request_id, .. } => {
                    Response::ListTagsComplete { request_id, tags: Vec::new() }
                }
                Request::NoteCountForTag { request_id, .. } => {
                    Response::NoteCountComplete { request_id, count: 0 }
                }
            };
            model.handle_response(response);
        }
    }

    /// Reject every outstanding add/update/expunge.
    pub fn reject_all(model: &mut TagModel, reason: &str) {
        for request in model.take_requests() {
            let reason = reason.to_string();
            let response = match request {
                Request::AddTag { request_id, tag } => {
                    Response::AddTagFailed { request_id, tag, reason }
                }
                Request::UpdateTag { request_id, tag } => {
                    Response::UpdateTagFailed { request_id, tag, reason }
                }
                Request::ExpungeTag { request_id, tag } => {
                    Response::ExpungeTagFailed { request_id, tag, reason }
                }
                Request::ListTags { request_id, .. } => {
                    Response::ListTagsFailed { request_id, reason }
                }
                Request::NoteCountForTag { request_id, .. } => {
                    Response::NoteCountFailed { request_id, reason }
                }
            };
            model.handle_response(response);
        }
    }

    /// Storage's answer to a single update request.
    pub fn answer(request: Request, accept: bool) -> Response {
        match request {
            Request::UpdateTag { request_id, tag } if accept => {
                Response::UpdateTagComplete { request_id, tag }
            }
            Request::UpdateTag { request_id, tag } => Response::UpdateTagFailed {
                request_id,
                tag,
                reason: "rejected".into(),
            },
            other => panic!("expected an update request, got {other:?}"),
        }
    }

    /// Confirm requests until no new ones are issued.
    pub fn settle_all(model: &mut TagModel) {
        while !model.outbox.is_empty() {
            confirm_all(model);
        }
    }

    /// Every tag hangs off a root without cycles, and no two tags share a
    /// name ignoring case.
    pub fn assert_sound(model: &TagModel) {
        let mut seen = std::collections::HashSet::new();
        for tag in model.store.iter() {
            assert!(
                model.is_reachable(&ParentKey::of(tag)),
                "{} is cut off from the root",
                tag.name
            );
            assert!(seen.insert(tag.name_key()), "duplicate name {}", tag.name);
        }
    }

    pub fn names(model: &TagModel, key: &ParentKey) -> Vec<String> {
        model.store.children_of(key).iter().map(|t| t.name.clone()).collect()
    }

    pub fn errors(model: &mut TagModel) -> Vec<String> {
        model
            .take_events()
            .iter()
            .filter_map(|e| e.error_message().map(str::to_string))
            .collect()
    }
}
