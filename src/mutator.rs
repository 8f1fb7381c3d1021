//! Tree reshaping: promote, demote, re-parent, detach, insertion rows and
//! sorting. Every reshape validates against in-memory state first, then
//! applies the move optimistically and asks storage to persist it; a
//! rejection rolls the tag back once all of its updates are answered.

use crate::error::TagError;
use crate::events::ModelEvent;
use crate::model::{SortColumn, TagModel};
use crate::protocol::SortDirection;
use crate::store::ParentKey;
use crate::tag::TagRecord;
use crate::tokens::PositionToken;
use std::cmp::Ordering;
use tracing::debug;

impl TagModel {
    /// Make a tag a sibling of its parent, placed right after the parent.
    pub fn promote(&mut self, token: PositionToken) -> Result<PositionToken, TagError> {
        let local_id = self.resolve_token(token)?;
        let tag = self.existing(&local_id)?;
        let parent_id = tag
            .parent_local_id
            .clone()
            .ok_or_else(|| TagError::AlreadyTopLevel(tag.name.clone()))?;
        let parent = self.existing(&parent_id)?;
        self.ensure_updatable(&tag)?;
        match parent.parent_local_id.as_deref() {
            Some(grandparent_id) => {
                let grandparent = self.existing(grandparent_id)?;
                if grandparent.linked_scope() != tag.linked_scope() {
                    return Err(TagError::ScopeMismatch(tag.name));
                }
            }
            None if tag.linked_scope().is_some() => {
                return Err(TagError::ScopeMismatch(tag.name));
            }
            None => {}
        }
        let parent_row = self.store.row_of(&parent_id).ok_or_else(|| {
            TagError::Internal(format!("tag {parent_id} has no row"))
        })?;
        debug!(name = %tag.name, "promoting tag");
        self.apply_reshape(&local_id, parent.parent_local_id.as_deref(), Some(parent_row + 1))
    }

    /// Make a tag the last child of the sibling displayed right above it.
    pub fn demote(&mut self, token: PositionToken) -> Result<PositionToken, TagError> {
        let local_id = self.resolve_token(token)?;
        let tag = self.existing(&local_id)?;
        let key = ParentKey::of(&tag);
        let row = self.store.row_of(&local_id).ok_or_else(|| {
            TagError::Internal(format!("tag {local_id} has no row"))
        })?;
        if row == 0 {
            return Err(TagError::NoPrecedingSibling(tag.name));
        }
        let sibling_id = self
            .store
            .child_ids(&key)
            .get(row - 1)
            .cloned()
            .ok_or_else(|| TagError::Internal(format!("no sibling above {local_id}")))?;
        let sibling = self.existing(&sibling_id)?;
        self.ensure_updatable(&tag)?;
        self.ensure_updatable(&sibling)?;
        if sibling.linked_scope() != tag.linked_scope() {
            return Err(TagError::ScopeMismatch(tag.name));
        }
        debug!(name = %tag.name, parent = %sibling.name, "demoting tag");
        self.apply_reshape(&local_id, Some(&sibling_id), None)
    }

    /// Re-parent a tag under the tag called `parent_name`.
    pub fn move_to_parent(
        &mut self,
        token: PositionToken,
        parent_name: &str,
    ) -> Result<PositionToken, TagError> {
        if !self.all_pending_listings_complete() {
            return Err(TagError::ListingInProgress);
        }
        let local_id = self.resolve_token(token)?;
        let tag = self.existing(&local_id)?;
        let target = self
            .store
            .lookup_by_name(parent_name)
            .cloned()
            .ok_or_else(|| TagError::NotFound(parent_name.to_string()))?;
        if target.local_id == local_id || self.store.is_ancestor(&local_id, &target.local_id) {
            return Err(TagError::WouldCreateCycle { tag: tag.name, parent: target.name });
        }
        if target.linked_scope() != tag.linked_scope() {
            return Err(TagError::ScopeMismatch(tag.name));
        }
        self.ensure_updatable(&tag)?;
        if tag.parent_local_id.as_deref() == Some(target.local_id.as_str()) {
            return Ok(token);
        }
        let row = self.row_for_new_item(&ParentKey::Tag(target.local_id.clone()), &tag);
        debug!(name = %tag.name, parent = %target.name, "moving tag");
        self.apply_reshape(&local_id, Some(&target.local_id), Some(row))
    }

    /// Move a tag to the top level.
    pub fn remove_from_parent(&mut self, token: PositionToken) -> Result<PositionToken, TagError> {
        let local_id = self.resolve_token(token)?;
        let tag = self.existing(&local_id)?;
        if tag.linked_scope().is_some() {
            return Err(TagError::ScopeMismatch(tag.name));
        }
        if tag.parent_local_id.is_none() {
            return Err(TagError::AlreadyTopLevel(tag.name));
        }
        self.ensure_updatable(&tag)?;
        let row = self.row_for_new_item(&ParentKey::Root, &tag);
        debug!(name = %tag.name, "detaching tag from its parent");
        self.apply_reshape(&local_id, None, Some(row))
    }

    /// Row at which `candidate` keeps the children of `parent` sorted. Equal
    /// keys go after the existing ones.
    pub fn row_for_new_item(&self, parent: &ParentKey, candidate: &TagRecord) -> usize {
        let siblings: Vec<&TagRecord> = self
            .store
            .children_of(parent)
            .into_iter()
            .filter(|t| t.local_id != candidate.local_id)
            .collect();
        siblings.partition_point(|existing| {
            self.sort_ordering(existing, candidate) != Ordering::Greater
        })
    }

    /// Re-derive the order of every parent's children. Parents don't change.
    pub fn sort(&mut self, column: SortColumn, direction: SortDirection) {
        self.sort_column = column;
        self.sort_direction = direction;
        self.events.push(ModelEvent::LayoutAboutToChange);
        for key in self.store.parent_keys() {
            let mut children: Vec<TagRecord> =
                self.store.children_of(&key).into_iter().cloned().collect();
            children.sort_by(|a, b| self.sort_ordering(a, b));
            let order = children.into_iter().map(|t| t.local_id).collect();
            if let Err(err) = self.store.set_child_order(&key, order) {
                self.report(err.to_string());
            }
        }
        self.events.push(ModelEvent::LayoutChanged);
    }

    fn sort_ordering(&self, a: &TagRecord, b: &TagRecord) -> Ordering {
        let ordering = match self.sort_column {
            SortColumn::Name => a.name_key().cmp(&b.name_key()),
            SortColumn::NoteCount => {
                let count = |t: &TagRecord| self.note_counts.get(&t.local_id).copied().unwrap_or(0);
                count(a).cmp(&count(b))
            }
        };
        match self.sort_direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }

    fn apply_reshape(
        &mut self,
        local_id: &str,
        parent: Option<&str>,
        row: Option<usize>,
    ) -> Result<PositionToken, TagError> {
        let previous = self.existing(local_id)?;
        let undo = self.snapshot(&previous)?;
        let token = self.tokens.token_for_tag(local_id);
        self.move_record(local_id, parent, row)?;
        self.store.set_dirty(local_id, true);
        self.events.push(ModelEvent::TagParentChanged(token));
        self.issue_update(local_id, undo)?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TagError;
    use crate::events::ModelEvent;
    use crate::model::testing::*;
    use crate::model::{SortColumn, TagModel};
    use crate::protocol::{
        NotebookEvent, NotebookRecord, NotebookRestrictions, Request, SortDirection,
    };
    use crate::store::ParentKey;
    use crate::tag::TagRecord;

    fn key(id: &str) -> ParentKey {
        ParentKey::Tag(id.to_string())
    }

    #[test]
    fn test_promote_places_tag_after_parent() {
        let mut model = work_catalog();
        let urgent = model.token_for("u").unwrap();
        assert_eq!(model.promote(urgent), Ok(urgent));
        assert_eq!(names(&model, &ParentKey::Root), vec!["Work", "Urgent"]);
        assert_eq!(names(&model, &key("w")), vec!["Billing", "Invoices"]);
        assert!(model.tag("u").unwrap().parent_local_id.is_none());
        assert!(model.take_events().contains(&ModelEvent::TagParentChanged(urgent)));
        let requests = model.take_requests();
        assert!(matches!(&requests[..], [Request::UpdateTag { tag, .. }] if tag.parent_local_id.is_none()));
    }

    #[test]
    fn test_promote_top_level_fails() {
        let mut model = work_catalog();
        let work = model.token_for("w").unwrap();
        assert_eq!(model.promote(work), Err(TagError::AlreadyTopLevel("Work".into())));
        assert!(model.take_requests().is_empty());
    }

    #[test]
    fn test_demote_first_child_fails() {
        let mut model = work_catalog();
        let urgent = model.token_for("u").unwrap();
        model.promote(urgent).unwrap();
        confirm_all(&mut model);
        let billing = model.token_for("b").unwrap();
        let err = model.demote(billing).unwrap_err();
        assert_eq!(err, TagError::NoPrecedingSibling("Billing".into()));
        assert!(err.to_string().contains("no preceding sibling"));
        assert!(model.take_requests().is_empty());
    }

    #[test]
    fn test_demote_becomes_last_child_of_sibling_above() {
        let mut model = work_catalog();
        let invoices = model.token_for("i").unwrap();
        model.create_tag("Archive", Some("b"), None).unwrap();
        confirm_all(&mut model);
        model.demote(invoices).unwrap();
        assert_eq!(names(&model, &key("b")), vec!["Archive", "Invoices"]);
        assert_eq!(names(&model, &key("w")), vec!["Billing", "Urgent"]);
    }

    #[test]
    fn test_move_to_parent_rejects_cycles() {
        let mut model = work_catalog();
        let work = model.token_for("w").unwrap();
        assert!(matches!(
            model.move_to_parent(work, "urgent"),
            Err(TagError::WouldCreateCycle { .. })
        ));
        assert!(matches!(
            model.move_to_parent(work, "Work"),
            Err(TagError::WouldCreateCycle { .. })
        ));
        assert_eq!(
            model.move_to_parent(work, "missing"),
            Err(TagError::NotFound("missing".into()))
        );
    }

    #[test]
    fn test_move_to_parent_sorted_and_reverted_on_rejection() {
        let mut model = work_catalog();
        let urgent = model.token_for("u").unwrap();
        model.move_to_parent(urgent, "billing").unwrap();
        assert_eq!(names(&model, &key("b")), vec!["Urgent"]);
        assert_eq!(model.store().ancestors("u"), vec!["b", "w"]);
        reject_all(&mut model, "nope");
        assert_eq!(names(&model, &key("w")), vec!["Billing", "Invoices", "Urgent"]);
        assert!(names(&model, &key("b")).is_empty());
        assert_eq!(model.local_id_for(urgent), Some("u"));
    }

    #[test]
    fn test_promote_rollback_restores_row() {
        let mut model = work_catalog();
        let billing = model.token_for("b").unwrap();
        model.promote(billing).unwrap();
        reject_all(&mut model, "nope");
        assert_eq!(names(&model, &key("w")), vec!["Billing", "Invoices", "Urgent"]);
        assert_eq!(names(&model, &ParentKey::Root), vec!["Work"]);
    }

    #[test]
    fn test_remove_from_parent() {
        let mut model = work_catalog();
        let billing = model.token_for("b").unwrap();
        model.remove_from_parent(billing).unwrap();
        assert_eq!(names(&model, &ParentKey::Root), vec!["Billing", "Work"]);
        let work = model.token_for("w").unwrap();
        assert_eq!(
            model.remove_from_parent(work),
            Err(TagError::AlreadyTopLevel("Work".into()))
        );
    }

    #[test]
    fn test_linked_tags_stay_in_scope() {
        let mut model = loaded(vec![
            tag("w", "Work", None),
            TagRecord { linked_notebook_id: Some("nb".into()), ..tag("s", "Shared", None) },
            TagRecord {
                linked_notebook_id: Some("nb".into()),
                remote_id: Some("g".into()),
                ..tag("c", "Child", Some("s"))
            },
        ]);
        model.apply_notebook_event(NotebookEvent::Updated(NotebookRecord {
            local_id: "n".into(),
            linked_notebook_id: Some("nb".into()),
            restrictions: NotebookRestrictions::default(),
        }));
        let child = model.token_for("c").unwrap();
        assert_eq!(model.promote(child), Err(TagError::ScopeMismatch("Child".into())));
        assert_eq!(
            model.remove_from_parent(child),
            Err(TagError::ScopeMismatch("Child".into()))
        );
        assert_eq!(
            model.move_to_parent(child, "Work"),
            Err(TagError::ScopeMismatch("Child".into()))
        );
    }

    #[test]
    fn test_read_only_linked_notebook_blocks_reshape() {
        let mut model = loaded(vec![
            TagRecord { linked_notebook_id: Some("nb".into()), ..tag("a", "A", None) },
            TagRecord { linked_notebook_id: Some("nb".into()), ..tag("b", "B", None) },
        ]);
        let b = model.token_for("b").unwrap();
        assert_eq!(model.demote(b), Err(TagError::UpdateRestricted("B".into())));
    }

    #[test]
    fn test_no_cycles_after_mixed_operations() {
        let mut model = work_catalog();
        let tokens: Vec<_> = ["w", "u", "b", "i"]
            .iter()
            .map(|id| model.token_for(id).unwrap())
            .collect();
        for (i, token) in tokens.iter().enumerate() {
            let _ = model.demote(*token);
            let _ = model.move_to_parent(*token, ["Work", "Urgent", "Billing", "Invoices"][(i + 1) % 4]);
            let _ = model.promote(*token);
            confirm_all(&mut model);
        }
        for id in ["w", "u", "b", "i"] {
            assert!(!model.store().ancestors(id).iter().any(|a| a == id));
        }
    }

    #[test]
    fn test_rollback_never_reparents_under_a_descendant() {
        let mut model = loaded(vec![tag("a", "A", None), tag("b", "B", None)]);
        let a = model.token_for("a").unwrap();
        let b = model.token_for("b").unwrap();
        model.move_to_parent(a, "B").unwrap();
        model.remove_from_parent(a).unwrap();
        model.move_to_parent(b, "A").unwrap();
        let requests = model.take_requests();
        assert_eq!(requests.len(), 3);
        let mut requests = requests.into_iter();
        let (first, second, third) = (
            requests.next().unwrap(),
            requests.next().unwrap(),
            requests.next().unwrap(),
        );
        model.handle_response(answer(first, true));
        model.handle_response(answer(second, false));
        model.handle_response(answer(third, true));

        assert_eq!(model.tag("a").unwrap().parent_local_id, None);
        assert_eq!(model.tag("b").unwrap().parent_local_id.as_deref(), Some("a"));
        assert_eq!(names(&model, &ParentKey::Root), vec!["A"]);
        assert_eq!(names(&model, &key("a")), vec!["B"]);
        assert_sound(&model);
        assert!(errors(&mut model).iter().any(|e| e.contains("moved to the top level")));

        // The corrected placement is persisted.
        let requests = model.take_requests();
        assert!(matches!(
            &requests[..],
            [Request::UpdateTag { tag, .. }] if tag.local_id == "a" && tag.parent_local_id.is_none()
        ));
        for request in requests {
            model.handle_response(answer(request, true));
        }
        assert!(!model.tag("a").unwrap().is_dirty);
        assert!(!model.has_pending_requests());
    }

    /// Reshapes and renames across four tags, issued without waiting for
    /// storage. Each one is valid against the optimistic tree at the time.
    fn issue_batch(model: &mut TagModel) -> Vec<Request> {
        let [w, u, b, i] = ["w", "u", "b", "i"].map(|id| model.token_for(id).unwrap());
        model.move_to_parent(u, "Billing").unwrap();
        model.rename_tag("u", "Critical").unwrap();
        model.remove_from_parent(u).unwrap();
        model.move_to_parent(w, "Critical").unwrap();
        model.rename_tag("b", "Accounts").unwrap();
        model.move_to_parent(b, "Invoices").unwrap();
        model.remove_from_parent(i).unwrap();
        model.move_to_parent(u, "Accounts").unwrap();
        model.rename_tag("i", "Urgent").unwrap_err();
        model.take_requests()
    }

    /// Small deterministic generator for answer orders.
    fn next(seed: &mut u64) -> u64 {
        *seed ^= *seed << 13;
        *seed ^= *seed >> 7;
        *seed ^= *seed << 17;
        *seed
    }

    #[test]
    fn test_interleaved_answers_keep_tree_sound() {
        for round in 0..200u64 {
            let mut seed = round.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
            let mut model = work_catalog();
            let mut requests = issue_batch(&mut model);
            assert_eq!(requests.len(), 8);
            for idx in (1..requests.len()).rev() {
                let other = (next(&mut seed) % (idx as u64 + 1)) as usize;
                requests.swap(idx, other);
            }
            for request in requests {
                let accept = next(&mut seed) % 3 != 0;
                model.handle_response(answer(request, accept));
                assert_sound(&model);
            }
            settle_all(&mut model);
            assert_sound(&model);
            assert_eq!(model.store().len(), 4, "round {round}");
            assert!(model.store().iter().all(|t| !t.is_dirty), "round {round}");
        }
    }

    #[test]
    fn test_rejecting_batch_in_order_restores_catalog() {
        let mut model = work_catalog();
        for request in issue_batch(&mut model) {
            model.handle_response(answer(request, false));
        }
        assert!(model.take_requests().is_empty());
        assert_sound(&model);
        assert_eq!(names(&model, &ParentKey::Root), vec!["Work"]);
        let mut children = names(&model, &key("w"));
        children.sort();
        assert_eq!(children, vec!["Billing", "Invoices", "Urgent"]);
        let errors = errors(&mut model);
        assert_eq!(errors.len(), 8);
        assert!(errors.iter().all(|e| e.starts_with("Can't update tag")));
    }

    #[test]
    fn test_row_for_new_item_ties_go_last() {
        let model = loaded(vec![tag("a", "Same", None), tag("z", "Zulu", None)]);
        let candidate = tag("n", "same", None);
        assert_eq!(model.row_for_new_item(&ParentKey::Root, &candidate), 1);
    }

    #[test]
    fn test_sort_descending_keeps_parents() {
        let mut model = work_catalog();
        model.sort(SortColumn::Name, SortDirection::Descending);
        assert_eq!(names(&model, &key("w")), vec!["Urgent", "Invoices", "Billing"]);
        assert_eq!(model.tag("u").unwrap().parent_local_id.as_deref(), Some("w"));
        let events = model.take_events();
        assert_eq!(events.first(), Some(&ModelEvent::LayoutAboutToChange));
        assert_eq!(events.last(), Some(&ModelEvent::LayoutChanged));
        model.create_tag("Misc", Some("w"), None).unwrap();
        assert_eq!(
            names(&model, &key("w")),
            vec!["Urgent", "Misc", "Invoices", "Billing"]
        );
    }

    #[test]
    fn test_stale_token_is_rejected() {
        let mut model = work_catalog();
        let token = model.token_for("i").unwrap();
        model.expunge_tag("i").unwrap();
        confirm_all(&mut model);
        assert_eq!(model.promote(token), Err(TagError::InvalidToken));
    }
}
