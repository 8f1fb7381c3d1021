//! Correlation table for in-flight storage requests plus the state of the
//! paginated catalog listing.

use crate::protocol::RequestId;
use crate::tag::{TagRecord, name_key};
use std::collections::HashMap;
use uuid::Uuid;

/// A record to fall back to on rejection, with its row when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRecord {
    pub previous: TagRecord,
    pub row: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp {
    Add { local_id: String },
    /// `seq` orders updates issued for the same tag.
    Update { local_id: String, seq: u64 },
    Expunge { local_id: String },
    ListPage { offset: usize },
    NoteCount { local_id: String },
}

impl PendingOp {
    pub fn local_id(&self) -> Option<&str> {
        match self {
            PendingOp::Add { local_id }
            | PendingOp::Update { local_id, .. }
            | PendingOp::Expunge { local_id }
            | PendingOp::NoteCount { local_id } => Some(local_id),
            PendingOp::ListPage { .. } => None,
        }
    }
}

/// What to do with a tag once one of its updates is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Other updates for the tag are still in flight.
    Waiting,
    /// All updates are answered and the newest one was confirmed.
    Confirmed(TagRecord),
    /// All updates are answered and the newest one was rejected. Holds the
    /// newest state storage is known to have.
    RolledBack(UndoRecord),
}

#[derive(Debug, Clone)]
struct UpdateChain {
    /// Snapshot from before the first update, replaced by newer confirmations.
    base: UndoRecord,
    base_seq: u64,
    latest_seq: u64,
    in_flight: usize,
}

/// Orders the updates in flight per tag, so answers arriving out of order
/// settle on the newest state storage accepted.
#[derive(Debug, Default)]
pub struct UpdateLedger {
    chains: HashMap<String, UpdateChain>,
    next_seq: u64,
}

impl UpdateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an update for `local_id`. `snapshot` only counts when no
    /// other update for the tag is in flight.
    pub fn begin(&mut self, local_id: &str, snapshot: UndoRecord) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        let chain = self
            .chains
            .entry(local_id.to_string())
            .or_insert_with(|| UpdateChain {
                base: snapshot,
                base_seq: 0,
                latest_seq: 0,
                in_flight: 0,
            });
        chain.latest_seq = seq;
        chain.in_flight += 1;
        seq
    }

    pub fn confirmed(&mut self, local_id: &str, seq: u64, tag: TagRecord) -> Settlement {
        if let Some(chain) = self.chains.get_mut(local_id) {
            if seq > chain.base_seq {
                chain.base = UndoRecord { previous: tag, row: None };
                chain.base_seq = seq;
            }
        }
        self.answered(local_id)
    }

    pub fn rejected(&mut self, local_id: &str) -> Settlement {
        self.answered(local_id)
    }

    fn answered(&mut self, local_id: &str) -> Settlement {
        let Some(chain) = self.chains.get_mut(local_id) else {
            return Settlement::Waiting;
        };
        chain.in_flight = chain.in_flight.saturating_sub(1);
        if chain.in_flight > 0 {
            return Settlement::Waiting;
        }
        match self.chains.remove(local_id) {
            Some(chain) if chain.base_seq == chain.latest_seq => {
                Settlement::Confirmed(chain.base.previous)
            }
            Some(chain) => Settlement::RolledBack(chain.base),
            None => Settlement::Waiting,
        }
    }

    pub fn is_tracking(&self, local_id: &str) -> bool {
        self.chains.contains_key(local_id)
    }

    /// Replace the pre-update snapshot of a tag whose add was just confirmed.
    pub fn rebase(&mut self, local_id: &str, tag: &TagRecord) {
        if let Some(chain) = self.chains.get_mut(local_id) {
            if chain.base_seq == 0 {
                chain.base.previous = tag.clone();
            }
        }
    }

    /// Name another tag would take back if its updates were rejected.
    pub fn reserved_name(&self, name: &str, except: Option<&str>) -> Option<&str> {
        let key = name_key(name);
        self.chains
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != except)
            .map(|(_, chain)| chain.base.previous.name.as_str())
            .find(|held| name_key(held) == key)
    }

    pub fn clear(&mut self) {
        self.chains.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingProgress {
    NextPage(usize),
    Complete,
    /// The page belongs to a cycle that already ended.
    Stale,
}

#[derive(Debug)]
pub struct PendingTracker {
    ops: HashMap<RequestId, PendingOp>,
    page_size: usize,
    listing_active: bool,
    listing_complete: bool,
}

impl PendingTracker {
    pub fn new(page_size: usize) -> Self {
        Self {
            ops: HashMap::new(),
            page_size: page_size.max(1),
            listing_active: false,
            listing_complete: false,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn register(&mut self, op: PendingOp) -> RequestId {
        let id = Uuid::new_v4();
        self.ops.insert(id, op);
        id
    }

    /// Remove and return the operation a response belongs to.
    pub fn take(&mut self, id: &RequestId) -> Option<PendingOp> {
        self.ops.remove(id)
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.ops.contains_key(id)
    }

    /// Whether any add, update or expunge for `local_id` is still in flight.
    pub fn has_mutation_for(&self, local_id: &str) -> bool {
        self.ops.values().any(|op| {
            !matches!(op, PendingOp::NoteCount { .. } | PendingOp::ListPage { .. })
                && op.local_id() == Some(local_id)
        })
    }

    /// Start a listing cycle. Pages already in flight from an earlier cycle
    /// are evicted so their responses are ignored.
    pub fn begin_listing(&mut self) {
        self.ops.retain(|_, op| !matches!(op, PendingOp::ListPage { .. }));
        self.listing_active = true;
        self.listing_complete = false;
    }

    /// Record that a page came back with `received` records.
    pub fn page_received(&mut self, offset: usize, received: usize) -> ListingProgress {
        if !self.listing_active {
            return ListingProgress::Stale;
        }
        if received < self.page_size {
            self.listing_active = false;
            self.listing_complete = true;
            ListingProgress::Complete
        } else {
            ListingProgress::NextPage(offset + received)
        }
    }

    pub fn listing_failed(&mut self) {
        self.listing_active = false;
    }

    pub fn is_listing(&self) -> bool {
        self.listing_active
    }

    pub fn all_pending_listings_complete(&self) -> bool {
        self.listing_complete
            && !self.ops.values().any(|op| matches!(op, PendingOp::ListPage { .. }))
    }

    /// Drop every correlation id, e.g. on account switch.
    pub fn evict_all(&mut self) {
        self.ops.clear();
        self.listing_active = false;
        self.listing_complete = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_take() {
        let mut tracker = PendingTracker::new(10);
        let id = tracker.register(PendingOp::Add { local_id: "a".into() });
        assert!(tracker.has_mutation_for("a"));
        assert_eq!(
            tracker.take(&id),
            Some(PendingOp::Add { local_id: "a".into() })
        );
        assert!(tracker.take(&id).is_none());
        assert!(tracker.take(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_pagination_cycle() {
        let mut tracker = PendingTracker::new(2);
        assert!(!tracker.all_pending_listings_complete());
        tracker.begin_listing();
        let first = tracker.register(PendingOp::ListPage { offset: 0 });
        tracker.take(&first);
        assert_eq!(tracker.page_received(0, 2), ListingProgress::NextPage(2));
        let second = tracker.register(PendingOp::ListPage { offset: 2 });
        assert!(!tracker.all_pending_listings_complete());
        tracker.take(&second);
        assert_eq!(tracker.page_received(2, 1), ListingProgress::Complete);
        assert!(tracker.all_pending_listings_complete());
        assert_eq!(tracker.page_received(3, 0), ListingProgress::Stale);
    }

    #[test]
    fn test_restarting_listing_evicts_old_pages() {
        let mut tracker = PendingTracker::new(5);
        tracker.begin_listing();
        let old = tracker.register(PendingOp::ListPage { offset: 0 });
        tracker.begin_listing();
        assert!(!tracker.is_pending(&old));
    }

    #[test]
    fn test_evict_all() {
        let mut tracker = PendingTracker::new(5);
        let id = tracker.register(PendingOp::Expunge { local_id: "x".into() });
        tracker.evict_all();
        assert!(tracker.is_empty());
        assert!(tracker.take(&id).is_none());
    }

    fn snapshot(name: &str) -> UndoRecord {
        UndoRecord {
            previous: TagRecord { local_id: "u".into(), ..TagRecord::new(name) },
            row: Some(0),
        }
    }

    fn named(name: &str) -> TagRecord {
        TagRecord { local_id: "u".into(), ..TagRecord::new(name) }
    }

    #[test]
    fn test_older_confirmation_never_wins() {
        let mut ledger = UpdateLedger::new();
        let second = ledger.begin("u", snapshot("Urgent"));
        let third = ledger.begin("u", snapshot("Second"));
        assert_eq!(ledger.confirmed("u", third, named("Third")), Settlement::Waiting);
        assert_eq!(
            ledger.confirmed("u", second, named("Second")),
            Settlement::Confirmed(named("Third"))
        );
        assert!(!ledger.is_tracking("u"));
    }

    #[test]
    fn test_rejection_settles_on_newest_accepted_state() {
        let mut ledger = UpdateLedger::new();
        let first = ledger.begin("u", snapshot("Urgent"));
        ledger.begin("u", snapshot("Second"));
        assert_eq!(ledger.rejected("u"), Settlement::Waiting);
        let Settlement::RolledBack(undo) = ledger.confirmed("u", first, named("Second")) else {
            panic!("expected a rollback");
        };
        assert_eq!(undo.previous.name, "Second");
        assert_eq!(undo.row, None);

        ledger.begin("u", snapshot("Urgent"));
        assert_eq!(ledger.rejected("u"), Settlement::RolledBack(snapshot("Urgent")));
    }

    #[test]
    fn test_pending_rename_reserves_old_name() {
        let mut ledger = UpdateLedger::new();
        ledger.begin("u", snapshot("Urgent"));
        assert_eq!(ledger.reserved_name("URGENT", None), Some("Urgent"));
        assert_eq!(ledger.reserved_name("urgent", Some("u")), None);
        ledger.clear();
        assert_eq!(ledger.reserved_name("urgent", None), None);
    }

    #[test]
    fn test_note_counts_are_not_mutations() {
        let mut tracker = PendingTracker::new(5);
        tracker.register(PendingOp::NoteCount { local_id: "x".into() });
        assert!(!tracker.has_mutation_for("x"));
    }
}
