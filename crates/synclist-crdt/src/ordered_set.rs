//! Tombstoned ordered-set CRDT with last-writer-wins data fields.
//!
//! The set holds entries keyed by a stable string id and ordered by
//! fractional position. Removal tombstones an entry instead of erasing it,
//! so late-arriving operations still find their target and every replica
//! resolves conflicts the same way. Data fields and positions are two
//! independent LWW registers per entry, keyed on `(clock, actor)`.

use crate::clock::LogicalClock;
use crate::position::{self, Position};
use crate::{CrdtError, CrdtResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use synclist_common::{new_id, ActorId};

/// Data payload stored in an ordered-set entry.
///
/// A payload type brings its own patch type; `apply_patch` merges the
/// present fields and leaves the rest untouched.
pub trait EntryData: Clone + std::fmt::Debug + PartialEq {
    type Patch: Clone + std::fmt::Debug + PartialEq;

    fn apply_patch(&mut self, patch: &Self::Patch);
}

impl EntryData for crate::op::TaskData {
    type Patch = crate::op::TaskPatch;

    fn apply_patch(&mut self, patch: &Self::Patch) {
        if let Some(text) = &patch.text {
            self.text = text.clone();
        }
        if let Some(done) = patch.done {
            self.done = done;
        }
        if let Some(note) = &patch.note {
            self.note = note.clone();
        }
    }
}

impl EntryData for crate::op::ListMeta {
    type Patch = crate::op::ListPatch;

    fn apply_patch(&mut self, patch: &Self::Patch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
    }
}

/// The `(clock, actor)` pair stamped onto every emitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub clock: u64,
    pub actor: ActorId,
}

impl Stamp {
    /// Last-writer-wins comparison: higher clock wins, equal clocks break on
    /// the actor id (case-sensitive).
    fn wins_over(&self, clock: u64, actor: &ActorId) -> bool {
        (self.clock, &self.actor) > (clock, actor)
    }
}

/// One entry of the set, including tombstones.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<D> {
    pub id: String,
    pub pos: Position,
    pub data: D,
    pub created_at: u64,
    pub updated_at: u64,
    pub updated_by: ActorId,
    pub pos_updated_at: u64,
    pub pos_updated_by: ActorId,
    pub deleted_at: Option<u64>,
}

impl<D> Entry<D> {
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Tombstones drop any operation at or below their deletion clock.
    fn rejects(&self, clock: u64) -> bool {
        matches!(self.deleted_at, Some(deleted) if clock <= deleted)
    }
}

/// Serialised form of an entry inside an exported snapshot. The LWW actors
/// travel with the timestamps so tie-breaking replays identically after
/// hydration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound = "D: Serialize + DeserializeOwned")]
pub struct EntryState<D> {
    pub id: String,
    pub pos: Position,
    pub created_at: u64,
    pub updated_at: u64,
    pub updated_by: ActorId,
    pub pos_updated_at: u64,
    pub pos_updated_by: ActorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
    #[serde(flatten)]
    pub data: D,
}

impl<D: EntryData> From<&Entry<D>> for EntryState<D> {
    fn from(entry: &Entry<D>) -> Self {
        EntryState {
            id: entry.id.clone(),
            pos: entry.pos.clone(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            updated_by: entry.updated_by.clone(),
            pos_updated_at: entry.pos_updated_at,
            pos_updated_by: entry.pos_updated_by.clone(),
            deleted_at: entry.deleted_at,
            data: entry.data.clone(),
        }
    }
}

/// Where to place an inserted or moved entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    Start,
    End,
    After(String),
    Before(String),
    /// An exact, already-generated position; used when replaying history
    /// inverses and remote operations.
    At(Position),
}

/// The set-level operation shape, stamped by the envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOp<D: EntryData> {
    Insert {
        id: String,
        pos: Position,
        data: D,
    },
    Update {
        id: String,
        patch: D::Patch,
    },
    Move {
        id: String,
        pos: Position,
    },
    Remove {
        id: String,
    },
}

impl<D: EntryData> SetOp<D> {
    pub fn id(&self) -> &str {
        match self {
            SetOp::Insert { id, .. }
            | SetOp::Update { id, .. }
            | SetOp::Move { id, .. }
            | SetOp::Remove { id } => id,
        }
    }
}

/// Ordered collection of entries with tombstones and per-entry LWW fields.
#[derive(Debug, Clone)]
pub struct OrderedSet<D: EntryData> {
    clock: LogicalClock,
    entries: HashMap<String, Entry<D>>,
}

impl<D: EntryData> OrderedSet<D> {
    pub fn new(actor: ActorId) -> Self {
        Self {
            clock: LogicalClock::new(actor),
            entries: HashMap::new(),
        }
    }

    pub fn actor(&self) -> &ActorId {
        self.clock.actor()
    }

    pub fn clock_value(&self) -> u64 {
        self.clock.value()
    }

    /// Advance the clock and stamp an operation emitted outside the set
    /// itself (resource-level LWW scalars share the resource clock).
    pub(crate) fn next_stamp(&mut self) -> Stamp {
        Stamp {
            clock: self.clock.next(),
            actor: self.clock.actor().clone(),
        }
    }

    /// Observe a remote clock value without applying a set operation.
    pub(crate) fn observe(&mut self, clock: u64) {
        self.clock.observe(clock);
    }

    pub fn get(&self, id: &str) -> Option<&Entry<D>> {
        self.entries.get(id)
    }

    /// Live entries in visible order: by position, then id as tie-breaker.
    pub fn visible(&self) -> Vec<&Entry<D>> {
        let mut live: Vec<&Entry<D>> = self
            .entries
            .values()
            .filter(|e| !e.is_tombstoned())
            .collect();
        live.sort_by(|a, b| a.pos.cmp(&b.pos).then_with(|| a.id.cmp(&b.id)));
        live
    }

    pub fn visible_len(&self) -> usize {
        self.entries.values().filter(|e| !e.is_tombstoned()).count()
    }

    /// Resolve a placement to a concrete position between the visible
    /// neighbours it names.
    pub fn resolve_placement(&self, placement: &Placement) -> CrdtResult<Position> {
        let actor = self.clock.actor().clone();
        match placement {
            Placement::At(pos) => Ok(pos.clone()),
            Placement::Start => {
                let visible = self.visible();
                position::generate_between(None, visible.first().map(|e| &e.pos), &actor)
            }
            Placement::End => {
                let visible = self.visible();
                position::generate_between(visible.last().map(|e| &e.pos), None, &actor)
            }
            Placement::After(anchor) => {
                let (index, visible) = self.visible_index_of(anchor)?;
                position::generate_between(
                    Some(&visible[index].pos),
                    visible.get(index + 1).map(|e| &e.pos),
                    &actor,
                )
            }
            Placement::Before(anchor) => {
                let (index, visible) = self.visible_index_of(anchor)?;
                let left = index.checked_sub(1).map(|i| &visible[i].pos);
                position::generate_between(left, Some(&visible[index].pos), &actor)
            }
        }
    }

    fn visible_index_of<'a>(&'a self, id: &str) -> CrdtResult<(usize, Vec<&'a Entry<D>>)> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| CrdtError::EntryNotFound(id.to_string()))?;
        if entry.is_tombstoned() {
            return Err(CrdtError::Tombstoned(id.to_string()));
        }
        let visible = self.visible();
        let index = visible
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| CrdtError::EntryNotFound(id.to_string()))?;
        Ok((index, visible))
    }

    /// Insert a fresh entry and return the emitted op. Reusing a live id is
    /// `DuplicateId`; reusing a tombstoned one is rejected as `Tombstoned`.
    pub fn generate_insert(
        &mut self,
        id: Option<String>,
        data: D,
        placement: &Placement,
    ) -> CrdtResult<(Stamp, SetOp<D>)> {
        let id = id.unwrap_or_else(new_id);
        match self.entries.get(&id) {
            Some(existing) if existing.is_tombstoned() => {
                return Err(CrdtError::Tombstoned(id))
            }
            Some(_) => return Err(CrdtError::DuplicateId(id)),
            None => {}
        }
        let pos = self.resolve_placement(placement)?;
        let clock = self.clock.next();
        let actor = self.clock.actor().clone();
        self.entries.insert(
            id.clone(),
            Entry {
                id: id.clone(),
                pos: pos.clone(),
                data: data.clone(),
                created_at: clock,
                updated_at: clock,
                updated_by: actor.clone(),
                pos_updated_at: clock,
                pos_updated_by: actor.clone(),
                deleted_at: None,
            },
        );
        Ok((Stamp { clock, actor }, SetOp::Insert { id, pos, data }))
    }

    /// Merge the present patch fields into a live entry.
    pub fn generate_update(&mut self, id: &str, patch: D::Patch) -> CrdtResult<(Stamp, SetOp<D>)> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| CrdtError::EntryNotFound(id.to_string()))?;
        if entry.is_tombstoned() {
            return Err(CrdtError::Tombstoned(id.to_string()));
        }
        let clock = self.clock.next();
        let actor = self.clock.actor().clone();
        entry.data.apply_patch(&patch);
        entry.updated_at = clock;
        entry.updated_by = actor.clone();
        Ok((
            Stamp { clock, actor },
            SetOp::Update {
                id: id.to_string(),
                patch,
            },
        ))
    }

    /// Reposition a live entry. Returns `None` without emitting when the
    /// resolved position equals the current one.
    pub fn generate_move(
        &mut self,
        id: &str,
        placement: &Placement,
    ) -> CrdtResult<Option<(Stamp, SetOp<D>)>> {
        if !self.entries.contains_key(id) {
            return Err(CrdtError::EntryNotFound(id.to_string()));
        }
        let pos = self.resolve_placement(placement)?;
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| CrdtError::EntryNotFound(id.to_string()))?;
        if entry.is_tombstoned() {
            return Err(CrdtError::Tombstoned(id.to_string()));
        }
        if entry.pos == pos {
            return Ok(None);
        }
        let clock = self.clock.next();
        let actor = self.clock.actor().clone();
        entry.pos = pos.clone();
        entry.pos_updated_at = clock;
        entry.pos_updated_by = actor.clone();
        Ok(Some((
            Stamp { clock, actor },
            SetOp::Move {
                id: id.to_string(),
                pos,
            },
        )))
    }

    /// Tombstone a live entry.
    pub fn generate_remove(&mut self, id: &str) -> CrdtResult<(Stamp, SetOp<D>)> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| CrdtError::EntryNotFound(id.to_string()))?;
        if entry.is_tombstoned() {
            return Err(CrdtError::Tombstoned(id.to_string()));
        }
        let clock = self.clock.next();
        let actor = self.clock.actor().clone();
        entry.deleted_at = Some(clock);
        Ok((
            Stamp { clock, actor },
            SetOp::Remove { id: id.to_string() },
        ))
    }

    /// Apply an operation from any replica. Idempotent and commutative for
    /// every delivery order the sync channel produces; the clock is observed
    /// even when the operation is dropped. Returns whether state changed.
    pub fn apply(&mut self, stamp: &Stamp, op: &SetOp<D>) -> bool {
        self.clock.observe(stamp.clock);
        match op {
            SetOp::Insert { id, pos, data } => {
                if self.entries.contains_key(id) {
                    // Known id, live or tombstoned: the first insert wins.
                    return false;
                }
                self.entries.insert(
                    id.clone(),
                    Entry {
                        id: id.clone(),
                        pos: pos.clone(),
                        data: data.clone(),
                        created_at: stamp.clock,
                        updated_at: stamp.clock,
                        updated_by: stamp.actor.clone(),
                        pos_updated_at: stamp.clock,
                        pos_updated_by: stamp.actor.clone(),
                        deleted_at: None,
                    },
                );
                true
            }
            SetOp::Update { id, patch } => match self.entries.get_mut(id) {
                Some(entry) => {
                    if entry.rejects(stamp.clock) {
                        return false;
                    }
                    if !stamp.wins_over(entry.updated_at, &entry.updated_by) {
                        return false;
                    }
                    entry.data.apply_patch(patch);
                    entry.updated_at = stamp.clock;
                    entry.updated_by = stamp.actor.clone();
                    true
                }
                None => {
                    log::debug!("dropping update for unknown entry {id}");
                    false
                }
            },
            SetOp::Move { id, pos } => match self.entries.get_mut(id) {
                Some(entry) => {
                    if entry.rejects(stamp.clock) {
                        return false;
                    }
                    if !stamp.wins_over(entry.pos_updated_at, &entry.pos_updated_by) {
                        return false;
                    }
                    entry.pos = pos.clone();
                    entry.pos_updated_at = stamp.clock;
                    entry.pos_updated_by = stamp.actor.clone();
                    true
                }
                None => {
                    log::debug!("dropping move for unknown entry {id}");
                    false
                }
            },
            SetOp::Remove { id } => match self.entries.get_mut(id) {
                Some(entry) => {
                    if entry.is_tombstoned() {
                        return false;
                    }
                    entry.deleted_at = Some(stamp.clock);
                    true
                }
                None => {
                    log::debug!("dropping remove for unknown entry {id}");
                    false
                }
            },
        }
    }

    /// All entries, tombstones included, in position order, plus the clock.
    pub fn export_entries(&self) -> Vec<EntryState<D>> {
        let mut all: Vec<&Entry<D>> = self.entries.values().collect();
        all.sort_by(|a, b| a.pos.cmp(&b.pos).then_with(|| a.id.cmp(&b.id)));
        all.into_iter().map(EntryState::from).collect()
    }

    /// Replace the entry map and clock atomically from exported state.
    pub fn reset_from(&mut self, clock_value: u64, entries: Vec<EntryState<D>>) {
        self.entries.clear();
        for state in entries {
            self.entries.insert(
                state.id.clone(),
                Entry {
                    id: state.id,
                    pos: state.pos,
                    data: state.data,
                    created_at: state.created_at,
                    updated_at: state.updated_at,
                    updated_by: state.updated_by,
                    pos_updated_at: state.pos_updated_at,
                    pos_updated_by: state.pos_updated_by,
                    deleted_at: state.deleted_at,
                },
            );
        }
        self.clock.reset(clock_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{TaskData, TaskPatch};

    fn set(actor: &str) -> OrderedSet<TaskData> {
        OrderedSet::new(ActorId::new(actor))
    }

    fn task(text: &str) -> TaskData {
        TaskData {
            text: text.to_string(),
            ..TaskData::default()
        }
    }

    fn texts(set: &OrderedSet<TaskData>) -> Vec<String> {
        set.visible().iter().map(|e| e.data.text.clone()).collect()
    }

    #[test]
    fn inserts_keep_visible_order() {
        let mut s = set("a");
        let (_, _) = s
            .generate_insert(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        s.generate_insert(Some("t2".into()), task("two"), &Placement::End)
            .unwrap();
        s.generate_insert(Some("t0".into()), task("zero"), &Placement::Start)
            .unwrap();
        s.generate_insert(Some("t15".into()), task("mid"), &Placement::After("t1".into()))
            .unwrap();
        assert_eq!(texts(&s), vec!["zero", "one", "mid", "two"]);
    }

    #[test]
    fn duplicate_and_tombstoned_ids_are_rejected() {
        let mut s = set("a");
        s.generate_insert(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        assert!(matches!(
            s.generate_insert(Some("t1".into()), task("again"), &Placement::End),
            Err(CrdtError::DuplicateId(_))
        ));
        s.generate_remove("t1").unwrap();
        assert!(matches!(
            s.generate_insert(Some("t1".into()), task("zombie"), &Placement::End),
            Err(CrdtError::Tombstoned(_))
        ));
    }

    #[test]
    fn update_and_remove_preconditions() {
        let mut s = set("a");
        assert!(matches!(
            s.generate_update("nope", TaskPatch::default()),
            Err(CrdtError::EntryNotFound(_))
        ));
        s.generate_insert(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        s.generate_remove("t1").unwrap();
        assert!(matches!(
            s.generate_update("t1", TaskPatch::default()),
            Err(CrdtError::Tombstoned(_))
        ));
        assert!(matches!(
            s.generate_remove("t1"),
            Err(CrdtError::Tombstoned(_))
        ));
    }

    #[test]
    fn move_to_same_position_emits_nothing() {
        let mut s = set("a");
        s.generate_insert(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        s.generate_insert(Some("t2".into()), task("two"), &Placement::End)
            .unwrap();
        let current = s.get("t1").unwrap().pos.clone();
        assert!(s
            .generate_move("t1", &Placement::At(current))
            .unwrap()
            .is_none());
        assert!(s
            .generate_move("t1", &Placement::After("t2".into()))
            .unwrap()
            .is_some());
        assert_eq!(texts(&s), vec!["two", "one"]);
    }

    #[test]
    fn apply_is_idempotent() {
        let mut source = set("a");
        let ops = vec![
            source
                .generate_insert(Some("t1".into()), task("one"), &Placement::End)
                .unwrap(),
            source.generate_update(
                "t1",
                TaskPatch {
                    done: Some(true),
                    ..TaskPatch::default()
                },
            )
            .unwrap(),
            source.generate_remove("t1").unwrap(),
        ];

        let mut once = set("b");
        let mut twice = set("b");
        for (stamp, op) in &ops {
            once.apply(stamp, op);
            twice.apply(stamp, op);
            twice.apply(stamp, op);
        }
        assert_eq!(once.export_entries(), twice.export_entries());
        assert_eq!(once.clock_value(), twice.clock_value());
    }

    #[test]
    fn concurrent_updates_resolve_by_clock_then_actor() {
        // Same entry, same clock value, different actors: the higher actor
        // id must win on every replica regardless of delivery order.
        let mut seed = set("seed");
        let (insert_stamp, insert_op) = seed
            .generate_insert(Some("t1".into()), task("base"), &Placement::End)
            .unwrap();

        let update_a = (
            Stamp {
                clock: 5,
                actor: ActorId::new("alice"),
            },
            SetOp::Update {
                id: "t1".to_string(),
                patch: TaskPatch {
                    text: Some("from alice".to_string()),
                    ..TaskPatch::default()
                },
            },
        );
        let update_b = (
            Stamp {
                clock: 5,
                actor: ActorId::new("bob"),
            },
            SetOp::Update {
                id: "t1".to_string(),
                patch: TaskPatch {
                    text: Some("from bob".to_string()),
                    ..TaskPatch::default()
                },
            },
        );

        let mut forward = set("x");
        forward.apply(&insert_stamp, &insert_op);
        forward.apply(&update_a.0, &update_a.1);
        forward.apply(&update_b.0, &update_b.1);

        let mut reverse = set("y");
        reverse.apply(&insert_stamp, &insert_op);
        reverse.apply(&update_b.0, &update_b.1);
        reverse.apply(&update_a.0, &update_a.1);

        assert_eq!(forward.get("t1").unwrap().data.text, "from bob");
        assert_eq!(forward.export_entries(), reverse.export_entries());
    }

    #[test]
    fn moves_do_not_interfere_with_data_updates() {
        let mut seed = set("seed");
        let (s1, o1) = seed
            .generate_insert(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        let (s2, o2) = seed
            .generate_insert(Some("t2".into()), task("two"), &Placement::End)
            .unwrap();
        // A low-clock move must still land after a high-clock data update,
        // because positions version independently.
        let (s3, o3) = seed
            .generate_update(
                "t1",
                TaskPatch {
                    text: Some("renamed".to_string()),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        let (s4, o4) = seed.generate_move("t1", &Placement::After("t2".into())).unwrap().unwrap();

        let mut replica = set("r");
        for (stamp, op) in [(&s1, &o1), (&s2, &o2), (&s4, &o4), (&s3, &o3)] {
            replica.apply(stamp, op);
        }
        let entry = replica.get("t1").unwrap();
        assert_eq!(entry.data.text, "renamed");
        assert_eq!(texts(&replica), vec!["two", "renamed"]);
    }

    #[test]
    fn tombstones_are_final() {
        let mut seed = set("seed");
        let (s1, o1) = seed
            .generate_insert(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        let (s2, o2) = seed.generate_remove("t1").unwrap();

        let mut replica = set("r");
        replica.apply(&s1, &o1);
        replica.apply(&s2, &o2);

        // Update at the deletion clock: dropped.
        let stale = Stamp {
            clock: s2.clock,
            actor: ActorId::new("zzz"),
        };
        assert!(!replica.apply(
            &stale,
            &SetOp::Update {
                id: "t1".to_string(),
                patch: TaskPatch {
                    text: Some("ghost".to_string()),
                    ..TaskPatch::default()
                },
            }
        ));
        // Re-insert under the same id: dropped.
        let pos = replica.get("t1").unwrap().pos.clone();
        assert!(!replica.apply(
            &Stamp {
                clock: s2.clock + 1,
                actor: ActorId::new("zzz"),
            },
            &SetOp::Insert {
                id: "t1".to_string(),
                pos,
                data: task("ghost"),
            }
        ));
        assert_eq!(replica.visible_len(), 0);
        assert_eq!(replica.get("t1").unwrap().deleted_at, Some(s2.clock));
    }

    #[test]
    fn converges_under_interleaved_delivery() {
        // Two actors generate against their own replicas; every replica that
        // sees all ops in any per-actor-ordered interleaving converges.
        let mut a = set("alice");
        let mut b = set("bob");

        let mut ops_a = Vec::new();
        ops_a.push(
            a.generate_insert(Some("a1".into()), task("alpha"), &Placement::End)
                .unwrap(),
        );
        ops_a.push(
            a.generate_insert(Some("a2".into()), task("beta"), &Placement::End)
                .unwrap(),
        );
        let mut ops_b = Vec::new();
        ops_b.push(
            b.generate_insert(Some("b1".into()), task("gamma"), &Placement::End)
                .unwrap(),
        );
        ops_b.push(b.generate_remove("b1").unwrap());

        let mut first = set("r1");
        for (stamp, op) in ops_a.iter().chain(ops_b.iter()) {
            first.apply(stamp, op);
        }
        let mut second = set("r2");
        for (stamp, op) in ops_b.iter().chain(ops_a.iter()) {
            second.apply(stamp, op);
        }
        // Interleaved.
        let mut third = set("r3");
        third.apply(&ops_b[0].0, &ops_b[0].1);
        third.apply(&ops_a[0].0, &ops_a[0].1);
        third.apply(&ops_b[1].0, &ops_b[1].1);
        third.apply(&ops_a[1].0, &ops_a[1].1);

        assert_eq!(first.export_entries(), second.export_entries());
        assert_eq!(second.export_entries(), third.export_entries());
        assert_eq!(texts(&first), vec!["alpha", "beta"]);
    }

    #[test]
    fn snapshot_round_trip_preserves_behaviour() {
        let mut s = set("a");
        s.generate_insert(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        s.generate_insert(Some("t2".into()), task("two"), &Placement::End)
            .unwrap();
        s.generate_remove("t2").unwrap();

        let exported = s.export_entries();
        let clock = s.clock_value();

        let mut restored = set("a");
        restored.reset_from(clock, exported);
        assert_eq!(restored.export_entries(), s.export_entries());
        assert_eq!(restored.clock_value(), s.clock_value());

        // Future ops resolve identically on both.
        let (stamp, op) = s
            .generate_update(
                "t1",
                TaskPatch {
                    note: Some("note".to_string()),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        restored.apply(&stamp, &op);
        assert_eq!(restored.export_entries(), s.export_entries());
    }

    #[test]
    fn entry_state_serde_round_trip() {
        let mut s = set("a");
        s.generate_insert(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        let exported = s.export_entries();
        let json = serde_json::to_string(&exported).unwrap();
        let back: Vec<EntryState<TaskData>> = serde_json::from_str(&json).unwrap();
        assert_eq!(exported, back);
    }
}
