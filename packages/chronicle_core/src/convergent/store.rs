//! The replicated document store
//!
//! A DocStore owns the operation log for one shared document and
//! materializes it into three containers (nodes, meta, palette). Local
//! mutations are grouped into transactions that commit as a single
//! DeltaFrame; remote frames are applied atomically with author/seq
//! dedup so replay and duplication are no-ops. Applying the same set of
//! frames in any order yields identical materialized state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::horizon::{Horizon, PeerId, SeqNum};
use super::operation::{Container, DeltaFrame, Mutation, OpEnvelope, OpId, Value};

/// Materialized state of a single entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntryState {
    pub fields: BTreeMap<String, Value>,
}

impl EntryState {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Materialized state of one container.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContainerState {
    /// Existing entries, key -> resolved fields.
    pub entries: BTreeMap<String, EntryState>,
    /// Replicated sequences, name -> elements in converged order.
    pub lists: BTreeMap<String, Vec<Value>>,
}

/// Materialized state of the whole document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocState {
    pub nodes: ContainerState,
    pub meta: ContainerState,
    pub palette: ContainerState,
}

impl DocState {
    pub fn container(&self, container: Container) -> &ContainerState {
        match container {
            Container::Nodes => &self.nodes,
            Container::Meta => &self.meta,
            Container::Palette => &self.palette,
        }
    }

    /// Deterministic hash of the materialized state, for convergence
    /// checks between replicas.
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        for container in Container::ALL {
            let state = self.container(container);
            for (key, entry) in &state.entries {
                key.hash(&mut hasher);
                for (field, value) in &entry.fields {
                    field.hash(&mut hasher);
                    value.hash(&mut hasher);
                }
            }
            for (name, elements) in &state.lists {
                name.hash(&mut hasher);
                for element in elements {
                    element.hash(&mut hasher);
                }
            }
        }
        hasher.finish()
    }
}

/// Where a change originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// What one committed frame touched. Observers receive exactly one
/// ChangeSet per frame, never a partial view.
#[derive(Clone, Debug)]
pub struct ChangeSet {
    pub origin: ChangeOrigin,
    /// Entries written or removed, as (container, key).
    pub entries: Vec<(Container, String)>,
    /// Sequences appended to or erased from, as (container, name).
    pub lists: Vec<(Container, String)>,
}

impl ChangeSet {
    fn from_ops<'a>(origin: ChangeOrigin, ops: impl Iterator<Item = &'a OpEnvelope>) -> Self {
        let mut entries = Vec::new();
        let mut lists = Vec::new();
        for env in ops {
            match &env.op {
                Mutation::SetField { container, key, .. }
                | Mutation::RemoveKey { container, key } => {
                    let touched = (*container, key.clone());
                    if !entries.contains(&touched) {
                        entries.push(touched);
                    }
                }
                Mutation::Append {
                    container, list, ..
                }
                | Mutation::Erase {
                    container, list, ..
                } => {
                    let touched = (*container, list.clone());
                    if !lists.contains(&touched) {
                        lists.push(touched);
                    }
                }
            }
        }
        Self {
            origin,
            entries,
            lists,
        }
    }
}

/// A staged batch of mutations, committed atomically.
#[derive(Default)]
pub struct Transaction {
    muts: Vec<Mutation>,
}

impl Transaction {
    pub fn set_field(
        &mut self,
        container: Container,
        key: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) {
        self.muts
            .push(Mutation::set_field(container, key, field, value));
    }

    pub fn remove_key(&mut self, container: Container, key: impl Into<String>) {
        self.muts.push(Mutation::remove_key(container, key));
    }

    pub fn append(&mut self, container: Container, list: impl Into<String>, element: Value) {
        self.muts.push(Mutation::append(container, list, element));
    }

    pub fn erase(
        &mut self,
        container: Container,
        list: impl Into<String>,
        element: Value,
        observed: Vec<OpId>,
    ) {
        self.muts
            .push(Mutation::erase(container, list, element, observed));
    }

    pub fn is_empty(&self) -> bool {
        self.muts.is_empty()
    }
}

struct StoreInner {
    author: PeerId,
    next_seq: SeqNum,
    horizon: Horizon,
    /// All operations, ordered by (author, seq).
    ops: BTreeMap<(PeerId, SeqNum), OpEnvelope>,
    /// Index: (container, entry key) -> operations affecting that entry.
    entry_ops: HashMap<(Container, String), Vec<(PeerId, SeqNum)>>,
    /// Index: (container, list name) -> operations affecting that list.
    list_ops: HashMap<(Container, String), Vec<(PeerId, SeqNum)>>,
    /// Index: Append op ids by (container, list, element), for erases.
    append_ids: HashMap<(Container, String, Value), Vec<OpId>>,
}

impl StoreInner {
    /// Store an operation and update indexes. Returns false if the
    /// (author, seq) slot was already occupied (duplicate delivery).
    fn store_envelope(&mut self, env: OpEnvelope) -> bool {
        let slot = (env.author, env.seq);
        if self.ops.contains_key(&slot) {
            return false;
        }

        self.horizon.observe(env.author, env.seq);

        match &env.op {
            Mutation::SetField { container, key, .. } | Mutation::RemoveKey { container, key } => {
                self.entry_ops
                    .entry((*container, key.clone()))
                    .or_default()
                    .push(slot);
            }
            Mutation::Append {
                container,
                list,
                element,
            } => {
                self.list_ops
                    .entry((*container, list.clone()))
                    .or_default()
                    .push(slot);
                self.append_ids
                    .entry((*container, list.clone(), element.clone()))
                    .or_default()
                    .push(env.id);
            }
            Mutation::Erase {
                container, list, ..
            } => {
                self.list_ops
                    .entry((*container, list.clone()))
                    .or_default()
                    .push(slot);
            }
        }

        self.ops.insert(slot, env);
        true
    }

    /// Materialize a single entry from its operation history.
    ///
    /// A SetField survives unless some remove had observed it; the entry
    /// exists while any field write survives. Latest-wins resolves each
    /// field over the surviving writes.
    fn materialize_entry(&self, op_slots: &[(PeerId, SeqNum)]) -> Option<EntryState> {
        let ops: Vec<&OpEnvelope> = op_slots.iter().filter_map(|s| self.ops.get(s)).collect();

        let removes: Vec<&OpEnvelope> = ops
            .iter()
            .filter(|e| matches!(e.op, Mutation::RemoveKey { .. }))
            .copied()
            .collect();

        let surviving: Vec<&OpEnvelope> = ops
            .iter()
            .filter(|e| matches!(e.op, Mutation::SetField { .. }))
            .filter(|e| !removes.iter().any(|rem| rem.had_seen(e)))
            .copied()
            .collect();

        if surviving.is_empty() {
            return None;
        }

        let mut winners: HashMap<&str, &OpEnvelope> = HashMap::new();
        for env in &surviving {
            if let Mutation::SetField { field, .. } = &env.op {
                match winners.get(field.as_str()) {
                    Some(current) if !env.is_later_than(current) => {}
                    _ => {
                        winners.insert(field, env);
                    }
                }
            }
        }

        let mut entry = EntryState::default();
        for (field, env) in winners {
            if let Mutation::SetField { value, .. } = &env.op {
                entry.fields.insert(field.to_string(), value.clone());
            }
        }
        Some(entry)
    }

    /// Materialize a sequence: surviving appends in (timestamp, author,
    /// seq) order. An append survives unless an erase names its op id.
    fn materialize_list(&self, op_slots: &[(PeerId, SeqNum)]) -> Vec<Value> {
        let ops: Vec<&OpEnvelope> = op_slots.iter().filter_map(|s| self.ops.get(s)).collect();

        let mut erased: Vec<OpId> = Vec::new();
        for env in &ops {
            if let Mutation::Erase { observed, .. } = &env.op {
                erased.extend(observed.iter().copied());
            }
        }

        let mut appends: Vec<&OpEnvelope> = ops
            .iter()
            .filter(|e| matches!(e.op, Mutation::Append { .. }))
            .filter(|e| !erased.contains(&e.id))
            .copied()
            .collect();
        appends.sort_by_key(|e| (e.timestamp, e.author, e.seq));

        appends
            .into_iter()
            .filter_map(|e| match &e.op {
                Mutation::Append { element, .. } => Some(element.clone()),
                _ => None,
            })
            .collect()
    }

    fn container_state(&self, container: Container) -> ContainerState {
        let mut state = ContainerState::default();
        for ((c, key), slots) in &self.entry_ops {
            if *c != container {
                continue;
            }
            if let Some(entry) = self.materialize_entry(slots) {
                state.entries.insert(key.clone(), entry);
            }
        }
        for ((c, name), slots) in &self.list_ops {
            if *c != container {
                continue;
            }
            state.lists.insert(name.clone(), self.materialize_list(slots));
        }
        state
    }
}

/// The replicated document handle. Cheap to share; all services hold the
/// same `Arc<DocStore>`.
pub struct DocStore {
    inner: Mutex<StoreInner>,
    change_tx: broadcast::Sender<ChangeSet>,
    frame_tx: broadcast::Sender<DeltaFrame>,
}

impl DocStore {
    /// Create an empty document replica authored by `author`.
    pub fn new(author: PeerId) -> Self {
        let (change_tx, _) = broadcast::channel(256);
        let (frame_tx, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(StoreInner {
                author,
                next_seq: 1,
                horizon: Horizon::new(),
                ops: BTreeMap::new(),
                entry_ops: HashMap::new(),
                list_ops: HashMap::new(),
                append_ids: HashMap::new(),
            }),
            change_tx,
            frame_tx,
        }
    }

    /// This replica's author id.
    pub fn author(&self) -> PeerId {
        self.inner.lock().expect("store lock poisoned").author
    }

    /// Subscribe to committed change sets (local and remote frames).
    pub fn changes(&self) -> broadcast::Receiver<ChangeSet> {
        self.change_tx.subscribe()
    }

    /// Subscribe to locally committed frames, for transport broadcast.
    pub fn outbound(&self) -> broadcast::Receiver<DeltaFrame> {
        self.frame_tx.subscribe()
    }

    /// Stage and commit a transaction. All mutations apply atomically;
    /// observers fire once, after the store lock is released, so a
    /// handler may itself open transactions.
    pub fn transact<F>(&self, build: F) -> DeltaFrame
    where
        F: FnOnce(&mut Transaction),
    {
        let mut tx = Transaction::default();
        build(&mut tx);

        let frame = {
            let mut inner = self.inner.lock().expect("store lock poisoned");
            let mut ops = Vec::with_capacity(tx.muts.len());
            for op in tx.muts {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                let env = OpEnvelope::new(inner.author, seq, inner.horizon.clone(), op);
                // Each envelope observes its predecessors in the frame.
                let stored = inner.store_envelope(env.clone());
                debug_assert!(stored);
                ops.push(env);
            }
            DeltaFrame { ops }
        };

        if !frame.is_empty() {
            let changes = ChangeSet::from_ops(ChangeOrigin::Local, frame.ops.iter());
            let _ = self.frame_tx.send(frame.clone());
            let _ = self.change_tx.send(changes);
        }
        frame
    }

    /// Apply a frame received from a remote peer. Duplicate envelopes are
    /// skipped, so redelivery and replay converge to the same state.
    pub fn apply_remote(&self, frame: DeltaFrame) {
        let applied: Vec<OpEnvelope> = {
            let mut inner = self.inner.lock().expect("store lock poisoned");
            frame
                .ops
                .into_iter()
                .filter(|env| inner.store_envelope(env.clone()))
                .collect()
        };

        if !applied.is_empty() {
            log::debug!("applied {} remote op(s)", applied.len());
            let changes = ChangeSet::from_ops(ChangeOrigin::Remote, applied.iter());
            let _ = self.change_tx.send(changes);
        }
    }

    /// This replica's current horizon (everything it has seen).
    pub fn horizon(&self) -> Horizon {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .horizon
            .clone()
    }

    /// All operations a peer at `since` has not yet seen, for catch-up
    /// sync. The receiver's dedup makes overlap harmless.
    pub fn ops_since(&self, since: &Horizon) -> DeltaFrame {
        let inner = self.inner.lock().expect("store lock poisoned");
        let ops = inner
            .ops
            .iter()
            .filter(|((author, seq), _)| !since.has_seen(*author, *seq))
            .map(|(_, env)| env.clone())
            .collect();
        DeltaFrame { ops }
    }

    /// Materialize one entry, if it exists.
    pub fn entry(&self, container: Container, key: &str) -> Option<EntryState> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let slots = inner.entry_ops.get(&(container, key.to_string()))?;
        inner.materialize_entry(slots)
    }

    /// Materialize one field of one entry.
    pub fn field(&self, container: Container, key: &str, field: &str) -> Option<Value> {
        self.entry(container, key)
            .and_then(|e| e.fields.get(field).cloned())
    }

    /// Materialize one sequence.
    pub fn list(&self, container: Container, name: &str) -> Vec<Value> {
        let inner = self.inner.lock().expect("store lock poisoned");
        match inner.list_ops.get(&(container, name.to_string())) {
            Some(slots) => inner.materialize_list(slots),
            None => Vec::new(),
        }
    }

    /// Append op ids recorded for an element, needed to build an Erase.
    pub fn append_ids(&self, container: Container, list: &str, element: &Value) -> Vec<OpId> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner
            .append_ids
            .get(&(container, list.to_string(), element.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Materialize one container.
    pub fn container(&self, container: Container) -> ContainerState {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .container_state(container)
    }

    /// Materialize the whole document.
    pub fn state(&self) -> DocState {
        let inner = self.inner.lock().expect("store lock poisoned");
        DocState {
            nodes: inner.container_state(Container::Nodes),
            meta: inner.container_state(Container::Meta),
            palette: inner.container_state(Container::Palette),
        }
    }

    /// Deterministic hash of the materialized state.
    pub fn state_hash(&self) -> u64 {
        self.state().state_hash()
    }

    /// True when no entry exists in the nodes container. Drives the
    /// bootstrap decision.
    pub fn nodes_empty(&self) -> bool {
        self.container(Container::Nodes).entries.is_empty()
    }
}
