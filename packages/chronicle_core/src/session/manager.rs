//! Session lifecycle wiring
//!
//! A Session joins a room, owns the document replica, and runs the
//! background loops that keep everything consistent: outbound frame
//! broadcast, inbound frame application, catch-up sync, tag resync, the
//! deferred bootstrap decision, and the election/turn watchdog that
//! reacts to roster changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::convergent::{Container, DocStore, PeerId};
use crate::timeline::{spawn_tag_resync, NodeDraft, NodeGraph, NodeKind};
use crate::transport::{PresenceConfig, RoomHandle, RoomLink, Roster, WireMessage};

use super::election::{
    elect, needs_reelection, settle_decision, BootstrapIntent, BootstrapOutcome, ElectionConfig,
    ElectionState, SettleDecision,
};
use super::meta::MetaView;
use super::palette::PaletteView;
use super::recent::RecentSessions;
use super::snapshot::{self, Snapshot, SnapshotError};
use super::turn::TurnService;

/// Timing knobs for a session. Tests shrink these and drive them with
/// tokio's virtual clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionConfig {
    pub election: ElectionConfig,
    pub presence: PresenceConfig,
}

/// A live collaborative session: one replica, one room membership, and
/// the services over them.
pub struct Session {
    store: Arc<DocStore>,
    room: Arc<RoomHandle>,
    graph: NodeGraph,
    turn: TurnService,
    meta: MetaView,
    palette: PaletteView,
    settled: AtomicBool,
    bootstrap_rx: watch::Receiver<Option<BootstrapOutcome>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Join a room and start the session loops. The bootstrap decision
    /// resolves after the settle delay; await it with
    /// [`Session::await_bootstrap`].
    pub async fn start(
        link: Arc<dyn RoomLink>,
        display_name: impl Into<String>,
        intent: BootstrapIntent,
        config: SessionConfig,
        recents: Option<Arc<dyn RecentSessions>>,
    ) -> Arc<Self> {
        let room = RoomHandle::start(link, display_name, config.presence);
        let me = room.peer_id();
        let store = Arc::new(DocStore::new(me));

        let graph = NodeGraph::new(Arc::clone(&store));
        let meta = MetaView::new(Arc::clone(&store));
        let palette = PaletteView::new(Arc::clone(&store));
        let turn = TurnService::new(Arc::clone(&store), room.roster(), me);

        let (bootstrap_tx, bootstrap_rx) = watch::channel(None);

        let session = Arc::new(Self {
            store: Arc::clone(&store),
            room: Arc::clone(&room),
            graph: graph.clone(),
            turn: turn.clone(),
            meta: meta.clone(),
            palette,
            settled: AtomicBool::new(false),
            bootstrap_rx,
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::new();

        // Outbound pump: every locally committed frame goes on the wire.
        {
            let room = Arc::clone(&room);
            let mut outbound = store.outbound();
            tasks.push(tokio::spawn(async move {
                loop {
                    match outbound.recv().await {
                        Ok(frame) => {
                            if room.broadcast(&WireMessage::Delta(frame)).await.is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("outbound pump lagged {n} frame(s)");
                        }
                        Err(_) => break,
                    }
                }
            }));
        }

        // Inbound pump: apply remote frames, answer catch-up requests.
        {
            let room_pump = Arc::clone(&room);
            let store_pump = Arc::clone(&store);
            let mut incoming = room.incoming();
            tasks.push(tokio::spawn(async move {
                loop {
                    match incoming.recv().await {
                        Ok(WireMessage::Delta(frame)) => store_pump.apply_remote(frame),
                        Ok(WireMessage::SyncRequest { peer_id, horizon }) => {
                            if peer_id == me {
                                continue;
                            }
                            let gap = store_pump.ops_since(&horizon);
                            if !gap.is_empty() {
                                let _ =
                                    room_pump.broadcast(&WireMessage::Delta(gap)).await;
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("inbound pump lagged {n} message(s)");
                        }
                        Err(_) => break,
                    }
                }
            }));
        }

        // Ask the room for everything we have not seen.
        let _ = room
            .broadcast(&WireMessage::SyncRequest {
                peer_id: me,
                horizon: store.horizon(),
            })
            .await;

        // Derived-tag maintenance.
        tasks.push(spawn_tag_resync(Arc::clone(&store)));

        // Election/turn watchdog: on every roster change, repair a lost
        // host and let the host recover a lost turn. Holds only a weak
        // reference so a dropped session is not kept alive by its loops.
        {
            let watchdog = Arc::downgrade(&session);
            let mut peer_changes = room.peer_changes();
            tasks.push(tokio::spawn(async move {
                if let Some(session) = watchdog.upgrade() {
                    session.run_state_checks();
                }
                loop {
                    match peer_changes.recv().await {
                        Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            match watchdog.upgrade() {
                                Some(session) => session.run_state_checks(),
                                None => break,
                            }
                        }
                        Err(_) => break,
                    }
                }
            }));
        }

        // Keep the recent-sessions list fresh: once on join, then on
        // every meta change (title edits included).
        if let Some(recents) = recents {
            let meta_watch = meta.clone();
            let room_id = room.room_id().clone();
            let mut changes = store.changes();
            let record = move || {
                let name = meta_watch
                    .history_title()
                    .unwrap_or_else(|| "Untitled Session".to_string());
                recents.record_access(&room_id, &name);
            };
            record();
            tasks.push(tokio::spawn(async move {
                loop {
                    match changes.recv().await {
                        Ok(change) => {
                            if change
                                .entries
                                .iter()
                                .any(|(c, _)| *c == Container::Meta)
                            {
                                record();
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => record(),
                        Err(_) => break,
                    }
                }
            }));
        }

        // Deferred bootstrap: wait out the settle delay, then decide
        // whether we are creating, joining, or failed to connect.
        {
            let boot = Arc::downgrade(&session);
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(config.election.settle_delay).await;
                if let Some(session) = boot.upgrade() {
                    let outcome = session.decide_bootstrap(&intent);
                    session.settled.store(true, Ordering::SeqCst);
                    let _ = bootstrap_tx.send(Some(outcome));
                }
            }));
        }

        session
            .tasks
            .lock()
            .expect("task list poisoned")
            .extend(tasks);
        session
    }

    /// Run the settle-time decision and perform its effects.
    fn decide_bootstrap(&self, intent: &BootstrapIntent) -> BootstrapOutcome {
        let me = self.peer_id();
        let connected = self.room.roster().connected_ids();
        let decision = settle_decision(
            intent,
            self.store.nodes_empty(),
            &connected,
            me,
            self.meta.host_id(),
        );
        log::info!("bootstrap settled: {decision:?} (connected: {connected:?})");

        match decision {
            SettleDecision::SeedDocument => {
                let title = match intent {
                    BootstrapIntent::Create { title } => title.clone(),
                    BootstrapIntent::Join => None,
                };
                self.seed_document(title);
                BootstrapOutcome::Seeded
            }
            SettleDecision::ElectHost(winner) => {
                if winner == me {
                    self.meta.set_host_id(me);
                    self.turn.initialize_turn();
                }
                BootstrapOutcome::Joined
            }
            SettleDecision::Nothing => BootstrapOutcome::Joined,
            SettleDecision::CouldNotConnect => {
                log::error!(
                    "could not connect: no peers in room '{}' after the grace period",
                    self.room.room_id()
                );
                BootstrapOutcome::CouldNotConnect
            }
        }
    }

    /// Seed a brand-new document: bookend periods, host, first turn.
    fn seed_document(&self, title: Option<String>) {
        let mut start = NodeDraft::new(NodeKind::Period, "Start Period");
        start.is_bookend = true;
        start.order = Some(0.0);
        self.graph.add_node(start);

        let mut end = NodeDraft::new(NodeKind::Period, "End Period");
        end.is_bookend = true;
        end.order = Some(1.0);
        self.graph.add_node(end);

        self.meta.set_host_id(self.peer_id());
        if let Some(title) = title {
            self.meta.set_history_title(title);
        }
        self.turn.initialize_turn();
    }

    /// Re-derive host and turn holder from the current roster. Writes
    /// only when the computed value differs from the recorded one, and
    /// only from the peer that computes itself as responsible.
    fn run_state_checks(&self) {
        let me = self.peer_id();
        let connected = self.room.roster().connected_ids();
        let current_host = self.meta.host_id();

        // Host re-election: a recorded host has vanished, or a non-empty
        // document (e.g. freshly imported) has no host at all. An empty
        // document with no host is the bootstrap timer's business.
        let host_missing = needs_reelection(current_host, &connected)
            && (current_host.is_some() || !self.store.nodes_empty());
        if host_missing {
            let mut candidates = connected;
            if !candidates.contains(&me) {
                candidates.push(me);
            }
            if let Some(winner) = elect(candidates) {
                if winner == me && current_host != Some(me) {
                    log::info!("host {current_host:?} gone, electing self ({me})");
                    self.meta.set_host_id(me);
                }
            }
        }

        // Turn recovery is the host's job alone.
        self.turn.host_reassign();
    }

    /// Resolution of the bootstrap state machine; blocks until the
    /// settle delay has run its course.
    pub async fn await_bootstrap(&self) -> BootstrapOutcome {
        let mut rx = self.bootstrap_rx.clone();
        loop {
            if let Some(outcome) = *rx.borrow() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return BootstrapOutcome::CouldNotConnect;
            }
        }
    }

    /// Where the host election currently stands.
    pub fn election_state(&self) -> ElectionState {
        if let Some(host) = self.meta.host_id() {
            if self.room.roster().contains(host) {
                return ElectionState::Elected(host);
            }
        }
        if self.settled.load(Ordering::SeqCst) {
            ElectionState::Unelected
        } else {
            ElectionState::Settling
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.room.peer_id()
    }

    pub fn room_id(&self) -> &str {
        self.room.room_id()
    }

    pub fn store(&self) -> &Arc<DocStore> {
        &self.store
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn turn(&self) -> &TurnService {
        &self.turn
    }

    pub fn meta(&self) -> &MetaView {
        &self.meta
    }

    pub fn palette(&self) -> &PaletteView {
        &self.palette
    }

    pub fn roster(&self) -> Arc<Roster> {
        self.room.roster()
    }

    /// Export the whole document.
    pub fn export_snapshot(&self) -> Snapshot {
        snapshot::export_snapshot(&self.store)
    }

    /// Validate and apply a snapshot payload, replacing the document.
    pub fn import_snapshot(&self, payload: &serde_json::Value) -> Result<(), SnapshotError> {
        snapshot::import_snapshot(&self.store, payload)
    }

    /// Tear the session down: stop the loops, leave the room, drop the
    /// in-memory replica with the last reference. Nothing is in flight
    /// to cancel beyond the loops themselves.
    pub async fn close(&self) {
        for task in self.tasks.lock().expect("task list poisoned").drain(..) {
            task.abort();
        }
        self.room.leave().await;
    }
}
