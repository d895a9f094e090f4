//! Three-peer shared timeline integration test
//!
//! Exercises the full session lifecycle over the simulated network: one
//! peer creates a document, two join and catch up, everyone edits
//! concurrently, the turn rotates, the host disconnects and the
//! survivors recover, and the final state round-trips through a
//! snapshot.
//!
//! Run with:
//!   cargo test --test shared_timeline

use std::sync::Arc;
use std::time::Duration;

use chronicle::session::{
    BootstrapIntent, BootstrapOutcome, ElectionConfig, ElectionState, Session, SessionConfig,
};
use chronicle::timeline::NodePatch;
use chronicle::transport::{PresenceConfig, SimNetwork};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> SessionConfig {
    SessionConfig {
        election: ElectionConfig {
            settle_delay: Duration::from_millis(500),
        },
        presence: PresenceConfig {
            heartbeat: Duration::from_millis(100),
            liveness_window: Duration::from_millis(400),
        },
    }
}

async fn start_session(
    network: &Arc<SimNetwork>,
    room: &str,
    name: &str,
    intent: BootstrapIntent,
) -> Arc<Session> {
    Session::start(
        Arc::new(network.join(room)),
        name,
        intent,
        fast_config(),
        None,
    )
    .await
}

/// Let in-flight frames and heartbeats settle (virtual time).
async fn quiesce() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test(start_paused = true)]
async fn three_peer_session_lifecycle() {
    let network = SimNetwork::new();

    // --- Phase 1: Ana creates the document --------------------------------
    let ana = start_session(
        &network,
        "campaign",
        "ana",
        BootstrapIntent::Create {
            title: Some("The Fall of the Lighthouse".into()),
        },
    )
    .await;
    assert_eq!(ana.await_bootstrap().await, BootstrapOutcome::Seeded);
    assert_eq!(ana.election_state(), ElectionState::Elected(ana.peer_id()));

    // --- Phase 2: Ben and Cleo join and catch up --------------------------
    let ben = start_session(&network, "campaign", "ben", BootstrapIntent::Join).await;
    let cleo = start_session(&network, "campaign", "cleo", BootstrapIntent::Join).await;
    assert_eq!(ben.await_bootstrap().await, BootstrapOutcome::Joined);
    assert_eq!(cleo.await_bootstrap().await, BootstrapOutcome::Joined);
    quiesce().await;

    assert_eq!(ben.store().state_hash(), ana.store().state_hash());
    assert_eq!(cleo.store().state_hash(), ana.store().state_hash());
    assert_eq!(ben.meta().host_id(), Some(ana.peer_id()));
    assert_eq!(
        ana.roster().connected_ids(),
        vec![ana.peer_id(), ben.peer_id(), cleo.peer_id()]
    );

    // --- Phase 3: concurrent edits from every peer ------------------------
    let bookends = ana.graph().all_nodes();
    let start_period = &bookends[0];
    let end_period = &bookends[1];

    let middle = ana
        .graph()
        .insert_period_between(&start_period.id, &end_period.id)
        .unwrap();
    assert_eq!(middle.order, 0.5);

    quiesce().await;

    // Ben describes the new period; the tags cache follows on every peer
    ben.graph()
        .update_node(
            &middle.id,
            NodePatch::description("the @Keeper lights the final flame"),
        )
        .unwrap();
    cleo.palette().add_affirmed_word("storms");
    cleo.palette().add_banned_word("ghosts");

    quiesce().await;
    for session in [&ana, &ben, &cleo] {
        let node = session.graph().get_node(&middle.id).unwrap();
        assert_eq!(node.tags, vec!["@Keeper"]);
        assert_eq!(session.palette().affirmed_words(), vec!["storms"]);
    }
    assert_eq!(ana.store().state_hash(), ben.store().state_hash());
    assert_eq!(ana.store().state_hash(), cleo.store().state_hash());

    // Ben adds an event under the middle period from his replica
    let event = ben.graph().add_event_to_period(&middle.id).unwrap();
    assert_eq!(event.order, 1.0); // parent.order + 0.5 for a childless period
    quiesce().await;
    assert!(ana.graph().has_children(&middle.id));

    // --- Phase 4: turn rotation -------------------------------------------
    assert_eq!(ana.turn().active_player_id(), Some(ana.peer_id()));
    assert!(ben.turn().pass_turn(cleo.peer_id()).is_err()); // not the holder

    ana.turn().pass_turn(ben.peer_id()).unwrap();
    quiesce().await;
    assert_eq!(cleo.turn().active_player_id(), Some(ben.peer_id()));
    assert_eq!(ben.turn().next_in_rotation(), Some(cleo.peer_id()));

    // --- Phase 5: the host leaves -----------------------------------------
    ben.turn().pass_turn(ana.peer_id()).unwrap();
    quiesce().await;
    ana.close().await;

    // Roster notices, the minimum surviving id takes over the host role
    // and recovers the turn left behind by Ana
    tokio::time::sleep(Duration::from_secs(2)).await;
    let survivor_host = ben.peer_id().min(cleo.peer_id());
    assert_eq!(ben.meta().host_id(), Some(survivor_host));
    assert_eq!(cleo.meta().host_id(), Some(survivor_host));
    assert_eq!(ben.turn().active_player_id(), Some(survivor_host));
    assert_eq!(ben.election_state(), ElectionState::Elected(survivor_host));
    assert_eq!(ben.store().state_hash(), cleo.store().state_hash());

    // --- Phase 6: snapshot round-trip into a fresh room --------------------
    let snapshot = ben.export_snapshot();
    let payload = serde_json::to_value(&snapshot).unwrap();

    let dana = start_session(
        &network,
        "revival",
        "dana",
        BootstrapIntent::Create { title: None },
    )
    .await;
    dana.await_bootstrap().await;
    dana.import_snapshot(&payload).unwrap();

    let titles: Vec<String> = dana
        .graph()
        .all_nodes()
        .into_iter()
        .map(|n| n.title)
        .collect();
    assert!(titles.contains(&"New Period".to_string()));
    assert_eq!(
        dana.meta().history_title().as_deref(),
        Some("The Fall of the Lighthouse")
    );
    assert_eq!(dana.palette().banned_words(), vec!["ghosts"]);

    // The imported document recorded a host that is not in Dana's room:
    // the watchdog treats it as a presence change and re-elects
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(dana.meta().host_id(), Some(dana.peer_id()));

    ben.close().await;
    cleo.close().await;
    dana.close().await;
}

#[tokio::test(start_paused = true)]
async fn late_joiner_replays_history_it_never_witnessed() {
    let network = SimNetwork::new();
    let ana = start_session(
        &network,
        "archive",
        "ana",
        BootstrapIntent::Create { title: None },
    )
    .await;
    ana.await_bootstrap().await;

    // A long editing session happens before anyone else joins
    let bookends = ana.graph().all_nodes();
    let mut prev = bookends[0].clone();
    for _ in 0..5 {
        prev = ana
            .graph()
            .insert_period_between(&prev.id, &bookends[1].id)
            .unwrap();
    }
    ana.meta().set_current_focus("the long quiet");
    ana.palette().add_affirmed_word("lanterns");

    let ben = start_session(&network, "archive", "ben", BootstrapIntent::Join).await;
    assert_eq!(ben.await_bootstrap().await, BootstrapOutcome::Joined);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(ben.store().state_hash(), ana.store().state_hash());
    assert_eq!(ben.graph().all_nodes().len(), 7);
    assert_eq!(ben.meta().current_focus().as_deref(), Some("the long quiet"));

    ana.close().await;
    ben.close().await;
}

#[tokio::test(start_paused = true)]
async fn strict_mode_flag_replicates() {
    let network = SimNetwork::new();
    let ana = start_session(
        &network,
        "strict",
        "ana",
        BootstrapIntent::Create { title: None },
    )
    .await;
    ana.await_bootstrap().await;

    let ben = start_session(&network, "strict", "ben", BootstrapIntent::Join).await;
    ben.await_bootstrap().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!ben.meta().is_strict_mode());
    ana.meta().set_is_strict_mode(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(ben.meta().is_strict_mode());

    ana.close().await;
    ben.close().await;
}
