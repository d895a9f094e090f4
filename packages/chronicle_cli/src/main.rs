//! Chronicle CLI
//!
//! Operator surface for the coordination core: run an in-process
//! multi-peer demo, inspect and round-trip snapshots, and list recently
//! touched sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use chronicle::session::{
    BootstrapIntent, BootstrapOutcome, FileRecentSessions, RecentSessions, Session, SessionConfig,
};
use chronicle::timeline::{NodePatch, TimelineNode};
use chronicle::transport::SimNetwork;

#[derive(Parser)]
#[command(name = "chronicle", about = "Collaborative timeline coordination core")]
struct Cli {
    /// Path of the recent-sessions cache file.
    #[arg(long, default_value = "chronicle-recents.json", global = true)]
    recents_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run several simulated peers through a full co-editing session.
    Demo {
        /// Number of peers to simulate (including the creator).
        #[arg(long, default_value_t = 3)]
        peers: usize,

        /// Room identifier for the demo session.
        #[arg(long, default_value = "demo-room")]
        room: String,

        /// Export the converged document to this file afterwards.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Load a snapshot file into a fresh session and print its contents.
    Import {
        /// Snapshot file produced by `demo --export` (or any peer).
        file: PathBuf,
    },

    /// List recently touched sessions, most recent first.
    Recent,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Demo {
            peers,
            room,
            export,
        } => run_demo(peers, &room, export, &cli.recents_file).await,
        Command::Import { file } => run_import(&file).await,
        Command::Recent => run_recent(&cli.recents_file),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn display_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "chronicle-peer".to_string())
}

/// Timings tightened so the demo settles in about a second.
fn demo_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.election.settle_delay = Duration::from_millis(600);
    config
}

async fn run_demo(
    peers: usize,
    room: &str,
    export: Option<PathBuf>,
    recents_file: &PathBuf,
) -> Result<(), String> {
    let peers = peers.max(2);
    println!("Starting {peers} simulated peers in room '{room}'\n");

    let network = SimNetwork::new();
    let recents: Arc<dyn RecentSessions> = Arc::new(FileRecentSessions::new(recents_file));

    let creator = Session::start(
        Arc::new(network.join(room)),
        display_name(),
        BootstrapIntent::Create {
            title: Some("Demo History".into()),
        },
        demo_config(),
        Some(Arc::clone(&recents)),
    )
    .await;

    // The creator must be alone through its settle delay to seed the
    // document; joiners come in afterwards.
    match creator.await_bootstrap().await {
        BootstrapOutcome::Seeded => println!("Creator seeded the document and took the host role"),
        other => println!("Creator bootstrap: {other:?}"),
    }

    let mut joiners = Vec::new();
    for i in 1..peers {
        let session = Session::start(
            Arc::new(network.join(room)),
            format!("{}-{i}", display_name()),
            BootstrapIntent::Join,
            demo_config(),
            None,
        )
        .await;
        joiners.push(session);
    }
    for session in &joiners {
        session.await_bootstrap().await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Everyone contributes something.
    let bookends = creator.graph().all_nodes();
    let middle = creator
        .graph()
        .insert_period_between(&bookends[0].id, &bookends[1].id)
        .map_err(|e| e.to_string())?;
    creator
        .graph()
        .update_node(
            &middle.id,
            NodePatch::description("the @Founders raise the first walls"),
        )
        .map_err(|e| e.to_string())?;

    // Let the new period reach the other replicas before they build on it.
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Some(first_joiner) = joiners.first() {
        first_joiner
            .graph()
            .add_event_to_period(&middle.id)
            .map_err(|e| e.to_string())?;
        first_joiner.palette().add_affirmed_word("prophecy");
    }
    if let Some(second_joiner) = joiners.get(1) {
        second_joiner.palette().add_banned_word("timetravel");
    }

    // Rotate the turn once around the table: each holder passes to the
    // next peer in ascending-id order.
    let sessions: Vec<&Arc<Session>> =
        std::iter::once(&creator).chain(joiners.iter()).collect();
    for _ in 0..peers {
        if let Some(holder_id) = creator.turn().active_player_id() {
            if let Some(holder) = sessions.iter().find(|s| s.peer_id() == holder_id) {
                if let Some(next) = holder.turn().next_in_rotation() {
                    match holder.turn().pass_turn(next) {
                        Ok(()) => log::info!("turn hand-off: {holder_id} -> {next}"),
                        Err(e) => log::warn!("turn hand-off refused: {e}"),
                    }
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    // Show convergence.
    let reference = creator.store().state_hash();
    let all_match = joiners
        .iter()
        .all(|s| s.store().state_hash() == reference);
    println!(
        "\nReplicas converged: {}",
        if all_match { "yes" } else { "NO (bug!)" }
    );
    println!("Host: peer {:?}", creator.meta().host_id());
    println!("Turn holder: peer {:?}", creator.turn().active_player_id());
    println!(
        "Roster: {:?}",
        creator.roster().connected_ids()
    );

    println!("\nTimeline:");
    print_timeline(&creator.graph().all_nodes());
    println!(
        "\nPalette: affirmed {:?}, banned {:?}",
        creator.palette().affirmed_words(),
        creator.palette().banned_words()
    );

    if let Some(path) = export {
        let snapshot = creator.export_snapshot();
        let json =
            serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())?;
        std::fs::write(&path, json).map_err(|e| e.to_string())?;
        println!("\nSnapshot written to {}", path.display());
    }

    creator.close().await;
    for session in joiners {
        session.close().await;
    }
    Ok(())
}

async fn run_import(file: &PathBuf) -> Result<(), String> {
    let contents = std::fs::read_to_string(file).map_err(|e| e.to_string())?;
    let payload: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| e.to_string())?;

    let network = SimNetwork::new();
    let mut config = SessionConfig::default();
    config.election.settle_delay = Duration::from_millis(100);

    let session = Session::start(
        Arc::new(network.join("import-preview")),
        display_name(),
        BootstrapIntent::Create { title: None },
        config,
        None,
    )
    .await;
    session.await_bootstrap().await;

    session
        .import_snapshot(&payload)
        .map_err(|e| e.to_string())?;

    println!(
        "Imported '{}'",
        session
            .meta()
            .history_title()
            .unwrap_or_else(|| "Untitled Session".into())
    );
    println!("\nTimeline:");
    print_timeline(&session.graph().all_nodes());
    println!(
        "\nPalette: affirmed {:?}, banned {:?}",
        session.palette().affirmed_words(),
        session.palette().banned_words()
    );

    session.close().await;
    Ok(())
}

fn run_recent(recents_file: &PathBuf) -> Result<(), String> {
    let recents = FileRecentSessions::new(recents_file);
    let list = recents.list();
    if list.is_empty() {
        println!("No recent sessions.");
        return Ok(());
    }
    for entry in list {
        println!(
            "{}  {}  (room {})",
            entry.last_accessed.format("%Y-%m-%d %H:%M"),
            entry.name,
            entry.id
        );
    }
    Ok(())
}

fn print_timeline(nodes: &[TimelineNode]) {
    for node in nodes {
        let indent = match node.parent_id {
            None => "",
            Some(_) => "    ",
        };
        let ghost = if node.is_ghost { " (ghost)" } else { "" };
        let tags = if node.tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", node.tags.join(", "))
        };
        println!(
            "{indent}{:<8} {:<24} order={}{ghost}{tags}",
            node.kind.as_str(),
            node.title,
            node.order
        );
    }
}
