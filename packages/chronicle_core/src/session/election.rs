//! Host election protocol
//!
//! Exactly one connected peer is designated host: the minimum numeric id
//! among the candidates. Every peer can compute the winner from locally
//! visible information, so agreement needs no voting round — only the
//! computed winner writes `hostId`, and the store's deterministic
//! same-field resolution settles any race.

use std::time::Duration;

use crate::convergent::PeerId;

/// Where the election currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionState {
    /// No host known and no decision pending.
    Unelected,
    /// Waiting out the bootstrap stabilization delay.
    Settling,
    /// A host is designated.
    Elected(PeerId),
}

/// Timing of the bootstrap decision.
#[derive(Clone, Copy, Debug)]
pub struct ElectionConfig {
    /// How long to wait for peers and replicated state before deciding
    /// whether we are alone.
    pub settle_delay: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(2500),
        }
    }
}

/// Why this session exists: creating a fresh document or joining an
/// existing one. Joining an empty room is a connection failure, not a
/// silent new document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapIntent {
    Create { title: Option<String> },
    Join,
}

/// The resolution of the bootstrap state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// We were alone with intent to create: the document was seeded and
    /// we are host.
    Seeded,
    /// We joined an existing (or simultaneously created) document.
    Joined,
    /// Intent was to join but no peers and no state appeared before the
    /// settle delay elapsed. Recoverable only by retrying the join.
    CouldNotConnect,
}

/// What to do once the settle delay has elapsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettleDecision {
    /// Seed a fresh document and take the host role.
    SeedDocument,
    /// Document exists (or peers do) but no host is recorded: elect.
    ElectHost(PeerId),
    /// Nothing to do; a host is already recorded.
    Nothing,
    /// Joining found nobody.
    CouldNotConnect,
}

/// Pure minimum-id election over a candidate set.
pub fn elect(candidates: impl IntoIterator<Item = PeerId>) -> Option<PeerId> {
    candidates.into_iter().min()
}

/// Whether the recorded host is missing from the connected set.
pub fn needs_reelection(current_host: Option<PeerId>, connected: &[PeerId]) -> bool {
    match current_host {
        Some(host) => !connected.contains(&host),
        None => true,
    }
}

/// Decide the bootstrap action once the settle delay has elapsed.
///
/// `connected` is the live roster (which includes ourselves);
/// `current_host` is what the replicated meta currently records.
pub fn settle_decision(
    intent: &BootstrapIntent,
    nodes_empty: bool,
    connected: &[PeerId],
    me: PeerId,
    current_host: Option<PeerId>,
) -> SettleDecision {
    let alone = connected.iter().filter(|id| **id != me).count() == 0;

    if nodes_empty && alone {
        return match intent {
            BootstrapIntent::Create { .. } => SettleDecision::SeedDocument,
            BootstrapIntent::Join => SettleDecision::CouldNotConnect,
        };
    }

    // Peers or replicated content exist. A valid recorded host means the
    // session is already settled; otherwise run the minimum-id election
    // over everyone we can see plus ourselves.
    match current_host {
        Some(host) if connected.contains(&host) => SettleDecision::Nothing,
        _ => {
            let mut candidates: Vec<PeerId> = connected.to_vec();
            if !candidates.contains(&me) {
                candidates.push(me);
            }
            match elect(candidates) {
                Some(winner) => SettleDecision::ElectHost(winner),
                None => SettleDecision::ElectHost(me),
            }
        }
    }
}
