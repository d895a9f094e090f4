//! Turn coordination
//!
//! Tracks which single peer holds editing priority and governs hand-off.
//! The checks here gate cooperating clients only — there is no
//! cryptographic or server-side authority behind them, by design. A
//! refusal is an expected outcome under concurrent use, not a fault.

use std::sync::Arc;

use thiserror::Error;

use crate::convergent::{DocStore, PeerId};
use crate::transport::Roster;

use super::meta::MetaView;

/// Why a turn pass was refused.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TurnError {
    #[error("caller does not hold the turn")]
    NotHolder,

    #[error("target peer {0} is not connected")]
    TargetNotConnected(PeerId),
}

/// The peer to act after `holder`, rotating through `connected` in
/// ascending id order and wrapping at the top. A missing or departed
/// holder yields the smallest connected id. Pure function of its inputs.
pub fn next_in_rotation(connected: &[PeerId], holder: Option<PeerId>) -> Option<PeerId> {
    let mut ids: Vec<PeerId> = connected.to_vec();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return None;
    }

    let current = match holder {
        Some(h) => h,
        None => return ids.first().copied(),
    };
    match ids.iter().position(|id| *id == current) {
        Some(index) => Some(ids[(index + 1) % ids.len()]),
        None => ids.first().copied(),
    }
}

/// Turn state service for one session.
#[derive(Clone)]
pub struct TurnService {
    meta: MetaView,
    roster: Arc<Roster>,
    me: PeerId,
}

impl TurnService {
    pub fn new(store: Arc<DocStore>, roster: Arc<Roster>, me: PeerId) -> Self {
        Self {
            meta: MetaView::new(store),
            roster,
            me,
        }
    }

    /// The current turn holder, if any.
    pub fn active_player_id(&self) -> Option<PeerId> {
        self.meta.active_player_id()
    }

    /// Set the initial holder to ourselves, if nobody holds the turn.
    /// Meaningful once, during bootstrap.
    pub fn initialize_turn(&self) {
        if self.meta.active_player_id().is_none() {
            log::info!("turn: initial holder is {}", self.me);
            self.meta.set_active_player_id(Some(self.me));
        }
    }

    /// Pass the turn to `target`. Succeeds only when we hold the turn
    /// and the target is connected; passing to ourselves is a no-op
    /// success.
    pub fn pass_turn(&self, target: PeerId) -> Result<(), TurnError> {
        if self.meta.active_player_id() != Some(self.me) {
            return Err(TurnError::NotHolder);
        }
        if target == self.me {
            return Ok(());
        }
        if !self.roster.contains(target) {
            return Err(TurnError::TargetNotConnected(target));
        }

        log::info!("turn: passed from {} to {}", self.me, target);
        self.meta.set_active_player_id(Some(target));
        Ok(())
    }

    /// The peer that would receive the turn next, per the rotation rule.
    pub fn next_in_rotation(&self) -> Option<PeerId> {
        next_in_rotation(&self.roster.connected_ids(), self.active_player_id())
    }

    /// Host-driven reassignment: when the holder has disconnected, the
    /// elected host (and only the host, checked against replicated meta)
    /// force-writes the next holder, bypassing the pass rule. Returns
    /// the new holder when a reassignment happened.
    pub fn host_reassign(&self) -> Option<PeerId> {
        if self.meta.host_id() != Some(self.me) {
            return None;
        }
        let holder = self.active_player_id()?;
        if self.roster.contains(holder) {
            return None;
        }

        let next = next_in_rotation(&self.roster.connected_ids(), Some(holder))?;
        log::info!("turn: holder {holder} disconnected, host reassigns to {next}");
        self.meta.set_active_player_id(Some(next));
        Some(next)
    }
}
