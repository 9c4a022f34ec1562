//! Lobby/match lifecycle controller.
//!
//! Owns the waiting → countdown → active → shrink → settlement transitions.
//! Membership changes are serialized behind one gate and committed atomically
//! with their escrow movement; promotion persists the commitment before a
//! single gameplay event can reach a client. Each promoted match gets its own
//! owner task ([`crate::runner`]) wired through bounded channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{info, warn};

use petri_engine::settlement::rake_amount;
use petri_engine::{generate_commitment, Seat};
use petri_types::constants::{INPUT_QUEUE_DEPTH, LOBBY_MIN_PLAYERS};
use petri_types::protocol::Axes;
use petri_types::{
    AccountId, GameMode, Lobby, LobbyConfig, LobbyState, MatchId, MatchRecord, Membership,
};

use crate::db::{unix_ms, Db};
use crate::ledger::{self, Ledger, LedgerError, Precondition};
use crate::metrics::Metrics;
use crate::registry::{self, Registry};
use crate::runner::{self, RunnerContext};

/// Outbound frames are pre-encoded once and shared across sessions.
pub type Frame = Arc<str>;

/// Depth of the per-match broadcast ring; slow sessions lag rather than
/// block the owner.
const UPDATES_BUFFER: usize = 64;

/// A validated input on its way to the match owner.
#[derive(Clone, Copy, Debug)]
pub struct PlayerInput {
    pub account: AccountId,
    pub axes: Axes,
    pub boost: bool,
    /// Recorded for anti-cheat collaborators; the simulation does not trust
    /// either value.
    pub seq: u64,
    pub ts: u64,
}

pub struct MatchHandle {
    inputs: mpsc::Sender<PlayerInput>,
    updates: broadcast::Sender<Frame>,
    cancel: watch::Sender<bool>,
}

/// Live matches by id; shared between the controller, sessions and runners.
#[derive(Default)]
pub struct MatchDirectory {
    inner: Mutex<HashMap<MatchId, MatchHandle>>,
}

impl MatchDirectory {
    pub async fn register(&self, id: MatchId, handle: MatchHandle) {
        self.inner.lock().await.insert(id, handle);
    }

    /// Session attachment point: an input sender plus a fresh update
    /// subscription.
    pub async fn attach(
        &self,
        id: MatchId,
    ) -> Option<(mpsc::Sender<PlayerInput>, broadcast::Receiver<Frame>)> {
        let map = self.inner.lock().await;
        map.get(&id)
            .map(|handle| (handle.inputs.clone(), handle.updates.subscribe()))
    }

    pub async fn cancel(&self, id: MatchId) -> bool {
        let map = self.inner.lock().await;
        match map.get(&id) {
            Some(handle) => handle.cancel.send(true).is_ok(),
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        for handle in self.inner.lock().await.values() {
            let _ = handle.cancel.send(true);
        }
    }

    pub async fn remove(&self, id: MatchId) {
        self.inner.lock().await.remove(&id);
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ControllerConfig {
    pub tick_rate: u32,
    pub map_radius: f64,
    pub lobby_timeout_secs: u64,
}

pub struct Controller {
    db: Arc<Db>,
    ledger: Arc<Ledger>,
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
    directory: Arc<MatchDirectory>,
    config: ControllerConfig,
    /// Serializes membership transitions per process (the row-lock analogue).
    membership_gate: Mutex<()>,
}

impl Controller {
    pub fn new(
        db: Arc<Db>,
        ledger: Arc<Ledger>,
        registry: Arc<Registry>,
        metrics: Arc<Metrics>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            db,
            ledger,
            registry,
            metrics,
            directory: Arc::new(MatchDirectory::default()),
            config,
            membership_gate: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> Arc<MatchDirectory> {
        Arc::clone(&self.directory)
    }

    pub fn create_lobby(&self, config: &LobbyConfig) -> Result<Lobby, LedgerError> {
        config
            .validate()
            .map_err(|_| LedgerError::Validation("invalid lobby config"))?;
        self.registry.create_lobby(config)
    }

    /// Join protocol: validate the lobby, lock the buy-in into escrow and
    /// insert the membership in one transaction. Any step's failure rolls
    /// back all prior steps. A join that fills the lobby promotes it.
    pub async fn join(
        &self,
        lobby_id: u64,
        account: AccountId,
    ) -> Result<Membership, LedgerError> {
        let _gate = self.membership_gate.lock().await;

        let (membership, filled) = self.db.transact(|tx| {
            let lobby = registry::lobby_tx(tx, lobby_id)?;
            if lobby.state != LobbyState::Waiting {
                return Err(LedgerError::Precondition(Precondition::LobbyNotJoinable));
            }
            let count = registry::member_count_tx(tx, lobby_id)?;
            if count >= lobby.config.capacity {
                return Err(LedgerError::Precondition(Precondition::LobbyFull));
            }
            if registry::is_member_tx(tx, lobby_id, account)? {
                return Err(LedgerError::Precondition(Precondition::AlreadyMember));
            }

            ledger::lock_escrow_tx(
                tx,
                account,
                lobby.config.buy_in,
                &format!("lobby:{lobby_id}"),
            )?;

            let team = match lobby.config.mode {
                GameMode::Solo => 0,
                mode => count / mode.team_size() + 1,
            };
            registry::insert_membership_tx(tx, lobby_id, account, team)?;

            Ok((Membership { account, team }, count + 1 == lobby.config.capacity))
        })?;

        info!(lobby_id, %account, team = membership.team, "player joined lobby");
        if filled {
            self.promote(lobby_id).await?;
        }
        Ok(membership)
    }

    /// Leave protocol, pre-countdown only: remove the membership and release
    /// the escrow symmetrically.
    pub async fn leave(&self, lobby_id: u64, account: AccountId) -> Result<(), LedgerError> {
        let _gate = self.membership_gate.lock().await;

        self.db.transact(|tx| {
            let lobby = registry::lobby_tx(tx, lobby_id)?;
            if lobby.state != LobbyState::Waiting {
                return Err(LedgerError::Precondition(Precondition::LobbyNotJoinable));
            }
            if !registry::is_member_tx(tx, lobby_id, account)? {
                return Err(LedgerError::Precondition(Precondition::NotAMember));
            }
            registry::remove_membership_tx(tx, lobby_id, account)?;
            ledger::release_escrow_tx(
                tx,
                account,
                lobby.config.buy_in,
                &format!("lobby:{lobby_id}"),
                petri_types::EntryKind::EscrowRelease,
            )?;
            Ok(())
        })?;
        info!(lobby_id, %account, "player left lobby");
        Ok(())
    }

    /// Promote a filled (or timed-out) lobby to a match: draw the
    /// commitment, snapshot pot and rake, persist the match row, then hand
    /// the world to its owner task. The caller holds the membership gate.
    async fn promote(&self, lobby_id: u64) -> Result<MatchRecord, LedgerError> {
        let lobby = self.registry.lobby(lobby_id)?;
        if lobby.state != LobbyState::Waiting {
            return Err(LedgerError::Precondition(Precondition::LobbyNotJoinable));
        }
        let members = self.registry.members(lobby_id)?;
        if members.len() < LOBBY_MIN_PLAYERS {
            return Err(LedgerError::Precondition(Precondition::LobbyNotJoinable));
        }

        let commitment = generate_commitment();
        let pot = lobby.config.buy_in * members.len() as u64;
        let rake = rake_amount(pot, lobby.config.rake_bps, lobby.config.rake_cap);
        let mut raw_id = [0u8; 16];
        OsRng.fill_bytes(&mut raw_id);
        let record = MatchRecord {
            id: MatchId(raw_id),
            lobby_id,
            seed: commitment.seed_hex(),
            nonce: commitment.nonce_hex(),
            commit: commitment.commit_hex(),
            payout_model: lobby.config.payout_model,
            rake_bps: lobby.config.rake_bps,
            rake_cap: lobby.config.rake_cap,
            buy_in: lobby.config.buy_in,
            pot,
            rake,
            net_pot: pot - rake,
            map_radius: self.config.map_radius,
            started_at: unix_ms(),
            ended_at: None,
            outcome: None,
        };

        // The commitment row must be durable before any gameplay event is
        // emitted to clients.
        self.db.transact(|tx| registry::insert_match_tx(tx, &record))?;

        let seats: Vec<Seat> = members
            .iter()
            .map(|member| Seat {
                account: member.account,
                team: member.team,
            })
            .collect();

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
        let (update_tx, _) = broadcast::channel(UPDATES_BUFFER);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.directory
            .register(
                record.id,
                MatchHandle {
                    inputs: input_tx,
                    updates: update_tx.clone(),
                    cancel: cancel_tx,
                },
            )
            .await;

        let ctx = RunnerContext {
            record: record.clone(),
            seats,
            ledger: Arc::clone(&self.ledger),
            registry: Arc::clone(&self.registry),
            directory: Arc::clone(&self.directory),
            metrics: Arc::clone(&self.metrics),
            tick_rate: self.config.tick_rate,
        };
        tokio::spawn(runner::run_match(ctx, input_rx, update_tx, cancel_rx));

        self.metrics.inc_matches_started();
        info!(
            lobby_id,
            match_id = %record.id,
            commit = %record.commit,
            pot,
            rake,
            "lobby promoted to match"
        );
        Ok(record)
    }

    /// Administrative or crash-driven abort: the owner task unwinds through
    /// the refund path at its next tick boundary.
    pub async fn abort(&self, match_id: MatchId) -> Result<(), LedgerError> {
        if self.directory.cancel(match_id).await {
            return Ok(());
        }
        // No live owner (e.g. a crashed process's row): refund directly.
        if self.ledger.refund_match(match_id)? {
            self.metrics.inc_matches_refunded();
        }
        Ok(())
    }

    /// Startup recovery: every persisted match that never closed gets a full
    /// refund so no escrow is orphaned.
    pub fn recover(&self) -> Result<usize, LedgerError> {
        let unfinished = self.registry.unfinished_matches()?;
        let mut refunded = 0;
        for match_id in unfinished {
            if self.ledger.refund_match(match_id)? {
                self.metrics.inc_matches_refunded();
                refunded += 1;
                warn!(%match_id, "refunded unfinished match during recovery");
            }
        }
        Ok(refunded)
    }

    /// Promote waiting lobbies whose start timer elapsed with enough players.
    pub async fn sweep(&self) -> Result<(), LedgerError> {
        let cutoff = unix_ms().saturating_sub(self.config.lobby_timeout_secs * 1_000);
        let due = self.registry.waiting_lobbies_due(cutoff, LOBBY_MIN_PLAYERS)?;
        for lobby_id in due {
            let _gate = self.membership_gate.lock().await;
            match self.promote(lobby_id).await {
                Ok(record) => {
                    info!(lobby_id, match_id = %record.id, "lobby promoted by timer");
                }
                Err(LedgerError::Precondition(_)) => {}
                Err(err) => warn!(lobby_id, ?err, "timer promotion failed"),
            }
        }
        Ok(())
    }

    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                if let Err(err) = controller.sweep().await {
                    warn!(?err, "lobby sweep failed");
                }
            }
        })
    }

    /// Controlled shutdown: abort live matches and wait for their refund
    /// transactions to land.
    pub async fn shutdown(&self) {
        self.directory.cancel_all().await;
        for _ in 0..100 {
            if self.directory.is_empty().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        warn!("shutdown timed out waiting for match owners");
    }
}
