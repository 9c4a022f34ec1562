//! Lobby and match row persistence.
//!
//! Plain row CRUD over the shared store; the lifecycle semantics (who may
//! transition what, and when) live in the controller. Transaction-scoped
//! helpers are exposed so the controller can compose membership changes with
//! escrow movements in one commit.

use rusqlite::{params, OptionalExtension, Transaction};
use std::sync::Arc;

use petri_types::{
    AccountId, GameMode, Lobby, LobbyConfig, LobbyState, MatchId, MatchOutcome, MatchRecord,
    Membership, PayoutModel, Placement,
};

use crate::db::{unix_ms, Db};
use crate::ledger::{LedgerError, Precondition};

pub struct Registry {
    db: Arc<Db>,
}

impl Registry {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn create_lobby(&self, config: &LobbyConfig) -> Result<Lobby, LedgerError> {
        let now = unix_ms();
        let id = self.db.transact(|tx| {
            tx.execute(
                "INSERT INTO lobbies (mode, buy_in, payout_model, rake_bps, rake_cap, capacity, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'waiting', ?7)",
                params![
                    config.mode.as_str(),
                    config.buy_in as i64,
                    config.payout_model.as_str(),
                    config.rake_bps,
                    config.rake_cap.map(|cap| cap as i64),
                    config.capacity,
                    now,
                ],
            )?;
            Ok(tx.last_insert_rowid() as u64)
        })?;
        Ok(Lobby {
            id,
            config: config.clone(),
            state: LobbyState::Waiting,
            created_at: now,
        })
    }

    pub fn lobby(&self, id: u64) -> Result<Lobby, LedgerError> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT mode, buy_in, payout_model, rake_bps, rake_cap, capacity, state, created_at
                 FROM lobbies WHERE id = ?1",
                params![id as i64],
                |row| {
                    Ok(RawLobby {
                        mode: row.get(0)?,
                        buy_in: row.get(1)?,
                        payout_model: row.get(2)?,
                        rake_bps: row.get(3)?,
                        rake_cap: row.get(4)?,
                        capacity: row.get(5)?,
                        state: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                },
            )
            .optional()?
            .ok_or(LedgerError::Precondition(Precondition::UnknownLobby))
            .and_then(|raw| raw.into_lobby(id))
        })
    }

    pub fn list_lobbies(&self) -> Result<Vec<Lobby>, LedgerError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, mode, buy_in, payout_model, rake_bps, rake_cap, capacity, state, created_at
                 FROM lobbies ORDER BY id DESC LIMIT 100",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    RawLobby {
                        mode: row.get(1)?,
                        buy_in: row.get(2)?,
                        payout_model: row.get(3)?,
                        rake_bps: row.get(4)?,
                        rake_cap: row.get(5)?,
                        capacity: row.get(6)?,
                        state: row.get(7)?,
                        created_at: row.get(8)?,
                    },
                ))
            })?;
            let mut lobbies = Vec::new();
            for row in rows {
                let (id, raw) = row?;
                lobbies.push(raw.into_lobby(id as u64)?);
            }
            Ok(lobbies)
        })
    }

    pub fn members(&self, lobby_id: u64) -> Result<Vec<Membership>, LedgerError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT account, team FROM memberships WHERE lobby_id = ?1 ORDER BY account ASC",
            )?;
            let rows = stmt.query_map(params![lobby_id as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })?;
            let mut members = Vec::new();
            for row in rows {
                let (hex, team) = row?;
                members.push(Membership {
                    account: AccountId::from_hex(&hex)
                        .ok_or_else(|| LedgerError::Integrity(format!("bad member id {hex}")))?,
                    team,
                });
            }
            Ok(members)
        })
    }

    pub fn set_lobby_state(&self, lobby_id: u64, state: LobbyState) -> Result<(), LedgerError> {
        self.db.transact(|tx| {
            tx.execute(
                "UPDATE lobbies SET state = ?1 WHERE id = ?2",
                params![state.as_str(), lobby_id as i64],
            )?;
            Ok(())
        })
    }

    pub fn match_record(&self, id: MatchId) -> Result<MatchRecord, LedgerError> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT lobby_id, seed, nonce, commit_hash, payout_model, rake_bps, rake_cap,
                        buy_in, pot, rake, net_pot, map_radius, started_at, ended_at, outcome
                 FROM matches WHERE id = ?1",
                params![id.to_hex()],
                |row| {
                    Ok(RawMatch {
                        lobby_id: row.get(0)?,
                        seed: row.get(1)?,
                        nonce: row.get(2)?,
                        commit: row.get(3)?,
                        payout_model: row.get(4)?,
                        rake_bps: row.get(5)?,
                        rake_cap: row.get(6)?,
                        buy_in: row.get(7)?,
                        pot: row.get(8)?,
                        rake: row.get(9)?,
                        net_pot: row.get(10)?,
                        map_radius: row.get(11)?,
                        started_at: row.get(12)?,
                        ended_at: row.get(13)?,
                        outcome: row.get(14)?,
                    })
                },
            )
            .optional()?
            .ok_or(LedgerError::Precondition(Precondition::UnknownMatch))
            .and_then(|raw| raw.into_record(id))
        })
    }

    pub fn placements(&self, match_id: MatchId) -> Result<Vec<Placement>, LedgerError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT account, team, placement, final_mass, max_mass, kills, payout
                 FROM placements WHERE match_id = ?1 ORDER BY placement ASC",
            )?;
            let rows = stmt.query_map(params![match_id.to_hex()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?;
            let mut placements = Vec::new();
            for row in rows {
                let (hex, team, placement, final_mass, max_mass, kills, payout) = row?;
                placements.push(Placement {
                    account: AccountId::from_hex(&hex)
                        .ok_or_else(|| LedgerError::Integrity(format!("bad account id {hex}")))?,
                    team,
                    placement,
                    final_mass,
                    max_mass,
                    kills,
                    payout: payout as u64,
                });
            }
            Ok(placements)
        })
    }

    /// Matches a restart must refund: persisted but never closed.
    pub fn unfinished_matches(&self) -> Result<Vec<MatchId>, LedgerError> {
        self.db.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM matches WHERE ended_at IS NULL ORDER BY started_at")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                let hex = row?;
                ids.push(
                    MatchId::from_hex(&hex)
                        .ok_or_else(|| LedgerError::Integrity(format!("bad match id {hex}")))?,
                );
            }
            Ok(ids)
        })
    }

    /// Waiting lobbies whose oldest member joined before `cutoff_ms` and that
    /// hold at least `min_players`; candidates for timer promotion.
    pub fn waiting_lobbies_due(
        &self,
        cutoff_ms: u64,
        min_players: usize,
    ) -> Result<Vec<u64>, LedgerError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT l.id FROM lobbies l
                 WHERE l.state = 'waiting'
                   AND (SELECT COUNT(*) FROM memberships m WHERE m.lobby_id = l.id) >= ?1
                   AND (SELECT MIN(m.joined_at) FROM memberships m WHERE m.lobby_id = l.id) <= ?2",
            )?;
            let rows = stmt.query_map(params![min_players as i64, cutoff_ms], |row| {
                row.get::<_, i64>(0)
            })?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row? as u64);
            }
            Ok(ids)
        })
    }
}

// ---- transaction-scoped helpers ------------------------------------------

pub(crate) fn lobby_tx(tx: &Transaction<'_>, lobby_id: u64) -> Result<Lobby, LedgerError> {
    tx.query_row(
        "SELECT mode, buy_in, payout_model, rake_bps, rake_cap, capacity, state, created_at
         FROM lobbies WHERE id = ?1",
        params![lobby_id as i64],
        |row| {
            Ok(RawLobby {
                mode: row.get(0)?,
                buy_in: row.get(1)?,
                payout_model: row.get(2)?,
                rake_bps: row.get(3)?,
                rake_cap: row.get(4)?,
                capacity: row.get(5)?,
                state: row.get(6)?,
                created_at: row.get(7)?,
            })
        },
    )
    .optional()?
    .ok_or(LedgerError::Precondition(Precondition::UnknownLobby))
    .and_then(|raw| raw.into_lobby(lobby_id))
}

pub(crate) fn member_count_tx(tx: &Transaction<'_>, lobby_id: u64) -> Result<u32, LedgerError> {
    Ok(tx.query_row(
        "SELECT COUNT(*) FROM memberships WHERE lobby_id = ?1",
        params![lobby_id as i64],
        |row| row.get::<_, i64>(0),
    )? as u32)
}

pub(crate) fn is_member_tx(
    tx: &Transaction<'_>,
    lobby_id: u64,
    account: AccountId,
) -> Result<bool, LedgerError> {
    let found: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM memberships WHERE lobby_id = ?1 AND account = ?2",
            params![lobby_id as i64, account.to_hex()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn insert_membership_tx(
    tx: &Transaction<'_>,
    lobby_id: u64,
    account: AccountId,
    team: u32,
) -> Result<(), LedgerError> {
    tx.execute(
        "INSERT INTO memberships (lobby_id, account, team, joined_at) VALUES (?1, ?2, ?3, ?4)",
        params![lobby_id as i64, account.to_hex(), team, unix_ms()],
    )?;
    Ok(())
}

pub(crate) fn remove_membership_tx(
    tx: &Transaction<'_>,
    lobby_id: u64,
    account: AccountId,
) -> Result<(), LedgerError> {
    tx.execute(
        "DELETE FROM memberships WHERE lobby_id = ?1 AND account = ?2",
        params![lobby_id as i64, account.to_hex()],
    )?;
    Ok(())
}

pub(crate) fn insert_match_tx(tx: &Transaction<'_>, record: &MatchRecord) -> Result<(), LedgerError> {
    tx.execute(
        "INSERT INTO matches
           (id, lobby_id, seed, nonce, commit_hash, payout_model, rake_bps, rake_cap,
            buy_in, pot, rake, net_pot, map_radius, started_at, ended_at, outcome)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL, NULL)",
        params![
            record.id.to_hex(),
            record.lobby_id as i64,
            record.seed,
            record.nonce,
            record.commit,
            record.payout_model.as_str(),
            record.rake_bps,
            record.rake_cap.map(|cap| cap as i64),
            record.buy_in as i64,
            record.pot as i64,
            record.rake as i64,
            record.net_pot as i64,
            record.map_radius,
            record.started_at,
        ],
    )?;
    tx.execute(
        "UPDATE lobbies SET state = 'countdown' WHERE id = ?1",
        params![record.lobby_id as i64],
    )?;
    Ok(())
}

struct RawLobby {
    mode: String,
    buy_in: i64,
    payout_model: String,
    rake_bps: u16,
    rake_cap: Option<i64>,
    capacity: u32,
    state: String,
    created_at: u64,
}

impl RawLobby {
    fn into_lobby(self, id: u64) -> Result<Lobby, LedgerError> {
        Ok(Lobby {
            id,
            config: LobbyConfig {
                mode: GameMode::parse(&self.mode)
                    .ok_or_else(|| LedgerError::Integrity(format!("bad mode {}", self.mode)))?,
                buy_in: self.buy_in as u64,
                payout_model: PayoutModel::parse(&self.payout_model).ok_or_else(|| {
                    LedgerError::Integrity(format!("bad payout model {}", self.payout_model))
                })?,
                rake_bps: self.rake_bps,
                rake_cap: self.rake_cap.map(|cap| cap as u64),
                capacity: self.capacity,
            },
            state: LobbyState::parse(&self.state)
                .ok_or_else(|| LedgerError::Integrity(format!("bad lobby state {}", self.state)))?,
            created_at: self.created_at,
        })
    }
}

struct RawMatch {
    lobby_id: i64,
    seed: String,
    nonce: String,
    commit: String,
    payout_model: String,
    rake_bps: u16,
    rake_cap: Option<i64>,
    buy_in: i64,
    pot: i64,
    rake: i64,
    net_pot: i64,
    map_radius: f64,
    started_at: u64,
    ended_at: Option<u64>,
    outcome: Option<String>,
}

impl RawMatch {
    fn into_record(self, id: MatchId) -> Result<MatchRecord, LedgerError> {
        Ok(MatchRecord {
            id,
            lobby_id: self.lobby_id as u64,
            seed: self.seed,
            nonce: self.nonce,
            commit: self.commit,
            payout_model: PayoutModel::parse(&self.payout_model).ok_or_else(|| {
                LedgerError::Integrity(format!("bad payout model {}", self.payout_model))
            })?,
            rake_bps: self.rake_bps,
            rake_cap: self.rake_cap.map(|cap| cap as u64),
            buy_in: self.buy_in as u64,
            pot: self.pot as u64,
            rake: self.rake as u64,
            net_pot: self.net_pot as u64,
            map_radius: self.map_radius,
            started_at: self.started_at,
            ended_at: self.ended_at,
            outcome: match self.outcome {
                Some(s) => Some(MatchOutcome::parse(&s).ok_or_else(|| {
                    LedgerError::Integrity(format!("bad match outcome {s}"))
                })?),
                None => None,
            },
        })
    }
}
