//! Ledger / escrow engine.
//!
//! Double-entry style money movements over the SQLite store. Every operation
//! is one atomic commit; wallets carry an optimistic `version` that every
//! mutation bumps, and a stale writer retries the whole transaction a bounded
//! number of times before surfacing contention.
//!
//! Row `amount` conventions (signed minor units):
//! - `deposit` +X / `withdrawal` −X: external money against `available`.
//! - `escrow_lock` +X: X moved `available` → `escrow`.
//! - `escrow_release` +X: X moved `escrow` → `available` (pre-play leave);
//!   −X at settlement, where the stake leaves `escrow` into the pot.
//! - `payout` +X: gross winnings credited to `available`.
//! - `rake` +X: house cut credited to the house `available`.
//! - `refund` +X: X moved `escrow` → `available` after an aborted match.
//!
//! Replaying completed rows through [`reconcile`] reproduces a wallet
//! exactly; the settlement rows keep `Σ payouts + rake = pot` as an integer
//! identity.

use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::{params, OptionalExtension, Transaction};
use std::sync::Arc;
use thiserror::Error;

use petri_types::constants::{CONTENTION_RETRY_LIMIT, HISTORY_MAX_LIMIT, MAX_NICKNAME_LENGTH};
use petri_types::{
    AccountId, EntryKind, EntryStatus, KycState, LedgerEntry, MatchId, MatchOutcome, Placement,
    PlayerAccount, Wallet, HOUSE_ACCOUNT,
};

use crate::db::{unix_ms, Db};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation: {0}")]
    Validation(&'static str),
    #[error("precondition failed: {0}")]
    Precondition(Precondition),
    #[error("wallet contention, retries exhausted")]
    Contention,
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("storage error: {0}")]
    Storage(rusqlite::Error),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        // A tripped CHECK constraint means a balance went negative past the
        // pre-checks: an invariant breach, not an I/O problem.
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return LedgerError::Integrity(err.to_string());
            }
        }
        LedgerError::Storage(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("unknown account")]
    UnknownAccount,
    #[error("unknown lobby")]
    UnknownLobby,
    #[error("lobby is not joinable")]
    LobbyNotJoinable,
    #[error("lobby is full")]
    LobbyFull,
    #[error("already a member")]
    AlreadyMember,
    #[error("not a member")]
    NotAMember,
    #[error("KYC approval required")]
    KycRequired,
    #[error("insufficient available funds")]
    InsufficientFunds,
    #[error("insufficient escrow")]
    InsufficientEscrow,
    #[error("idempotency key busy")]
    IdempotencyBusy,
    #[error("unknown match")]
    UnknownMatch,
}

impl Precondition {
    /// Stable code surfaced to clients.
    pub fn code(self) -> &'static str {
        match self {
            Self::UnknownAccount => "unknown_account",
            Self::UnknownLobby => "unknown_lobby",
            Self::LobbyNotJoinable => "lobby_not_joinable",
            Self::LobbyFull => "lobby_full",
            Self::AlreadyMember => "already_member",
            Self::NotAMember => "not_a_member",
            Self::KycRequired => "kyc_required",
            Self::InsufficientFunds => "insufficient_funds",
            Self::InsufficientEscrow => "insufficient_escrow",
            Self::IdempotencyBusy => "idempotency_busy",
            Self::UnknownMatch => "unknown_match",
        }
    }
}

/// One player's line in a settlement.
#[derive(Clone, Copy, Debug)]
pub struct SettleEntry {
    pub account: AccountId,
    pub payout: u64,
}

pub struct Ledger {
    db: Arc<Db>,
    metrics: Arc<crate::metrics::Metrics>,
}

impl Ledger {
    pub fn new(db: Arc<Db>, metrics: Arc<crate::metrics::Metrics>) -> Self {
        Self { db, metrics }
    }

    /// Retry loop around a transactional closure for optimistic-lock misses.
    fn with_retry<T>(
        &self,
        f: impl Fn(&Transaction<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut attempt = 0;
        loop {
            match self.db.transact(&f) {
                Err(LedgerError::Contention) if attempt < CONTENTION_RETRY_LIMIT => {
                    attempt += 1;
                    self.metrics.inc_contention_retries();
                    tracing::warn!(attempt, "wallet version conflict; retrying");
                }
                other => return other,
            }
        }
    }

    // ---- accounts -------------------------------------------------------

    pub fn create_account(
        &self,
        nickname: &str,
        region: &str,
    ) -> Result<PlayerAccount, LedgerError> {
        if nickname.is_empty() || nickname.len() > MAX_NICKNAME_LENGTH {
            return Err(LedgerError::Validation("nickname length out of range"));
        }
        let mut raw = [0u8; 16];
        OsRng.fill_bytes(&mut raw);
        let id = AccountId(raw);
        let now = unix_ms();
        self.db.transact(|tx| {
            tx.execute(
                "INSERT INTO accounts (id, nickname, kyc, region, created_at)
                 VALUES (?1, ?2, 'none', ?3, ?4)",
                params![id.to_hex(), nickname, region, now],
            )?;
            tx.execute(
                "INSERT INTO wallets (account, available, escrow, version) VALUES (?1, 0, 0, 0)",
                params![id.to_hex()],
            )?;
            Ok(())
        })?;
        Ok(PlayerAccount {
            id,
            nickname: nickname.to_string(),
            kyc: KycState::None,
            region: region.to_string(),
            created_at: now,
        })
    }

    pub fn account(&self, id: AccountId) -> Result<PlayerAccount, LedgerError> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT nickname, kyc, region, created_at FROM accounts WHERE id = ?1",
                params![id.to_hex()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u64>(3)?,
                    ))
                },
            )
            .optional()?
            .map(|(nickname, kyc, region, created_at)| PlayerAccount {
                id,
                nickname,
                kyc: KycState::parse(&kyc).unwrap_or(KycState::None),
                region,
                created_at,
            })
            .ok_or(LedgerError::Precondition(Precondition::UnknownAccount))
        })
    }

    pub fn set_kyc(&self, id: AccountId, state: KycState) -> Result<(), LedgerError> {
        self.db.transact(|tx| {
            let updated = tx.execute(
                "UPDATE accounts SET kyc = ?1 WHERE id = ?2",
                params![state.as_str(), id.to_hex()],
            )?;
            if updated == 0 {
                return Err(LedgerError::Precondition(Precondition::UnknownAccount));
            }
            Ok(())
        })
    }

    pub fn wallet(&self, id: AccountId) -> Result<Wallet, LedgerError> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT available, escrow, version FROM wallets WHERE account = ?1",
                params![id.to_hex()],
                |row| {
                    Ok(Wallet {
                        available: row.get::<_, i64>(0)? as u64,
                        escrow: row.get::<_, i64>(1)? as u64,
                        version: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()?
            .ok_or(LedgerError::Precondition(Precondition::UnknownAccount))
        })
    }

    // ---- money movements ------------------------------------------------

    pub fn deposit(
        &self,
        account: AccountId,
        amount: u64,
        reference: &str,
        key: Option<&str>,
    ) -> Result<i64, LedgerError> {
        let amount = positive_amount(amount)?;
        self.with_retry(|tx| {
            if let Some(id) = check_idempotency(tx, key)? {
                return Ok(id);
            }
            let wallet = wallet_for_update(tx, account)?;
            bump_wallet(
                tx,
                account,
                &wallet,
                wallet.available + amount as u64,
                wallet.escrow,
            )?;
            insert_entry(tx, account, EntryKind::Deposit, amount, reference, key)
        })
    }

    pub fn withdraw(
        &self,
        account: AccountId,
        amount: u64,
        method: &str,
        key: Option<&str>,
    ) -> Result<i64, LedgerError> {
        let amount = positive_amount(amount)?;
        self.with_retry(|tx| {
            if let Some(id) = check_idempotency(tx, key)? {
                return Ok(id);
            }
            let kyc: Option<String> = tx
                .query_row(
                    "SELECT kyc FROM accounts WHERE id = ?1",
                    params![account.to_hex()],
                    |row| row.get(0),
                )
                .optional()?;
            match kyc.as_deref().and_then(KycState::parse) {
                Some(KycState::Approved) => {}
                Some(_) => return Err(LedgerError::Precondition(Precondition::KycRequired)),
                None => return Err(LedgerError::Precondition(Precondition::UnknownAccount)),
            }
            let wallet = wallet_for_update(tx, account)?;
            if wallet.available < amount as u64 {
                return Err(LedgerError::Precondition(Precondition::InsufficientFunds));
            }
            bump_wallet(
                tx,
                account,
                &wallet,
                wallet.available - amount as u64,
                wallet.escrow,
            )?;
            insert_entry(tx, account, EntryKind::Withdrawal, -amount, method, key)
        })
    }

    pub fn lock_escrow(
        &self,
        account: AccountId,
        amount: u64,
        match_ref: &str,
    ) -> Result<(), LedgerError> {
        self.with_retry(|tx| lock_escrow_tx(tx, account, amount, match_ref))
    }

    pub fn refund_escrow(
        &self,
        account: AccountId,
        amount: u64,
        match_ref: &str,
    ) -> Result<(), LedgerError> {
        self.with_retry(|tx| release_escrow_tx(tx, account, amount, match_ref, EntryKind::Refund))
    }

    /// Apply a settlement in one transaction: for every member release the
    /// per-player `buy_in` from escrow into the pot, credit the gross payout,
    /// write the single house rake row, persist placements and close the
    /// match. Idempotent at the match grain: a second call observes
    /// `ended_at` and returns `false` without re-applying.
    pub fn settle(
        &self,
        match_id: MatchId,
        placements: &[Placement],
        rake: u64,
    ) -> Result<bool, LedgerError> {
        let match_ref = format!("match:{match_id}");
        self.with_retry(|tx| {
            let row: Option<(Option<u64>, u64, u64)> = tx
                .query_row(
                    "SELECT ended_at, buy_in, pot FROM matches WHERE id = ?1",
                    params![match_id.to_hex()],
                    |r| Ok((r.get(0)?, r.get::<_, i64>(1)? as u64, r.get::<_, i64>(2)? as u64)),
                )
                .optional()?;
            let Some((ended_at, buy_in, pot)) = row else {
                return Err(LedgerError::Precondition(Precondition::UnknownMatch));
            };
            if ended_at.is_some() {
                return Ok(false);
            }

            let total_payout: u64 = placements.iter().map(|p| p.payout).sum();
            if total_payout + rake != pot {
                return Err(LedgerError::Integrity(format!(
                    "settlement does not drain the pot: payouts={total_payout} rake={rake} pot={pot}"
                )));
            }

            let buy_in_signed = positive_amount(buy_in)?;
            for placement in placements {
                let wallet = wallet_for_update(tx, placement.account)?;
                if wallet.escrow < buy_in {
                    return Err(LedgerError::Integrity(format!(
                        "escrow underrun for {}: have {} need {buy_in}",
                        placement.account, wallet.escrow
                    )));
                }
                bump_wallet(
                    tx,
                    placement.account,
                    &wallet,
                    wallet.available + placement.payout,
                    wallet.escrow - buy_in,
                )?;
                // Each player's own buy-in leaves escrow into the pot.
                insert_entry(
                    tx,
                    placement.account,
                    EntryKind::EscrowRelease,
                    -buy_in_signed,
                    &match_ref,
                    None,
                )?;
                insert_entry(
                    tx,
                    placement.account,
                    EntryKind::Payout,
                    positive_or_zero(placement.payout)?,
                    &match_ref,
                    None,
                )?;

                tx.execute(
                    "INSERT INTO placements
                       (match_id, account, team, placement, final_mass, max_mass, kills, payout)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        match_id.to_hex(),
                        placement.account.to_hex(),
                        placement.team,
                        placement.placement,
                        placement.final_mass,
                        placement.max_mass,
                        placement.kills,
                        placement.payout as i64,
                    ],
                )?;
            }

            let house = wallet_for_update(tx, HOUSE_ACCOUNT)?;
            bump_wallet(tx, HOUSE_ACCOUNT, &house, house.available + rake, house.escrow)?;
            insert_entry(
                tx,
                HOUSE_ACCOUNT,
                EntryKind::Rake,
                positive_or_zero(rake)?,
                &match_ref,
                None,
            )?;

            close_match(tx, match_id, MatchOutcome::Settled)?;
            Ok(true)
        })
    }

    /// Refund every current member of the match's originating lobby and close
    /// the match. Used by the abort path and by crash recovery; a no-op if
    /// the match already completed.
    pub fn refund_match(&self, match_id: MatchId) -> Result<bool, LedgerError> {
        let match_ref = format!("match:{match_id}");
        self.with_retry(|tx| {
            let row: Option<(Option<u64>, u64, i64)> = tx
                .query_row(
                    "SELECT ended_at, buy_in, lobby_id FROM matches WHERE id = ?1",
                    params![match_id.to_hex()],
                    |r| Ok((r.get(0)?, r.get::<_, i64>(1)? as u64, r.get(2)?)),
                )
                .optional()?;
            let Some((ended_at, buy_in, lobby_id)) = row else {
                return Err(LedgerError::Precondition(Precondition::UnknownMatch));
            };
            if ended_at.is_some() {
                return Ok(false);
            }

            let members: Vec<AccountId> = {
                let mut stmt = tx.prepare(
                    "SELECT account FROM memberships WHERE lobby_id = ?1 ORDER BY account ASC",
                )?;
                let rows = stmt.query_map(params![lobby_id], |row| row.get::<_, String>(0))?;
                let mut members = Vec::new();
                for row in rows {
                    let hex = row?;
                    members.push(
                        AccountId::from_hex(&hex)
                            .ok_or_else(|| LedgerError::Integrity(format!("bad member id {hex}")))?,
                    );
                }
                members
            };

            for account in members {
                release_escrow_tx(tx, account, buy_in, &match_ref, EntryKind::Refund)?;
            }
            close_match(tx, match_id, MatchOutcome::Refunded)?;
            Ok(true)
        })
    }

    pub fn history(
        &self,
        account: AccountId,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<(Vec<LedgerEntry>, Option<i64>), LedgerError> {
        let limit = limit.clamp(1, HISTORY_MAX_LIMIT);
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, amount, status, reference, idempotency_key, created_at
                 FROM ledger
                 WHERE account = ?1 AND (?2 IS NULL OR id < ?2)
                 ORDER BY id DESC LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![account.to_hex(), cursor, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, u64>(6)?,
                ))
            })?;
            let mut entries = Vec::new();
            for row in rows {
                let (id, kind, amount, status, reference, idempotency_key, created_at) = row?;
                entries.push(LedgerEntry {
                    id,
                    account,
                    kind: EntryKind::parse(&kind)
                        .ok_or_else(|| LedgerError::Integrity(format!("bad ledger kind {kind}")))?,
                    amount,
                    status: EntryStatus::parse(&status).ok_or_else(|| {
                        LedgerError::Integrity(format!("bad ledger status {status}"))
                    })?,
                    reference,
                    idempotency_key,
                    created_at,
                });
            }
            let next = (entries.len() == limit)
                .then(|| entries.last().map(|e| e.id))
                .flatten();
            Ok((entries, next))
        })
    }
}

// ---- transaction-scoped helpers (shared with the controller) -------------

pub(crate) fn lock_escrow_tx(
    tx: &Transaction<'_>,
    account: AccountId,
    amount: u64,
    match_ref: &str,
) -> Result<(), LedgerError> {
    let signed = positive_amount(amount)?;
    let wallet = wallet_for_update(tx, account)?;
    if wallet.available < amount {
        return Err(LedgerError::Precondition(Precondition::InsufficientFunds));
    }
    bump_wallet(
        tx,
        account,
        &wallet,
        wallet.available - amount,
        wallet.escrow + amount,
    )?;
    insert_entry(tx, account, EntryKind::EscrowLock, signed, match_ref, None)?;
    Ok(())
}

pub(crate) fn release_escrow_tx(
    tx: &Transaction<'_>,
    account: AccountId,
    amount: u64,
    reference: &str,
    kind: EntryKind,
) -> Result<(), LedgerError> {
    debug_assert!(matches!(
        kind,
        EntryKind::EscrowRelease | EntryKind::Refund
    ));
    let signed = positive_amount(amount)?;
    let wallet = wallet_for_update(tx, account)?;
    if wallet.escrow < amount {
        return Err(LedgerError::Precondition(Precondition::InsufficientEscrow));
    }
    bump_wallet(
        tx,
        account,
        &wallet,
        wallet.available + amount,
        wallet.escrow - amount,
    )?;
    insert_entry(tx, account, kind, signed, reference, None)?;
    Ok(())
}

fn close_match(
    tx: &Transaction<'_>,
    match_id: MatchId,
    outcome: MatchOutcome,
) -> Result<(), LedgerError> {
    tx.execute(
        "UPDATE matches SET ended_at = ?1, outcome = ?2 WHERE id = ?3",
        params![unix_ms(), outcome.as_str(), match_id.to_hex()],
    )?;
    tx.execute(
        "UPDATE lobbies SET state = 'completed'
         WHERE id = (SELECT lobby_id FROM matches WHERE id = ?1)",
        params![match_id.to_hex()],
    )?;
    Ok(())
}

fn wallet_for_update(tx: &Transaction<'_>, account: AccountId) -> Result<Wallet, LedgerError> {
    tx.query_row(
        "SELECT available, escrow, version FROM wallets WHERE account = ?1",
        params![account.to_hex()],
        |row| {
            Ok(Wallet {
                available: row.get::<_, i64>(0)? as u64,
                escrow: row.get::<_, i64>(1)? as u64,
                version: row.get::<_, i64>(2)? as u64,
            })
        },
    )
    .optional()?
    .ok_or(LedgerError::Precondition(Precondition::UnknownAccount))
}

/// Compare-and-swap on the wallet version; zero rows affected means a
/// concurrent writer won and the whole transaction retries.
fn bump_wallet(
    tx: &Transaction<'_>,
    account: AccountId,
    read: &Wallet,
    available: u64,
    escrow: u64,
) -> Result<(), LedgerError> {
    let updated = tx.execute(
        "UPDATE wallets SET available = ?1, escrow = ?2, version = version + 1
         WHERE account = ?3 AND version = ?4",
        params![available as i64, escrow as i64, account.to_hex(), read.version as i64],
    )?;
    if updated == 0 {
        return Err(LedgerError::Contention);
    }
    Ok(())
}

fn insert_entry(
    tx: &Transaction<'_>,
    account: AccountId,
    kind: EntryKind,
    amount: i64,
    reference: &str,
    key: Option<&str>,
) -> Result<i64, LedgerError> {
    tx.execute(
        "INSERT INTO ledger (account, kind, amount, status, reference, idempotency_key, created_at)
         VALUES (?1, ?2, ?3, 'completed', ?4, ?5, ?6)",
        params![account.to_hex(), kind.as_str(), amount, reference, key, unix_ms()],
    )?;
    Ok(tx.last_insert_rowid())
}

/// A previously completed row under this key short-circuits with its id; a
/// pending one rejects as busy.
fn check_idempotency(tx: &Transaction<'_>, key: Option<&str>) -> Result<Option<i64>, LedgerError> {
    let Some(key) = key else {
        return Ok(None);
    };
    let existing: Option<(i64, String)> = tx
        .query_row(
            "SELECT id, status FROM ledger WHERE idempotency_key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match existing {
        Some((id, status)) if status == EntryStatus::Completed.as_str() => Ok(Some(id)),
        Some(_) => Err(LedgerError::Precondition(Precondition::IdempotencyBusy)),
        None => Ok(None),
    }
}

fn positive_amount(amount: u64) -> Result<i64, LedgerError> {
    if amount == 0 {
        return Err(LedgerError::Validation("amount must be positive"));
    }
    i64::try_from(amount).map_err(|_| LedgerError::Validation("amount exceeds ledger range"))
}

fn positive_or_zero(amount: u64) -> Result<i64, LedgerError> {
    i64::try_from(amount).map_err(|_| LedgerError::Validation("amount exceeds ledger range"))
}

/// Replay completed rows into the wallet they imply. The ledger invariant is
/// that this always reproduces the stored `(available, escrow)` pair.
pub fn reconcile(entries: &[LedgerEntry]) -> (i64, i64) {
    let mut available = 0i64;
    let mut escrow = 0i64;
    for entry in entries {
        if entry.status != EntryStatus::Completed {
            continue;
        }
        match entry.kind {
            EntryKind::Deposit | EntryKind::Withdrawal | EntryKind::Payout | EntryKind::Rake => {
                available += entry.amount;
            }
            EntryKind::EscrowLock => {
                available -= entry.amount;
                escrow += entry.amount;
            }
            EntryKind::EscrowRelease => {
                if entry.amount >= 0 {
                    escrow -= entry.amount;
                    available += entry.amount;
                } else {
                    // Settlement: the stake left escrow into the pot.
                    escrow += entry.amount;
                }
            }
            EntryKind::Refund => {
                escrow -= entry.amount;
                available += entry.amount;
            }
        }
    }
    (available, escrow)
}
