use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Ledger row kinds.
///
/// `Deposit`, `Withdrawal`, `Payout` and `Refund` move money in or out of an
/// account; `EscrowLock` and `EscrowRelease` transfer between the `available`
/// and `escrow` buckets, except that a negative-amount release at settlement
/// records the stake leaving escrow into the pot. The signed `amount`
/// conventions are documented with the ledger engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    EscrowLock,
    EscrowRelease,
    Payout,
    Rake,
    Refund,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::EscrowLock => "escrow_lock",
            Self::EscrowRelease => "escrow_release",
            Self::Payout => "payout",
            Self::Rake => "rake",
            Self::Refund => "refund",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            "escrow_lock" => Some(Self::EscrowLock),
            "escrow_release" => Some(Self::EscrowRelease),
            "payout" => Some(Self::Payout),
            "rake" => Some(Self::Rake),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// An immutable ledger row. `amount` is a signed minor-unit delta against the
/// account's funds; rows never change after reaching `Completed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account: AccountId,
    pub kind: EntryKind,
    pub amount: i64,
    pub status: EntryStatus,
    /// Opaque reference blob: match id, PSP reference, withdrawal method.
    pub reference: String,
    /// Globally unique when present; repeat submissions return the original
    /// row instead of re-applying.
    pub idempotency_key: Option<String>,
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_string_round_trip() {
        for kind in [
            EntryKind::Deposit,
            EntryKind::Withdrawal,
            EntryKind::EscrowLock,
            EntryKind::EscrowRelease,
            EntryKind::Payout,
            EntryKind::Rake,
            EntryKind::Refund,
        ] {
            assert_eq!(EntryKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntryKind::parse("stake"), None);
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            EntryStatus::Pending,
            EntryStatus::Completed,
            EntryStatus::Failed,
            EntryStatus::Cancelled,
        ] {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
    }
}
