//! Petri domain types.
//!
//! Shared data model for the wager-backed arena: accounts and wallets, ledger
//! rows, lobby and match records, placements, and the JSON wire protocol
//! spoken by player sessions. This crate is pure data plus serde; all
//! behavior lives in `petri-engine` and `petri-server`.

pub mod account;
pub mod arena;
pub mod constants;
pub mod ledger;
pub mod lobby;
pub mod protocol;

pub use account::{KycState, PlayerAccount, Wallet};
pub use arena::{MatchId, MatchOutcome, MatchRecord, Placement};
pub use constants::*;
pub use ledger::{EntryKind, EntryStatus, LedgerEntry};
pub use lobby::{GameMode, Lobby, LobbyConfig, LobbyConfigError, LobbyState, Membership, PayoutModel};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque account identity, rendered as 32 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub [u8; 16]);

/// The distinguished house account that collects rake.
pub const HOUSE_ACCOUNT: AccountId = AccountId([0u8; 16]);

impl AccountId {
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let bytes: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn is_house(self) -> bool {
        self == HOUSE_ACCOUNT
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.to_hex())
    }
}

impl FromStr for AccountId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).ok_or(InvalidId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid id (expected 32 hex characters)")]
pub struct InvalidId;

impl Serialize for AccountId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid account id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_hex_round_trip() {
        let id = AccountId([0xab; 16]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(AccountId::from_hex(&hex), Some(id));
    }

    #[test]
    fn account_id_rejects_bad_hex() {
        assert!(AccountId::from_hex("zz").is_none());
        assert!(AccountId::from_hex("abcd").is_none()); // too short
        assert!("not-hex".parse::<AccountId>().is_err());
    }

    #[test]
    fn house_account_is_all_zero() {
        assert!(HOUSE_ACCOUNT.is_house());
        assert_eq!(HOUSE_ACCOUNT.to_hex(), "0".repeat(32));
    }

    #[test]
    fn account_id_serde_as_hex_string() {
        let id = AccountId([1u8; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
