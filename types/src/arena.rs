use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::lobby::PayoutModel;
use crate::{AccountId, InvalidId};

/// Opaque match identity, rendered as 32 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchId(pub [u8; 16]);

impl MatchId {
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let bytes: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatchId({})", self.to_hex())
    }
}

impl FromStr for MatchId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).ok_or(InvalidId)
    }
}

impl Serialize for MatchId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MatchId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid match id"))
    }
}

/// How a match reached its terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Settled,
    Refunded,
}

impl MatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Settled => "settled",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "settled" => Some(Self::Settled),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// Persisted match row, materialized from a lobby at countdown entry.
///
/// The commitment (`commit`) is persisted before any gameplay event reaches a
/// client; `seed`/`nonce` are revealed only once `ended_at` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub lobby_id: u64,
    /// 32 bytes, hex.
    pub seed: String,
    /// 16 bytes, hex.
    pub nonce: String,
    /// `SHA-256(hex(seed) || hex(nonce))`, hex.
    pub commit: String,
    pub payout_model: PayoutModel,
    pub rake_bps: u16,
    pub rake_cap: Option<u64>,
    pub buy_in: u64,
    pub pot: u64,
    pub rake: u64,
    pub net_pot: u64,
    pub map_radius: f64,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    pub outcome: Option<MatchOutcome>,
}

/// Final standing of one player within one match.
///
/// Placement is a total order: final mass descending, ties broken by account
/// id ascending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub account: AccountId,
    pub team: u32,
    pub placement: u32,
    pub final_mass: f64,
    pub max_mass: f64,
    pub kills: u32,
    pub payout: u64,
}
