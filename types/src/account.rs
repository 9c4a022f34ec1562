use serde::{Deserialize, Serialize};

use crate::AccountId;

/// KYC progression; withdrawals require `Approved`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycState {
    None,
    Pending,
    Approved,
    Rejected,
}

impl KycState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A registered player. Created once; identity and KYC state are mutated by
/// auth/KYC collaborators only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAccount {
    pub id: AccountId,
    pub nickname: String,
    pub kyc: KycState,
    pub region: String,
    pub created_at: u64,
}

/// One wallet per account. Every mutation bumps `version`; writers with a
/// stale version fail and retry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub available: u64,
    pub escrow: u64,
    pub version: u64,
}

impl Wallet {
    /// Total funds attributed to the account across both buckets.
    pub fn total(&self) -> u64 {
        self.available.saturating_add(self.escrow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kyc_state_string_round_trip() {
        for state in [
            KycState::None,
            KycState::Pending,
            KycState::Approved,
            KycState::Rejected,
        ] {
            assert_eq!(KycState::parse(state.as_str()), Some(state));
        }
        assert_eq!(KycState::parse("verified"), None);
    }

    #[test]
    fn wallet_total_saturates() {
        let wallet = Wallet {
            available: u64::MAX,
            escrow: 1,
            version: 0,
        };
        assert_eq!(wallet.total(), u64::MAX);
    }
}
