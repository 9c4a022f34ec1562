use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::BPS_DENOMINATOR;
use crate::AccountId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Solo,
    Duo,
    Squad,
}

impl GameMode {
    /// Players per team; solo cells carry team 0 and get no team protection.
    pub fn team_size(self) -> u32 {
        match self {
            Self::Solo => 1,
            Self::Duo => 2,
            Self::Squad => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Duo => "duo",
            Self::Squad => "squad",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "solo" => Some(Self::Solo),
            "duo" => Some(Self::Duo),
            "squad" => Some(Self::Squad),
            _ => None,
        }
    }
}

/// Declared pot partition model. Modeled as a closed variant set so payout
/// computation is a total function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutModel {
    WinnerTakeAll,
    Top3Ladder,
    Proportional,
}

impl PayoutModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WinnerTakeAll => "winner_take_all",
            Self::Top3Ladder => "top3_ladder",
            Self::Proportional => "proportional",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "winner_take_all" => Some(Self::WinnerTakeAll),
            "top3_ladder" => Some(Self::Top3Ladder),
            "proportional" => Some(Self::Proportional),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyState {
    Waiting,
    Countdown,
    Active,
    Shrink,
    Settlement,
    Completed,
}

impl LobbyState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Countdown => "countdown",
            Self::Active => "active",
            Self::Shrink => "shrink",
            Self::Settlement => "settlement",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(Self::Waiting),
            "countdown" => Some(Self::Countdown),
            "active" => Some(Self::Active),
            "shrink" => Some(Self::Shrink),
            "settlement" => Some(Self::Settlement),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// States in which a crash strands escrow and recovery must refund.
    pub fn in_flight(self) -> bool {
        matches!(self, Self::Countdown | Self::Active | Self::Shrink)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LobbyConfigError {
    #[error("buy_in must be positive")]
    ZeroBuyIn,
    #[error("rake_bps out of range (got={0}, max={BPS_DENOMINATOR})")]
    RakeBpsOutOfRange(u16),
    #[error("capacity too small (got={got}, min={min})")]
    CapacityTooSmall { got: u32, min: u32 },
    #[error("capacity {capacity} is not a multiple of team size {team_size}")]
    CapacityNotTeamAligned { capacity: u32, team_size: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyConfig {
    pub mode: GameMode,
    /// Fixed stake in minor units.
    pub buy_in: u64,
    pub payout_model: PayoutModel,
    pub rake_bps: u16,
    pub rake_cap: Option<u64>,
    pub capacity: u32,
}

impl LobbyConfig {
    pub fn validate(&self) -> Result<(), LobbyConfigError> {
        if self.buy_in == 0 {
            return Err(LobbyConfigError::ZeroBuyIn);
        }
        if u64::from(self.rake_bps) > BPS_DENOMINATOR {
            return Err(LobbyConfigError::RakeBpsOutOfRange(self.rake_bps));
        }
        let min = self.mode.team_size() * 2;
        if self.capacity < min {
            return Err(LobbyConfigError::CapacityTooSmall {
                got: self.capacity,
                min,
            });
        }
        if self.capacity % self.mode.team_size() != 0 {
            return Err(LobbyConfigError::CapacityNotTeamAligned {
                capacity: self.capacity,
                team_size: self.mode.team_size(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: u64,
    pub config: LobbyConfig,
    pub state: LobbyState,
    pub created_at: u64,
}

/// A (player, team) membership inside a lobby.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub account: AccountId,
    pub team: u32,
}
