//! JSON wire protocol for player sessions.
//!
//! One duplex channel per player. Inbound frames are dropped until `AUTH`
//! binds the session to an account and its cell; afterwards `INPUT` frames
//! steer the cell. Outbound traffic is tick-rate `SNAPSHOT`s interleaved with
//! `EVENT`s, and a single `RESULT` once the match settles.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arena::Placement;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "AUTH")]
    Auth { token: String },
    #[serde(rename = "INPUT")]
    Input {
        seq: u64,
        axes: Axes,
        boost: bool,
        ts: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "SNAPSHOT")]
    Snapshot(Snapshot),
    #[serde(rename = "EVENT")]
    Event {
        kind: EventKind,
        data: serde_json::Value,
    },
    #[serde(rename = "RESULT")]
    Result {
        placements: Vec<Placement>,
        seed: String,
        nonce: String,
        commit: String,
    },
    #[serde(rename = "REJECT")]
    Reject { code: RejectCode, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Countdown,
    Kill,
    Shrink,
    End,
}

/// Stable rejection codes surfaced to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    Unauthenticated,
    InvalidToken,
    NotAMember,
    InvalidAxes,
    MalformedFrame,
}

/// Raw input axes as sent by the client. Must form a vector of length ≤ 1.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AxesError {
    #[error("axes components must be finite")]
    NonFinite,
    #[error("axes vector length exceeds 1")]
    TooLong,
}

impl Axes {
    pub const ZERO: Axes = Axes { x: 0.0, y: 0.0 };

    /// Validates the vector: finite components and ‖v‖ ≤ 1 (with a small
    /// float tolerance, snapped back onto the unit circle).
    pub fn validated(self) -> Result<Axes, AxesError> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(AxesError::NonFinite);
        }
        let len = (self.x * self.x + self.y * self.y).sqrt();
        if len > 1.0 + 1e-9 {
            return Err(AxesError::TooLong);
        }
        if len > 1.0 {
            return Ok(Axes {
                x: self.x / len,
                y: self.y / len,
            });
        }
        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub cells: Vec<CellView>,
    pub pellets: Vec<PelletView>,
    pub fog_radius: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellView {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub mass: f64,
    pub team: u32,
    pub is_dead: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PelletView {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}
