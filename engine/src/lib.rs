//! Petri deterministic engine.
//!
//! Everything in this crate is reproducible from a match seed: the
//! commitment scheme, the tagged draw streams, the physics kernel, the tick
//! simulation, and the settlement math.
//!
//! ## Determinism requirements
//! - No wall-clock time inside the engine; callers pass ticks.
//! - No randomness beyond [`rng::DrawStream`] values derived from the match
//!   seed (seed/nonce generation itself is the one OS-entropy call, made
//!   before play).
//! - No iteration over hash-based collections where order reaches outputs.
//!
//! A third party holding `(seed, nonce)` and the member list can replay every
//! draw a match made and audit the outcome.

pub mod arena;
pub mod commitment;
pub mod physics;
pub mod rng;
pub mod scheduler;
pub mod settlement;

pub use arena::{Arena, ArenaParams, MatchEvent, Seat};
pub use commitment::{generate_commitment, verify_commitment, MatchCommitment};
pub use rng::DrawStream;
pub use scheduler::{Phase, PhaseClock};
pub use settlement::{compute_payouts, rake_amount, rank_members, RankedMember};
