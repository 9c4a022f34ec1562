//! Canonical constants for the simulation and the economy.
//!
//! The physics values are normative: verification replays only reproduce a
//! match byte-for-byte if every implementation agrees on them.

/// Server-authoritative simulation rate.
pub const TICK_RATE_HZ: u32 = 30;

/// Countdown phase duration before physics starts.
pub const COUNTDOWN_SECS: u64 = 10;

/// Normal phase duration.
pub const ACTIVE_SECS: u64 = 270;

/// Shrink phase duration; the match hard-caps at `ACTIVE_SECS + SHRINK_SECS`
/// from active entry.
pub const SHRINK_SECS: u64 = 90;

/// Mass-to-radius factor: `r = MASS_RADIUS_K * sqrt(m)`.
pub const MASS_RADIUS_K: f64 = 1.0;

/// Speed cap baseline: `v_max(m) = BASE_SPEED / sqrt(m / REFERENCE_MASS)`.
pub const BASE_SPEED: f64 = 5.0;
pub const REFERENCE_MASS: f64 = 10.0;

/// Acceleration per unit of input axis, per second.
pub const ACCEL_PER_AXIS: f64 = 2.0;

/// Velocity multiplier applied once per tick.
pub const FRICTION_PER_TICK: f64 = 0.9;

/// Boost: velocity doubled once per eligible press, then a cooldown.
pub const BOOST_COOLDOWN_MS: u64 = 6_000;
pub const BOOST_MULTIPLIER: f64 = 2.0;

/// A cell eats another only when strictly larger than this radius ratio.
pub const EAT_RADIUS_RATIO: f64 = 1.15;

/// Pellet mass and worldwide pellet cap.
pub const PELLET_MASS: f64 = 1.0;
pub const PELLET_CAP: usize = 500;

/// Per-tick Bernoulli probability of a pellet respawn while active; halved
/// during shrink.
pub const PELLET_RESPAWN_P: f64 = 0.1;

/// Mass lost per second outside the fog radius.
pub const FOG_DAMAGE_PER_SEC: f64 = 5.0;

/// Fraction of the map radius the fog closes over the full shrink phase.
pub const FOG_SHRINK_FRACTION: f64 = 0.65;

/// Cells spawn uniformly in a disk of this fraction of the map radius.
pub const SPAWN_DISK_FRACTION: f64 = 0.7;

/// Initial cell mass.
pub const INITIAL_CELL_MASS: f64 = 10.0;

/// Growth cap: `buy_in_cents * GROWTH_CAP_MULTIPLIER`, interpreted as mass.
pub const GROWTH_CAP_MULTIPLIER: u64 = 5;

/// Map boundary restitution: position reflected onto the boundary, velocity
/// multiplied by `-WALL_RESTITUTION`.
pub const WALL_RESTITUTION: f64 = 0.5;

/// Default map radius; `MAP_RADIUS` overrides at startup.
pub const DEFAULT_MAP_RADIUS: f64 = 500.0;

/// Basis-point denominator for rake math.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Commitment material sizes.
pub const SEED_LEN: usize = 32;
pub const NONCE_LEN: usize = 16;

/// Top-3 ladder shares in basis points of the net pot.
pub const LADDER_BPS: [u64; 3] = [6_500, 2_500, 1_000];

/// Maximum accepted nickname length.
pub const MAX_NICKNAME_LENGTH: usize = 32;

/// Ledger history page bounds.
pub const HISTORY_DEFAULT_LIMIT: usize = 50;
pub const HISTORY_MAX_LIMIT: usize = 200;

/// A waiting lobby with at least `LOBBY_MIN_PLAYERS` members is promoted to a
/// match after this many seconds even if not full.
pub const LOBBY_START_TIMEOUT_SECS: u64 = 30;
pub const LOBBY_MIN_PLAYERS: usize = 2;

/// Bounded retry attempts for wallet write conflicts.
pub const CONTENTION_RETRY_LIMIT: u32 = 3;

/// Per-match input queue depth from sessions to the match owner.
pub const INPUT_QUEUE_DEPTH: usize = 256;

/// Outbound frames buffered per session before the connection is dropped.
pub const SESSION_OUTBOUND_DEPTH: usize = 64;
