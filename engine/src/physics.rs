//! Pure physics kernel: circle motion, eating, fog and boundary rules.
//!
//! Every function here is a pure state transition over cell/pellet values.
//! No I/O and no clock reads; the caller passes `dt` and the match-relative
//! time in milliseconds.

use glam::DVec2;

use petri_types::constants::*;
use petri_types::AccountId;

/// A player avatar. Owned exclusively by its [`crate::arena::Arena`].
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub id: u32,
    pub account: AccountId,
    /// Zero means no team (solo); equal non-zero teams cannot eat each other.
    pub team: u32,
    pub pos: DVec2,
    pub vel: DVec2,
    /// Latest input direction, a vector of length ≤ 1.
    pub axes: DVec2,
    pub mass: f64,
    pub boost_requested: bool,
    pub last_boost_at_ms: Option<u64>,
    pub is_dead: bool,
    pub kills: u32,
    pub max_mass_seen: f64,
}

impl Cell {
    pub fn new(id: u32, account: AccountId, team: u32, pos: DVec2) -> Self {
        Self {
            id,
            account,
            team,
            pos,
            vel: DVec2::ZERO,
            axes: DVec2::ZERO,
            mass: INITIAL_CELL_MASS,
            boost_requested: false,
            last_boost_at_ms: None,
            is_dead: false,
            kills: 0,
            max_mass_seen: INITIAL_CELL_MASS,
        }
    }

    pub fn radius(&self) -> f64 {
        radius_for_mass(self.mass)
    }
}

/// A food pellet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pellet {
    pub id: u64,
    pub pos: DVec2,
    pub mass: f64,
    pub consumed: bool,
}

impl Pellet {
    pub fn new(id: u64, pos: DVec2) -> Self {
        Self {
            id,
            pos,
            mass: PELLET_MASS,
            consumed: false,
        }
    }

    pub fn radius(&self) -> f64 {
        radius_for_mass(self.mass)
    }
}

/// `r = k·√m`.
pub fn radius_for_mass(mass: f64) -> f64 {
    MASS_RADIUS_K * mass.max(0.0).sqrt()
}

/// `v_max(m) = V₀ / √(m / m₀)`: heavier cells move slower.
pub fn max_speed(mass: f64) -> f64 {
    if mass <= 0.0 {
        return 0.0;
    }
    BASE_SPEED / (mass / REFERENCE_MASS).sqrt()
}

/// Integrate one step of motion. Applied in a fixed order so replays agree:
/// boost, acceleration, friction, speed clamp, translation.
pub fn advance(cell: &mut Cell, dt: f64, now_ms: u64) {
    if cell.is_dead {
        return;
    }

    if cell.boost_requested {
        let eligible = match cell.last_boost_at_ms {
            Some(last) => now_ms.saturating_sub(last) >= BOOST_COOLDOWN_MS,
            None => true,
        };
        if eligible {
            cell.vel *= BOOST_MULTIPLIER;
            cell.last_boost_at_ms = Some(now_ms);
        }
    }

    cell.vel += cell.axes * ACCEL_PER_AXIS * dt;
    cell.vel *= FRICTION_PER_TICK;

    let cap = max_speed(cell.mass);
    let speed = cell.vel.length();
    if speed > cap && speed > 0.0 {
        cell.vel *= cap / speed;
    }

    cell.pos += cell.vel * dt;
}

/// Attempt to have `eater` consume `target`.
///
/// Requires a strictly greater than `EAT_RADIUS_RATIO` radius advantage and
/// the target's center engulfed by the eater. Mass transfers up to the growth
/// cap; the target dies with mass zero either way.
pub fn try_eat(eater: &mut Cell, target: &mut Cell, growth_cap: f64) -> bool {
    if eater.is_dead || target.is_dead {
        return false;
    }
    if eater.team != 0 && eater.team == target.team {
        return false;
    }
    if eater.radius() <= EAT_RADIUS_RATIO * target.radius() {
        return false;
    }
    if eater.pos.distance(target.pos) > eater.radius() {
        return false;
    }

    let combined = (eater.mass + target.mass).min(growth_cap);
    eater.mass = combined.max(eater.mass);
    eater.kills += 1;
    eater.max_mass_seen = eater.max_mass_seen.max(eater.mass);
    target.is_dead = true;
    target.mass = 0.0;
    true
}

/// Consume an overlapping pellet, respecting the growth cap.
pub fn try_consume(cell: &mut Cell, pellet: &mut Pellet, growth_cap: f64) -> bool {
    if cell.is_dead || pellet.consumed {
        return false;
    }
    if cell.pos.distance(pellet.pos) > cell.radius() + pellet.radius() {
        return false;
    }

    cell.mass = (cell.mass + pellet.mass).min(growth_cap).max(cell.mass);
    cell.max_mass_seen = cell.max_mass_seen.max(cell.mass);
    pellet.consumed = true;
    true
}

/// Drain mass from cells caught outside the fog radius.
pub fn apply_fog(cell: &mut Cell, fog_radius: f64, dt: f64) {
    if cell.is_dead || cell.pos.length() <= fog_radius {
        return;
    }
    cell.mass -= FOG_DAMAGE_PER_SEC * dt;
    if cell.mass <= 0.0 {
        cell.mass = 0.0;
        cell.is_dead = true;
    }
}

/// Hard map boundary: project the position back onto the rim and damp the
/// velocity inward.
pub fn clamp_to_map(cell: &mut Cell, map_radius: f64) {
    let dist = cell.pos.length();
    if dist <= map_radius {
        return;
    }
    cell.pos *= map_radius / dist;
    cell.vel *= -WALL_RESTITUTION;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(byte: u8) -> AccountId {
        AccountId([byte; 16])
    }

    fn cell_at(id: u32, x: f64, y: f64) -> Cell {
        Cell::new(id, account(id as u8), 0, DVec2::new(x, y))
    }

    #[test]
    fn zero_axes_decay_under_friction_only() {
        let mut cell = cell_at(1, 0.0, 0.0);
        cell.vel = DVec2::new(3.0, 0.0);
        let before = cell.vel.length();
        advance(&mut cell, 1.0 / 30.0, 0);
        let after = cell.vel.length();
        assert!(after < before);
        assert!((after - before * FRICTION_PER_TICK).abs() < 1e-12);
    }

    #[test]
    fn speed_is_capped_by_mass() {
        let mut cell = cell_at(1, 0.0, 0.0);
        cell.mass = 40.0;
        cell.vel = DVec2::new(100.0, 0.0);
        advance(&mut cell, 1.0 / 30.0, 0);
        assert!(cell.vel.length() <= max_speed(40.0) + 1e-9);
    }

    #[test]
    fn heavier_cells_are_slower() {
        assert!(max_speed(40.0) < max_speed(10.0));
        assert_eq!(max_speed(REFERENCE_MASS), BASE_SPEED);
    }

    #[test]
    fn boost_doubles_velocity_once_then_cools_down() {
        let mut cell = cell_at(1, 0.0, 0.0);
        cell.vel = DVec2::new(0.1, 0.0);
        cell.boost_requested = true;

        advance(&mut cell, 1.0 / 30.0, 1_000);
        assert_eq!(cell.last_boost_at_ms, Some(1_000));
        let boosted = cell.vel.length();

        // Within the cooldown the press is ignored.
        advance(&mut cell, 1.0 / 30.0, 1_033);
        assert_eq!(cell.last_boost_at_ms, Some(1_000));
        assert!(cell.vel.length() < boosted);

        // After the cooldown the held press fires again.
        advance(&mut cell, 1.0 / 30.0, 1_000 + BOOST_COOLDOWN_MS);
        assert_eq!(cell.last_boost_at_ms, Some(1_000 + BOOST_COOLDOWN_MS));
    }

    #[test]
    fn eat_requires_strict_ratio() {
        // Radius ratio is exactly 1.15 when the mass ratio is 1.15²; the
        // strict inequality must refuse it.
        let mut eater = cell_at(1, 0.0, 0.0);
        let mut target = cell_at(2, 0.1, 0.0);
        target.mass = 100.0;
        eater.mass = 100.0 * EAT_RADIUS_RATIO * EAT_RADIUS_RATIO;
        assert!(!try_eat(&mut eater, &mut target, f64::MAX));

        eater.mass += 0.1;
        assert!(try_eat(&mut eater, &mut target, f64::MAX));
        assert!(target.is_dead);
        assert_eq!(target.mass, 0.0);
        assert_eq!(eater.kills, 1);
    }

    #[test]
    fn eat_requires_engulfed_center() {
        let mut eater = cell_at(1, 0.0, 0.0);
        let mut target = cell_at(2, 0.0, 0.0);
        eater.mass = 400.0;
        target.mass = 10.0;
        target.pos = DVec2::new(eater.radius() + 1.0, 0.0);
        assert!(!try_eat(&mut eater, &mut target, f64::MAX));

        target.pos = DVec2::new(eater.radius() - 1.0, 0.0);
        assert!(try_eat(&mut eater, &mut target, f64::MAX));
    }

    #[test]
    fn teammates_cannot_eat_each_other() {
        let mut eater = cell_at(1, 0.0, 0.0);
        let mut target = cell_at(2, 0.0, 0.0);
        eater.team = 3;
        target.team = 3;
        eater.mass = 400.0;
        assert!(!try_eat(&mut eater, &mut target, f64::MAX));

        // Team zero is "no team": same value does not protect.
        eater.team = 0;
        target.team = 0;
        assert!(try_eat(&mut eater, &mut target, f64::MAX));
    }

    #[test]
    fn eating_respects_growth_cap() {
        let mut eater = cell_at(1, 0.0, 0.0);
        let mut target = cell_at(2, 0.0, 0.0);
        eater.mass = 90.0;
        target.mass = 50.0;
        assert!(try_eat(&mut eater, &mut target, 100.0));
        assert_eq!(eater.mass, 100.0);
        assert!(target.is_dead);
    }

    #[test]
    fn pellet_consumption_and_cap() {
        let mut cell = cell_at(1, 0.0, 0.0);
        let mut pellet = Pellet::new(1, DVec2::new(1.0, 0.0));
        assert!(try_consume(&mut cell, &mut pellet, f64::MAX));
        assert!(pellet.consumed);
        assert_eq!(cell.mass, INITIAL_CELL_MASS + PELLET_MASS);

        let mut far = Pellet::new(2, DVec2::new(100.0, 0.0));
        assert!(!try_consume(&mut cell, &mut far, f64::MAX));

        cell.mass = 50.0;
        let mut capped = Pellet::new(3, cell.pos);
        assert!(try_consume(&mut cell, &mut capped, 50.0));
        assert_eq!(cell.mass, 50.0);
    }

    #[test]
    fn fog_drains_and_kills() {
        let mut cell = cell_at(1, 200.0, 0.0);
        apply_fog(&mut cell, 100.0, 1.0);
        assert!((cell.mass - (INITIAL_CELL_MASS - FOG_DAMAGE_PER_SEC)).abs() < 1e-12);

        apply_fog(&mut cell, 100.0, 10.0);
        assert!(cell.is_dead);
        assert_eq!(cell.mass, 0.0);

        // Inside the fog nothing happens.
        let mut safe = cell_at(2, 10.0, 0.0);
        apply_fog(&mut safe, 100.0, 1.0);
        assert_eq!(safe.mass, INITIAL_CELL_MASS);
    }

    #[test]
    fn boundary_reflects_with_damped_velocity() {
        let mut cell = cell_at(1, 150.0, 0.0);
        cell.vel = DVec2::new(4.0, 0.0);
        clamp_to_map(&mut cell, 100.0);
        assert!((cell.pos.length() - 100.0).abs() < 1e-9);
        assert!((cell.vel.x - (-4.0 * WALL_RESTITUTION)).abs() < 1e-12);
    }

    #[test]
    fn dead_cells_do_not_move_or_eat() {
        let mut cell = cell_at(1, 0.0, 0.0);
        cell.is_dead = true;
        cell.vel = DVec2::new(1.0, 0.0);
        let pos = cell.pos;
        advance(&mut cell, 1.0, 0);
        assert_eq!(cell.pos, pos);

        let mut other = cell_at(2, 0.0, 0.0);
        assert!(!try_eat(&mut cell, &mut other, f64::MAX));
    }
}
