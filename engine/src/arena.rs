//! Per-match authoritative simulation.
//!
//! An [`Arena`] owns its cells and pellets exclusively; the match owner task
//! is the only writer. Everything observable — spawn positions, pellet
//! drops, respawn coin flips — derives from the match seed through the
//! tagged draw streams, so a replay with the revealed seed reproduces the
//! world byte-for-byte.
//!
//! Stream usage per match:
//! - `"spawn"`: one disk draw per member, in ascending account order.
//! - `"pellets"`: the initial 500 pellet drops, then one draw per respawn,
//!   all on the same persistent stream.
//! - `"shrink"`: the per-tick respawn coin flips.

use glam::DVec2;

use petri_types::constants::*;
use petri_types::protocol::{CellView, PelletView, Snapshot};
use petri_types::AccountId;

use crate::physics::{self, Cell, Pellet};
use crate::rng::DrawStream;
use crate::scheduler::{Phase, PhaseClock};
use crate::settlement::RankedMember;

/// A (player, team) pair entering the match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Seat {
    pub account: AccountId,
    pub team: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct ArenaParams {
    pub seed: [u8; SEED_LEN],
    pub map_radius: f64,
    /// Hard mass ceiling, `buy_in × 5`.
    pub growth_cap: f64,
    pub tick_rate: u32,
}

/// Events surfaced to sessions, in emission order within a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchEvent {
    Countdown { secs: u64 },
    Kill { killer: AccountId, victim: AccountId },
    Shrink,
    End,
}

pub struct Arena {
    clock: PhaseClock,
    map_radius: f64,
    growth_cap: f64,
    tick: u64,
    phase: Phase,
    fog_radius: f64,
    cells: Vec<Cell>,
    pellets: Vec<Pellet>,
    next_pellet_id: u64,
    pellet_stream: DrawStream,
    shrink_stream: DrawStream,
    finished: bool,
}

impl Arena {
    /// Build the initial world. Seats are ordered by ascending account id so
    /// the spawn stream assignment is reproducible regardless of join order.
    pub fn new(params: ArenaParams, seats: &[Seat]) -> Self {
        let mut seats: Vec<Seat> = seats.to_vec();
        seats.sort_by_key(|seat| seat.account);

        let mut spawn_stream = DrawStream::new(&params.seed, "spawn");
        let cells = seats
            .iter()
            .enumerate()
            .map(|(index, seat)| {
                let (x, y) = spawn_stream.next_in_disk(SPAWN_DISK_FRACTION * params.map_radius);
                Cell::new(index as u32, seat.account, seat.team, DVec2::new(x, y))
            })
            .collect();

        let mut pellet_stream = DrawStream::new(&params.seed, "pellets");
        let mut pellets = Vec::with_capacity(PELLET_CAP);
        for id in 0..PELLET_CAP as u64 {
            let (x, y) = pellet_stream.next_in_disk(params.map_radius);
            pellets.push(Pellet::new(id, DVec2::new(x, y)));
        }

        let clock = PhaseClock::new(params.tick_rate);
        Self {
            clock,
            map_radius: params.map_radius,
            growth_cap: params.growth_cap,
            tick: 0,
            phase: clock.phase_at(0),
            fog_radius: params.map_radius,
            cells,
            pellets,
            next_pellet_id: PELLET_CAP as u64,
            pellet_stream,
            shrink_stream: DrawStream::new(&params.seed, "shrink"),
            finished: false,
        }
    }

    /// Replay only the seeded world generation: spawn positions for
    /// `member_count` cells and the initial pellet field. This is the
    /// post-reveal verification surface.
    pub fn reproduce_initial(
        seed: &[u8; SEED_LEN],
        member_count: usize,
        map_radius: f64,
    ) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
        let mut spawn_stream = DrawStream::new(seed, "spawn");
        let spawns = (0..member_count)
            .map(|_| spawn_stream.next_in_disk(SPAWN_DISK_FRACTION * map_radius))
            .collect();
        let mut pellet_stream = DrawStream::new(seed, "pellets");
        let pellets = (0..PELLET_CAP)
            .map(|_| pellet_stream.next_in_disk(map_radius))
            .collect();
        (spawns, pellets)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn fog_radius(&self) -> f64 {
        self.fog_radius
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn cell_id_for(&self, account: AccountId) -> Option<u32> {
        self.cells
            .iter()
            .find(|cell| cell.account == account)
            .map(|cell| cell.id)
    }

    pub fn live_cells(&self) -> usize {
        self.cells.iter().filter(|cell| !cell.is_dead).count()
    }

    /// Store the latest input for a cell; it takes effect on the next tick.
    /// The caller guarantees axes were validated (‖v‖ ≤ 1).
    pub fn apply_input(&mut self, cell_id: u32, axes: DVec2, boost: bool) {
        if let Some(cell) = self.cells.iter_mut().find(|cell| cell.id == cell_id) {
            if !cell.is_dead {
                cell.axes = axes;
                cell.boost_requested = boost;
            }
        }
    }

    /// Advance one tick and return the events it produced.
    pub fn step(&mut self) -> Vec<MatchEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        if self.tick == 0 {
            events.push(MatchEvent::Countdown {
                secs: COUNTDOWN_SECS,
            });
        }

        let phase = self.clock.phase_at(self.tick);
        if phase != self.phase {
            match phase {
                Phase::Shrink => events.push(MatchEvent::Shrink),
                Phase::Settlement => {
                    self.phase = phase;
                    self.finished = true;
                    events.push(MatchEvent::End);
                    return events;
                }
                _ => {}
            }
            self.phase = phase;
        }

        if matches!(self.phase, Phase::Active | Phase::Shrink) {
            self.fog_radius = self.clock.fog_radius(self.map_radius, self.tick);
            self.step_physics(&mut events);

            // A lone surviving team has nobody left to fight; close out
            // early rather than idling to the time cap.
            if self.live_team_count() <= 1 {
                self.phase = Phase::Settlement;
                self.finished = true;
                events.push(MatchEvent::End);
            }
        }

        self.tick += 1;
        events
    }

    fn step_physics(&mut self, events: &mut Vec<MatchEvent>) {
        let dt = self.clock.dt();
        let now_ms = self.clock.now_ms(self.tick);
        let in_shrink = matches!(self.phase, Phase::Shrink);

        // Motion, boundary, fog: cells in ascending id order.
        for cell in &mut self.cells {
            if cell.is_dead {
                continue;
            }
            physics::advance(cell, dt, now_ms);
            physics::clamp_to_map(cell, self.map_radius);
            if in_shrink {
                physics::apply_fog(cell, self.fog_radius, dt);
            }
        }

        // Cell-cell collisions: ordered pairs by id; at most one kill per
        // pair per tick, larger cell tried first.
        for i in 0..self.cells.len() {
            for j in (i + 1)..self.cells.len() {
                let (a, b) = pair_mut(&mut self.cells, i, j);
                if a.is_dead || b.is_dead {
                    continue;
                }
                let (first, second) = if a.radius() >= b.radius() {
                    (a, b)
                } else {
                    (b, a)
                };
                if physics::try_eat(first, second, self.growth_cap) {
                    events.push(MatchEvent::Kill {
                        killer: first.account,
                        victim: second.account,
                    });
                } else if physics::try_eat(second, first, self.growth_cap) {
                    events.push(MatchEvent::Kill {
                        killer: second.account,
                        victim: first.account,
                    });
                }
            }
        }

        // Cell-pellet: consume overlaps, then drop eaten pellets.
        for cell in &mut self.cells {
            if cell.is_dead {
                continue;
            }
            for pellet in &mut self.pellets {
                physics::try_consume(cell, pellet, self.growth_cap);
            }
        }
        self.pellets.retain(|pellet| !pellet.consumed);

        // Pellet respawn: tapered while the fog is closing.
        let respawn_p = if in_shrink {
            PELLET_RESPAWN_P / 2.0
        } else {
            PELLET_RESPAWN_P
        };
        if self.shrink_stream.next_bool(respawn_p) && self.pellets.len() < PELLET_CAP {
            let (x, y) = self.pellet_stream.next_in_disk(self.map_radius);
            self.pellets
                .push(Pellet::new(self.next_pellet_id, DVec2::new(x, y)));
            self.next_pellet_id += 1;
        }
    }

    fn live_team_count(&self) -> usize {
        let mut teams: Vec<u32> = Vec::new();
        let mut solo = 0usize;
        for cell in &self.cells {
            if cell.is_dead {
                continue;
            }
            if cell.team == 0 {
                solo += 1;
            } else if !teams.contains(&cell.team) {
                teams.push(cell.team);
            }
        }
        solo + teams.len()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.tick,
            cells: self
                .cells
                .iter()
                .map(|cell| CellView {
                    id: cell.id,
                    x: cell.pos.x,
                    y: cell.pos.y,
                    radius: cell.radius(),
                    mass: cell.mass,
                    team: cell.team,
                    is_dead: cell.is_dead,
                })
                .collect(),
            pellets: self
                .pellets
                .iter()
                .map(|pellet| PelletView {
                    id: pellet.id,
                    x: pellet.pos.x,
                    y: pellet.pos.y,
                    radius: pellet.radius(),
                })
                .collect(),
            fog_radius: self.fog_radius,
        }
    }

    /// Final standings input for settlement; unranked.
    pub fn members(&self) -> Vec<RankedMember> {
        self.cells
            .iter()
            .map(|cell| RankedMember {
                account: cell.account,
                team: cell.team,
                final_mass: cell.mass,
                max_mass: cell.max_mass_seen,
                kills: cell.kills,
            })
            .collect()
    }
}

fn pair_mut(cells: &mut [Cell], i: usize, j: usize) -> (&mut Cell, &mut Cell) {
    debug_assert!(i < j);
    let (left, right) = cells.split_at_mut(j);
    (&mut left[i], &mut right[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seats(n: u8) -> Vec<Seat> {
        (1..=n)
            .map(|id| Seat {
                account: AccountId([id; 16]),
                team: 0,
            })
            .collect()
    }

    fn params(tick_rate: u32) -> ArenaParams {
        ArenaParams {
            seed: [0x11; SEED_LEN],
            map_radius: 500.0,
            growth_cap: 5_000.0,
            tick_rate,
        }
    }

    #[test]
    fn world_generation_is_reproducible() {
        let a = Arena::new(params(30), &seats(4));
        let b = Arena::new(params(30), &seats(4));
        assert_eq!(a.snapshot(), b.snapshot());

        let (spawns, pellets) =
            Arena::reproduce_initial(&params(30).seed, 4, params(30).map_radius);
        for (cell, (x, y)) in a.cells.iter().zip(spawns) {
            assert_eq!(cell.pos.x.to_bits(), x.to_bits());
            assert_eq!(cell.pos.y.to_bits(), y.to_bits());
        }
        for (pellet, (x, y)) in a.pellets.iter().zip(pellets) {
            assert_eq!(pellet.pos.x.to_bits(), x.to_bits());
            assert_eq!(pellet.pos.y.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn different_seeds_produce_different_worlds() {
        let a = Arena::new(params(30), &seats(4));
        let mut other = params(30);
        other.seed = [0x22; SEED_LEN];
        let b = Arena::new(other, &seats(4));
        assert_ne!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn spawn_assignment_ignores_join_order() {
        let mut reversed = seats(4);
        reversed.reverse();
        let a = Arena::new(params(30), &seats(4));
        let b = Arena::new(params(30), &reversed);
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn cells_spawn_inside_the_spawn_disk() {
        let arena = Arena::new(params(30), &seats(8));
        for cell in &arena.cells {
            assert!(cell.pos.length() <= SPAWN_DISK_FRACTION * 500.0 + 1e-9);
        }
        assert_eq!(arena.pellets.len(), PELLET_CAP);
    }

    #[test]
    fn countdown_runs_no_physics() {
        let mut arena = Arena::new(params(30), &seats(2));
        let first_events = arena.step();
        assert!(matches!(first_events[0], MatchEvent::Countdown { .. }));

        let start = arena.snapshot();
        arena.apply_input(0, DVec2::new(1.0, 0.0), false);
        for _ in 0..10 {
            arena.step();
        }
        let later = arena.snapshot();
        assert_eq!(start.cells[0].x, later.cells[0].x);
        assert_eq!(arena.phase(), Phase::Countdown);
    }

    #[test]
    fn inputs_move_cells_once_active() {
        let mut arena = Arena::new(params(1), &seats(2));
        let spawn = arena.cells[0].pos;
        arena.apply_input(0, DVec2::new(1.0, 0.0), false);
        // Clear the 10-tick countdown at 1 Hz, then run a few active ticks.
        for _ in 0..15 {
            arena.step();
        }
        assert_eq!(arena.phase(), Phase::Active);
        let moved = &arena.cells[0];
        assert!(moved.vel.length() > 0.0);
        assert!(moved.pos.distance(spawn) > 0.0);
    }

    #[test]
    fn identical_runs_are_bit_identical() {
        let mut a = Arena::new(params(30), &seats(6));
        let mut b = Arena::new(params(30), &seats(6));
        for tick in 0..600 {
            if tick % 7 == 0 {
                a.apply_input(0, DVec2::new(0.6, -0.8), tick % 14 == 0);
                b.apply_input(0, DVec2::new(0.6, -0.8), tick % 14 == 0);
            }
            let ea = a.step();
            let eb = b.step();
            assert_eq!(ea, eb);
        }
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn lifecycle_emits_shrink_then_end() {
        // 1 Hz clock: countdown 10 ticks, active 270, shrink 90.
        let mut arena = Arena::new(params(1), &seats(2));
        // Park the cells apart so nobody wins early.
        arena.cells[0].pos = DVec2::new(10.0, 0.0);
        arena.cells[1].pos = DVec2::new(-10.0, 0.0);

        let mut saw_shrink_at = None;
        let mut saw_end_at = None;
        for tick in 0..500 {
            for event in arena.step() {
                match event {
                    MatchEvent::Shrink => saw_shrink_at = Some(tick),
                    MatchEvent::End => saw_end_at = Some(tick),
                    _ => {}
                }
            }
            if arena.is_finished() {
                break;
            }
        }
        assert_eq!(saw_shrink_at, Some(280));
        assert_eq!(saw_end_at, Some(370));
        assert_eq!(arena.phase(), Phase::Settlement);
    }

    #[test]
    fn fog_radius_shrinks_during_shrink_phase() {
        let mut arena = Arena::new(params(1), &seats(2));
        arena.cells[0].pos = DVec2::new(10.0, 0.0);
        arena.cells[1].pos = DVec2::new(-10.0, 0.0);
        for _ in 0..340 {
            arena.step();
            if arena.is_finished() {
                break;
            }
        }
        assert_eq!(arena.phase(), Phase::Shrink);
        assert!(arena.fog_radius() < 500.0);
    }

    #[test]
    fn fog_kills_stragglers_outside_radius() {
        let mut arena = Arena::new(params(1), &seats(3));
        arena.cells[0].pos = DVec2::new(10.0, 0.0);
        arena.cells[1].pos = DVec2::new(-10.0, 0.0);
        // One cell pinned to the rim: once the fog closes it drains at 5
        // mass/sec from a starting mass of 10.
        arena.cells[2].pos = DVec2::new(499.0, 0.0);
        for _ in 0..300 {
            arena.step();
        }
        assert!(arena.cells[2].is_dead);
        assert_eq!(arena.cells[2].mass, 0.0);
    }

    #[test]
    fn pellet_count_never_exceeds_cap() {
        let mut arena = Arena::new(params(30), &seats(2));
        for _ in 0..2_000 {
            arena.step();
            assert!(arena.pellets.len() <= PELLET_CAP);
            if arena.is_finished() {
                break;
            }
        }
    }

    #[test]
    fn eating_ends_a_two_player_match_early() {
        let mut arena = Arena::new(params(1), &seats(2));
        // Fast-forward past countdown.
        for _ in 0..11 {
            arena.step();
        }
        // Hand player zero an overwhelming size advantage on top of the
        // victim.
        arena.cells[0].mass = 400.0;
        arena.cells[0].pos = arena.cells[1].pos;
        let mut saw_kill = false;
        let mut saw_end = false;
        for event in arena.step() {
            match event {
                MatchEvent::Kill { killer, victim } => {
                    saw_kill = true;
                    assert_eq!(killer, AccountId([1; 16]));
                    assert_eq!(victim, AccountId([2; 16]));
                }
                MatchEvent::End => saw_end = true,
                _ => {}
            }
        }
        assert!(saw_kill);
        assert!(saw_end);
        assert!(arena.is_finished());
        assert_eq!(arena.live_cells(), 1);

        let members = arena.members();
        let winner = members
            .iter()
            .find(|m| m.account == AccountId([1; 16]))
            .unwrap();
        assert_eq!(winner.kills, 1);
        assert!(winner.final_mass > 400.0);
    }

    #[test]
    fn teammates_survive_overlap() {
        let mut arena = Arena::new(
            params(1),
            &[
                Seat {
                    account: AccountId([1; 16]),
                    team: 1,
                },
                Seat {
                    account: AccountId([2; 16]),
                    team: 1,
                },
                Seat {
                    account: AccountId([3; 16]),
                    team: 2,
                },
            ],
        );
        for _ in 0..11 {
            arena.step();
        }
        arena.cells[0].mass = 400.0;
        arena.cells[0].pos = arena.cells[1].pos;
        // Keep the opposing cell well clear of the overlap.
        arena.cells[2].pos = DVec2::new(300.0, 300.0);
        let events = arena.step();
        assert!(!events
            .iter()
            .any(|event| matches!(event, MatchEvent::Kill { .. })));
        assert!(!arena.cells[1].is_dead);
    }

    #[test]
    fn growth_is_capped_by_buy_in_multiple() {
        let mut p = params(1);
        p.growth_cap = 12.0;
        let mut arena = Arena::new(p, &seats(2));
        for _ in 0..11 {
            arena.step();
        }
        arena.cells[0].mass = 11.9;
        // Swallow pellets placed directly on top of the cell.
        for pellet in arena.pellets.iter_mut().take(20) {
            pellet.pos = arena.cells[0].pos;
        }
        arena.step();
        assert!(arena.cells[0].mass <= 12.0 + 1e-9);
    }

    #[test]
    fn dead_cells_are_reported_in_snapshots() {
        let mut arena = Arena::new(params(1), &seats(2));
        for _ in 0..11 {
            arena.step();
        }
        arena.cells[1].is_dead = true;
        arena.cells[1].mass = 0.0;
        let snapshot = arena.snapshot();
        assert!(snapshot.cells.iter().any(|cell| cell.is_dead));
    }
}
