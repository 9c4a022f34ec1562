//! Per-match owner task.
//!
//! The single writer of a match's world: it drains the bounded input queue,
//! advances the tick on a fixed cadence, fans encoded frames out over the
//! broadcast channel, and on termination applies settlement (or the refund
//! path) against the ledger in one transaction. Sessions never touch the
//! arena directly.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use glam::DVec2;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use petri_engine::arena::{Arena, ArenaParams, MatchEvent, Seat};
use petri_engine::commitment::decode_seed;
use petri_engine::scheduler::Phase;
use petri_engine::settlement::{compute_payouts, rank_members};
use petri_types::constants::GROWTH_CAP_MULTIPLIER;
use petri_types::protocol::{Axes, EventKind, ServerMessage};
use petri_types::{LobbyState, MatchRecord, Placement};

use crate::controller::{Frame, MatchDirectory, PlayerInput};
use crate::ledger::Ledger;
use crate::metrics::Metrics;
use crate::registry::Registry;

pub struct RunnerContext {
    pub record: MatchRecord,
    pub seats: Vec<Seat>,
    pub ledger: Arc<Ledger>,
    pub registry: Arc<Registry>,
    pub directory: Arc<MatchDirectory>,
    pub metrics: Arc<Metrics>,
    pub tick_rate: u32,
}

pub async fn run_match(
    ctx: RunnerContext,
    mut inputs: mpsc::Receiver<PlayerInput>,
    updates: broadcast::Sender<Frame>,
    mut cancel: watch::Receiver<bool>,
) {
    let match_id = ctx.record.id;
    let seed = match decode_seed(&ctx.record.seed) {
        Ok(seed) => seed,
        Err(err) => {
            error!(%match_id, ?err, "persisted seed is unreadable; refunding");
            refund(&ctx, &updates).await;
            ctx.directory.remove(match_id).await;
            return;
        }
    };

    let mut arena = Arena::new(
        ArenaParams {
            seed,
            map_radius: ctx.record.map_radius,
            growth_cap: (ctx.record.buy_in * GROWTH_CAP_MULTIPLIER) as f64,
            tick_rate: ctx.tick_rate,
        },
        &ctx.seats,
    );

    let mut interval =
        tokio::time::interval(Duration::from_nanos(1_000_000_000 / u64::from(ctx.tick_rate)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Latest input per cell, applied at the tick boundary in cell-id order.
    let mut pending: BTreeMap<u32, (Axes, bool)> = BTreeMap::new();
    let mut inputs_open = true;
    let mut last_phase = arena.phase();

    info!(%match_id, players = ctx.seats.len(), "match owner started");
    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    info!(%match_id, "match aborted; refunding escrow");
                    broadcast_frame(&updates, &ServerMessage::Event {
                        kind: EventKind::End,
                        data: json!({ "reason": "aborted" }),
                    });
                    refund(&ctx, &updates).await;
                    break;
                }
            }
            received = inputs.recv(), if inputs_open => {
                match received {
                    Some(input) => {
                        debug!(%match_id, %input.account, seq = input.seq, ts = input.ts, "input");
                        if let Some(cell) = arena.cell_id_for(input.account) {
                            pending.insert(cell, (input.axes, input.boost));
                        }
                    }
                    None => inputs_open = false,
                }
            }
            _ = interval.tick() => {
                for (cell, (axes, boost)) in &pending {
                    arena.apply_input(*cell, DVec2::new(axes.x, axes.y), *boost);
                }
                pending.clear();

                // Per-tick faults are contained: count them and keep the
                // match alive; only storage failures escalate.
                let events = match catch_unwind(AssertUnwindSafe(|| arena.step())) {
                    Ok(events) => events,
                    Err(_) => {
                        ctx.metrics.inc_tick_faults();
                        error!(%match_id, tick = arena.tick(), "tick panicked; continuing");
                        continue;
                    }
                };
                ctx.metrics.inc_ticks();

                if arena.phase() != last_phase {
                    last_phase = arena.phase();
                    persist_phase(&ctx, last_phase);
                }

                for event in &events {
                    if matches!(event, MatchEvent::Kill { .. }) {
                        ctx.metrics.add_kills(1);
                    }
                    broadcast_frame(&updates, &event_message(event, &arena));
                }
                broadcast_frame(&updates, &ServerMessage::Snapshot(arena.snapshot()));

                if arena.is_finished() {
                    settle(&ctx, &arena, &updates).await;
                    break;
                }
            }
        }
    }
    ctx.directory.remove(match_id).await;
    info!(%match_id, "match owner exited");
}

fn event_message(event: &MatchEvent, arena: &Arena) -> ServerMessage {
    match event {
        MatchEvent::Countdown { secs } => ServerMessage::Event {
            kind: EventKind::Countdown,
            data: json!({ "secs": secs }),
        },
        MatchEvent::Kill { killer, victim } => ServerMessage::Event {
            kind: EventKind::Kill,
            data: json!({ "killer": killer, "victim": victim }),
        },
        MatchEvent::Shrink => ServerMessage::Event {
            kind: EventKind::Shrink,
            data: json!({ "fog_radius": arena.fog_radius() }),
        },
        MatchEvent::End => ServerMessage::Event {
            kind: EventKind::End,
            data: json!({ "tick": arena.tick() }),
        },
    }
}

fn broadcast_frame(updates: &broadcast::Sender<Frame>, message: &ServerMessage) {
    match serde_json::to_string(message) {
        // Send errors just mean nobody is listening right now.
        Ok(encoded) => {
            let _ = updates.send(Frame::from(encoded));
        }
        Err(err) => error!(?err, "frame encoding failed"),
    }
}

fn persist_phase(ctx: &RunnerContext, phase: Phase) {
    let state = match phase {
        Phase::Countdown => LobbyState::Countdown,
        Phase::Active => LobbyState::Active,
        Phase::Shrink => LobbyState::Shrink,
        Phase::Settlement => LobbyState::Settlement,
    };
    if let Err(err) = ctx.registry.set_lobby_state(ctx.record.lobby_id, state) {
        error!(match_id = %ctx.record.id, ?err, "failed to persist phase");
    }
}

/// Terminal tick: rank, compute payouts, settle atomically, then (and only
/// then) reveal the commitment pre-image in the RESULT frame.
async fn settle(ctx: &RunnerContext, arena: &Arena, updates: &broadcast::Sender<Frame>) {
    let ranked = rank_members(arena.members());
    let payouts = compute_payouts(ctx.record.payout_model, ctx.record.net_pot, &ranked);
    let placements: Vec<Placement> = ranked
        .iter()
        .zip(payouts.iter())
        .enumerate()
        .map(|(index, (member, payout))| Placement {
            account: member.account,
            team: member.team,
            placement: index as u32 + 1,
            final_mass: member.final_mass,
            max_mass: member.max_mass,
            kills: member.kills,
            payout: *payout,
        })
        .collect();

    match ctx.ledger.settle(ctx.record.id, &placements, ctx.record.rake) {
        Ok(applied) => {
            if applied {
                ctx.metrics.inc_matches_settled();
            }
            info!(
                match_id = %ctx.record.id,
                pot = ctx.record.pot,
                rake = ctx.record.rake,
                applied,
                "match settled"
            );
            broadcast_frame(
                updates,
                &ServerMessage::Result {
                    placements,
                    seed: ctx.record.seed.clone(),
                    nonce: ctx.record.nonce.clone(),
                    commit: ctx.record.commit.clone(),
                },
            );
        }
        Err(err) => {
            // Lifecycle-fatal at the settlement boundary: alert and fall
            // back to the refund path so no escrow is stranded.
            ctx.metrics.inc_integrity_alerts();
            error!(match_id = %ctx.record.id, ?err, "settlement failed; refunding");
            refund(ctx, updates).await;
        }
    }
}

async fn refund(ctx: &RunnerContext, _updates: &broadcast::Sender<Frame>) {
    match ctx.ledger.refund_match(ctx.record.id) {
        Ok(true) => {
            ctx.metrics.inc_matches_refunded();
            info!(match_id = %ctx.record.id, "escrow refunded");
        }
        Ok(false) => {}
        Err(err) => {
            ctx.metrics.inc_integrity_alerts();
            error!(match_id = %ctx.record.id, ?err, "refund failed");
        }
    }
}
