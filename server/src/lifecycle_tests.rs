//! Lifecycle integration tests: join/leave atomicity, promotion, settlement
//! application and crash recovery, all against an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use petri_engine::commitment::verify_commitment_hex;
use petri_engine::generate_commitment;
use petri_engine::settlement::rake_amount;
use petri_types::{
    AccountId, EntryKind, GameMode, LobbyConfig, LobbyState, MatchId, MatchOutcome, MatchRecord,
    PayoutModel, Placement, HOUSE_ACCOUNT,
};

use crate::controller::{Controller, ControllerConfig};
use crate::db::{unix_ms, Db};
use crate::ledger::{self, reconcile, Ledger, LedgerError, Precondition};
use crate::metrics::Metrics;
use crate::registry::{self, Registry};

struct Harness {
    db: Arc<Db>,
    ledger: Arc<Ledger>,
    registry: Arc<Registry>,
    controller: Arc<Controller>,
}

fn harness() -> Harness {
    let db = Arc::new(Db::open(":memory:").expect("in-memory db"));
    let metrics = Arc::new(Metrics::default());
    let ledger = Arc::new(Ledger::new(Arc::clone(&db), Arc::clone(&metrics)));
    let registry = Arc::new(Registry::new(Arc::clone(&db)));
    let controller = Arc::new(Controller::new(
        Arc::clone(&db),
        Arc::clone(&ledger),
        Arc::clone(&registry),
        metrics,
        ControllerConfig {
            tick_rate: 30,
            map_radius: 500.0,
            lobby_timeout_secs: 0,
        },
    ));
    Harness {
        db,
        ledger,
        registry,
        controller,
    }
}

fn funded_accounts(harness: &Harness, count: usize, amount: u64) -> Vec<AccountId> {
    (0..count)
        .map(|i| {
            let account = harness
                .ledger
                .create_account(&format!("player-{i}"), "eu")
                .expect("account");
            harness
                .ledger
                .deposit(account.id, amount, "psp:test", None)
                .expect("deposit");
            account.id
        })
        .collect()
}

fn solo_lobby(harness: &Harness, buy_in: u64, capacity: u32, model: PayoutModel) -> u64 {
    harness
        .controller
        .create_lobby(&LobbyConfig {
            mode: GameMode::Solo,
            buy_in,
            payout_model: model,
            rake_bps: 800,
            rake_cap: None,
            capacity,
        })
        .expect("lobby")
        .id
}

/// Persist a match the way promotion does, without spawning an owner task:
/// memberships, escrow locks and the match row in one transaction.
fn manual_match(
    harness: &Harness,
    lobby_id: u64,
    members: &[AccountId],
    buy_in: u64,
    rake_bps: u16,
    rake_cap: Option<u64>,
    model: PayoutModel,
) -> MatchRecord {
    let commitment = generate_commitment();
    let pot = buy_in * members.len() as u64;
    let rake = rake_amount(pot, rake_bps, rake_cap);
    let mut raw_id = [0u8; 16];
    raw_id[0] = lobby_id as u8;
    raw_id[15] = 0x77;
    let record = MatchRecord {
        id: MatchId(raw_id),
        lobby_id,
        seed: commitment.seed_hex(),
        nonce: commitment.nonce_hex(),
        commit: commitment.commit_hex(),
        payout_model: model,
        rake_bps,
        rake_cap,
        buy_in,
        pot,
        rake,
        net_pot: pot - rake,
        map_radius: 500.0,
        started_at: unix_ms(),
        ended_at: None,
        outcome: None,
    };
    harness
        .db
        .transact(|tx| {
            for account in members {
                registry::insert_membership_tx(tx, lobby_id, *account, 0)?;
                ledger::lock_escrow_tx(tx, *account, buy_in, &format!("lobby:{lobby_id}"))?;
            }
            registry::insert_match_tx(tx, &record)
        })
        .expect("manual match");
    record
}

fn placement(account: AccountId, rank: u32, final_mass: f64, payout: u64) -> Placement {
    Placement {
        account,
        team: 0,
        placement: rank,
        final_mass,
        max_mass: final_mass,
        kills: 0,
        payout,
    }
}

// ---- join / leave --------------------------------------------------------

#[tokio::test]
async fn join_locks_escrow_atomically() {
    let h = harness();
    let accounts = funded_accounts(&h, 2, 5_000);
    let lobby_id = solo_lobby(&h, 1_000, 3, PayoutModel::WinnerTakeAll);

    h.controller.join(lobby_id, accounts[0]).await.unwrap();
    let wallet = h.ledger.wallet(accounts[0]).unwrap();
    assert_eq!(wallet.available, 4_000);
    assert_eq!(wallet.escrow, 1_000);
    assert_eq!(h.registry.members(lobby_id).unwrap().len(), 1);
}

#[tokio::test]
async fn failed_join_rolls_back_everything() {
    let h = harness();
    let broke = h.ledger.create_account("broke", "eu").unwrap().id;
    h.ledger.deposit(broke, 400, "psp:test", None).unwrap();
    let lobby_id = solo_lobby(&h, 1_000, 3, PayoutModel::WinnerTakeAll);

    let err = h.controller.join(lobby_id, broke).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Precondition(Precondition::InsufficientFunds)
    ));

    // Nothing moved: no membership, wallet untouched, version unchanged.
    assert!(h.registry.members(lobby_id).unwrap().is_empty());
    let wallet = h.ledger.wallet(broke).unwrap();
    assert_eq!(wallet.available, 400);
    assert_eq!(wallet.escrow, 0);
    assert_eq!(wallet.version, 1);
}

#[tokio::test]
async fn duplicate_join_rejected() {
    let h = harness();
    let accounts = funded_accounts(&h, 1, 5_000);
    let lobby_id = solo_lobby(&h, 1_000, 3, PayoutModel::WinnerTakeAll);

    h.controller.join(lobby_id, accounts[0]).await.unwrap();
    let err = h.controller.join(lobby_id, accounts[0]).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Precondition(Precondition::AlreadyMember)
    ));
    assert_eq!(h.ledger.wallet(accounts[0]).unwrap().escrow, 1_000);
}

#[tokio::test]
async fn leave_before_countdown_releases_escrow() {
    let h = harness();
    let accounts = funded_accounts(&h, 1, 5_000);
    let lobby_id = solo_lobby(&h, 1_000, 3, PayoutModel::WinnerTakeAll);

    h.controller.join(lobby_id, accounts[0]).await.unwrap();
    h.controller.leave(lobby_id, accounts[0]).await.unwrap();

    let wallet = h.ledger.wallet(accounts[0]).unwrap();
    assert_eq!(wallet.available, 5_000);
    assert_eq!(wallet.escrow, 0);
    assert!(h.registry.members(lobby_id).unwrap().is_empty());

    let err = h.controller.leave(lobby_id, accounts[0]).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Precondition(Precondition::NotAMember)
    ));
}

#[tokio::test]
async fn join_rejected_once_lobby_left_waiting() {
    let h = harness();
    let accounts = funded_accounts(&h, 1, 5_000);
    let lobby_id = solo_lobby(&h, 1_000, 3, PayoutModel::WinnerTakeAll);
    h.registry
        .set_lobby_state(lobby_id, LobbyState::Countdown)
        .unwrap();

    let err = h.controller.join(lobby_id, accounts[0]).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Precondition(Precondition::LobbyNotJoinable)
    ));
}

// ---- promotion -----------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn filling_a_lobby_promotes_and_persists_the_commitment() {
    let h = harness();
    let accounts = funded_accounts(&h, 2, 5_000);
    let lobby_id = solo_lobby(&h, 1_000, 2, PayoutModel::WinnerTakeAll);

    h.controller.join(lobby_id, accounts[0]).await.unwrap();
    h.controller.join(lobby_id, accounts[1]).await.unwrap();

    assert_eq!(
        h.registry.lobby(lobby_id).unwrap().state,
        LobbyState::Countdown
    );
    let unfinished = h.registry.unfinished_matches().unwrap();
    assert_eq!(unfinished.len(), 1);
    let record = h.registry.match_record(unfinished[0]).unwrap();
    assert_eq!(record.pot, 2_000);
    assert_eq!(record.rake, 160);
    assert_eq!(record.net_pot, 1_840);
    assert!(verify_commitment_hex(&record.seed, &record.nonce, &record.commit).unwrap());

    // The owner task is live and reachable for sessions.
    assert!(h.controller.directory().attach(record.id).await.is_some());

    // Abort unwinds through the refund path at the next tick boundary.
    h.controller.abort(record.id).await.unwrap();
    let mut refunded = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let wallet = h.ledger.wallet(accounts[0]).unwrap();
        if wallet.available == 5_000 && wallet.escrow == 0 {
            refunded = true;
            break;
        }
    }
    assert!(refunded, "abort did not refund escrow in time");
    let record = h.registry.match_record(record.id).unwrap();
    assert_eq!(record.outcome, Some(MatchOutcome::Refunded));
    assert!(record.ended_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn duo_lobby_assigns_paired_teams() {
    let h = harness();
    let accounts = funded_accounts(&h, 4, 5_000);
    let lobby_id = h
        .controller
        .create_lobby(&LobbyConfig {
            mode: GameMode::Duo,
            buy_in: 1_000,
            payout_model: PayoutModel::Proportional,
            rake_bps: 500,
            rake_cap: None,
            capacity: 4,
        })
        .unwrap()
        .id;

    for account in &accounts {
        h.controller.join(lobby_id, *account).await.unwrap();
    }
    let mut teams: Vec<u32> = h
        .registry
        .members(lobby_id)
        .unwrap()
        .iter()
        .map(|member| member.team)
        .collect();
    teams.sort_unstable();
    assert_eq!(teams, vec![1, 1, 2, 2]);

    // Clean up the live owner task.
    let unfinished = h.registry.unfinished_matches().unwrap();
    h.controller.abort(unfinished[0]).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sweeper_promotes_after_the_start_timer() {
    let h = harness();
    let accounts = funded_accounts(&h, 2, 5_000);
    // Capacity 3: filling never triggers, only the timer can promote.
    let lobby_id = solo_lobby(&h, 1_000, 3, PayoutModel::WinnerTakeAll);
    h.controller.join(lobby_id, accounts[0]).await.unwrap();
    h.controller.join(lobby_id, accounts[1]).await.unwrap();
    assert_eq!(
        h.registry.lobby(lobby_id).unwrap().state,
        LobbyState::Waiting
    );

    h.controller.sweep().await.unwrap();
    assert_eq!(
        h.registry.lobby(lobby_id).unwrap().state,
        LobbyState::Countdown
    );

    let unfinished = h.registry.unfinished_matches().unwrap();
    h.controller.abort(unfinished[0]).await.unwrap();
}

// ---- settlement ----------------------------------------------------------

#[tokio::test]
async fn settle_applies_winner_take_all_exactly() {
    // S1: 2 players, $10 buy-in, 8% rake.
    let h = harness();
    let accounts = funded_accounts(&h, 2, 5_000);
    let (a, b) = (accounts[0], accounts[1]);
    let lobby_id = solo_lobby(&h, 1_000, 2, PayoutModel::WinnerTakeAll);
    let record = manual_match(&h, lobby_id, &accounts, 1_000, 800, None, PayoutModel::WinnerTakeAll);
    assert_eq!(record.rake, 160);

    let placements = vec![placement(a, 1, 200.0, 1_840), placement(b, 2, 50.0, 0)];
    assert!(h.ledger.settle(record.id, &placements, record.rake).unwrap());

    let wallet_a = h.ledger.wallet(a).unwrap();
    assert_eq!(wallet_a.available, 4_000 + 1_840);
    assert_eq!(wallet_a.escrow, 0);
    let wallet_b = h.ledger.wallet(b).unwrap();
    assert_eq!(wallet_b.available, 4_000);
    assert_eq!(wallet_b.escrow, 0);
    assert_eq!(h.ledger.wallet(HOUSE_ACCOUNT).unwrap().available, 160);

    let (house_rows, _) = h.ledger.history(HOUSE_ACCOUNT, None, 10).unwrap();
    assert_eq!(house_rows.len(), 1);
    assert_eq!(house_rows[0].kind, EntryKind::Rake);
    assert_eq!(house_rows[0].amount, 160);

    let stored = h.registry.match_record(record.id).unwrap();
    assert_eq!(stored.outcome, Some(MatchOutcome::Settled));
    assert!(stored.ended_at.is_some());
    let stored_placements = h.registry.placements(record.id).unwrap();
    assert_eq!(stored_placements.len(), 2);
    assert_eq!(stored_placements[0].payout, 1_840);

    // Pot conservation over ledger rows.
    let (rows_a, _) = h.ledger.history(a, None, 50).unwrap();
    let (rows_b, _) = h.ledger.history(b, None, 50).unwrap();
    let payouts: i64 = rows_a
        .iter()
        .chain(rows_b.iter())
        .filter(|row| row.kind == EntryKind::Payout)
        .map(|row| row.amount)
        .sum();
    assert_eq!(payouts + 160, record.pot as i64);
}

#[tokio::test]
async fn settle_twice_is_a_no_op() {
    let h = harness();
    let accounts = funded_accounts(&h, 2, 5_000);
    let lobby_id = solo_lobby(&h, 1_000, 2, PayoutModel::WinnerTakeAll);
    let record = manual_match(&h, lobby_id, &accounts, 1_000, 800, None, PayoutModel::WinnerTakeAll);
    let placements = vec![
        placement(accounts[0], 1, 200.0, 1_840),
        placement(accounts[1], 2, 50.0, 0),
    ];

    assert!(h.ledger.settle(record.id, &placements, record.rake).unwrap());
    assert!(!h.ledger.settle(record.id, &placements, record.rake).unwrap());

    // No double-applied effects.
    assert_eq!(h.ledger.wallet(accounts[0]).unwrap().available, 5_840);
    assert_eq!(h.ledger.wallet(HOUSE_ACCOUNT).unwrap().available, 160);
}

#[tokio::test]
async fn settle_rejects_payouts_that_do_not_drain_the_pot() {
    let h = harness();
    let accounts = funded_accounts(&h, 2, 5_000);
    let lobby_id = solo_lobby(&h, 1_000, 2, PayoutModel::WinnerTakeAll);
    let record = manual_match(&h, lobby_id, &accounts, 1_000, 800, None, PayoutModel::WinnerTakeAll);

    let short = vec![
        placement(accounts[0], 1, 200.0, 1_000),
        placement(accounts[1], 2, 50.0, 0),
    ];
    let err = h.ledger.settle(record.id, &short, record.rake).unwrap_err();
    assert!(matches!(err, LedgerError::Integrity(_)));

    // Rolled back: escrow still locked, match still open.
    assert_eq!(h.ledger.wallet(accounts[0]).unwrap().escrow, 1_000);
    assert!(h
        .registry
        .match_record(record.id)
        .unwrap()
        .ended_at
        .is_none());
}

#[tokio::test]
async fn ledger_rows_reconcile_through_a_full_match() {
    let h = harness();
    let accounts = funded_accounts(&h, 3, 20_000);
    let lobby_id = solo_lobby(&h, 5_000, 3, PayoutModel::Proportional);
    // S3: 3 players, $50 buy-in, 8% rake.
    let record = manual_match(&h, lobby_id, &accounts, 5_000, 800, None, PayoutModel::Proportional);
    assert_eq!(record.pot, 15_000);
    assert_eq!(record.rake, 1_200);

    let placements = vec![
        placement(accounts[0], 1, 300.0, 6_900),
        placement(accounts[1], 2, 200.0, 4_600),
        placement(accounts[2], 3, 100.0, 2_300),
    ];
    assert!(h.ledger.settle(record.id, &placements, record.rake).unwrap());

    for account in accounts.iter().chain(std::iter::once(&HOUSE_ACCOUNT)) {
        let wallet = h.ledger.wallet(*account).unwrap();
        let (entries, _) = h.ledger.history(*account, None, 200).unwrap();
        let (available, escrow) = reconcile(&entries);
        assert_eq!(available, wallet.available as i64, "available for {account}");
        assert_eq!(escrow, wallet.escrow as i64, "escrow for {account}");
    }
}

// ---- recovery ------------------------------------------------------------

#[tokio::test]
async fn recovery_refunds_unfinished_matches() {
    // S5: crash mid-active with three players locked in.
    let h = harness();
    let accounts = funded_accounts(&h, 3, 5_000);
    let lobby_id = solo_lobby(&h, 1_000, 3, PayoutModel::Top3Ladder);
    let record = manual_match(&h, lobby_id, &accounts, 1_000, 800, None, PayoutModel::Top3Ladder);

    for account in &accounts {
        assert_eq!(h.ledger.wallet(*account).unwrap().escrow, 1_000);
    }

    let refunded = h.controller.recover().unwrap();
    assert_eq!(refunded, 1);

    for account in &accounts {
        let wallet = h.ledger.wallet(*account).unwrap();
        assert_eq!(wallet.available, 5_000);
        assert_eq!(wallet.escrow, 0);
        let (entries, _) = h.ledger.history(*account, None, 50).unwrap();
        let refunds: Vec<_> = entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::Refund)
            .collect();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, 1_000);
    }

    let stored = h.registry.match_record(record.id).unwrap();
    assert_eq!(stored.outcome, Some(MatchOutcome::Refunded));
    assert!(stored.ended_at.is_some());
    assert!(h.registry.placements(record.id).unwrap().is_empty());

    // Recovery is idempotent.
    assert_eq!(h.controller.recover().unwrap(), 0);
}
