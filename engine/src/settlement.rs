//! Pot partition math.
//!
//! Given the ranked members of a finished match, computes the house rake and
//! the per-rank payouts for the declared model. Everything is integer minor
//! units; the residue-to-rank-1 rule is what makes
//! `Σ payouts + rake = pot` hold exactly under floor division.

use petri_types::constants::{BPS_DENOMINATOR, LADDER_BPS};
use petri_types::{AccountId, PayoutModel};

/// One member entering settlement, before ranks are assigned.
#[derive(Clone, Debug, PartialEq)]
pub struct RankedMember {
    pub account: AccountId,
    pub team: u32,
    pub final_mass: f64,
    pub max_mass: f64,
    pub kills: u32,
}

/// Total placement order: final mass descending, ties broken by account id
/// ascending so independent settlers agree.
pub fn rank_members(mut members: Vec<RankedMember>) -> Vec<RankedMember> {
    members.sort_by(|a, b| {
        b.final_mass
            .partial_cmp(&a.final_mass)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.account.cmp(&b.account))
    });
    members
}

/// `min(⌊pot × rake_bps / 10000⌋, rake_cap)`.
pub fn rake_amount(pot: u64, rake_bps: u16, rake_cap: Option<u64>) -> u64 {
    let raw = (u128::from(pot) * u128::from(rake_bps) / u128::from(BPS_DENOMINATOR)) as u64;
    match rake_cap {
        Some(cap) => raw.min(cap),
        None => raw,
    }
}

/// Per-rank payouts summing to exactly `net_pot`. The input order is the
/// placement order from [`rank_members`].
pub fn compute_payouts(model: PayoutModel, net_pot: u64, ranked: &[RankedMember]) -> Vec<u64> {
    if ranked.is_empty() {
        return Vec::new();
    }
    let mut payouts = match model {
        PayoutModel::WinnerTakeAll => {
            let mut payouts = vec![0u64; ranked.len()];
            payouts[0] = net_pot;
            payouts
        }
        PayoutModel::Top3Ladder => {
            let mut payouts = vec![0u64; ranked.len()];
            for (rank, bps) in LADDER_BPS.iter().enumerate().take(ranked.len()) {
                payouts[rank] =
                    (u128::from(net_pot) * u128::from(*bps) / u128::from(BPS_DENOMINATOR)) as u64;
            }
            payouts
        }
        PayoutModel::Proportional => {
            let total_mass: f64 = ranked.iter().map(|m| m.final_mass.max(0.0)).sum();
            if total_mass <= 0.0 {
                // Degenerate: nobody holds mass, split evenly.
                let share = net_pot / ranked.len() as u64;
                vec![share; ranked.len()]
            } else {
                ranked
                    .iter()
                    .map(|m| {
                        ((m.final_mass.max(0.0) / total_mass) * net_pot as f64).floor() as u64
                    })
                    .collect()
            }
        }
    };

    // Residue from floor division goes to rank 1; if float noise ever
    // overshoots, the winner absorbs the correction as well.
    let sum: u64 = payouts.iter().sum();
    if sum <= net_pot {
        payouts[0] += net_pot - sum;
    } else {
        payouts[0] -= sum - net_pot;
    }
    payouts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u8, final_mass: f64) -> RankedMember {
        RankedMember {
            account: AccountId([id; 16]),
            team: 0,
            final_mass,
            max_mass: final_mass,
            kills: 0,
        }
    }

    #[test]
    fn ranking_is_mass_desc_then_id_asc() {
        let ranked = rank_members(vec![member(3, 50.0), member(1, 50.0), member(2, 200.0)]);
        let ids: Vec<u8> = ranked.iter().map(|m| m.account.0[0]).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn winner_take_all_two_players() {
        // S1: 2 players, $10 buy-in, 8% rake.
        let pot = 2_000;
        let rake = rake_amount(pot, 800, None);
        assert_eq!(rake, 160);
        let net = pot - rake;
        assert_eq!(net, 1_840);

        let ranked = rank_members(vec![member(1, 200.0), member(2, 50.0)]);
        let payouts = compute_payouts(PayoutModel::WinnerTakeAll, net, &ranked);
        assert_eq!(payouts, vec![1_840, 0]);
        assert_eq!(payouts.iter().sum::<u64>() + rake, pot);
    }

    #[test]
    fn top3_ladder_with_rake_cap() {
        // S2: 4 players, $20 buy-in, 10% rake capped at 500.
        let pot = 8_000;
        let rake = rake_amount(pot, 1_000, Some(500));
        assert_eq!(rake, 500);
        let net = pot - rake;
        assert_eq!(net, 7_500);

        let ranked = rank_members(vec![
            member(1, 400.0),
            member(2, 300.0),
            member(3, 200.0),
            member(4, 100.0),
        ]);
        let payouts = compute_payouts(PayoutModel::Top3Ladder, net, &ranked);
        assert_eq!(payouts, vec![4_875, 1_875, 750, 0]);
        assert_eq!(payouts.iter().sum::<u64>() + rake, pot);
    }

    #[test]
    fn top3_ladder_residue_goes_to_winner() {
        let ranked = rank_members(vec![member(1, 3.0), member(2, 2.0), member(3, 1.0)]);
        // net_pot = 1000 splits as 650/250/100 exactly; 1001 leaves 1 over.
        let payouts = compute_payouts(PayoutModel::Top3Ladder, 1_001, &ranked);
        assert_eq!(payouts.iter().sum::<u64>(), 1_001);
        assert_eq!(payouts[1], 250);
        assert_eq!(payouts[2], 100);
        assert_eq!(payouts[0], 651);
    }

    #[test]
    fn top3_ladder_with_two_players_still_drains_pot() {
        let ranked = rank_members(vec![member(1, 2.0), member(2, 1.0)]);
        let payouts = compute_payouts(PayoutModel::Top3Ladder, 1_000, &ranked);
        // The unassigned third share returns to rank 1.
        assert_eq!(payouts, vec![750, 250]);
    }

    #[test]
    fn proportional_exact_shares() {
        // S3: 3 players, $50 buy-in, 8% rake.
        let pot = 15_000;
        let rake = rake_amount(pot, 800, None);
        assert_eq!(rake, 1_200);
        let net = pot - rake;
        assert_eq!(net, 13_800);

        let ranked = rank_members(vec![member(1, 300.0), member(2, 200.0), member(3, 100.0)]);
        let payouts = compute_payouts(PayoutModel::Proportional, net, &ranked);
        assert_eq!(payouts, vec![6_900, 4_600, 2_300]);
        assert_eq!(payouts.iter().sum::<u64>() + rake, pot);
    }

    #[test]
    fn proportional_all_zero_masses_splits_evenly() {
        let ranked = rank_members(vec![member(1, 0.0), member(2, 0.0), member(3, 0.0)]);
        let payouts = compute_payouts(PayoutModel::Proportional, 1_000, &ranked);
        assert_eq!(payouts, vec![334, 333, 333]);
        assert_eq!(payouts.iter().sum::<u64>(), 1_000);
    }

    #[test]
    fn rake_is_floored_and_capped() {
        assert_eq!(rake_amount(999, 800, None), 79);
        assert_eq!(rake_amount(u64::MAX, 10_000, None), u64::MAX);
        assert_eq!(rake_amount(1_000_000, 500, Some(100)), 100);
        assert_eq!(rake_amount(1_000, 0, None), 0);
    }

    #[test]
    fn conservation_holds_across_models_and_sizes() {
        for model in [
            PayoutModel::WinnerTakeAll,
            PayoutModel::Top3Ladder,
            PayoutModel::Proportional,
        ] {
            for players in 2..=16u8 {
                for buy_in in [137u64, 2_000, 4_999] {
                    let pot = buy_in * u64::from(players);
                    let rake = rake_amount(pot, 777, Some(1_234));
                    let net = pot - rake;
                    let ranked = rank_members(
                        (1..=players)
                            .map(|id| member(id, f64::from(id) * 13.7))
                            .collect(),
                    );
                    let payouts = compute_payouts(model, net, &ranked);
                    assert_eq!(
                        payouts.iter().sum::<u64>() + rake,
                        pot,
                        "model={model:?} players={players} buy_in={buy_in}"
                    );
                }
            }
        }
    }
}
