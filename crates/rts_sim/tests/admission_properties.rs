//! Property tests for action point admission.

use proptest::prelude::*;
use rts_sim::commands::{AdmissionController, CommandKind, CommandQueue};
use rts_sim::config::ActionPointConfig;
use rts_sim::objects::{ObjectId, PlayerId};
use rts_sim::terrain::CellPos;

fn config(rate_per_second: u32, capacity: u32, initial: u32) -> ActionPointConfig {
    ActionPointConfig {
        rate_per_second,
        capacity,
        initial,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Regeneration never drifts, whatever the starting tick and length.
    #[test]
    fn earned_points_do_not_drift(rate in 0u32..5000, tps in 1u32..240, start in 0u64..100_000, n in 0u64..5000) {
        let budget = AdmissionController::new(&config(rate, u32::MAX, 0), tps);
        let earned: u64 = (start..start + n).map(|t| u64::from(budget.earned_at(t))).sum();
        let expected = (start + n) * u64::from(rate) / u64::from(tps) - start * u64::from(rate) / u64::from(tps);
        prop_assert_eq!(earned, expected);
    }

    /// With demand always waiting, the points released over N ticks are
    /// exactly what the budget earned.
    #[test]
    fn released_cost_matches_regeneration(rate in 1u32..400, tps in 1u32..200, n in 1u64..1500) {
        let mut queue = CommandQueue::new(config(rate, 1_000_000, 0), tps);
        let player = PlayerId(3);
        let backlog = u64::from(rate) * n / u64::from(tps) + 4;
        for i in 0..backlog {
            queue.push(
                player,
                vec![ObjectId(1)],
                CommandKind::ObjectToTerrain(CellPos::new(u32::try_from(i % 7).unwrap(), 0)),
                1,
            );
        }

        let mut released: u64 = 0;
        let mut last_id = None;
        for tick in 0..n {
            for command in queue.release(tick, |_| true) {
                // Released in FIFO order.
                prop_assert!(last_id < Some(command.id));
                last_id = Some(command.id);
                released += u64::from(command.cost);
            }
        }
        let expected = n * u64::from(rate) / u64::from(tps);
        prop_assert_eq!(released, expected);
    }

    /// Expensive commands block the queue until the budget covers them,
    /// but never forever.
    #[test]
    fn expensive_commands_eventually_release(costs in proptest::collection::vec(1u32..20, 1..12)) {
        let capacity = 10;
        let mut queue = CommandQueue::new(config(50, capacity, 0), 100);
        let ids: Vec<_> = costs
            .iter()
            .map(|&cost| queue.push(PlayerId(0), vec![ObjectId(1)], CommandKind::ObjectToObject(ObjectId(2)), cost))
            .collect();

        let mut released = Vec::new();
        for tick in 0..10_000 {
            released.extend(queue.release(tick, |_| true).into_iter().map(|c| c.id));
            if queue.is_empty() {
                break;
            }
        }
        prop_assert_eq!(released, ids);
    }
}
