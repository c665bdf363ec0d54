// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Property-based tests for ledger invariants.

use rider_ledger::{
    AdminContext, Engine, LedgerTransaction, LogView, Money, OrderId, RiderId, SettlementStatus,
};
use proptest::prelude::*;

// === Strategies ===

/// A delivery as `(cash collected, rider fee)`; zero cash is a prepaid order.
fn arb_delivery() -> impl Strategy<Value = (Money, Money)> {
    prop_oneof![
        (1i64..=50_000).prop_flat_map(|cash| (Just(cash), 0..=cash)),
        (Just(0i64), 0i64..=500),
    ]
}

fn post(engine: &Engine, order: u64, (cash, fee): (Money, Money)) {
    let net = if cash == 0 { 0 } else { cash - fee };
    engine
        .post_delivery(RiderId(1), OrderId(order), cash, fee, net)
        .unwrap();
}

fn ops() -> AdminContext {
    AdminContext::new("ops")
}

// === Balance Properties ===

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Without settlements, the cash balance is the sum of cash collected.
    #[test]
    fn cod_balance_is_sum_of_collected(
        deliveries in prop::collection::vec(arb_delivery(), 1..30),
    ) {
        let engine = Engine::new();
        for (i, delivery) in deliveries.iter().enumerate() {
            post(&engine, i as u64, *delivery);
        }

        let expected: Money = deliveries.iter().map(|(cash, _)| cash).sum();
        let snapshot = engine.get_account(&RiderId(1)).unwrap().snapshot();
        prop_assert_eq!(snapshot.cod_balance, expected);
        prop_assert_eq!(snapshot.pending.iter().map(|tx| tx.cod_collected).sum::<Money>(), expected);
    }

    /// Reordering deliveries and replaying some of them doesn't change the outcome.
    #[test]
    fn balances_commute_under_reordering_and_replay(
        deliveries in prop::collection::vec(arb_delivery(), 1..20),
        replays in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
    ) {
        let forward = Engine::new();
        for (i, delivery) in deliveries.iter().enumerate() {
            post(&forward, i as u64, *delivery);
        }

        let shuffled = Engine::new();
        for (i, delivery) in deliveries.iter().enumerate().rev() {
            post(&shuffled, i as u64, *delivery);
        }
        for index in &replays {
            let i = index.index(deliveries.len());
            post(&shuffled, i as u64, deliveries[i]);
        }

        let a = forward.get_account(&RiderId(1)).unwrap().snapshot();
        let b = shuffled.get_account(&RiderId(1)).unwrap().snapshot();
        prop_assert_eq!(a.cod_balance, b.cod_balance);
        prop_assert_eq!(a.earnings_balance, b.earnings_balance);
        prop_assert_eq!(a.pending.len(), b.pending.len());
        prop_assert_eq!(a.version, b.version);
    }

    /// Posting the same order twice ends where posting it once does.
    #[test]
    fn post_delivery_is_idempotent(delivery in arb_delivery()) {
        let once = Engine::new();
        post(&once, 1, delivery);

        let twice = Engine::new();
        post(&twice, 1, delivery);
        post(&twice, 1, delivery);

        let a = once.get_account(&RiderId(1)).unwrap().snapshot();
        let b = twice.get_account(&RiderId(1)).unwrap().snapshot();
        prop_assert_eq!(a.cod_balance, b.cod_balance);
        prop_assert_eq!(a.earnings_balance, b.earnings_balance);
        prop_assert_eq!(a.version, b.version);
        let splits = |pending: &LogView<LedgerTransaction>| {
            pending
                .iter()
                .map(|tx| (tx.order_id, tx.cod_collected, tx.rider_earning, tx.admin_net))
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(splits(&a.pending), splits(&b.pending));
    }
}

// === Settlement Properties ===

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Settling within the balance reduces it by exactly the amount.
    #[test]
    fn settle_reduces_by_exact_amount(
        deliveries in prop::collection::vec(arb_delivery(), 1..10),
        fraction in 0.0f64..=1.0,
    ) {
        let engine = Engine::new();
        for (i, delivery) in deliveries.iter().enumerate() {
            post(&engine, i as u64, *delivery);
        }
        let before = engine.get_account(&RiderId(1)).unwrap().cod_balance();
        let amount = ((before as f64) * fraction).floor() as Money;

        let committed = engine.settle(RiderId(1), amount, 0, &ops()).unwrap();

        prop_assert_eq!(committed.snapshot.cod_balance, before - amount);
        prop_assert!(committed.snapshot.cod_balance >= 0);
        let pending_cash: Money = committed.snapshot.pending.iter().map(|tx| tx.cod_collected).sum();
        prop_assert_eq!(pending_cash, committed.snapshot.cod_balance + committed.snapshot.settlement_credit);
    }

    /// Settling more than the balance fails and changes nothing.
    #[test]
    fn cannot_over_settle(
        deliveries in prop::collection::vec(arb_delivery(), 1..10),
        extra in 1i64..100_000,
    ) {
        let engine = Engine::new();
        for (i, delivery) in deliveries.iter().enumerate() {
            post(&engine, i as u64, *delivery);
        }
        let before = engine.get_account(&RiderId(1)).unwrap().snapshot();

        let result = engine.settle(RiderId(1), before.cod_balance + extra, 0, &ops());

        prop_assert!(result.is_err());
        let after = engine.get_account(&RiderId(1)).unwrap().snapshot();
        prop_assert_eq!(after.cod_balance, before.cod_balance);
        prop_assert_eq!(after.version, before.version);
    }

    /// A sequence of partial settlements that adds up to the balance clears
    /// every transaction.
    #[test]
    fn partial_settlements_eventually_clear_everything(
        deliveries in prop::collection::vec(arb_delivery(), 1..10),
        cuts in prop::collection::vec(0.0f64..1.0, 0..5),
    ) {
        let engine = Engine::new();
        for (i, delivery) in deliveries.iter().enumerate() {
            post(&engine, i as u64, *delivery);
        }

        for cut in cuts {
            let held = engine.get_account(&RiderId(1)).unwrap().cod_balance();
            let amount = ((held as f64) * cut).floor() as Money;
            engine.settle(RiderId(1), amount, 0, &ops()).unwrap();
        }
        let held = engine.get_account(&RiderId(1)).unwrap().cod_balance();
        let committed = engine.settle(RiderId(1), held, 0, &ops()).unwrap();

        prop_assert_eq!(committed.snapshot.cod_balance, 0);
        prop_assert_eq!(committed.snapshot.settlement_credit, 0);
        prop_assert!(committed.snapshot.pending.is_empty());
    }
}

// === Status Properties ===

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// A blocked rider's deliveries always fail and never move balances.
    #[test]
    fn blocked_rider_never_posts(
        before in prop::collection::vec(arb_delivery(), 0..5),
        after in prop::collection::vec(arb_delivery(), 1..5),
    ) {
        let engine = Engine::new();
        for (i, delivery) in before.iter().enumerate() {
            post(&engine, i as u64, *delivery);
        }
        engine.set_blocked(RiderId(1), true, &ops()).unwrap();
        let frozen = engine.get_account(&RiderId(1)).unwrap().snapshot();

        for (i, (cash, fee)) in after.iter().enumerate() {
            let net = if *cash == 0 { 0 } else { cash - fee };
            let result = engine.post_delivery(RiderId(1), OrderId(1_000 + i as u64), *cash, *fee, net);
            prop_assert!(result.is_err());
        }

        let now = engine.get_account(&RiderId(1)).unwrap().snapshot();
        prop_assert_eq!(now.settlement_status, SettlementStatus::Blocked);
        prop_assert_eq!(now.cod_balance, frozen.cod_balance);
        prop_assert_eq!(now.earnings_balance, frozen.earnings_balance);
    }

    /// Below the threshold (and within the grace period) a rider is active;
    /// above it, overdue.
    #[test]
    fn status_tracks_threshold(
        deliveries in prop::collection::vec(arb_delivery(), 1..10),
    ) {
        let engine = Engine::new();
        for (i, delivery) in deliveries.iter().enumerate() {
            post(&engine, i as u64, *delivery);
        }
        let account = engine.get_account(&RiderId(1)).unwrap();
        let threshold = engine.config().settlement.overdue_threshold;

        let expected = if account.cod_balance() > threshold {
            SettlementStatus::Overdue
        } else {
            SettlementStatus::Active
        };
        prop_assert_eq!(account.status(), expected);
    }
}
