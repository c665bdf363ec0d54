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


//! Daily delivery bonus: counting, one-shot crediting and replay safety.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rider_ledger::{
    BonusOutcome, BonusRule, Engine, EngineConfig, LedgerEvent, ManualClock, OrderId, RiderId,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

fn engine_with_rule(target: u32, amount: i64) -> (Arc<Engine>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap(),
    ));
    let config = EngineConfig {
        bonus: BonusRule {
            target_deliveries: target,
            bonus_amount: amount,
            business_day_utc_offset_minutes: 0,
        },
        ..EngineConfig::default()
    };
    (Arc::new(Engine::with_clock(config, clock.clone())), clock)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
}

#[test]
fn tenth_delivery_credits_bonus_once() {
    let (engine, _) = engine_with_rule(10, 300);
    let rider = RiderId(1);

    for order in 1..=9 {
        let outcome = engine.increment_bonus(rider, OrderId(order), today()).unwrap().outcome;
        assert!(matches!(outcome, BonusOutcome::Counted(_)));
        assert!(!outcome.progress().is_bonus_achieved);
    }
    assert_eq!(engine.get_account(&rider).unwrap().earnings_balance(), 0);

    let tenth = engine.increment_bonus(rider, OrderId(10), today()).unwrap();
    assert_eq!(tenth.outcome.credited(), Some(300));
    assert!(tenth.outcome.progress().is_bonus_achieved);
    assert_eq!(tenth.outcome.progress().bonus_credited_at, Some(engine.now()));
    assert_eq!(tenth.snapshot.earnings_balance, 300);

    let eleventh = engine.increment_bonus(rider, OrderId(11), today()).unwrap();
    assert_eq!(eleventh.outcome.credited(), None);
    assert_eq!(eleventh.outcome.progress().daily_delivery_count, 11);
    assert_eq!(eleventh.snapshot.earnings_balance, 300);
}

#[test]
fn replayed_crossing_order_does_not_credit_again() {
    let (engine, _) = engine_with_rule(2, 100);
    let rider = RiderId(1);

    engine.increment_bonus(rider, OrderId(1), today()).unwrap();
    engine.increment_bonus(rider, OrderId(2), today()).unwrap();
    let replay = engine.increment_bonus(rider, OrderId(2), today()).unwrap();

    assert!(replay.outcome.is_duplicate());
    assert_eq!(replay.outcome.progress().daily_delivery_count, 2);
    assert_eq!(replay.snapshot.earnings_balance, 100);
}

#[test]
fn replay_after_midnight_keeps_original_day() {
    let (engine, clock) = engine_with_rule(5, 100);
    let rider = RiderId(1);
    engine.increment_bonus(rider, OrderId(1), today()).unwrap();

    clock.advance(Duration::days(1));
    let tomorrow = today().succ_opt().unwrap();
    let replay = engine.increment_bonus(rider, OrderId(1), tomorrow).unwrap();

    assert!(replay.outcome.is_duplicate());
    assert_eq!(replay.outcome.progress().date, today());
    assert!(replay.snapshot.bonus_on(tomorrow).is_none());
}

#[test]
fn each_day_has_its_own_bonus() {
    let (engine, _) = engine_with_rule(1, 200);
    let rider = RiderId(1);
    let tomorrow = today().succ_opt().unwrap();

    engine.increment_bonus(rider, OrderId(1), today()).unwrap();
    let next = engine.increment_bonus(rider, OrderId(2), tomorrow).unwrap();

    assert_eq!(next.outcome.credited(), Some(200));
    assert_eq!(next.snapshot.earnings_balance, 400);
    assert_eq!(next.snapshot.bonus_days.len(), 2);
    assert_eq!(next.snapshot.bonus_days.keys().next_back(), Some(&tomorrow));
}

#[test]
fn bonus_events_are_published() {
    let (engine, _) = engine_with_rule(2, 100);
    let events = engine.subscribe();

    engine.increment_bonus(RiderId(1), OrderId(1), today()).unwrap();
    engine.increment_bonus(RiderId(1), OrderId(2), today()).unwrap();
    engine.increment_bonus(RiderId(1), OrderId(2), today()).unwrap();

    let names: Vec<&str> = events.drain().iter().map(LedgerEvent::name).collect();
    assert_eq!(
        names,
        vec![
            "bonus_progress_updated",
            "bonus_progress_updated",
            "bonus_achieved",
            "stats_updated",
        ]
    );
}

#[test]
fn concurrent_increments_credit_exactly_once() {
    const TARGET: u32 = 10;

    for _ in 0..50 {
        let (engine, _) = engine_with_rule(TARGET, 300);
        let rider = RiderId(1);
        let credits = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..TARGET)
            .map(|order| {
                let engine = Arc::clone(&engine);
                let credits = Arc::clone(&credits);
                thread::spawn(move || {
                    let committed = engine
                        .increment_bonus(rider, OrderId(u64::from(order)), today())
                        .unwrap();
                    if committed.outcome.credited().is_some() {
                        credits.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(credits.load(Ordering::SeqCst), 1);
        let snapshot = engine.get_account(&rider).unwrap().snapshot();
        assert_eq!(snapshot.earnings_balance, 300);
        let progress = snapshot.bonus_on(today()).unwrap();
        assert_eq!(progress.daily_delivery_count, TARGET);
        assert!(progress.is_bonus_achieved);
        assert!(progress.bonus_credited_at.is_some());
    }
}

#[test]
fn concurrent_replays_with_overshoot_credit_exactly_once() {
    let (engine, _) = engine_with_rule(5, 300);
    let rider = RiderId(1);
    let credits = Arc::new(AtomicUsize::new(0));

    // 20 distinct orders, each delivered three times, from 12 threads.
    let handles: Vec<_> = (0..12u64)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            let credits = Arc::clone(&credits);
            thread::spawn(move || {
                for i in 0..5u64 {
                    let order = (worker * 5 + i) % 20;
                    if engine
                        .increment_bonus(rider, OrderId(order), today())
                        .unwrap()
                        .outcome
                        .credited()
                        .is_some()
                    {
                        credits.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(credits.load(Ordering::SeqCst), 1);
    let snapshot = engine.get_account(&rider).unwrap().snapshot();
    assert_eq!(snapshot.earnings_balance, 300);
    assert_eq!(snapshot.bonus_on(today()).unwrap().daily_delivery_count, 20);
}
