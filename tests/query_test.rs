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


//! Admin read models: summaries, fleet totals and pending breakdowns.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rider_ledger::{
    AdminContext, AdminQueryService, Engine, EngineConfig, FleetTotals, ManualClock, OrderId,
    PendingLine, RiderId, SettlementStatus,
};
use std::sync::Arc;

fn setup() -> (Arc<Engine>, AdminQueryService) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap(),
    ));
    let engine = Arc::new(Engine::with_clock(EngineConfig::default(), clock));
    let query = AdminQueryService::new(Arc::clone(&engine));
    (engine, query)
}

fn post_cod(engine: &Engine, rider: u64, order: u64, cash: i64, fee: i64) {
    engine
        .post_delivery(RiderId(rider), OrderId(order), cash, fee, cash - fee)
        .unwrap();
}

#[test]
fn unknown_rider_has_no_summary() {
    let (_, query) = setup();
    assert!(query.rider_summary(&RiderId(1)).is_none());
    assert!(query.pending_breakdown(&RiderId(1)).is_none());
    assert!(query.settlement_history(&RiderId(1)).is_none());
    assert_eq!(query.fleet_totals(), FleetTotals::default());
}

#[test]
fn summaries_are_sorted_by_rider() {
    let (engine, query) = setup();
    post_cod(&engine, 3, 1, 100, 10);
    post_cod(&engine, 1, 2, 200, 20);
    post_cod(&engine, 2, 3, 300, 30);

    let riders: Vec<RiderId> = query.rider_summaries().iter().map(|s| s.rider).collect();
    assert_eq!(riders, vec![RiderId(1), RiderId(2), RiderId(3)]);
}

#[test]
fn fleet_totals_aggregate_all_riders() {
    let (engine, query) = setup();
    let ops = AdminContext::new("ops");
    post_cod(&engine, 1, 1, 500, 50);
    post_cod(&engine, 2, 2, 16_000, 100);
    post_cod(&engine, 3, 3, 300, 30);
    engine.set_blocked(RiderId(3), true, &ops).unwrap();
    engine.settle(RiderId(1), 500, 20, &ops).unwrap();

    let totals = query.fleet_totals();

    assert_eq!(
        totals,
        FleetTotals {
            riders: 3,
            cash_in_field: 16_300,
            pending_payouts: 30 + 100 + 30,
            active: 1,
            overdue: 1,
            blocked: 1,
        }
    );
    let overdue = query.riders_with_status(SettlementStatus::Overdue);
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].rider, RiderId(2));
}

#[test]
fn pending_breakdown_lists_unsettled_lines() {
    let (engine, query) = setup();
    post_cod(&engine, 1, 1, 500, 50);
    post_cod(&engine, 1, 2, 800, 60);
    post_cod(&engine, 1, 3, 300, 40);
    engine
        .settle(RiderId(1), 600, 0, &AdminContext::new("ops"))
        .unwrap();

    let breakdown = query.pending_breakdown(&RiderId(1)).unwrap();

    let orders: Vec<OrderId> = breakdown.lines.iter().map(|l| l.order_id).collect();
    assert_eq!(orders, vec![OrderId(2), OrderId(3)]);
    assert_eq!(
        breakdown.lines[0],
        PendingLine {
            order_id: OrderId(2),
            collected: 800,
            fee: 60,
            net: 740,
            created_at: engine.now(),
        }
    );
    assert_eq!(breakdown.total_collected, 1100);
    assert_eq!(breakdown.total_fee, 100);
    assert_eq!(breakdown.total_net, 1000);
    // 600 handed in, 500 cleared order 1, 100 carried against order 2.
    assert_eq!(breakdown.settlement_credit, 100);
    assert_eq!(query.rider_summary(&RiderId(1)).unwrap().cod_balance, 1000);
}

#[test]
fn bonus_progress_reports_days_long_past() {
    let (engine, query) = setup();
    let first_day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let mut order = 0;
    for day in 0..40 {
        let date = first_day + Duration::days(day);
        for _ in 0..10 {
            order += 1;
            engine.increment_bonus(RiderId(1), OrderId(order), date).unwrap();
        }
    }
    assert_eq!(engine.get_account(&RiderId(1)).unwrap().earnings_balance(), 40 * 300);

    let oldest = query.bonus_progress(&RiderId(1), first_day);

    assert_eq!(oldest.daily_delivery_count, 10);
    assert!(oldest.is_bonus_achieved);
    assert!(oldest.bonus_credited_at.is_some());
    assert_eq!(query.snapshot(&RiderId(1)).unwrap().bonus_days.len(), 40);
}

#[test]
fn bonus_progress_defaults_for_quiet_day() {
    let (_, query) = setup();
    let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();

    let progress = query.bonus_progress(&RiderId(1), date);

    assert_eq!(progress.daily_delivery_count, 0);
    assert_eq!(progress.target_deliveries, 10);
    assert_eq!(progress.remaining(), 10);
    assert!(!progress.is_bonus_achieved);
}

#[test]
fn settlement_history_is_returned_in_order() {
    let (engine, query) = setup();
    let ops = AdminContext::new("finance");
    post_cod(&engine, 1, 1, 500, 50);
    engine.settle(RiderId(1), 200, 0, &ops).unwrap();
    engine.settle(RiderId(1), 300, 50, &ops).unwrap();

    let history = query.settlement_history(&RiderId(1)).unwrap();

    let amounts: Vec<i64> = history.iter().map(|b| b.amount_collected).collect();
    assert_eq!(amounts, vec![200, 300]);
    assert!(history.iter().all(|b| b.settled_by == "finance"));
    assert_eq!(history.get(1).unwrap().cleared.len(), 1);
}

#[test]
fn held_snapshot_is_not_affected_by_later_writes() {
    let (engine, query) = setup();
    post_cod(&engine, 1, 1, 500, 50);
    let held = query.snapshot(&RiderId(1)).unwrap();

    post_cod(&engine, 1, 2, 500, 50);

    assert_eq!(held.cod_balance, 500);
    assert_eq!(query.snapshot(&RiderId(1)).unwrap().cod_balance, 1000);
    assert!(query.snapshot(&RiderId(1)).unwrap().version > held.version);
}
