use std::sync::Arc;

use chrono::NaiveDate;
use proptest::prelude::*;
use ulid::Ulid;

use hotelcal::engine::{
    check_days, day_failure, expand_weekly_rules, merge_patch, resolve_price,
    restore_stock, take_stock, Engine, EngineError,
};
use hotelcal::model::*;
use hotelcal::notify::NotifyHub;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn arb_status() -> impl Strategy<Value = DayStatus> {
    prop_oneof![
        Just(DayStatus::Available),
        Just(DayStatus::Limited),
        Just(DayStatus::SoldOut),
        Just(DayStatus::StopSell),
    ]
}

fn arb_room() -> impl Strategy<Value = Room> {
    (0..2_000_000_i64, 1..10_u32).prop_map(|(base_price, total_rooms)| Room {
        id: Ulid::new(),
        name: None,
        base_price,
        base_occupancy: 2,
        max_adults: 0,
        max_children: 0,
        total_rooms,
        status: RoomStatus::Active,
    })
}

fn arb_day() -> impl Strategy<Value = PricingDay> {
    (
        0..60_i64,
        prop::option::of(0..3_000_000_i64),
        prop::option::of(0..3_000_000_i64),
        0..10_u32,
        0..10_u32,
        arb_status(),
    )
        .prop_map(|(offset, price_room, price_combo, stock, booked, status)| {
            let date = base_date() + chrono::Duration::days(offset);
            PricingDay {
                date,
                day_of_week: day_of_week(date),
                price_room,
                price_combo,
                stock,
                booked,
                status,
                min_stay: 0,
                max_stay: 0,
                notes: None,
            }
        })
}

fn arb_rule() -> impl Strategy<Value = WeekdayRule> {
    (
        prop::option::of(0..3_000_000_i64),
        prop::option::of(0..3_000_000_i64),
        prop::option::of(0..10_u32),
        prop::option::of(arb_status()),
    )
        .prop_map(|(price_room, price_combo, stock, status)| WeekdayRule {
            price_room,
            price_combo,
            stock,
            status,
        })
}

fn arb_weekly_rules() -> impl Strategy<Value = WeeklyRules> {
    prop::collection::vec(prop::option::of(arb_rule()), 7).prop_map(|slots| {
        let mut rules = WeeklyRules::new();
        for (i, slot) in slots.into_iter().enumerate() {
            if let Some(rule) = slot {
                rules.set(i as u8 + 1, rule);
            }
        }
        rules
    })
}

fn arb_track() -> impl Strategy<Value = PriceTrack> {
    prop_oneof![Just(PriceTrack::Room), Just(PriceTrack::Combo)]
}

// ---------------------------------------------------------------------------
// Availability
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn night_fails_iff_blocked_or_short(day in arb_day(), requested in 1..10_u32) {
        let expected_open = !day.status.blocks_sale() && day.stock >= requested;
        prop_assert_eq!(day_failure(&day, requested).is_none(), expected_open);
    }

    #[test]
    fn stop_at_first_matches_head_of_collect_all(
        room in arb_room(),
        days in prop::collection::vec(arb_day(), 0..30),
        nights in 1..30_i64,
        requested in 1..10_u32,
    ) {
        let mut rs = RoomState::new(room);
        for day in days {
            rs.days.insert(day.date, day);
        }
        let stay = DateRange::new(base_date(), base_date() + chrono::Duration::days(nights));

        let first = check_days(&rs, &stay, requested, AvailabilityMode::StopAtFirst);
        let all = check_days(&rs, &stay, requested, AvailabilityMode::CollectAll);
        prop_assert_eq!(first.available, all.available);
        prop_assert!(first.failures.len() <= 1);
        prop_assert_eq!(first.failures.first(), all.failures.first());
        prop_assert!(all.failures.windows(2).all(|w| w[0].date < w[1].date));
        prop_assert!(all.failures.iter().all(|f| stay.contains(f.date)));
    }
}

// ---------------------------------------------------------------------------
// Stock
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn take_stock_clamps_and_counts(day in arb_day(), quantity in 0..20_u32) {
        let mut row = day.clone();
        take_stock(&mut row, quantity);
        prop_assert_eq!(row.stock, day.stock.saturating_sub(quantity));
        prop_assert_eq!(row.booked, day.booked + quantity);
        if day.status == DayStatus::StopSell {
            prop_assert_eq!(row.status, DayStatus::StopSell);
        } else if row.stock == 0 {
            prop_assert_eq!(row.status, DayStatus::SoldOut);
        }
    }

    #[test]
    fn release_undoes_a_covered_take(day in arb_day(), quantity in 0..10_u32) {
        prop_assume!(quantity <= day.stock);
        let mut row = day.clone();
        take_stock(&mut row, quantity);
        restore_stock(&mut row, quantity);
        prop_assert_eq!(row.stock, day.stock);
        prop_assert_eq!(row.booked, day.booked);
        prop_assert_eq!(row.status == DayStatus::StopSell, day.status == DayStatus::StopSell);
    }
}

// ---------------------------------------------------------------------------
// Pricing and bulk merge
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn resolved_price_is_positive_or_base(room in arb_room(), day in prop::option::of(arb_day()), track in arb_track()) {
        let (price, _) = resolve_price(&room, day.as_ref(), track);
        prop_assert!(price > 0 || price == room.base_price);
        prop_assert!(price >= 0);
    }

    #[test]
    fn bulk_merge_is_idempotent(
        room in arb_room(),
        existing in prop::option::of(arb_day()),
        rules in arb_weekly_rules(),
    ) {
        let date = existing.as_ref().map_or(base_date(), |d| d.date);
        let range = DateRange::new(date, date + chrono::Duration::days(1));
        for patch in expand_weekly_rules(&room, &range, &rules) {
            let once = merge_patch(&room, existing.as_ref(), &patch, &MergePolicy::BULK);
            let twice = merge_patch(&room, Some(&once), &patch, &MergePolicy::BULK);
            prop_assert_eq!(&once, &twice);
        }
    }

    #[test]
    fn bulk_zero_price_never_clears(room in arb_room(), existing in arb_day(), rule in arb_rule()) {
        let patch = DayPatch {
            date: existing.date,
            price_room: Some(0),
            price_combo: Some(0),
            stock: rule.stock.unwrap_or(room.total_rooms),
            status: rule.status.unwrap_or(DayStatus::Available),
        };
        let merged = merge_patch(&room, Some(&existing), &patch, &MergePolicy::BULK);
        prop_assert_eq!(merged.price_room, existing.price_room);
        prop_assert_eq!(merged.price_combo, existing.price_combo);
        prop_assert_eq!(merged.booked, existing.booked);
    }

    #[test]
    fn expansion_follows_weekdays(room in arb_room(), rules in arb_weekly_rules(), span in 1..60_i64) {
        let range = DateRange::new(base_date(), base_date() + chrono::Duration::days(span));
        let patches = expand_weekly_rules(&room, &range, &rules);
        let expected = range
            .dates()
            .filter(|d| rules.for_date(*d).is_some_and(|r| !r.is_empty()))
            .count();
        prop_assert_eq!(patches.len(), expected);
        for patch in &patches {
            let rule = rules.for_date(patch.date).unwrap();
            prop_assert_eq!(patch.stock, rule.stock.unwrap_or(room.total_rooms));
        }
    }
}

// ---------------------------------------------------------------------------
// Gated reservations against a live engine
// ---------------------------------------------------------------------------

fn arb_reservation() -> impl Strategy<Value = (i64, i64, u32)> {
    (0..10_i64, 1..5_i64, 1..4_u32)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reservations_never_oversell(
        total_rooms in 1..5_u32,
        requests in prop::collection::vec(arb_reservation(), 1..20),
    ) {
        tokio_test::block_on(async {
            let dir = std::env::temp_dir().join("hotelcal_test_properties");
            std::fs::create_dir_all(&dir).unwrap();
            let engine = Engine::new(
                dir.join(format!("{}.wal", Ulid::new())),
                Arc::new(NotifyHub::new()),
            )
            .unwrap();
            let room = Room {
                id: Ulid::new(),
                name: None,
                base_price: 500_000,
                base_occupancy: 2,
                max_adults: 0,
                max_children: 0,
                total_rooms,
                status: RoomStatus::Active,
            };
            engine.upsert_room(room.clone()).await.unwrap();

            let window = DateRange::new(base_date(), base_date() + chrono::Duration::days(15));
            for (offset, nights, quantity) in requests {
                let from = base_date() + chrono::Duration::days(offset);
                let stay = DateRange::new(from, from + chrono::Duration::days(nights));
                let before = engine.calendar(room.id, window).await.unwrap();
                let fits = before
                    .iter()
                    .filter(|d| stay.contains(d.date))
                    .all(|d| !d.status.blocks_sale() && d.stock >= quantity);

                match engine.reserve_stock(room.id, stay, quantity).await {
                    Ok(()) => assert!(fits),
                    Err(EngineError::Unavailable(_)) => {
                        assert!(!fits);
                        assert_eq!(engine.calendar(room.id, window).await.unwrap(), before);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }

            for day in engine.calendar(room.id, window).await.unwrap() {
                assert_eq!(day.stock + day.booked, total_rooms);
            }
        });
    }
}
