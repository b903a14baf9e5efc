use chrono::NaiveDate;

use crate::limits::LIMITED_STOCK_THRESHOLD;
use crate::model::*;

// ── Effective rows ───────────────────────────────────────────────

/// The row the engine acts on for `date`: the stored row, or the room
/// defaults (no prices, full physical stock, available).
pub fn effective_row(room: &Room, stored: Option<&PricingDay>, date: NaiveDate) -> PricingDay {
    match stored {
        Some(day) => day.clone(),
        None => PricingDay {
            date,
            day_of_week: day_of_week(date),
            price_room: None,
            price_combo: None,
            stock: room.total_rooms,
            booked: 0,
            status: DayStatus::Available,
            min_stay: 0,
            max_stay: 0,
            notes: None,
        },
    }
}

/// Stored row for `date`, created from the room defaults if missing.
pub fn materialize(rs: &mut RoomState, date: NaiveDate) -> &mut PricingDay {
    let room = &rs.room;
    rs.days
        .entry(date)
        .or_insert_with(|| effective_row(room, None, date))
}

// ── Pricing ──────────────────────────────────────────────────────

fn positive(price: Option<Money>) -> Option<Money> {
    price.filter(|p| *p > 0)
}

/// Nightly price for one date.
///
/// Combo: calendar combo price, then calendar room price. Room: calendar
/// room price. Anything that is null or 0 falls through to the room's base
/// price; a night cannot be priced at 0 through the calendar.
pub fn resolve_price(room: &Room, stored: Option<&PricingDay>, track: PriceTrack) -> (Money, PriceSource) {
    let Some(day) = stored else {
        return (room.base_price, PriceSource::RoomDefault);
    };
    if track == PriceTrack::Combo
        && let Some(price) = positive(day.price_combo)
    {
        return (price, PriceSource::CalendarCombo);
    }
    match positive(day.price_room) {
        Some(price) => (price, PriceSource::CalendarRoom),
        None => (room.base_price, PriceSource::BasePriceFallback),
    }
}

pub fn nightly_prices(rs: &RoomState, stay: &DateRange, track: PriceTrack) -> Vec<NightPrice> {
    stay.dates()
        .map(|date| {
            let (price, source) = resolve_price(&rs.room, rs.day(date), track);
            NightPrice { date, price, source }
        })
        .collect()
}

// ── Availability ─────────────────────────────────────────────────

/// Why `row` cannot host `requested` rooms, if it cannot.
pub fn day_failure(row: &PricingDay, requested: u32) -> Option<AvailabilityFailure> {
    let reason = match row.status {
        DayStatus::SoldOut => FailureReason::SoldOut,
        DayStatus::StopSell => FailureReason::StopSell,
        _ if row.stock < requested => FailureReason::InsufficientStock,
        _ => return None,
    };
    Some(AvailabilityFailure {
        date: row.date,
        reason,
        available: row.stock,
        requested,
    })
}

/// Walk every night of `stay` in date order.
pub fn check_days(
    rs: &RoomState,
    stay: &DateRange,
    requested: u32,
    mode: AvailabilityMode,
) -> AvailabilityReport {
    let mut failures = Vec::new();
    for date in stay.dates() {
        let failure = match rs.day(date) {
            Some(day) => day_failure(day, requested),
            None => day_failure(&effective_row(&rs.room, None, date), requested),
        };
        if let Some(f) = failure {
            failures.push(f);
            if mode == AvailabilityMode::StopAtFirst {
                break;
            }
        }
    }
    AvailabilityReport {
        available: failures.is_empty(),
        failures,
    }
}

// ── Stock ────────────────────────────────────────────────────────

/// Status after stock moved to `stock`. `stop_sell` is only ever cleared by
/// an explicit edit.
pub fn derive_status(current: DayStatus, stock: u32) -> DayStatus {
    if current == DayStatus::StopSell {
        return current;
    }
    if stock == 0 {
        DayStatus::SoldOut
    } else if stock <= LIMITED_STOCK_THRESHOLD {
        DayStatus::Limited
    } else {
        current
    }
}

pub fn take_stock(row: &mut PricingDay, quantity: u32) {
    row.stock = row.stock.saturating_sub(quantity);
    row.booked = row.booked.saturating_add(quantity);
    row.status = derive_status(row.status, row.stock);
}

pub fn restore_stock(row: &mut PricingDay, quantity: u32) {
    row.stock = row.stock.saturating_add(quantity);
    row.booked = row.booked.saturating_sub(quantity);
    row.status = match row.status {
        DayStatus::SoldOut | DayStatus::Limited if row.stock > LIMITED_STOCK_THRESHOLD => {
            DayStatus::Available
        }
        DayStatus::SoldOut if row.stock > 0 => DayStatus::Limited,
        other => other,
    };
}

// ── Weekday rules ────────────────────────────────────────────────

/// Project weekday rules onto every date of `range`. Dates whose weekday has
/// no rule, or an empty one, produce nothing.
pub fn expand_weekly_rules(room: &Room, range: &DateRange, rules: &WeeklyRules) -> Vec<DayPatch> {
    range
        .dates()
        .filter_map(|date| {
            let rule = rules.for_date(date)?;
            if rule.is_empty() {
                return None;
            }
            Some(DayPatch {
                date,
                price_room: rule.price_room,
                price_combo: rule.price_combo,
                stock: rule.stock.unwrap_or(room.total_rooms),
                status: rule.status.unwrap_or(DayStatus::Available),
            })
        })
        .collect()
}

/// Merge `patch` into the row for its date. A missing row starts from the
/// room defaults, so inserts and updates share one path.
pub fn merge_patch(
    room: &Room,
    existing: Option<&PricingDay>,
    patch: &DayPatch,
    policy: &MergePolicy,
) -> PricingDay {
    let mut row = effective_row(room, existing, patch.date);
    if let Some(price) = patch.price_room
        && policy.price_room.accepts(price)
    {
        row.price_room = Some(price);
    }
    if let Some(price) = patch.price_combo
        && policy.price_combo.accepts(price)
    {
        row.price_combo = Some(price);
    }
    if policy.stock.accepts(i64::from(patch.stock)) {
        row.stock = patch.stock;
    }
    row.status = patch.status;
    row
}

pub fn apply_patches(rs: &mut RoomState, patches: &[DayPatch], policy: &MergePolicy) {
    for patch in patches {
        let row = merge_patch(&rs.room, rs.days.get(&patch.date), patch, policy);
        rs.days.insert(patch.date, row);
    }
}
