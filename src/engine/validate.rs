use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// A stay: at least one night, at most `MAX_STAY_NIGHTS`.
pub(crate) fn validate_stay(stay: &DateRange) -> Result<(), EngineError> {
    if stay.is_empty() {
        return Err(EngineError::Invalid("check-out must be after check-in"));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &DateRange, max_days: i64) -> Result<(), EngineError> {
    if window.is_empty() {
        return Err(EngineError::Invalid("empty or inverted date range"));
    }
    if window.nights() > max_days {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

pub(crate) fn validate_quantity(quantity: u32) -> Result<(), EngineError> {
    if quantity == 0 {
        return Err(EngineError::Invalid("room count must be at least 1"));
    }
    if quantity > MAX_ROOMS_PER_RESERVATION {
        return Err(EngineError::LimitExceeded("too many rooms in one request"));
    }
    Ok(())
}

pub(crate) fn validate_money(amount: Option<Money>, what: &'static str) -> Result<(), EngineError> {
    match amount {
        Some(a) if a < 0 => Err(EngineError::Invalid(what)),
        _ => Ok(()),
    }
}

pub(crate) fn validate_room(room: &Room) -> Result<(), EngineError> {
    validate_money(Some(room.base_price), "negative base price")?;
    if let Some(ref n) = room.name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    Ok(())
}

pub(crate) fn validate_rule(rule: &SurchargeRule) -> Result<(), EngineError> {
    validate_money(Some(rule.amount), "negative surcharge amount")?;
    if let (Some(min), Some(max)) = (rule.min_age, rule.max_age)
        && min > max
    {
        return Err(EngineError::Invalid("surcharge min_age above max_age"));
    }
    if rule.kind != SurchargeKind::Child && (rule.min_age.is_some() || rule.max_age.is_some()) {
        return Err(EngineError::Invalid("age bounds only apply to child surcharges"));
    }
    if let Some(ref l) = rule.label
        && l.len() > MAX_LABEL_LEN
    {
        return Err(EngineError::LimitExceeded("surcharge label too long"));
    }
    Ok(())
}

pub(crate) fn validate_weekly_rules(rules: &WeeklyRules) -> Result<(), EngineError> {
    for (_, rule) in rules.iter() {
        validate_money(rule.price_room, "negative room price")?;
        validate_money(rule.price_combo, "negative combo price")?;
    }
    Ok(())
}

pub(crate) fn validate_edit(edit: &DayEdit) -> Result<(), EngineError> {
    validate_money(edit.price_room, "negative room price")?;
    validate_money(edit.price_combo, "negative combo price")?;
    if edit.max_stay != 0 && edit.min_stay > edit.max_stay {
        return Err(EngineError::Invalid("min_stay above max_stay"));
    }
    if let Some(ref n) = edit.notes
        && n.len() > MAX_NOTE_LEN
    {
        return Err(EngineError::LimitExceeded("note too long"));
    }
    Ok(())
}

/// Guests must fit the room's caps (0 = uncapped) and children must be children.
pub(crate) fn validate_occupancy(
    room: &Room,
    occupancy: &OccupancyRequest,
    num_rooms: u32,
) -> Result<(), EngineError> {
    if occupancy.adults == 0 {
        return Err(EngineError::Invalid("at least one adult is required"));
    }
    if occupancy.children_ages.iter().any(|a| *a > DEFAULT_CHILD_MAX_AGE) {
        return Err(EngineError::Invalid("child age above 17"));
    }
    if room.max_adults > 0 && occupancy.adults > room.max_adults.saturating_mul(num_rooms) {
        return Err(EngineError::Invalid("too many adults for the requested rooms"));
    }
    let children = u32::try_from(occupancy.children_ages.len()).unwrap_or(u32::MAX);
    if room.max_children > 0 && children > room.max_children.saturating_mul(num_rooms) {
        return Err(EngineError::Invalid("too many children for the requested rooms"));
    }
    Ok(())
}

pub(crate) fn ensure_bookable(room: &Room) -> Result<(), EngineError> {
    if room.status == RoomStatus::Inactive {
        return Err(EngineError::Invalid("room is not open for booking"));
    }
    Ok(())
}
