use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_CALENDAR_WINDOW_DAYS;
use crate::model::*;

use super::calendar::{check_days, effective_row};
use super::validate::*;
use super::{Engine, EngineError};

/// Price a stay against a locked room. Fails with `Unavailable` on the
/// first night that cannot host the requested rooms.
pub(super) fn build_quote(rs: &RoomState, request: &QuoteRequest) -> Result<Quote, EngineError> {
    ensure_bookable(&rs.room)?;
    validate_occupancy(&rs.room, &request.occupancy, request.num_rooms)?;

    let report = check_days(rs, &request.stay, request.num_rooms, AvailabilityMode::StopAtFirst);
    if let Some(failure) = report.failures.into_iter().next() {
        return Err(EngineError::Unavailable(failure));
    }

    let nights = super::nightly_prices(rs, &request.stay, request.track);
    let rooms = Money::from(request.num_rooms);
    let room_subtotal = nights
        .iter()
        .fold(0, |acc: Money, n| acc.saturating_add(n.price.saturating_mul(rooms)));

    let night_count = u32::try_from(nights.len()).unwrap_or(u32::MAX);
    let surcharges = super::calculate_surcharges(
        &rs.room,
        &rs.surcharges,
        night_count,
        &request.occupancy,
        request.num_rooms,
        request.track,
    );
    let total = room_subtotal.saturating_add(surcharges.total);

    Ok(Quote {
        room_id: rs.room.id,
        stay: request.stay,
        track: request.track,
        num_rooms: request.num_rooms,
        nights,
        room_subtotal,
        surcharges,
        total,
    })
}

impl Engine {
    /// Effective nightly price for one date on `track`, with where it came from.
    pub async fn resolve_price(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        track: PriceTrack,
    ) -> Result<(Money, PriceSource), EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(super::resolve_price(&guard.room, guard.day(date), track))
    }

    pub async fn nightly_prices(
        &self,
        room_id: Ulid,
        stay: DateRange,
        track: PriceTrack,
    ) -> Result<Vec<NightPrice>, EngineError> {
        validate_stay(&stay)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(super::nightly_prices(&guard, &stay, track))
    }

    /// Whether every night of `stay` can host `requested` rooms.
    ///
    /// This is a read: nothing is held once it returns. Pair it with
    /// `reserve_stock`, not `decrement_stock`, when the answer must stick.
    pub async fn check_availability(
        &self,
        room_id: Ulid,
        stay: DateRange,
        requested: u32,
        mode: AvailabilityMode,
    ) -> Result<AvailabilityReport, EngineError> {
        validate_stay(&stay)?;
        validate_quantity(requested)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(check_days(&guard, &stay, requested, mode))
    }

    /// Surcharges for a stay of `nights` nights using the room's stored rules.
    pub async fn calculate_surcharges(
        &self,
        room_id: Ulid,
        nights: u32,
        occupancy: &OccupancyRequest,
        num_rooms: u32,
        track: PriceTrack,
    ) -> Result<SurchargeBreakdown, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(super::calculate_surcharges(
            &guard.room,
            &guard.surcharges,
            nights,
            occupancy,
            num_rooms,
            track,
        ))
    }

    pub async fn quote(&self, request: &QuoteRequest) -> Result<Quote, EngineError> {
        validate_stay(&request.stay)?;
        validate_quantity(request.num_rooms)?;
        let rs = self
            .get_room(&request.room_id)
            .ok_or(EngineError::NotFound(request.room_id))?;
        let guard = rs.read().await;
        build_quote(&guard, request)
    }

    /// Effective row for every date in `window`, stored or not.
    pub async fn calendar(
        &self,
        room_id: Ulid,
        window: DateRange,
    ) -> Result<Vec<PricingDay>, EngineError> {
        validate_window(&window, MAX_CALENDAR_WINDOW_DAYS)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(window
            .dates()
            .map(|date| effective_row(&guard.room, guard.day(date), date))
            .collect())
    }

    /// All rooms, ordered by id.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(shared.len());
        for rs in shared {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub async fn get_surcharge_rules(&self, room_id: Ulid) -> Result<Vec<SurchargeRule>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.surcharges.clone())
    }
}
