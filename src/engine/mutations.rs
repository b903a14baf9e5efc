use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::calendar::{check_days, effective_row, expand_weekly_rules};
use super::validate::*;
use super::{Engine, EngineError, SharedRoomState, WalCommand};

impl Engine {
    /// Register a room type, or replace the metadata of an existing one.
    /// Calendar rows and surcharge rules survive an update.
    pub async fn upsert_room(&self, room: Room) -> Result<(), EngineError> {
        validate_room(&room)?;

        if let Some(rs) = self.get_room(&room.id) {
            let mut guard = rs.write().await;
            let event = Event::RoomUpserted { room };
            return self.persist_and_apply(&mut guard, &event).await;
        }

        let _catalog = self.catalog.read().await;
        if self.state.len() >= MAX_ROOMS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let id = room.id;
        let fresh: SharedRoomState = Arc::new(RwLock::new(RoomState::new(room.clone())));
        // Locked before it is visible, so other writers queue behind the
        // creation record.
        let creating = fresh.clone().write_owned().await;
        let existing = match self.state.entry(id) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(fresh.clone());
                None
            }
        };

        let event = Event::RoomUpserted { room };
        if let Some(rs) = existing {
            // Another request created it first.
            drop(creating);
            let mut guard = rs.write().await;
            return self.persist_and_apply(&mut guard, &event).await;
        }

        if let Err(e) = self.wal_append(&event).await {
            self.state.remove_if(&id, |_, rs| Arc::ptr_eq(rs, &fresh));
            return Err(e);
        }
        drop(creating);
        self.notify.send(id, &event);
        Ok(())
    }

    /// Remove a room together with its calendar rows and surcharge rules.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.read().await;
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        // Wait out in-flight writers so nothing lands after the delete record.
        let _guard = rs.write().await;

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    /// Replace the room's whole surcharge rule set. An empty set clears it.
    pub async fn replace_surcharge_rules(
        &self,
        room_id: Ulid,
        rules: Vec<SurchargeRule>,
    ) -> Result<(), EngineError> {
        if rules.len() > MAX_SURCHARGE_RULES_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many surcharge rules"));
        }
        for rule in &rules {
            validate_rule(rule)?;
        }
        let mut guard = self.write_room(room_id).await?;
        let event = Event::SurchargesReplaced { room_id, rules };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Single-date edit. Every field of `edit` is written as given; the
    /// booked count is kept.
    pub async fn set_day(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        edit: DayEdit,
    ) -> Result<(), EngineError> {
        validate_edit(&edit)?;
        let mut guard = self.write_room(room_id).await?;

        let mut day = effective_row(&guard.room, guard.day(date), date);
        day.price_room = edit.price_room;
        day.price_combo = edit.price_combo;
        day.stock = edit.stock;
        day.status = edit.status;
        day.min_stay = edit.min_stay;
        day.max_stay = edit.max_stay;
        day.notes = edit.notes;

        let event = Event::DaySet { room_id, day };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Project `rules` onto every date in `from ..= to_inclusive` and merge
    /// the resulting rows under the bulk policy: prices only when positive,
    /// stock and status always.
    ///
    /// Rows are committed in chunks of `BULK_CHUNK_SIZE`, one WAL record per
    /// chunk. A failure part-way leaves earlier chunks applied; re-running the
    /// same request converges to the same rows.
    pub async fn apply_daily_rules(
        &self,
        room_id: Ulid,
        from: NaiveDate,
        to_inclusive: NaiveDate,
        rules: WeeklyRules,
    ) -> Result<BulkOutcome, EngineError> {
        let range = DateRange::inclusive(from, to_inclusive)
            .ok_or(EngineError::Invalid("date range out of bounds"))?;
        validate_window(&range, MAX_BULK_RANGE_DAYS)?;
        validate_weekly_rules(&rules)?;

        let mut guard = self.write_room(room_id).await?;
        let patches = expand_weekly_rules(&guard.room, &range, &rules);

        let mut outcome = BulkOutcome {
            dates_processed: 0,
            batches: 0,
        };
        if patches.is_empty() {
            tracing::debug!("bulk rules on room {room_id} {range}: no matching dates");
            return Ok(outcome);
        }

        for chunk in patches.chunks(BULK_CHUNK_SIZE) {
            let event = Event::DaysMerged {
                room_id,
                patches: chunk.to_vec(),
                policy: MergePolicy::BULK,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            outcome.dates_processed += chunk.len();
            outcome.batches += 1;
            metrics::counter!(crate::observability::BULK_ROWS_UPSERTED).increment(chunk.len() as u64);
        }

        tracing::info!(
            "bulk rules on room {room_id} {range}: {} dates in {} batches",
            outcome.dates_processed,
            outcome.batches
        );
        Ok(outcome)
    }

    /// Take `quantity` rooms off every night of the stay without checking
    /// availability first. Stock clamps at zero.
    ///
    /// It fails only for an unknown room or invalid input, never because
    /// stock ran out. Calling it after a separate `check_availability` is
    /// racy: two callers can both pass the check and both decrement.
    ///
    /// The gated decrement, where the take itself is the availability check
    /// and a short night fails with `Unavailable`, is `reserve_stock`.
    /// Booking paths use that one.
    pub async fn decrement_stock(
        &self,
        room_id: Ulid,
        stay: DateRange,
        quantity: u32,
    ) -> Result<(), EngineError> {
        validate_stay(&stay)?;
        validate_quantity(quantity)?;
        let mut guard = self.write_room(room_id).await?;
        let event = Event::StockTaken {
            room_id,
            stay,
            quantity,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Check and take stock for the whole stay under one write lock.
    /// All nights or none.
    pub async fn reserve_stock(
        &self,
        room_id: Ulid,
        stay: DateRange,
        quantity: u32,
    ) -> Result<(), EngineError> {
        validate_stay(&stay)?;
        validate_quantity(quantity)?;
        let mut guard = self.write_room(room_id).await?;
        ensure_bookable(&guard.room)?;

        let report = check_days(&guard, &stay, quantity, AvailabilityMode::StopAtFirst);
        if let Some(failure) = report.failures.into_iter().next() {
            metrics::counter!(crate::observability::RESERVATIONS_REJECTED).increment(1);
            return Err(EngineError::Unavailable(failure));
        }

        let event = Event::StockTaken {
            room_id,
            stay,
            quantity,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Give `quantity` rooms back to every night of the stay (cancellation).
    pub async fn release_stock(
        &self,
        room_id: Ulid,
        stay: DateRange,
        quantity: u32,
    ) -> Result<(), EngineError> {
        validate_stay(&stay)?;
        validate_quantity(quantity)?;
        let mut guard = self.write_room(room_id).await?;
        let event = Event::StockReleased {
            room_id,
            stay,
            quantity,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Recompute the quote and reserve its rooms atomically. The returned
    /// quote is the authoritative pricing snapshot for the booking.
    pub async fn confirm_stay(&self, request: QuoteRequest) -> Result<Quote, EngineError> {
        validate_stay(&request.stay)?;
        validate_quantity(request.num_rooms)?;
        let mut guard = self.write_room(request.room_id).await?;

        let quote = match super::queries::build_quote(&guard, &request) {
            Ok(q) => q,
            Err(e) => {
                if matches!(e, EngineError::Unavailable(_)) {
                    metrics::counter!(crate::observability::RESERVATIONS_REJECTED).increment(1);
                }
                return Err(e);
            }
        };

        let event = Event::StockTaken {
            room_id: request.room_id,
            stay: request.stay,
            quantity: request.num_rooms,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(
            "confirmed {} x room {} for {}: total {}",
            request.num_rooms,
            request.room_id,
            request.stay,
            quote.total
        );
        Ok(quote)
    }

    /// Rewrite the WAL with the minimal events that recreate current state.
    ///
    /// The catalog lock and a read lock on every room are held until the
    /// compacted file is in place, so no write can slip between snapshot
    /// and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.write().await;
        let rooms: Vec<SharedRoomState> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(rooms.len());
        for rs in rooms {
            guards.push(rs.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            let room_id = guard.room.id;
            events.push(Event::RoomUpserted {
                room: guard.room.clone(),
            });
            if !guard.surcharges.is_empty() {
                events.push(Event::SurchargesReplaced {
                    room_id,
                    rules: guard.surcharges.clone(),
                });
            }
            for day in guard.days.values() {
                events.push(Event::DaySet {
                    room_id,
                    day: day.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
