use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Amount in the property's minor currency unit. The only money type.
pub type Money = i64;

/// Half-open date range `[from, to)`. A stay touches `from ..= to - 1 day`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// Build the half-open range covering `from ..= to_inclusive`.
    pub fn inclusive(from: NaiveDate, to_inclusive: NaiveDate) -> Option<Self> {
        to_inclusive.succ_opt().map(|to| Self { from, to })
    }

    pub fn nights(&self) -> i64 {
        (self.to - self.from).num_days()
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date < self.to
    }

    /// Every date in the range, ascending.
    pub fn dates(self) -> impl Iterator<Item = NaiveDate> {
        let to = self.to;
        self.from.iter_days().take_while(move |d| *d < to)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// Day-of-week as stored on a calendar row: 0 = Sunday … 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

// ── Rooms ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Active,
    Inactive,
}

/// A bookable room type. Owned by the room-management side; the engine reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: Option<String>,
    pub base_price: Money,
    pub base_occupancy: u32,
    /// Per physical room; 0 means uncapped.
    pub max_adults: u32,
    /// Per physical room; 0 means uncapped.
    pub max_children: u32,
    /// Physical units of this type.
    pub total_rooms: u32,
    pub status: RoomStatus,
}

// ── Calendar rows ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayStatus {
    Available,
    Limited,
    SoldOut,
    StopSell,
}

impl DayStatus {
    /// `sold_out` and `stop_sell` close the date regardless of stock.
    pub fn blocks_sale(self) -> bool {
        matches!(self, DayStatus::SoldOut | DayStatus::StopSell)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayStatus::Available => "available",
            DayStatus::Limited => "limited",
            DayStatus::SoldOut => "sold_out",
            DayStatus::StopSell => "stop_sell",
        }
    }
}

impl FromStr for DayStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Ok(DayStatus::Available),
            "limited" => Ok(DayStatus::Limited),
            "sold_out" => Ok(DayStatus::SoldOut),
            "stop_sell" => Ok(DayStatus::StopSell),
            other => Err(format!("unknown day status: {other}")),
        }
    }
}

/// One `(room, date)` price/stock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingDay {
    pub date: NaiveDate,
    pub day_of_week: u8,
    pub price_room: Option<Money>,
    pub price_combo: Option<Money>,
    pub stock: u32,
    pub booked: u32,
    pub status: DayStatus,
    pub min_stay: u32,
    /// 0 means no upper bound.
    pub max_stay: u32,
    pub notes: Option<String>,
}

/// Nightly price line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceTrack {
    /// Lodging only.
    Room,
    /// Bundled (e.g. with breakfast).
    Combo,
}

impl PriceTrack {
    pub fn as_str(self) -> &'static str {
        match self {
            PriceTrack::Room => "room",
            PriceTrack::Combo => "combo",
        }
    }
}

impl FromStr for PriceTrack {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "room" => Ok(PriceTrack::Room),
            "combo" => Ok(PriceTrack::Combo),
            other => Err(format!("unknown price track: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    CalendarRoom,
    CalendarCombo,
    /// No calendar row for the date.
    RoomDefault,
    /// A row exists but carries no positive price for the track.
    BasePriceFallback,
}

impl PriceSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PriceSource::CalendarRoom => "calendar_room",
            PriceSource::CalendarCombo => "calendar_combo",
            PriceSource::RoomDefault => "room_default",
            PriceSource::BasePriceFallback => "base_price_fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightPrice {
    pub date: NaiveDate,
    pub price: Money,
    pub source: PriceSource,
}

// ── Writes against the calendar ──────────────────────────────────

/// Explicit single-date edit. Every field is written; `booked` is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayEdit {
    pub price_room: Option<Money>,
    pub price_combo: Option<Money>,
    pub stock: u32,
    pub status: DayStatus,
    pub min_stay: u32,
    pub max_stay: u32,
    pub notes: Option<String>,
}

/// Template attached to one weekday. `None` fields are left to the defaults
/// of the expansion (prices untouched, stock = total rooms, status available).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdayRule {
    pub price_room: Option<Money>,
    pub price_combo: Option<Money>,
    pub stock: Option<u32>,
    pub status: Option<DayStatus>,
}

impl WeekdayRule {
    pub fn is_empty(&self) -> bool {
        self.price_room.is_none()
            && self.price_combo.is_none()
            && self.stock.is_none()
            && self.status.is_none()
    }
}

/// Rules keyed by ISO weekday (1 = Monday … 7 = Sunday).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeeklyRules {
    rules: [Option<WeekdayRule>; 7],
}

impl WeeklyRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a rule to an ISO weekday. Returns false for weekdays outside 1..=7.
    pub fn set(&mut self, iso_weekday: u8, rule: WeekdayRule) -> bool {
        match iso_weekday {
            1..=7 => {
                self.rules[usize::from(iso_weekday - 1)] = Some(rule);
                true
            }
            _ => false,
        }
    }

    pub fn with(mut self, iso_weekday: u8, rule: WeekdayRule) -> Self {
        self.set(iso_weekday, rule);
        self
    }

    pub fn get(&self, iso_weekday: u8) -> Option<&WeekdayRule> {
        match iso_weekday {
            1..=7 => self.rules[usize::from(iso_weekday - 1)].as_ref(),
            _ => None,
        }
    }

    pub fn for_date(&self, date: NaiveDate) -> Option<&WeekdayRule> {
        self.rules[date.weekday().num_days_from_monday() as usize].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &WeekdayRule)> {
        self.rules
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (i as u8 + 1, r)))
    }
}

/// Concrete upsert produced by expanding a weekday rule onto a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPatch {
    pub date: NaiveDate,
    pub price_room: Option<Money>,
    pub price_combo: Option<Money>,
    pub stock: u32,
    pub status: DayStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldPolicy {
    /// Existing value replaced only when the incoming value is > 0.
    OverwriteIfPositive,
    OverwriteAlways,
}

impl FieldPolicy {
    pub fn accepts(self, incoming: i64) -> bool {
        match self {
            FieldPolicy::OverwriteIfPositive => incoming > 0,
            FieldPolicy::OverwriteAlways => true,
        }
    }
}

/// How a patch is merged into an existing row, per field. Status is always
/// replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
    pub price_room: FieldPolicy,
    pub price_combo: FieldPolicy,
    pub stock: FieldPolicy,
}

impl MergePolicy {
    /// Bulk weekday rules: a price of 0 never clears an existing price;
    /// stock is always replaced.
    pub const BULK: MergePolicy = MergePolicy {
        price_room: FieldPolicy::OverwriteIfPositive,
        price_combo: FieldPolicy::OverwriteIfPositive,
        stock: FieldPolicy::OverwriteAlways,
    };

    pub const OVERWRITE: MergePolicy = MergePolicy {
        price_room: FieldPolicy::OverwriteAlways,
        price_combo: FieldPolicy::OverwriteAlways,
        stock: FieldPolicy::OverwriteAlways,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub dates_processed: usize,
    pub batches: usize,
}

// ── Surcharges ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurchargeKind {
    ExtraBed,
    Adult,
    Child,
    Breakfast,
    Other,
}

impl SurchargeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SurchargeKind::ExtraBed => "extra_bed",
            SurchargeKind::Adult => "adult",
            SurchargeKind::Child => "child",
            SurchargeKind::Breakfast => "breakfast",
            SurchargeKind::Other => "other",
        }
    }

    pub fn default_label(self) -> &'static str {
        match self {
            SurchargeKind::ExtraBed => "Extra bed",
            SurchargeKind::Adult => "Extra adult",
            SurchargeKind::Child => "Child",
            SurchargeKind::Breakfast => "Breakfast",
            SurchargeKind::Other => "Other surcharge",
        }
    }
}

impl FromStr for SurchargeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "extra_bed" => Ok(SurchargeKind::ExtraBed),
            "adult" => Ok(SurchargeKind::Adult),
            "child" => Ok(SurchargeKind::Child),
            "breakfast" => Ok(SurchargeKind::Breakfast),
            "other" => Ok(SurchargeKind::Other),
            other => Err(format!("unknown surcharge kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmountType {
    Fixed,
    /// Stored but never priced; see `SurchargeBreakdown::deferred`.
    Percent,
}

impl FromStr for AmountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(AmountType::Fixed),
            "percent" => Ok(AmountType::Percent),
            other => Err(format!("unknown amount type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurchargeRule {
    pub id: Ulid,
    pub kind: SurchargeKind,
    /// Child rules only.
    pub min_age: Option<u32>,
    /// Child rules only.
    pub max_age: Option<u32>,
    pub amount: Money,
    pub amount_type: AmountType,
    pub is_per_night: bool,
    pub is_mandatory: bool,
    pub applies_to_room: bool,
    pub applies_to_combo: bool,
    pub active: bool,
    pub label: Option<String>,
}

impl SurchargeRule {
    pub fn applies_to(&self, track: PriceTrack) -> bool {
        match track {
            PriceTrack::Room => self.applies_to_room,
            PriceTrack::Combo => self.applies_to_combo,
        }
    }
}

/// Who is staying. Ages are in whole years.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyRequest {
    pub adults: u32,
    pub children_ages: Vec<u32>,
    /// Quantity charged by `other` surcharge rules.
    pub other_quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurchargeLine {
    pub rule_id: Ulid,
    pub kind: SurchargeKind,
    pub label: String,
    pub quantity: u32,
    pub unit_amount: Money,
    pub per_night: bool,
    pub amount: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurchargeBreakdown {
    pub total: Money,
    pub lines: Vec<SurchargeLine>,
    /// Percent-typed rules that matched but have no agreed base to price against.
    pub deferred: Vec<Ulid>,
}

// ── Availability ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityMode {
    StopAtFirst,
    CollectAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    SoldOut,
    StopSell,
    InsufficientStock,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::SoldOut => "sold_out",
            FailureReason::StopSell => "stop_sell",
            FailureReason::InsufficientStock => "insufficient_stock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityFailure {
    pub date: NaiveDate,
    pub reason: FailureReason,
    /// Stock the date actually offers (row stock, or total rooms without a row).
    pub available: u32,
    pub requested: u32,
}

impl AvailabilityFailure {
    pub fn message(&self) -> String {
        match self.reason {
            FailureReason::SoldOut => format!("{} is sold out", self.date),
            FailureReason::StopSell => format!("{} is closed for sale", self.date),
            FailureReason::InsufficientStock => format!(
                "{} has only {} room(s) left, {} requested",
                self.date, self.available, self.requested
            ),
        }
    }
}

impl fmt::Display for AvailabilityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason.as_str(), self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub available: bool,
    /// Ascending by date. At most one entry in `StopAtFirst` mode.
    pub failures: Vec<AvailabilityFailure>,
}

impl AvailabilityReport {
    pub fn first_failure(&self) -> Option<&AvailabilityFailure> {
        self.failures.first()
    }

    pub fn message(&self) -> String {
        match self.first_failure() {
            None => "available".to_string(),
            Some(f) => f.message(),
        }
    }
}

// ── Quotes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub room_id: Ulid,
    pub stay: DateRange,
    pub num_rooms: u32,
    pub occupancy: OccupancyRequest,
    pub track: PriceTrack,
}

/// Fully resolved price for one stay. Recomputed server-side, never trusted
/// from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub room_id: Ulid,
    pub stay: DateRange,
    pub track: PriceTrack,
    pub num_rooms: u32,
    pub nights: Vec<NightPrice>,
    pub room_subtotal: Money,
    pub surcharges: SurchargeBreakdown,
    pub total: Money,
}

// ── Per-room state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Stored calendar rows, keyed and ordered by date.
    pub days: BTreeMap<NaiveDate, PricingDay>,
    pub surcharges: Vec<SurchargeRule>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            days: BTreeMap::new(),
            surcharges: Vec::new(),
        }
    }

    pub fn day(&self, date: NaiveDate) -> Option<&PricingDay> {
        self.days.get(&date)
    }

    /// Stored rows inside `range`, ascending.
    pub fn stored_in(&self, range: &DateRange) -> impl Iterator<Item = &PricingDay> {
        self.days.range(range.from..range.to).map(|(_, d)| d)
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomUpserted {
        room: Room,
    },
    RoomDeleted {
        id: Ulid,
    },
    SurchargesReplaced {
        room_id: Ulid,
        rules: Vec<SurchargeRule>,
    },
    DaySet {
        room_id: Ulid,
        day: PricingDay,
    },
    DaysMerged {
        room_id: Ulid,
        patches: Vec<DayPatch>,
        policy: MergePolicy,
    },
    StockTaken {
        room_id: Ulid,
        stay: DateRange,
        quantity: u32,
    },
    StockReleased {
        room_id: Ulid,
        stay: DateRange,
        quantity: u32,
    },
}

impl Event {
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomUpserted { room } => room.id,
            Event::RoomDeleted { id } => *id,
            Event::SurchargesReplaced { room_id, .. }
            | Event::DaySet { room_id, .. }
            | Event::DaysMerged { room_id, .. }
            | Event::StockTaken { room_id, .. }
            | Event::StockReleased { room_id, .. } => *room_id,
        }
    }
}
