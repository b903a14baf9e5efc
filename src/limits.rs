//! Hard limits enforced before any lock or WAL access.

/// Room types registered per property.
pub const MAX_ROOMS_PER_PROPERTY: usize = 10_000;

/// Surcharge rules attached to a single room.
pub const MAX_SURCHARGE_RULES_PER_ROOM: usize = 64;

/// Longest stay accepted by quotes, availability checks and stock mutations.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Widest inclusive range a bulk rule application may cover.
pub const MAX_BULK_RANGE_DAYS: i64 = 732;

/// Widest window returned by a calendar read.
pub const MAX_CALENDAR_WINDOW_DAYS: i64 = 732;

/// Rows committed per bulk-upsert batch (one WAL record each).
pub const BULK_CHUNK_SIZE: usize = 100;

/// Rooms taken by a single reservation.
pub const MAX_ROOMS_PER_RESERVATION: u32 = 100;

/// Stock at or below this (and above zero) marks a day `limited`.
pub const LIMITED_STOCK_THRESHOLD: u32 = 2;

pub const DEFAULT_CHILD_MIN_AGE: u32 = 0;
pub const DEFAULT_CHILD_MAX_AGE: u32 = 17;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 128;
pub const MAX_NOTE_LEN: usize = 1024;

pub const MAX_PROPERTIES: usize = 1024;
pub const MAX_PROPERTY_NAME_LEN: usize = 200;
