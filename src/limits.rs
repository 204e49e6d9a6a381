use crate::model::Ms;

pub const MAX_VENUES: usize = 10_000;
pub const MAX_EVENTS_PER_VENUE: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LOCATION_LEN: usize = 512;
pub const MAX_TITLE_LEN: usize = 512;
pub const MAX_ORGANIZER_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 8_192;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// A single event may not run longer than 31 days.
pub const MAX_EVENT_DURATION_MS: Ms = 31 * 24 * 3_600_000;

/// Widest inclusive date range accepted by event listing.
pub const MAX_DATE_RANGE_DAYS: i64 = 366;

/// Longest SQL text accepted from a client.
pub const MAX_SQL_LEN: usize = 64 * 1024;
