//! ID and timestamp utilities for caprun
//!
//! Run identifiers, ledger timestamps and artifact labels.

use chrono::{DateTime, FixedOffset, Offset, SubsecRound, Utc};
use uuid::Uuid;

/// Ledger timestamp type: wall clock at a fixed offset, whole seconds.
pub type Timestamp = DateTime<FixedOffset>;

/// Generate a unique run ID
///
/// Format: UUID v4, e.g. `7f4c8b7e-2f0a-4f7e-9a55-1c2d3e4f5a6b`
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Build the configured offset, falling back to UTC for out-of-range values.
pub fn offset_from_minutes(minutes: i32) -> FixedOffset {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| {
            log::warn!("UTC offset of {} minutes is out of range, using UTC", minutes);
            Utc.fix()
        })
}

/// Convert an instant into a ledger timestamp at the given offset.
pub fn timestamp_at(instant: DateTime<Utc>, offset: FixedOffset) -> Timestamp {
    instant.with_timezone(&offset).trunc_subsecs(0)
}

/// Current ledger timestamp at the given offset.
pub fn timestamp_now(offset: FixedOffset) -> Timestamp {
    timestamp_at(Utc::now(), offset)
}

/// Render a timestamp as `YYYY-MM-DDTHH:MM:SS+HH:MM`
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Filesystem-safe label for a timestamp (`:` and `+` become `-`)
pub fn timestamp_label(ts: &Timestamp) -> String {
    format_timestamp(ts).replace([':', '+'], "-")
}
