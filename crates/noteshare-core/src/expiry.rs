//! Live notes expire a fixed time after creation.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Lifetime of a live note.
pub const NOTE_LIFETIME: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Time left before a note created at `created_at` expires; zero once expired.
pub fn time_remaining(created_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let age = (now - created_at).to_std().unwrap_or(Duration::ZERO);
    NOTE_LIFETIME.saturating_sub(age)
}

pub fn is_expired(created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    time_remaining(created_at, now).is_zero()
}

/// Render a remaining duration for display, e.g. `"2d 3h remaining"`.
pub fn format_remaining(remaining: Duration) -> String {
    let total_minutes = remaining.as_secs() / 60;
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;

    if days > 0 {
        format!("{}d {}h remaining", days, hours)
    } else if hours > 0 {
        format!("{}h {}m remaining", hours, minutes)
    } else {
        format!("{}m remaining", minutes)
    }
}
