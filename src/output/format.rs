use chrono::{DateTime, Utc};

/// Renders a duration the way the dashboard shows it: `N/A` for no data,
/// `"{m}m {s}s"` from one minute up, `"{s}s"` with one decimal below that.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "N/A".to_string();
    }

    if seconds >= 60.0 {
        let minutes = (seconds / 60.0).floor() as u64;
        let rest = seconds - (minutes as f64) * 60.0;
        format!("{minutes}m {rest:.0}s")
    } else {
        format!("{seconds:.1}s")
    }
}

pub fn format_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp.map_or_else(String::new, |ts| ts.format("%Y-%m-%d %H:%M UTC").to_string())
}
