use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use super::format::format_duration;
use crate::snapshot::{BuildStatus, PipelineHealth, PipelineStatus};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn success_cell(rate: f64) -> Cell {
    let text = format!("{rate:.1}%");
    if rate > 80.0 {
        Cell::new(text).fg(TableColor::Green)
    } else if rate >= 50.0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}

pub fn failure_cell(rate: f64) -> Cell {
    let text = format!("{rate:.1}%");
    if rate >= 20.0 {
        Cell::new(text).fg(TableColor::Red)
    } else if rate > 0.0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Green)
    }
}

/// Durations over ten minutes are flagged yellow, over fifteen red.
pub fn duration_cell(seconds: f64) -> Cell {
    let text = format_duration(seconds);
    let minutes = seconds / 60.0;
    if seconds <= 0.0 {
        Cell::new(text).fg(TableColor::DarkGrey)
    } else if minutes <= 10.0 {
        Cell::new(text).fg(TableColor::Green)
    } else if minutes <= 15.0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}

pub fn pipeline_status_cell(status: PipelineStatus) -> Cell {
    let color = match status {
        PipelineStatus::Success => TableColor::Green,
        PipelineStatus::Failure => TableColor::Red,
        PipelineStatus::InProgress => TableColor::Yellow,
        PipelineStatus::Disabled | PipelineStatus::Unknown => TableColor::DarkGrey,
    };
    Cell::new(status.label()).fg(color)
}

pub fn build_status_cell(status: BuildStatus) -> Cell {
    let color = match status {
        BuildStatus::Success => TableColor::Green,
        BuildStatus::Failure => TableColor::Red,
        BuildStatus::Unstable | BuildStatus::Building => TableColor::Yellow,
        BuildStatus::Aborted | BuildStatus::NotBuilt | BuildStatus::Other => TableColor::DarkGrey,
    };
    Cell::new(status.label()).fg(color)
}

pub fn health_cell(health: PipelineHealth) -> Cell {
    match health {
        PipelineHealth::Healthy => Cell::new(health.label()).fg(TableColor::Green),
        PipelineHealth::Unhealthy => Cell::new(health.label()).fg(TableColor::Red),
    }
}
