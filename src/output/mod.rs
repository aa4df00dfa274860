//! Terminal rendering. Everything here reads snapshots and never feeds back
//! into the engine.

mod filters;
mod format;
mod progress;
mod styling;
mod summary;
mod tables;

use serde::Serialize;

pub use filters::{PipelineFilter, QuickFilter};
pub use progress::Spinner;
pub use styling::{bright_green, bright_red, dim, magenta_bold};
pub use summary::{render_advice, render_alerts, render_dashboard};

/// Prints the `PipePulse` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("📈 PipePulse"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CI Pipeline Health Dashboard")
    );
}

pub fn to_json<T: Serialize>(value: &T, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}
