use std::fmt::Write;

use super::filters::{triggering_user, PipelineFilter};
use super::format::{format_duration, format_timestamp};
use super::styling::{self, bright, bright_red, bright_yellow, cyan, dim};
use super::tables::{
    build_status_cell, create_table, duration_cell, failure_cell, header, health_cell,
    pipeline_status_cell, success_cell,
};
use crate::snapshot::{
    Advice, ConnectionStatus, DashboardSnapshot, FailedBuildAlert, NodeHealth, Pipeline,
};
use comfy_table::Cell;

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

/// Renders the full dashboard for one snapshot.
///
/// Sections: error banner, connection line, overview, build status
/// breakdown, pipelines (narrowed by `filter`), duration trend, node health
/// and failed-build alerts.
pub fn render_dashboard(snapshot: &DashboardSnapshot, filter: &PipelineFilter) -> String {
    let mut output = String::new();

    if let Some(banner) = &snapshot.banner {
        let _ = writeln!(output, "{}\n", bright_red(format!("⚠  {}", banner.message)));
    }

    render_status_line(&mut output, snapshot);
    render_overview(&mut output, snapshot);

    if snapshot.cycle == 0 {
        let _ = writeln!(output, "{}", bright_yellow("Waiting for first refresh..."));
        return output;
    }

    render_status_breakdown(&mut output, snapshot);
    render_pipelines(&mut output, snapshot, filter);
    render_duration_trend(&mut output, snapshot);

    if let Some(node) = &snapshot.node_health {
        render_node_health(&mut output, snapshot, node);
    }

    output.push_str(&render_alerts(&snapshot.alerts));
    output
}

fn render_status_line(output: &mut String, snapshot: &DashboardSnapshot) {
    let refreshed = snapshot
        .refreshed_at
        .map_or_else(|| "never".to_string(), |ts| format_timestamp(Some(ts)));

    let _ = write!(
        output,
        "  {} {}   {} {}   {} {}",
        dim("Push:"),
        styling::connection(snapshot.connection),
        dim("Last refresh:"),
        dim(refreshed),
        dim("Cycle:"),
        dim(snapshot.cycle)
    );
    if snapshot.refreshing {
        let _ = write!(output, "   {}", bright_yellow("refreshing..."));
    }
    output.push_str("\n\n");
}

fn render_overview(output: &mut String, snapshot: &DashboardSnapshot) {
    let aggregate = &snapshot.metrics.aggregate;
    add_section_header(output, "📊", "Overview");

    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n",
        dim("Pipelines:"),
        bright_yellow(aggregate.total_pipelines),
        dim("Builds:"),
        bright_yellow(aggregate.total_builds),
        dim("Successful:"),
        styling::bright_green(aggregate.success_count),
        dim("Failed:"),
        bright_red(aggregate.failure_count),
        dim("Success rate:"),
        styling::success_rate(aggregate.success_rate_percent),
        dim("Avg build time:"),
        cyan(format_duration(aggregate.avg_duration_seconds)),
    );
}

fn render_status_breakdown(output: &mut String, snapshot: &DashboardSnapshot) {
    let metrics = &snapshot.metrics;
    add_section_header(output, "🧮", "Build Status");

    let mut table = create_table();
    table.set_header(header(&["Status", "Builds", "Pipelines"]));
    for (status, builds) in &metrics.build_status_counts {
        let pipelines = metrics
            .pipeline_status_presence
            .get(status)
            .copied()
            .unwrap_or(0);
        if *builds == 0 && pipelines == 0 {
            continue;
        }
        table.add_row(vec![
            build_status_cell(*status),
            Cell::new(builds),
            Cell::new(pipelines),
        ]);
    }

    let counts = &metrics.pipeline_status_counts;
    let _ = writeln!(
        output,
        "{table}\n  {} {}  {} {}  {} {}  {} {}\n",
        dim("Pipelines succeeding:"),
        counts.success,
        dim("failing:"),
        counts.failure,
        dim("in progress:"),
        counts.in_progress,
        dim("other:"),
        counts.unknown
    );
}

fn render_pipelines(output: &mut String, snapshot: &DashboardSnapshot, filter: &PipelineFilter) {
    add_section_header(output, "📋", "Pipelines");

    let visible = filter.apply(&snapshot.pipelines);
    if visible.is_empty() {
        let _ = writeln!(output, "{}\n", bright_yellow("No pipelines match."));
        return;
    }

    let mut table = create_table();
    table.set_header(header(&[
        "Pipeline",
        "Status",
        "Health",
        "Last Build",
        "Duration",
        "Triggered By",
        "Success",
        "Failure",
    ]));

    for pipeline in visible {
        table.add_row(pipeline_row(snapshot, pipeline));
    }

    let _ = writeln!(output, "{table}\n");
}

fn pipeline_row(snapshot: &DashboardSnapshot, pipeline: &Pipeline) -> Vec<Cell> {
    let report = snapshot
        .metrics
        .health
        .iter()
        .find(|r| r.name == pipeline.name);

    let last_build = pipeline.head().map_or_else(
        || "N/A".to_string(),
        |b| {
            let when = format_timestamp(b.timestamp);
            if when.is_empty() {
                format!("#{}", b.build_number)
            } else {
                format!("#{}\n{when}", b.build_number)
            }
        },
    );

    let mut row = vec![
        Cell::new(&pipeline.name),
        pipeline_status_cell(pipeline.status()),
    ];
    match report {
        Some(report) => row.push(health_cell(report.health)),
        None => row.push(Cell::new("-")),
    }
    row.push(Cell::new(last_build));
    row.push(duration_cell(pipeline.head().map_or(0.0, |b| b.duration_seconds)));
    row.push(Cell::new(triggering_user(pipeline)));
    row.push(success_cell(report.map_or(0.0, |r| r.success_rate)));
    row.push(failure_cell(report.map_or(0.0, |r| r.failure_rate)));
    row
}

fn render_duration_trend(output: &mut String, snapshot: &DashboardSnapshot) {
    let minutes: Vec<f64> = snapshot
        .metrics
        .duration_trend
        .iter()
        .map(|p| p.minutes)
        .collect();
    if minutes.is_empty() {
        return;
    }

    add_section_header(output, "⏱️", "Build Duration Trend");
    let max = minutes.iter().copied().fold(0.0_f64, f64::max);
    let _ = writeln!(
        output,
        "  {}  {}\n",
        cyan(sparkline(&minutes)),
        dim(format!("{} builds, max {:.1}min", minutes.len(), max))
    );
}

/// One block character per value, scaled to the series maximum.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sparkline(values: &[f64]) -> String {
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return SPARK_LEVELS[0].to_string().repeat(values.len());
    }

    let top = (SPARK_LEVELS.len() - 1) as f64;
    values
        .iter()
        .map(|v| SPARK_LEVELS[((v / max) * top).round().clamp(0.0, top) as usize])
        .collect()
}

fn render_node_health(output: &mut String, snapshot: &DashboardSnapshot, node: &NodeHealth) {
    add_section_header(output, "🖥️", "Automation Server");

    let status = match node.connection_status {
        ConnectionStatus::Up => styling::bright_green("UP"),
        ConnectionStatus::Down => bright_red("DOWN"),
    };
    let url = if node.upstream_url.is_empty() {
        "N/A".to_string()
    } else {
        node.upstream_url.clone()
    };
    let _ = writeln!(
        output,
        "  {} {}   {} {}   {} {}   {} {}",
        dim("Status:"),
        status,
        dim("URL:"),
        cyan(url),
        dim("Port:"),
        node.port,
        dim("Jobs:"),
        bright_yellow(node.job_count)
    );

    if node.job_names.is_empty() {
        output.push('\n');
        return;
    }

    let mut table = create_table();
    table.set_header(header(&["Job", "Builds"]));
    for job in &node.job_names {
        table.add_row(vec![Cell::new(job), Cell::new(snapshot.build_count(job))]);
    }
    let _ = writeln!(output, "{table}\n");
}

/// Renders the active failed-build alerts with their badge count.
pub fn render_alerts(alerts: &[FailedBuildAlert]) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🔔", &format!("Failed Builds ({})", alerts.len()));

    if alerts.is_empty() {
        let _ = writeln!(output, "  {}\n", dim("No unacknowledged failures."));
        return output;
    }

    let mut table = create_table();
    table.set_header(header(&["Pipeline", "Build", "Status", "When"]));
    for alert in alerts {
        table.add_row(vec![
            Cell::new(&alert.pipeline_name),
            Cell::new(format!("#{}", alert.build_number)),
            Cell::new(&alert.status).fg(comfy_table::Color::Red),
            Cell::new(format_timestamp(alert.timestamp)),
        ]);
    }
    let _ = writeln!(output, "{table}\n");
    output
}

pub fn render_advice(advice: &Advice) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "💡", "Advice");
    if advice.advice.is_empty() {
        let _ = writeln!(output, "  {}", dim("No advice available."));
    }
    for line in &advice.advice {
        let _ = writeln!(output, "  • {line}");
    }
    output.push('\n');

    if !advice.recent_failures.is_empty() {
        add_section_header(&mut output, "🔥", "Recent Failures");
        for failure in &advice.recent_failures {
            let number = failure
                .build_number
                .map_or_else(String::new, |n| format!(" #{n}"));
            let _ = writeln!(
                output,
                "  {}{} {}",
                bright(&failure.pipeline_name),
                number,
                bright_red(&failure.status)
            );
        }
        output.push('\n');
    }

    if !advice.resources.is_empty() {
        add_section_header(&mut output, "📚", "Resources");
        for resource in &advice.resources {
            let title = if resource.title.is_empty() {
                &resource.url
            } else {
                &resource.title
            };
            let _ = writeln!(output, "  {} {}", title, dim(&resource.url));
        }
        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::metrics;
    use crate::snapshot::{
        AdviceFailure, AdviceResource, Build, BuildStatus, ErrorBanner,
    };
    use chrono::Utc;

    fn create_build(number: u64, status: BuildStatus, duration: f64, user: Option<&str>) -> Build {
        Build {
            build_number: number,
            status,
            status_known: true,
            duration_seconds: duration,
            timestamp: None,
            url: String::new(),
            triggering_user: user.map(ToString::to_string),
        }
    }

    fn create_snapshot() -> DashboardSnapshot {
        let pipelines = vec![
            Pipeline {
                name: "backend-api".to_string(),
                url: "http://ci/job/backend-api/".to_string(),
                status_color: "blue".to_string(),
                builds: vec![
                    create_build(12, BuildStatus::Success, 125.0, Some("alice")),
                    create_build(11, BuildStatus::Failure, 40.0, None),
                ],
            },
            Pipeline {
                name: "frontend".to_string(),
                url: String::new(),
                status_color: "red".to_string(),
                builds: vec![create_build(3, BuildStatus::Failure, 0.0, None)],
            },
        ];

        DashboardSnapshot {
            cycle: 1,
            refreshed_at: Some(Utc::now()),
            metrics: metrics::compute(&pipelines, None),
            pipelines,
            node_health: Some(NodeHealth {
                connection_status: ConnectionStatus::Up,
                job_count: 2,
                port: 8080,
                upstream_url: "http://jenkins:8080".to_string(),
                job_names: vec!["backend-api".to_string(), "frontend".to_string()],
            }),
            ..DashboardSnapshot::default()
        }
    }

    #[test]
    fn test_render_waiting_before_first_cycle() {
        let output = render_dashboard(&DashboardSnapshot::default(), &PipelineFilter::default());
        assert!(output.contains("Overview"));
        assert!(output.contains("Waiting for first refresh"));
        assert!(output.contains("Connecting"));
        assert!(!output.contains("Triggered By"));
    }

    #[test]
    fn test_render_dashboard_sections() {
        let output = render_dashboard(&create_snapshot(), &PipelineFilter::default());

        assert!(output.contains("Build Status"));
        assert!(output.contains("backend-api"));
        assert!(output.contains("#12"));
        assert!(output.contains("2m 5s"));
        assert!(output.contains("alice"));
        // frontend has no known trigger
        assert!(output.contains("admin"));
        assert!(output.contains("Unhealthy"));
        assert!(output.contains("Build Duration Trend"));
        assert!(output.contains("Automation Server"));
        assert!(output.contains("http://jenkins:8080"));
        assert!(output.contains("Failed Builds (0)"));
    }

    #[test]
    fn test_render_banner_first() {
        let snapshot = DashboardSnapshot {
            banner: Some(ErrorBanner {
                id: 1,
                message: "Failed to refresh dashboard: HTTP 500".to_string(),
                raised_at: Utc::now(),
            }),
            ..create_snapshot()
        };
        let output = render_dashboard(&snapshot, &PipelineFilter::default());
        assert!(output.contains("Failed to refresh dashboard: HTTP 500"));
        let banner_at = output.find("Failed to refresh").unwrap();
        assert!(banner_at < output.find("Overview").unwrap());
    }

    #[test]
    fn test_render_filtered_out_pipelines() {
        let filter = PipelineFilter {
            name: Some("nothing-like-this".to_string()),
            ..Default::default()
        };
        let output = render_dashboard(&create_snapshot(), &filter);
        assert!(output.contains("No pipelines match."));
    }

    #[test]
    fn test_render_alerts() {
        let alerts = vec![FailedBuildAlert {
            pipeline_name: "frontend".to_string(),
            build_number: 3,
            status: "FAILURE".to_string(),
            timestamp: None,
            acknowledged: false,
        }];
        let output = render_alerts(&alerts);
        assert!(output.contains("Failed Builds (1)"));
        assert!(output.contains("#3"));
        assert!(output.contains("FAILURE"));
    }

    #[test]
    fn test_render_advice() {
        let advice = Advice {
            advice: vec!["Cache dependencies between builds".to_string()],
            recent_failures: vec![AdviceFailure {
                pipeline_name: "frontend".to_string(),
                build_number: Some(3),
                status: "FAILURE".to_string(),
            }],
            resources: vec![AdviceResource {
                url: "https://ci.example/runbook".to_string(),
                title: String::new(),
            }],
        };
        let output = render_advice(&advice);
        assert!(output.contains("• Cache dependencies between builds"));
        assert!(output.contains("Recent Failures"));
        assert!(output.contains(" #3"));
        assert!(output.contains("https://ci.example/runbook"));
    }

    #[test]
    fn test_sparkline_scales_to_maximum() {
        assert_eq!(sparkline(&[0.0, 1.0, 2.0]), "▁▅█");
        assert_eq!(sparkline(&[0.0, 0.0]), "▁▁");
        assert_eq!(sparkline(&[]), "");
    }
}
