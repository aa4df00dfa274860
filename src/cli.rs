use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use crate::backend::{parse_recipients, BackendClient};
use crate::config::{Config, OutputFormat};
use crate::engine::connection::ConnectionManager;
use crate::engine::scheduler::{Scheduler, Trigger};
use crate::engine::Engine;
use crate::output::{self, PipelineFilter, QuickFilter, Spinner};
use crate::snapshot::ConnectionState;

#[derive(Parser)]
#[command(name = "pipepulse")]
#[command(author, version, about = "Live CI pipeline health dashboard", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./pipepulse.toml or the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dashboard backend base URL
    #[arg(short, long, global = true, env = "PIPEPULSE_URL")]
    url: Option<String>,

    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,

    /// Write one-shot output to a file instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the dashboard live: interval refresh plus push-triggered refresh
    Watch {
        /// Seconds between scheduled refreshes
        #[arg(short, long)]
        interval: Option<u64>,

        /// Rely on interval refresh only
        #[arg(long, default_value_t = false)]
        no_push: bool,

        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Run one manual refresh cycle and print the dashboard
    Once {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// List unacknowledged failed builds
    Alerts,
    /// Acknowledge a failed build
    Ack { pipeline: String, build_number: u64 },
    /// Ask the backend to collect from the automation server now
    Collect,
    /// Show recommendations, optionally for one pipeline
    Advice {
        #[arg(short = 'P', long)]
        pipeline: Option<String>,
    },
    /// Email recommendations to a comma-separated recipient list
    EmailAdvice {
        #[arg(short, long)]
        to: String,

        #[arg(short = 'P', long)]
        pipeline: Option<String>,
    },
    /// Write the effective configuration to a file
    Init {
        /// Target path (defaults to the user config dir)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct FilterArgs {
    /// Pipeline name contains
    #[arg(long)]
    name: Option<String>,

    /// Last build triggered by (contains)
    #[arg(long)]
    user: Option<String>,

    /// Pipeline status label, e.g. FAILURE or "IN PROGRESS"
    #[arg(long)]
    status: Option<String>,

    /// Minimum last-build duration in seconds
    #[arg(long)]
    min_duration: Option<f64>,

    #[arg(short, long, value_enum, default_value_t = QuickFilter::All)]
    show: QuickFilter,
}

impl From<&FilterArgs> for PipelineFilter {
    fn from(args: &FilterArgs) -> Self {
        Self {
            name: args.name.clone(),
            user: args.user.clone(),
            status: args.status.clone(),
            min_duration_secs: args.min_duration,
            quick: args.show,
        }
    }
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(url) = &self.url {
            config.backend.base_url.clone_from(url);
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if self.pretty {
            config.output.pretty = true;
        }

        debug!("Effective configuration: {config:?}");
        Ok(config)
    }

    fn build_engine(config: &Config) -> Result<Arc<Engine>> {
        let client = BackendClient::new(
            &config.backend.base_url,
            config.refresh.max_concurrent_requests,
        )
        .context("Failed to create backend client")?;
        debug!("Backend client rooted at {}", client.base_url());

        Ok(Arc::new(Engine::new(
            Arc::new(client),
            config.engine_settings(),
        )))
    }

    fn emit(&self, text: &str) -> Result<()> {
        if let Some(output_path) = &self.output {
            std::fs::write(output_path, text)
                .with_context(|| format!("Failed to write output: {}", output_path.display()))?;
            info!("Output written to: {}", output_path.display());
        } else {
            println!("{text}");
        }
        Ok(())
    }

    async fn execute_watch(
        &self,
        mut config: Config,
        interval: Option<u64>,
        no_push: bool,
        filter: PipelineFilter,
    ) -> Result<()> {
        if let Some(interval) = interval {
            config.refresh.interval_secs = interval;
        }
        let engine = Self::build_engine(&config)?;

        let connection = if no_push {
            engine.set_connection(ConnectionState::Disconnected);
            None
        } else {
            let manager = ConnectionManager::new(
                config.push_url()?,
                Duration::from_secs(config.refresh.reconnect_delay_secs),
            );
            let engine = Arc::clone(&engine);
            Some(tokio::spawn(async move { manager.run(engine).await }))
        };

        let renderer = tokio::spawn(render_loop(
            Arc::clone(&engine),
            filter,
            config.output.format,
            config.output.pretty,
        ));

        let quit = Arc::new(Notify::new());
        let keys = tokio::spawn(command_loop(Arc::clone(&engine), Arc::clone(&quit)));

        let scheduler = Scheduler::new(
            Duration::from_secs(config.refresh.interval_secs.max(1)),
            Duration::from_secs(config.refresh.node_health_interval_secs.max(1)),
        );
        scheduler
            .run(Arc::clone(&engine), async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
                    () = quit.notified() => info!("Quit requested"),
                }
            })
            .await;

        if let Some(connection) = connection {
            connection.abort();
        }
        renderer.abort();
        keys.abort();
        Ok(())
    }

    async fn execute_once(&self, config: &Config, filter: &PipelineFilter) -> Result<()> {
        let engine = Self::build_engine(config)?;

        let spinner = Spinner::start("Refreshing pipelines");
        if let Err(e) = engine.refresh(Trigger::Manual).await {
            spinner.fail("Refresh failed");
            return Err(e).context("Refresh cycle failed");
        }
        spinner.succeed("Pipelines refreshed");

        engine.refresh_node_health().await;
        let snapshot = engine.snapshot();

        let text = match config.output.format {
            OutputFormat::Json => output::to_json(&*snapshot, config.output.pretty)?,
            OutputFormat::Summary => output::render_dashboard(&snapshot, filter),
        };
        self.emit(&text)
    }

    async fn execute_alerts(&self, config: &Config) -> Result<()> {
        let engine = Self::build_engine(config)?;
        if !engine.refresh_alerts().await {
            bail!("Failed to fetch failed builds");
        }
        self.print_alerts(config, &engine)
    }

    async fn execute_ack(&self, config: &Config, pipeline: &str, build_number: u64) -> Result<()> {
        let engine = Self::build_engine(config)?;
        if !engine.acknowledge_alert(pipeline, build_number).await {
            bail!("Backend did not accept acknowledgment of {pipeline} #{build_number}");
        }
        eprintln!(
            "{}",
            output::bright_green(format!("Acknowledged {pipeline} #{build_number}"))
        );
        self.print_alerts(config, &engine)
    }

    fn print_alerts(&self, config: &Config, engine: &Engine) -> Result<()> {
        let alerts = engine.snapshot().alerts.clone();
        let text = match config.output.format {
            OutputFormat::Json => output::to_json(&alerts, config.output.pretty)?,
            OutputFormat::Summary => output::render_alerts(&alerts),
        };
        self.emit(&text)
    }

    async fn execute_collect(&self, config: &Config) -> Result<()> {
        let engine = Self::build_engine(config)?;

        let spinner = Spinner::start("Requesting backend collection");
        match engine.client().trigger_collection(true).await {
            Ok(()) => {
                spinner.succeed("Collection triggered");
                Ok(())
            }
            Err(e) => {
                spinner.fail("Collection trigger failed");
                Err(e).context("Backend rejected collection trigger")
            }
        }
    }

    async fn execute_advice(&self, config: &Config, pipeline: Option<&str>) -> Result<()> {
        let engine = Self::build_engine(config)?;
        let advice = engine
            .client()
            .fetch_advice(pipeline)
            .await
            .context("Failed to fetch advice")?;

        let text = match config.output.format {
            OutputFormat::Json => output::to_json(&advice, config.output.pretty)?,
            OutputFormat::Summary => output::render_advice(&advice),
        };
        self.emit(&text)
    }

    async fn execute_email_advice(
        &self,
        config: &Config,
        to: &str,
        pipeline: Option<&str>,
    ) -> Result<()> {
        let recipients = parse_recipients(to);
        if recipients.is_empty() {
            bail!("No recipients given");
        }

        let engine = Self::build_engine(config)?;
        engine
            .client()
            .send_advice_email(&recipients, pipeline)
            .await
            .context("Failed to send advice email")?;

        eprintln!(
            "{}",
            output::bright_green(format!("Advice sent to {}", recipients.join(", ")))
        );
        Ok(())
    }

    fn execute_init(config: &Config, path: Option<&PathBuf>, force: bool) -> Result<()> {
        let target = match path {
            Some(path) => path.clone(),
            None => Config::user_config_path().context("No user config directory available")?,
        };
        if target.exists() && !force {
            bail!(
                "Config file already exists: {} (use --force to overwrite)",
                target.display()
            );
        }

        config.save(&target)?;
        eprintln!(
            "{}",
            output::bright_green(format!("Config written to {}", target.display()))
        );
        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let config = self.load_config()?;
        info!("Using backend: {}", config.backend.base_url);

        match &self.command {
            Commands::Watch {
                interval,
                no_push,
                filter,
            } => {
                self.execute_watch(config, *interval, *no_push, filter.into())
                    .await
            }
            Commands::Once { filter } => {
                self.execute_once(&config, &PipelineFilter::from(filter))
                    .await
            }
            Commands::Alerts => self.execute_alerts(&config).await,
            Commands::Ack {
                pipeline,
                build_number,
            } => self.execute_ack(&config, pipeline, *build_number).await,
            Commands::Collect => self.execute_collect(&config).await,
            Commands::Advice { pipeline } => {
                self.execute_advice(&config, pipeline.as_deref()).await
            }
            Commands::EmailAdvice { to, pipeline } => {
                self.execute_email_advice(&config, to, pipeline.as_deref())
                    .await
            }
            Commands::Init { path, force } => Self::execute_init(&config, path.as_ref(), *force),
        }
    }
}

/// Redraws the dashboard whenever the engine publishes a new snapshot.
async fn render_loop(
    engine: Arc<Engine>,
    filter: PipelineFilter,
    format: OutputFormat,
    pretty: bool,
) {
    let mut updates = engine.subscribe();
    let term = console::Term::stdout();

    while updates.changed().await.is_ok() {
        let snapshot = Arc::clone(&updates.borrow_and_update());
        match format {
            OutputFormat::Json => match output::to_json(&*snapshot, pretty) {
                Ok(json) => println!("{json}"),
                Err(e) => log::error!("Failed to serialize snapshot: {e}"),
            },
            OutputFormat::Summary => {
                let _ = term.clear_screen();
                println!("{}", output::render_dashboard(&snapshot, &filter));
                println!(
                    "{}",
                    output::dim("Enter or 'r' to refresh, 'q' to quit")
                );
            }
        }
    }
}

/// Line commands on stdin while watching.
///
/// Stdin is read on a plain thread so a pending read never holds up runtime
/// shutdown.
async fn command_loop(engine: Arc<Engine>, quit: Arc<Notify>) {
    let (tx, mut lines) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = lines.recv().await {
        match line.trim() {
            "" | "r" | "refresh" => {
                engine.request_refresh(Trigger::Manual);
            }
            "q" | "quit" => {
                quit.notify_one();
                return;
            }
            other => eprintln!("{}", output::bright_red(format!("Unknown command: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_watch_with_filters() {
        let cli = Cli::try_parse_from([
            "pipepulse",
            "--url",
            "http://ci:8000",
            "watch",
            "--interval",
            "10",
            "--status",
            "FAILURE",
            "--show",
            "failure",
        ])
        .unwrap();

        assert_eq!(cli.url.as_deref(), Some("http://ci:8000"));
        match cli.command {
            Commands::Watch {
                interval, filter, ..
            } => {
                assert_eq!(interval, Some(10));
                let filter = PipelineFilter::from(&filter);
                assert_eq!(filter.status.as_deref(), Some("FAILURE"));
                assert_eq!(filter.quick, QuickFilter::Failure);
            }
            _ => panic!("expected watch command"),
        }
    }

    #[test]
    fn parses_ack_arguments() {
        let cli = Cli::try_parse_from(["pipepulse", "ack", "backend-api", "42"]).unwrap();
        match cli.command {
            Commands::Ack {
                pipeline,
                build_number,
            } => {
                assert_eq!(pipeline, "backend-api");
                assert_eq!(build_number, 42);
            }
            _ => panic!("expected ack command"),
        }
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "pipepulse",
            "--config",
            "definitely-missing-dir/none.toml",
            "once",
        ])
        .unwrap();
        assert!(cli.load_config().is_err());

        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pipepulse.toml");
        std::fs::write(&path, "[backend]\nbase-url = \"http://from-file:1\"\n").unwrap();

        let path_arg = path.to_string_lossy().to_string();
        let cli = Cli::try_parse_from([
            "pipepulse",
            "--config",
            path_arg.as_str(),
            "--url",
            "http://from-flag:2",
            "--format",
            "json",
            "alerts",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.backend.base_url, "http://from-flag:2");
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pipepulse.toml");
        let config = Config::default();

        Cli::execute_init(&config, Some(&path), false).unwrap();
        assert!(path.exists());
        assert!(Cli::execute_init(&config, Some(&path), false).is_err());
        assert!(Cli::execute_init(&config, Some(&path), true).is_ok());
    }
}
