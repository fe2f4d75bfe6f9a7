/*!
 * Shield CLI - Command Line Interface
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 *
 * Every command loads the same TOML config, builds an IntegrationManager and
 * runs one reliable operation (or the probe loop). Results go to stdout as
 * JSON; logs go to stderr or the configured log file.
 */

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use shield::{
    config::LogLevel,
    error::{IntegrationError, EXIT_DEGRADED, EXIT_FATAL, EXIT_SUCCESS},
    logging, AnalysisOptions, Attachment, Capability, ChargeRequest, EmailRequest, ImageRequest,
    IntegrationManager, Money, RefundRequest, ShieldConfig,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "shield")]
#[command(version, about = "Reliable email, image analysis and payments with provider fallback", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = "shield.toml", global = true)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(short = 'l', long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the config and show the resolved provider chains
    CheckConfig,

    /// Probe every provider once and print health as JSON
    Health,

    /// Probe providers periodically until Ctrl-C
    Monitor {
        /// Probe interval in seconds (defaults to monitor.probe_interval_secs)
        #[arg(short = 'i', long = "interval", value_name = "SECS")]
        interval: Option<u64>,

        /// Seconds between health summaries in the log
        #[arg(long = "report-every", value_name = "SECS", default_value_t = 60)]
        report_every: u64,
    },

    /// Send an email through the email chain
    SendEmail {
        #[arg(long)]
        to: String,

        #[arg(long)]
        subject: String,

        /// Plain-text body
        #[arg(long, default_value = "")]
        body: String,

        /// File holding an HTML alternative
        #[arg(long = "html", value_name = "FILE")]
        html: Option<PathBuf>,

        /// Sender override
        #[arg(long)]
        from: Option<String>,

        /// Attach a file (repeatable)
        #[arg(long = "attach", value_name = "FILE")]
        attach: Vec<PathBuf>,
    },

    /// Analyze an image file through the image analysis chain
    AnalyzeImage {
        /// Image file
        #[arg(value_name = "FILE")]
        image: PathBuf,

        #[arg(long)]
        faces: bool,

        #[arg(long)]
        text: bool,

        #[arg(long = "max-labels", default_value_t = 10)]
        max_labels: u32,
    },

    /// Charge an amount through the payment chain
    Charge {
        /// Decimal amount, e.g. 10.00
        #[arg(long)]
        amount: String,

        /// ISO 4217 code
        #[arg(long, default_value = "USD")]
        currency: String,

        /// Provider-side customer or vault reference
        #[arg(long)]
        customer: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Reuse a key to make a retried charge idempotent
        #[arg(long = "idempotency-key")]
        idempotency_key: Option<String>,
    },

    /// Refund a charge through the provider that captured it
    Refund {
        /// Provider that served the original charge
        #[arg(long)]
        provider: String,

        #[arg(long = "transaction-id")]
        transaction_id: String,

        /// Partial amount; full refund when omitted
        #[arg(long)]
        amount: Option<String>,

        #[arg(long, default_value = "USD")]
        currency: String,

        #[arg(long = "idempotency-key")]
        idempotency_key: Option<String>,
    },

    /// Print provider metrics
    Metrics {
        #[arg(long, value_enum, default_value = "json")]
        format: MetricsFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricsFormat {
    Json,
    Prometheus,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<IntegrationError>() {
        Some(e) => {
            for failure in e.failures() {
                eprintln!("  {}", failure);
            }
            e.exit_code()
        }
        None => EXIT_FATAL,
    }
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let mut config = ShieldConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level.into();
    }
    logging::init_logging(&config.logging)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(execute(cli.command, config))
}

async fn execute(command: Commands, config: ShieldConfig) -> anyhow::Result<i32> {
    let manager = IntegrationManager::from_config(&config)?;

    match command {
        Commands::CheckConfig => {
            let chains: serde_json::Map<_, _> = Capability::ALL
                .iter()
                .map(|c| (c.to_string(), json!(manager.providers(*c))))
                .collect();
            print_json(&json!({ "valid": true, "chains": chains }))?;
            Ok(EXIT_SUCCESS)
        }

        Commands::Health => {
            let round = if config.monitor.enabled {
                Some(manager.probe_now().await)
            } else {
                warn!("Active probing disabled; reporting breaker state only");
                None
            };
            let health = manager.health().await;
            let degraded = health.values().any(|h| !h.health.available);

            print_json(&json!({
                "probes": round.map(|r| json!({ "succeeded": r.succeeded, "failed": r.failed })),
                "providers": health,
            }))?;
            Ok(if degraded { EXIT_DEGRADED } else { EXIT_SUCCESS })
        }

        Commands::Monitor {
            interval,
            report_every,
        } => {
            if !config.monitor.enabled {
                return Err(IntegrationError::Config(
                    "monitoring is disabled (monitor.enabled = false)".to_string(),
                )
                .into());
            }
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.monitor.probe_interval());
            run_monitor(&manager, interval, Duration::from_secs(report_every.max(1))).await?;
            Ok(EXIT_SUCCESS)
        }

        Commands::SendEmail {
            to,
            subject,
            body,
            html,
            from,
            attach,
        } => {
            let mut request = EmailRequest::new(to, subject, body);
            request.from = from;
            if let Some(path) = html {
                request.html_body = Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                );
            }
            for path in attach {
                request = request.with_attachment(read_attachment(&path)?);
            }

            let receipt = manager.send_email_reliably(request).await?;
            print_json(&receipt)?;
            Ok(EXIT_SUCCESS)
        }

        Commands::AnalyzeImage {
            image,
            faces,
            text,
            max_labels,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let request = ImageRequest::new(bytes).with_options(AnalysisOptions {
                detect_faces: faces,
                detect_text: text,
                max_labels,
            });

            let report = manager.analyze_image_reliably(request).await?;
            print_json(&report)?;
            Ok(EXIT_SUCCESS)
        }

        Commands::Charge {
            amount,
            currency,
            customer,
            description,
            idempotency_key,
        } => {
            let mut request = ChargeRequest::new(
                Money::parse(&amount, &currency).map_err(IntegrationError::from)?,
            );
            request.customer_ref = customer;
            request.description = description;
            request.idempotency_key = idempotency_key;

            let receipt = manager.process_payment_reliably(request).await?;
            print_json(&receipt)?;
            Ok(EXIT_SUCCESS)
        }

        Commands::Refund {
            provider,
            transaction_id,
            amount,
            currency,
            idempotency_key,
        } => {
            let mut request = RefundRequest::new(provider, transaction_id);
            if let Some(amount) = amount {
                request = request
                    .with_amount(Money::parse(&amount, &currency).map_err(IntegrationError::from)?);
            }
            request.idempotency_key = idempotency_key;

            let receipt = manager.refund_payment_reliably(request).await?;
            print_json(&receipt)?;
            Ok(EXIT_SUCCESS)
        }

        Commands::Metrics { format } => {
            // Counters are per process
            match format {
                MetricsFormat::Json => print_json(&manager.metrics())?,
                MetricsFormat::Prometheus => print!("{}", manager.metrics_text()),
            }
            Ok(EXIT_SUCCESS)
        }
    }
}

async fn run_monitor(
    manager: &IntegrationManager,
    interval: Duration,
    report_every: Duration,
) -> anyhow::Result<()> {
    manager.start_monitoring(interval)?;
    info!(
        interval_secs = interval.as_secs(),
        "Health monitor running; press Ctrl-C to stop"
    );

    let mut report = tokio::time::interval(report_every);
    report.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown requested");
                break;
            }
            _ = report.tick() => {
                for (provider, health) in manager.health().await {
                    info!(
                        provider = %provider,
                        capability = %health.capability,
                        state = %health.health.circuit_state,
                        available = health.health.available,
                        consecutive_failures = health.health.consecutive_failures,
                        "Provider health"
                    );
                }
            }
        }
    }

    manager.stop_monitoring().await;
    Ok(())
}

fn read_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    Ok(Attachment::new(filename, content_type_for(path), content))
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
