use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use kindly_export::app;
use kindly_export::config::AppConfig;
use kindly_export::csv::CsvWriter;
use kindly_export::export::{Exporter, Metric, RowSink};
use kindly_export::filter::{Filter, Granularity};
use kindly_export::server::{self, ExportState};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "kindly-export",
    about = "Export Kindly chatbot statistics as CSV"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Bot to export statistics for
    #[arg(long, global = true)]
    bot_id: Option<String>,

    /// API key used to obtain bearer tokens
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve CSV exports over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Export one metric to stdout
    Export {
        /// labels, pages, feedback, messages, sessions, fallbacks or handovers
        metric: Metric,
        /// First day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// Last day, exclusive (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
        #[arg(long, default_value = "day")]
        granularity: Granularity,
        #[arg(long)]
        limit: Option<u32>,
        /// Repeat for several sources; defaults to the configured set
        #[arg(long = "source")]
        sources: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries CSV output, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kindly_export=info,tower_http=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(Some(&cli.config))?;

    if let Some(bot_id) = cli.bot_id {
        config.api.bot_id = bot_id;
    }
    if let Some(api_key) = cli.api_key {
        config.api.api_key = api_key;
    }
    if let Command::Serve {
        port: Some(port), ..
    } = cli.command
    {
        config.server.port = port;
    }

    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        return Err(msg.into());
    }

    let exporter = Arc::new(app::build_exporter(&config)?);

    match cli.command {
        Command::Serve { .. } => serve(&config, exporter).await,
        Command::Export {
            metric,
            from,
            to,
            granularity,
            limit,
            sources,
        } => {
            let filter = Filter::new(from, to)
                .with_granularity(granularity)
                .with_limit(limit.unwrap_or(config.export.default_limit))
                .with_sources(sources);
            export(&exporter, &filter, metric).await
        }
    }
}

async fn serve(config: &AppConfig, exporter: Arc<Exporter>) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        bot_id = %config.api.bot_id,
        "starting kindly-export"
    );

    let state = Arc::new(ExportState {
        exporter,
        default_limit: config.export.default_limit,
        request_timeout: Duration::from_secs(config.server.request_timeout_secs),
    });
    let app = server::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn export(
    exporter: &Exporter,
    filter: &Filter,
    metric: Metric,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, cancelling export");
            trigger.cancel();
        }
    });

    let table = exporter.aggregate(&cancel, filter, metric).await?;

    let stdout = std::io::stdout();
    CsvWriter::new(stdout.lock()).accept(&table)?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
}
