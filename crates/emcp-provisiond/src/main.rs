//! provisiond - element-management provisioning daemon
//!
//! Reads JSON-lines commands from stdin, answers each on stdout, and prints
//! one JSON line per finished transaction.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use emcp_common::audit::{AuditCategory, AuditOutcome, AuditRecord};
use emcp_common::config::DEFAULT_CONFIG_PATH;
use emcp_common::{audit_log, EmcpConfig};
use emcp_provisiond::logging::{init_logging, LogFormat};
use emcp_provisiond::{inbound, AppContext, ChannelComposer, Dispatchers};

/// Element-management provisioning daemon
#[derive(Parser, Debug)]
#[command(name = "provisiond")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_format);

    info!("--- Starting provisiond ---");
    match run(args).await {
        Ok(()) => {
            info!("provisiond stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("provisiond failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Arc::new(
        EmcpConfig::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?,
    );
    let store = emcp_store::open(&config.store)
        .await
        .context("opening transaction store")?;
    info!(backend = store.name(), devices = config.devices.len(), "Transaction store ready");

    let (composer, mut outcomes) = ChannelComposer::new();
    let ctx = Arc::new(
        AppContext::from_config(Arc::clone(&config), store).with_composer(Arc::new(composer)),
    );
    let dispatchers = Dispatchers::spawn(Arc::clone(&ctx), &config.dispatcher.service_types);
    audit_log!(AuditRecord::new(AuditCategory::AdminAction, "provisiond", "start")
        .with_outcome(AuditOutcome::Success));

    // Single writer so reply and outcome lines never interleave.
    let (lines, mut pending) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = pending.recv().await {
            line.push('\n');
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                warn!(error = %e, "stdout closed");
                break;
            }
            let _ = stdout.flush().await;
        }
    });
    let outcome_lines = lines.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            if outcome_lines.send(outcome.to_json()).is_err() {
                break;
            }
        }
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => match line.context("reading stdin")? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let reply = inbound::handle_line(&dispatchers, &line);
                    let _ = lines.send(reply.to_json());
                }
                None => {
                    info!("stdin closed, draining queued requests");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, draining queued requests");
                break;
            }
        }
    }

    dispatchers.shutdown().await;
    // The composer lives in the context; dropping it ends the forwarder.
    drop(ctx);
    forwarder.await.context("outcome forwarder")?;
    drop(lines);
    writer.await.context("stdout writer")?;

    audit_log!(AuditRecord::new(AuditCategory::AdminAction, "provisiond", "stop")
        .with_outcome(AuditOutcome::Success));
    Ok(())
}
