mod cli;
mod logging;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use repour_core::config::RepourConfig;
use repour_core::execution::TracingLogSink;
use repour_core::models::{AdjustRequest, TerminalState};
use repour_core::orchestration::AdjustService;

use crate::cli::Command;

#[tokio::main]
async fn main() -> ExitCode {
    match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("repour error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run_main() -> Result<ExitCode> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    let config = RepourConfig::resolve(args.config.as_deref()).context("loading configuration")?;

    match args.command {
        Command::Adjust {
            request,
            no_callback,
            shutdown_timeout,
        } => {
            adjust(
                &config,
                &request,
                no_callback,
                Duration::from_secs(shutdown_timeout),
            )
            .await
        }
        Command::Strategies => {
            let service = AdjustService::from_config(&config, Arc::new(TracingLogSink))?;
            for name in service.providers().names() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn adjust(
    config: &RepourConfig,
    request_path: &Path,
    no_callback: bool,
    shutdown_timeout: Duration,
) -> Result<ExitCode> {
    let text = std::fs::read_to_string(request_path)
        .with_context(|| format!("reading adjust request '{}'", request_path.display()))?;
    let mut request: AdjustRequest = serde_json::from_str(&text)
        .with_context(|| format!("parsing adjust request '{}'", request_path.display()))?;
    if no_callback {
        request.callback_destination = None;
    }

    let service = AdjustService::from_config(config, Arc::new(TracingLogSink))?;
    let handle = service.submit(request)?;
    let task_id = handle.task_id().clone();

    let report = handle.join();
    tokio::pin!(report);

    let report = tokio::select! {
        report = &mut report => report?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            tracing::warn!(task_id = %task_id, "interrupted, cancelling adjust task");
            if !service.shutdown(shutdown_timeout).await {
                tracing::error!(task_id = %task_id, "adjust task did not settle before the shutdown timeout");
            }
            report.await?
        }
    };

    if let Some(delivery) = &report.delivery
        && !delivery.delivered
    {
        tracing::error!(
            task_id = %task_id,
            attempts = delivery.attempts,
            "outcome could not be delivered to the callback destination"
        );
    }

    let payload = serde_json::to_string_pretty(&report.outcome.to_payload())
        .context("serializing outcome")?;
    println!("{payload}");

    Ok(match report.outcome.state() {
        TerminalState::Succeeded => ExitCode::SUCCESS,
        TerminalState::Failed => ExitCode::FAILURE,
        TerminalState::Cancelled => ExitCode::from(130),
    })
}
