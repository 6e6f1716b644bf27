//! tts-conductor - Parallel Audiobook Conversion Coordinator
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use tts_conductor::config::{CliArgs, Command, ConvertConfig};
use tts_conductor::convert::{check_resume, ConductorService, ConversionEvent};
use tts_conductor::joblog::JobLog;
use tts_conductor::progress::{
    print_header, print_resume_status, print_summary, ProgressReporter,
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    match &args.command {
        Command::Convert(convert_args) => {
            let config = ConvertConfig::from_args(convert_args, args.verbose, args.quiet)
                .context("Invalid configuration")?;
            run_conversion(config, None)
        }
        Command::Resume(convert_args) => {
            let config = ConvertConfig::from_args(convert_args, args.verbose, args.quiet)
                .context("Invalid configuration")?;
            run_conversion(config, Some(convert_args.session.clone()))
        }
        Command::Status {
            document,
            sessions_root,
            session,
        } => run_status(document, sessions_root, session.as_deref()),
    }
}

/// Run a conversion to completion
///
/// `resume_session` is `None` for a fresh run; for a resume it carries the
/// optional explicit session id pin.
fn run_conversion(config: ConvertConfig, resume_session: Option<Option<String>>) -> Result<()> {
    // Create tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(convert_inner(config, resume_session))
}

async fn convert_inner(
    config: ConvertConfig,
    resume_session: Option<Option<String>>,
) -> Result<()> {
    let log = JobLog::open(&config.sessions_root.join("joblog.jsonl"))
        .context("Failed to open job log")?;
    let service = ConductorService::new(log.handle());

    // Job id doubles as the log correlation key; the document stem reads
    // better there than a random token
    let job_id = config
        .document
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("conversion")
        .to_string();

    if config.show_progress {
        print_header(&config.document, config.worker_count, &config.output_dir);
    }

    // Setup signal handler for graceful shutdown
    let handler_service = service.clone();
    let handler_job = job_id.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, stopping conversion...");
        handler_service.stop_conversion(&handler_job).ok();
    })
    .context("Failed to set signal handler")?;

    let mut events = match resume_session {
        Some(session) => {
            let evidence = service
                .check_resume_status(
                    &config.sessions_root,
                    &config.document,
                    session.as_deref(),
                )
                .context("No resumable session found")?;
            info!(
                session = %evidence.session_id,
                completed = evidence.completed_units,
                total = evidence.total_units,
                "Resuming prior session"
            );
            service.resume_conversion(&job_id, config.clone(), evidence)?
        }
        None => service.start_conversion(&job_id, config.clone())?,
    };

    // Create progress reporter
    let progress = if config.show_progress {
        ProgressReporter::new()
    } else {
        ProgressReporter::hidden()
    };
    progress.set_status("Preparing session...");

    // Drain the event stream until the terminal outcome
    let outcome = loop {
        match events.recv().await {
            Ok(ConversionEvent::Progress(snapshot)) => progress.update(&snapshot),
            Ok(ConversionEvent::Done(outcome)) => break outcome,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Progress subscriber lagged, catching up");
            }
            Err(broadcast::error::RecvError::Closed) => {
                progress.finish_and_clear();
                anyhow::bail!("Conversion ended without reporting an outcome");
            }
        }
    };

    if outcome.success {
        progress.finish("Conversion complete");
    } else {
        progress.finish_and_clear();
    }

    print_summary(&outcome);

    log.finish().context("Failed to flush job log")?;

    if !outcome.success {
        anyhow::bail!(outcome
            .error
            .unwrap_or_else(|| "conversion failed".to_string()));
    }
    Ok(())
}

/// Show what a prior session left on disk
fn run_status(document: &Path, sessions_root: &Path, session: Option<&str>) -> Result<()> {
    let status = check_resume(sessions_root, document, session)
        .context("No session found for this document")?;
    print_resume_status(&status);
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("tts_conductor=debug,warn")
    } else {
        EnvFilter::new("tts_conductor=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
