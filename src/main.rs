//! CLI entry point for m3uget.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use clap::Parser;
use m3uget::{ConsoleUi, DownloadOrchestrator, RunOutcome, RunRequest, Ui, parse_request};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let cancel = Arc::new(AtomicBool::new(false));
    let ui = ConsoleUi::new(Arc::clone(&cancel));
    tokio::spawn({
        let cancel = Arc::clone(&cancel);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.store(true, Ordering::SeqCst);
            }
        }
    });

    // Source: positional argument, or prompt for a URL / pasted cURL line.
    let source = match args.source {
        Some(source) => source,
        None => match ui.input("Paste M3U URL/cURL from network tab:", "") {
            Some(source) if !source.is_empty() => source,
            _ => bail!("no source URL provided"),
        },
    };
    let request_input = parse_request(&source)?;

    let mut headers = request_input.headers;
    for header in &args.header {
        let Some((name, value)) = header.split_once(':') else {
            bail!("malformed -H header (expected \"Name: value\"): {header}");
        };
        headers.insert(name.trim().to_lowercase(), value.trim().to_string());
    }

    let output = match args.output {
        Some(output) => output,
        None => prompt_save_path(&ui)?,
    };

    info!(url = %request_input.url, output = %output.display(), "starting download");

    let request = RunRequest {
        url: request_input.url,
        headers,
        output,
        workers: usize::from(args.workers),
        max_retries: u32::from(args.max_retries),
        live_assemble: args.live_assemble,
        ffmpeg: args.ffmpeg,
        keep_cache: args.keep_cache,
        livestream_hint: args.live,
    };

    let orchestrator = DownloadOrchestrator::new();
    match orchestrator.run(request, &ui).await {
        Ok(RunOutcome::Completed(_)) => Ok(()),
        Ok(RunOutcome::Cancelled) => {
            ui.notify("Cancelled. Partial download kept for resume.");
            Ok(())
        }
        Err(error) => {
            ui.error(&error.to_string());
            std::process::exit(1);
        }
    }
}

/// Asks for an output path, re-asking with an overwrite confirmation while
/// the chosen file already exists.
fn prompt_save_path(ui: &ConsoleUi) -> Result<PathBuf> {
    let start_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    loop {
        let Some(path) = ui.save_path(&start_dir) else {
            bail!("no output path provided");
        };
        if path.exists() && !ui.confirm(&format!("{} exists, overwrite?", path.display())) {
            continue;
        }
        return Ok(path);
    }
}
