mod cli;
mod config;
mod error;
#[cfg(feature = "interactive")]
mod interactive;

use crate::{
    cli::Args,
    config::{AppConfig, build_engine_config},
    error::{AppError, Result},
};
use clap::Parser;
use dash_engine::{ManifestSource, Pipeline};
use std::{path::Path, process};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use url::Url;

const DEFAULT_LOG_FILTER: &str = "dashdl=info,dash_engine=info";

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let guard = match init_logging(&args) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        // Flush the file writer before exiting.
        drop(guard);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let file_config = AppConfig::load(args.config.as_deref())?;
    let config = build_engine_config(&file_config, &args)?;

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling download");
                token.cancel();
            }
        }
    });

    let pipeline = Pipeline::from_config(config)?.with_cancellation(token);

    let source = ManifestSource::from_input(&args.manifest);
    let origin = match args.base_url.as_deref() {
        Some(base) => Some(
            Url::parse(base)
                .map_err(|e| AppError::InvalidInput(format!("--base-url `{base}`: {e}")))?,
        ),
        None => source.origin(),
    };
    let manifest = pipeline.load_manifest(&source).await?;

    #[cfg(feature = "interactive")]
    if args.interactive {
        let index = dash_engine::ManifestIndex::parse(&manifest, origin.as_ref())?;
        let track = interactive::choose_track(&index)?;
        let name = interactive::output_name_for(&track);
        let path = pipeline.assemble_single(&track, &name).await?;
        info!(track = %track.id, path = %path.display(), "Track saved");
        println!("{}", path.display());
        return Ok(());
    }

    let report = pipeline.run(&manifest, origin.as_ref()).await?;
    info!(
        video = %report.video.track_id,
        video_route = %report.video.route,
        video_bytes = report.video.bytes,
        audio = %report.audio.track_id,
        audio_route = %report.audio.route,
        audio_bytes = report.audio.bytes,
        "Download finished"
    );
    println!("{}", report.output.display());
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let filter = if args.quiet {
        EnvFilter::new("warn")
    } else if args.verbose {
        EnvFilter::new("dashdl=debug,dash_engine=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let indicatif_layer = IndicatifLayer::new();

    let (file_layer, guard) = match args.log_file.as_deref() {
        Some(path) => {
            let file_name = path.file_name().ok_or_else(|| {
                AppError::Logging(format!("`{}` is not a file path", path.display()))
            })?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(args.verbose)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;

    Ok(guard)
}
