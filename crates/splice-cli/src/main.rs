mod manifest;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::debug;

use splice_core::{ExportConfig, JobContext};
use splice_demux::{demux_asset, DemuxOptions};
use splice_export::{Event, FfmpegCodecs, Request, Worker};

use crate::manifest::Manifest;

const DEFAULT_CONFIG: &str = "splice.toml";

#[derive(Parser)]
#[command(
    name = "splice",
    version,
    about = "Splice: timeline export engine",
    long_about = "Splice renders a timeline of images, text, video and audio into a single MP4.\nVideo assets are demuxed, decoded frame-accurately, composited and re-encoded."
)]
struct Cli {
    /// Verbose logging and per-frame diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a project manifest to an MP4 file
    Render {
        /// Path to the manifest JSON
        #[arg()]
        manifest: PathBuf,

        /// Output file path (default: the manifest name with .mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Engine configuration (default: ./splice.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the demuxed video track summary of an MP4 as JSON
    Probe {
        /// Path to the video file
        #[arg()]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Render {
            manifest,
            output,
            config,
        } => cmd_render(manifest, output, config, cli.verbose).await,
        Commands::Probe { file } => cmd_probe(file).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<ExportConfig> {
    match path {
        Some(path) => ExportConfig::load_from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                ExportConfig::load_from_file(default)
                    .with_context(|| format!("failed to load config: {}", default.display()))
            } else {
                Ok(ExportConfig::default())
            }
        }
    }
}

async fn cmd_render(
    manifest_path: PathBuf,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let start = Instant::now();
    let mut config = load_config(config_path.as_deref())?;
    config.job.debug |= verbose;

    println!("🎬 Splice Export v{}", env!("CARGO_PKG_VERSION"));
    println!("   Manifest: {}", manifest_path.display());

    let base = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let descriptor = Manifest::load(&manifest_path)?.resolve(&base)?;
    println!(
        "   Output:   {}x{} @ {} fps, {} track(s), {} asset(s)",
        descriptor.width,
        descriptor.height,
        descriptor.fps,
        descriptor.tracks.len(),
        descriptor.assets.len()
    );
    let output = output.unwrap_or_else(|| manifest_path.with_extension("mp4"));

    if !splice_core::ffmpeg::is_available(&config.ffmpeg.binary).await {
        anyhow::bail!(
            "ffmpeg not found at '{}' (set [ffmpeg] binary in {})",
            config.ffmpeg.binary.display(),
            DEFAULT_CONFIG
        );
    }

    let codecs = Arc::new(FfmpegCodecs::from_config(&config.ffmpeg));
    let worker = Worker::new(Arc::new(config), codecs);
    let (req_tx, req_rx) = mpsc::channel(4);
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let worker_task = tokio::spawn(worker.run(req_rx, ev_tx));

    let mut requests = Some(req_tx);
    let mut pending = Some(descriptor);
    let mut outcome: Option<Result<Arc<Vec<u8>>>> = None;

    loop {
        tokio::select! {
            event = ev_rx.recv() => match event {
                Some(Event::Ready) => {
                    if let (Some(tx), Some(project)) = (&requests, pending.take()) {
                        tx.send(Request::Start { project: Box::new(project) })
                            .await
                            .context("worker stopped before the export started")?;
                    }
                }
                Some(Event::Progress { progress }) => println!("   … {:5.1}%", progress),
                Some(Event::Debug { message }) => debug!("{}", message),
                Some(Event::Done { buffer }) => {
                    outcome = Some(Ok(buffer));
                    requests = None;
                }
                Some(Event::Error { message }) => {
                    outcome = Some(Err(anyhow::anyhow!(message)));
                    requests = None;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if requests.is_some() => {
                println!("   ✗ Cancelling…");
                if let Some(tx) = requests.take() {
                    let _ = tx.send(Request::Cancel).await;
                }
            }
        }
    }
    worker_task.await.context("export worker panicked")?;

    match outcome {
        Some(Ok(buffer)) => {
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&output, buffer.as_slice())
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!(
                "   ✓ Wrote {} ({} bytes) in {:.2}s",
                output.display(),
                buffer.len(),
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Some(Err(e)) => Err(e.context("export failed")),
        None => {
            println!("   Export cancelled, nothing written");
            Ok(())
        }
    }
}

async fn cmd_probe(file: PathBuf) -> Result<()> {
    let data =
        std::fs::read(&file).with_context(|| format!("failed to read file: {}", file.display()))?;
    let track = demux_asset(&JobContext::new(), &data, None, DemuxOptions::default())
        .await
        .with_context(|| format!("failed to demux {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&track.summary())?);
    Ok(())
}
