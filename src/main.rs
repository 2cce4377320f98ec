// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use line_counter::pipeline::{spawn_session, EndReason, SnapshotStream};
use line_counter::replay::{ReplayDetector, ReplayInput};
use line_counter::{Config, Line};

/// Grace period for blocking work still running at exit: a detector call
/// abandoned after a timeout, or a read parked on stdin.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about = "Count line crossings in recorded tracker output", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Recorded detections, one JSON line per frame ("-" for stdin)
    #[arg(short, long, default_value = "-")]
    detections: String,

    /// Override the counting line: x1,y1,x2,y2
    #[arg(long)]
    line: Option<Line>,

    /// Override the frame stride (process every Nth frame)
    #[arg(long)]
    stride: Option<u32>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(run(args));

    // Dropping the runtime would wait on stalled blocking calls forever
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(line) = args.line {
        config.session.line = line.into();
    }
    if let Some(stride) = args.stride {
        config.session.frame_stride = stride;
    }

    // Snapshots own stdout; logs go to stderr
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("line_counter={}", config.logging.level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Line counter starting");
    config.validate()?;
    info!("✓ Configuration loaded from {}", args.config.display());

    let input = ReplayInput::parse(&args.detections);
    let source = input.open()?;
    info!("✓ Reading detections from {}", args.detections);

    let mut stream = spawn_session(&config.session, &config.stream, source, ReplayDetector::new())?;

    let mut out = std::io::stdout().lock();
    let written = pump(&mut stream, &mut out, tokio::signal::ctrl_c()).await?;

    let summary = stream.finish().await?;
    let m = &summary.metrics;

    info!("========================================");
    info!("Session ended: {}", summary.end_reason.as_str());
    info!(
        "  In: {}  Out: {}  Total: {}",
        summary.final_state.in_count,
        summary.final_state.out_count,
        summary.final_state.total()
    );
    info!(
        "  Frames: {} read, {} processed ({:.1} FPS), {} snapshot(s) written",
        m.frames_read, m.frames_processed, m.fps, written
    );
    info!(
        "  Tracks seen: {} | detections: {} ({} untracked)",
        summary.tracks_seen, m.detections, m.untracked_detections
    );
    if m.detector_failures > 0 {
        warn!("  Unreadable frames: {}", m.detector_failures);
    }

    match summary.end_reason {
        EndReason::Exhausted | EndReason::Cancelled => Ok(()),
        reason => {
            error!("Session did not run to completion ({})", reason.as_str());
            anyhow::bail!("session ended early: {}", reason.as_str())
        }
    }
}

/// Copy snapshots to `out` as JSON lines until the stream ends. `interrupt`
/// resolving cancels the session; buffered snapshots are still written.
/// A failed write cancels the session and stops at once. Returns the number
/// of snapshots written.
async fn pump<W, F>(stream: &mut SnapshotStream, out: &mut W, interrupt: F) -> Result<u64>
where
    W: Write,
    F: Future,
{
    tokio::pin!(interrupt);
    let mut interrupted = false;
    let mut written = 0u64;

    loop {
        tokio::select! {
            next = stream.next() => {
                let Some(state) = next else { break };
                let line = state.to_json_line()?;
                if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
                    // Downstream reader is gone (broken pipe)
                    warn!("Cannot write snapshot, stopping session: {}", e);
                    stream.cancel();
                    break;
                }
                written += 1;
            }
            _ = &mut interrupt, if !interrupted => {
                warn!("Interrupted, stopping session");
                interrupted = true;
                stream.cancel();
            }
        }
    }

    Ok(written)
}
