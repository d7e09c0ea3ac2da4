mod args;
mod validators;

use anyhow::{bail, Context, Result};
use args::{Args, CoordsArgs, GenerateArgs, ServerArgs};
use futures::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::{io::IsTerminal, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use atlas_tile_cache::{
    bind_available, server, Config, ErrorLog, FetchEvent, GeoPoint, HttpSource, ProgressEvent,
    Summary, Tile, TileCache, UrlFormat,
};

/// Rough size of a 2x raster tile, used for the dry-run estimate.
const BYTES_PER_TILE_ESTIMATE: f64 = 25_000_f64;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    match Args::parse()? {
        Args::Generate(args) => generate(args).await,
        Args::Server(args) => serve(args, false).await,
        Args::Coords(args) => coords(args),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn generate(args: GenerateArgs) -> Result<()> {
    let config = Config::try_from(&args)?;
    let plan = config.plan().context("invalid tile request")?;

    if args.dry_run {
        for range in plan.ranges() {
            eprintln!(
                "{}: x {}..={}, y {}..={} ({} tiles)",
                range.tier,
                range.x.start(),
                range.x.end(),
                range.y.start(),
                range.y.end(),
                range.count()
            );
        }
        eprintln!(
            "would download {} tiles (approx {}, assuming 25 kb per tile)",
            plan.total_tiles(),
            pretty_bytes::converter::convert(plan.total_tiles() as f64 * BYTES_PER_TILE_ESTIMATE)
        );

        return Ok(());
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let total = plan.total_tiles();
    let fetcher = config.fetcher(cancel)?;
    let summary = show_progress(fetcher.run(plan), total).await?;

    if summary.cancelled {
        eprintln!(
            "Interrupted. Processed {}/{} tiles in {:.2} seconds, run again to fetch the rest.",
            summary.processed_tiles, summary.total_tiles, summary.elapsed_secs
        );
        return Ok(());
    }

    eprintln!(
        "Completed tile generation! Processed {}/{} tiles in {:.2} seconds ({:.2} seconds per tile).",
        summary.processed_tiles, summary.total_tiles, summary.elapsed_secs, summary.avg_secs_per_tile
    );
    if summary.failed_tiles > 0 {
        eprintln!(
            "{} tiles failed, see {}",
            summary.failed_tiles,
            args.server.error_log.display()
        );
    }

    if should_serve(args.serve)? {
        serve(args.server, args.open_browser).await?;
    }

    Ok(())
}

async fn show_progress(
    events: impl Stream<Item = atlas_tile_cache::Result<FetchEvent>>,
    total: u64,
) -> Result<Summary> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:60.cyan/blue} {pos:>7}/{len:7} {msg}")?
            .progress_chars("##-"),
    );

    let mut events = Box::pin(events);
    while let Some(event) = events.next().await {
        match event {
            Ok(FetchEvent::Progress(progress)) => {
                pb.set_position(progress.processed);
                pb.set_message(progress_message(&progress));
            }
            Ok(FetchEvent::Finished(summary)) => {
                pb.finish_and_clear();
                return Ok(summary);
            }
            Err(err) => {
                pb.abandon();
                let context = match err.tile() {
                    Some(tile) => format!("Error processing tile at {}, {}. Exiting.", tile.x, tile.y),
                    None => "Error processing tiles. Exiting.".to_owned(),
                };
                return Err(err).context(context);
            }
        }
    }

    bail!("tile fetch ended without a summary")
}

fn progress_message(progress: &ProgressEvent) -> String {
    let mut msg = format!(
        "({:.2}%) - Time per tile: {:.2} seconds",
        progress.percent, progress.tile_secs
    );
    if let Some(eta) = progress.eta {
        msg.push_str(&format!(" - ETA: {}", eta));
    }
    if let (Some(rate), Some(bytes)) = (progress.tiles_per_sec, progress.bytes) {
        msg.push_str(&format!(
            " - {:.2} tiles/s, {}",
            rate,
            pretty_bytes::converter::convert(bytes as f64)
        ));
    }
    msg
}

/// First Ctrl-C stops after the current tile, a second one exits right away.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("Interrupted, finishing the current tile. Press Ctrl-C again to exit now.");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn should_serve(flag: Option<bool>) -> Result<bool> {
    if let Some(serve) = flag {
        return Ok(serve);
    }
    if !std::io::stdin().is_terminal() {
        return Ok(false);
    }

    let confirmed = dialoguer::Confirm::new()
        .with_prompt("Do you want to launch a server to preview changes?")
        .default(true)
        .interact()?;
    Ok(confirmed)
}

async fn serve(args: ServerArgs, open_browser: bool) -> Result<()> {
    let source = HttpSource::new(args.timeout)?;
    let url = UrlFormat::parse(args.url.as_str())?;

    let mut state = server::ServerState::new(
        TileCache::new(&args.cache_dir),
        Arc::new(source),
        Arc::new(url),
    );
    state.error_log = Some(ErrorLog::new(&args.error_log));

    let listener = bind_available(args.host, args.port)
        .await
        .context("failed starting preview server")?;
    let addr = listener.local_addr()?;
    if addr.port() != args.port {
        eprintln!("Port {} is taken, using {} instead.", args.port, addr.port());
    }
    let url = format!("http://{}/", addr);
    eprintln!("🌍 Server running at {}", url);
    if open_browser {
        if let Err(e) = open::that(&url) {
            tracing::warn!(%url, "failed opening browser: {}", e);
        }
    }

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    server::serve(listener, state).await?;
    Ok(())
}

fn coords(args: CoordsArgs) -> Result<()> {
    let point = GeoPoint::new(args.lat, args.long)?;
    let tile = Tile::from_point(point, args.level);
    let (lat, lon) = tile.north_west();

    println!(
        "Tile coordinates at zoom level {}: x={}, y={} (north-west corner {:.5}, {:.5})",
        args.level, tile.x, tile.y, lat, lon
    );
    Ok(())
}
