//! Headless simulation session behind the `vidgrid` binary.
//!
//! Builds a synthetic catalog, mounts it on a `HeadlessContainer` with
//! simulated surfaces, scrolls up and down through it for a fixed time and
//! reports what the grid did. The run fails if the decoder cap was exceeded.

use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::container::HeadlessContainer;
use super::surface::{SimCounters, SimProfile, SimSurfaceFactory};
use crate::catalog::{CatalogView, SortMode};
use crate::clock::TokioClock;
use crate::config::{EngineConfig, GridConfig, PlaybackConfig};
use crate::engine::{GridStats, VideoGrid};
use crate::layout::{GridLayout, ViewportMetrics};
use crate::models::CatalogItem;
use crate::runtime::{GridDriver, HostCommand, FRAME_INTERVAL};

const VIEWPORT_WIDTH: f32 = 1280.0;
const VIEWPORT_HEIGHT: f32 = 800.0;
const SCROLL_STEP: Duration = Duration::from_millis(50);
const FOLDERS: usize = 8;

pub const USAGE: &str = "\
Usage: vidgrid [OPTIONS]

Runs a headless scroll simulation of the video grid.

Options:
  --items <N>          catalog size (default 500)
  --columns <N>        grid columns (default 5)
  --seconds <S>        simulated run time (default 30)
  --scroll-speed <PX>  scroll speed in pixels per second (default 400)
  --fail-rate <P>      probability a load is rejected (default 0.1)
  --stall-rate <P>     probability a load never resolves (default 0.02)
  --seed <N>           random seed (default 7)
  --max-active <N>     active decoder cap (default 18)
  --sort <MODE>        folder, date, shuffle or none (default folder)
  -h, --help           print this help";

#[derive(Debug, Clone)]
pub struct SessionArgs {
    pub items: usize,
    pub columns: usize,
    pub seconds: f64,
    pub scroll_speed: f32,
    pub fail_rate: f64,
    pub stall_rate: f64,
    pub seed: u64,
    pub max_active: usize,
    pub sort: SortMode,
}

impl Default for SessionArgs {
    fn default() -> Self {
        Self {
            items: 500,
            columns: 5,
            seconds: 30.0,
            scroll_speed: 400.0,
            fail_rate: 0.1,
            stall_rate: 0.02,
            seed: 7,
            max_active: 18,
            sort: SortMode::Folder,
        }
    }
}

fn next_value<I: Iterator<Item = String>>(args: &mut I, flag: &str) -> Result<String> {
    args.next()
        .with_context(|| format!("Missing value for {}", flag))
}

/// Parse command-line flags. `Ok(None)` means help was requested.
pub fn parse_args<I>(args: I) -> Result<Option<SessionArgs>>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = SessionArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--items" => {
                parsed.items = next_value(&mut args, "--items")?
                    .parse()
                    .context("Failed to parse --items as a non-negative integer")?;
            }
            "--columns" => {
                parsed.columns = next_value(&mut args, "--columns")?
                    .parse()
                    .context("Failed to parse --columns as a positive integer")?;
            }
            "--seconds" => {
                parsed.seconds = next_value(&mut args, "--seconds")?
                    .parse()
                    .context("Failed to parse --seconds as a number")?;
            }
            "--scroll-speed" => {
                parsed.scroll_speed = next_value(&mut args, "--scroll-speed")?
                    .parse()
                    .context("Failed to parse --scroll-speed as a number")?;
            }
            "--fail-rate" => {
                parsed.fail_rate = next_value(&mut args, "--fail-rate")?
                    .parse()
                    .context("Failed to parse --fail-rate as a number")?;
            }
            "--stall-rate" => {
                parsed.stall_rate = next_value(&mut args, "--stall-rate")?
                    .parse()
                    .context("Failed to parse --stall-rate as a number")?;
            }
            "--seed" => {
                parsed.seed = next_value(&mut args, "--seed")?
                    .parse()
                    .context("Failed to parse --seed as an unsigned integer")?;
            }
            "--max-active" => {
                parsed.max_active = next_value(&mut args, "--max-active")?
                    .parse()
                    .context("Failed to parse --max-active as a positive integer")?;
            }
            "--sort" => parsed.sort = SortMode::parse(&next_value(&mut args, "--sort")?),
            other => bail!("Unknown argument: {}", other),
        }
    }

    if parsed.columns == 0 {
        bail!("--columns must be at least 1");
    }
    if parsed.max_active == 0 {
        bail!("--max-active must be at least 1");
    }
    if !(parsed.seconds.is_finite() && parsed.seconds > 0.0) {
        bail!("--seconds must be positive");
    }
    for (flag, rate) in [("--fail-rate", parsed.fail_rate), ("--stall-rate", parsed.stall_rate)] {
        if !(0.0..=1.0).contains(&rate) {
            bail!("{} must be between 0 and 1", flag);
        }
    }
    if parsed.fail_rate + parsed.stall_rate > 1.0 {
        bail!("--fail-rate and --stall-rate together must not exceed 1");
    }
    Ok(Some(parsed))
}

/// Synthetic clips spread over a handful of folders.
pub fn synthetic_catalog(count: usize, rng: &mut StdRng) -> Vec<CatalogItem> {
    (0..count)
        .map(|i| {
            let folder = format!("folder-{:02}", i % FOLDERS);
            CatalogItem::new(
                format!("sim-{:05}", i),
                format!("/sim/{}/clip-{:05}.mp4", folder, i),
            )
            .with_folder(folder)
            .with_duration(rng.gen_range(3.0..240.0))
            .with_last_modified(1_700_000_000 + rng.gen_range(0..10_000_000))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub args: SessionArgs,
    pub elapsed: Duration,
    pub scroll_steps: u64,
    /// Last stats published while the grid was still live.
    pub live: GridStats,
    /// Stats after teardown.
    pub last: GridStats,
    /// Highest active count seen by the scroller between frames.
    pub observed_peak: usize,
    pub surfaces: SimCounters,
}

impl SessionReport {
    pub fn cap_exceeded(&self) -> bool {
        let cap = self.args.max_active;
        self.live.peak_active > cap || self.observed_peak > cap
    }

    pub fn print(&self) {
        println!(
            "session items={} columns={} seconds={} seed={}",
            self.args.items, self.args.columns, self.args.seconds, self.args.seed
        );
        println!(
            "grid rendered={} visible={} created={} destroyed={}",
            self.live.rendered_count,
            self.live.visible_count,
            self.last.nodes_created,
            self.last.nodes_destroyed
        );
        println!(
            "playback active={} loaded={} playing={} paused={} loading={} error={}",
            self.live.active_decoder_count,
            self.live.loaded_count,
            self.live.playing_count,
            self.live.paused_count,
            self.live.loading_count,
            self.live.error_count
        );
        println!(
            "decoders peak={} cap={} observed_peak={} evictions={}",
            self.live.peak_active, self.args.max_active, self.observed_peak, self.last.evictions
        );
        println!(
            "recovery retries={} watchdog_repairs={} injected_failures={} injected_stalls={}",
            self.last.retries_scheduled,
            self.last.watchdog_repairs,
            self.surfaces.injected_failures,
            self.surfaces.injected_stalls
        );
        println!(
            "surfaces created={} assigns={} releases={}",
            self.surfaces.surfaces, self.surfaces.assigns, self.surfaces.releases
        );
        println!(
            "result={} elapsed_ms={} scroll_steps={}",
            if self.cap_exceeded() { "cap-exceeded" } else { "ok" },
            self.elapsed.as_millis(),
            self.scroll_steps
        );
    }
}

/// Run one session to completion. Must be awaited on a current-thread runtime.
pub async fn run_session(args: &SessionArgs) -> Result<SessionReport> {
    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut view = CatalogView::new(synthetic_catalog(args.items, &mut rng));
    view.set_sort_mode(args.sort);
    view.reshuffle(rng.gen());
    let items = view.project();

    let config = EngineConfig {
        grid: GridConfig::default().with_columns(args.columns),
        playback: PlaybackConfig::default().with_max_active(args.max_active),
        ..Default::default()
    };
    let content_height = GridLayout::from_config(&config.grid).content_height(items.len());
    let max_scroll = (content_height - VIEWPORT_HEIGHT).max(0.0);

    let profile = SimProfile {
        fail_rate: args.fail_rate,
        stall_rate: args.stall_rate,
        ..Default::default()
    };
    let surfaces = SimSurfaceFactory::new(profile, rng.gen());
    let counters = surfaces.counters();

    let grid = VideoGrid::mount(
        config,
        HeadlessContainer::new(),
        Box::new(|item: &CatalogItem, _: usize| -> Result<String> { Ok(item.id.clone()) }),
        Box::new(surfaces),
        Rc::new(TokioClock),
        ViewportMetrics {
            scroll_top: 0.0,
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
        },
    )
    .context("Failed to mount the video grid")?;

    let (driver, commands) = GridDriver::new(grid, FRAME_INTERVAL);
    let stats = driver.stats_handle();
    commands
        .send(HostCommand::SetData(items))
        .map_err(|_| anyhow!("Grid driver dropped its command channel"))?;

    info!(
        items = args.items,
        columns = args.columns,
        seconds = args.seconds,
        "Simulation started"
    );

    let run_for = Duration::from_secs_f64(args.seconds);
    let speed = args.scroll_speed;
    let scroller = async move {
        let mut ticker = tokio::time::interval(SCROLL_STEP);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = Instant::now() + run_for;
        let step = speed * SCROLL_STEP.as_secs_f32();

        let mut top = 0.0_f32;
        let mut direction = 1.0_f32;
        let mut steps = 0u64;
        let mut observed_peak = 0usize;
        while Instant::now() < deadline {
            ticker.tick().await;
            top += direction * step;
            if top >= max_scroll {
                top = max_scroll;
                direction = -1.0;
            } else if top <= 0.0 {
                top = 0.0;
                direction = 1.0;
            }
            if commands.send(HostCommand::Scroll(top)).is_err() {
                break;
            }
            steps += 1;
            observed_peak = observed_peak.max(stats.get().active_decoder_count);
        }

        let live = stats.get();
        let _ = commands.send(HostCommand::Shutdown);
        debug!(steps, "Scroller finished");
        (live, steps, observed_peak)
    };

    let (last, (live, scroll_steps, observed_peak)) = tokio::join!(driver.run(), scroller);
    let last = last?;
    let surfaces = *counters.lock();

    Ok(SessionReport {
        args: args.clone(),
        elapsed: started.elapsed(),
        scroll_steps,
        live,
        last,
        observed_peak,
        surfaces,
    })
}
