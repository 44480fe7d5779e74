//! volstream - headless streaming simulation
//!
//! Partitions synthetic channels into bricks and runs the progressive loop
//! against a headless allocator until it completes, logging every slice.
//!
//! Usage: cargo run --release -- [config.json] [--channels N] [--size N] [--verbose]

use std::process::ExitCode;
use std::time::Duration;

use volstream::core::{logging, StreamingConfig, SystemClock, UVec3, Vec3};
use volstream::math::ViewState;
use volstream::streaming::{
    BrickDraw, DrawSink, HeadlessAllocator, IncrementalRenderScheduler, LoopState,
    ResidencyCache, SliceProgress,
};
use volstream::volume::{BrickCatalog, ComponentFormat, VolumeId};

/// Upper bound on slices, so a starved budget cannot spin forever
const MAX_SLICES: usize = 10_000;

/// Simulated draw cost per brick
const DRAW_COST: Duration = Duration::from_micros(200);

#[derive(Default)]
struct SimulatedSink {
    drawn: usize,
}

impl DrawSink<u64> for SimulatedSink {
    fn draw_brick(&mut self, _draw: &BrickDraw<'_, u64>) {
        self.drawn += 1;
        std::thread::sleep(DRAW_COST);
    }

    fn slice_exhausted(&mut self, progress: &SliceProgress) {
        log::debug!(
            "Progress {}/{}",
            progress.completed_since_loop_began, progress.total_expected
        );
    }

    fn channel_completed(&mut self, channel: usize) {
        log::info!("Channel {} complete", channel);
    }
}

fn arg_value(args: &[String], flag: &str) -> Option<u32> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn run(args: &[String]) -> volstream::core::Result<()> {
    let config = match args.iter().skip(1).find(|a| a.ends_with(".json")) {
        Some(path) => {
            log::info!("Loading config from {}", path);
            StreamingConfig::load(path)?
        }
        None => StreamingConfig::default(),
    };
    let channel_count = arg_value(args, "--channels").unwrap_or(2).max(1);
    let size = arg_value(args, "--size").unwrap_or(256).max(2);

    let mut channels = (0..channel_count)
        .map(|i| BrickCatalog::partition(
            VolumeId(i),
            UVec3::splat(size),
            UVec3::splat(64),
            Vec3::ONE,
            vec![ComponentFormat::data_u8()],
        ))
        .collect::<volstream::core::Result<Vec<_>>>()?;

    let mut cache = ResidencyCache::new(HeadlessAllocator::new(), config.memory_budget_bytes);
    let mut scheduler = IncrementalRenderScheduler::new(config, SystemClock::new())?;
    let mut sink = SimulatedSink::default();
    let view = ViewState::perspective(Vec3::new(0.5, 0.5, 2.5), Vec3::splat(0.5), 1.0);

    log::info!(
        "Simulating {} channels of {}^3 texels ({} bricks each)",
        channel_count, size, channels[0].len()
    );

    for slice in 0..MAX_SLICES {
        let report = scheduler.run_slice(&mut channels, &mut cache, &view, &mut sink)?;
        log::info!(
            "Slice {}: {:?} drew {} bricks in {:?} ({}/{})",
            slice,
            report.outcome,
            report.bricks_drawn,
            report.elapsed,
            report.progress.completed_since_loop_began,
            report.progress.total_expected,
        );
        if scheduler.state() == LoopState::Completed {
            break;
        }
    }

    match serde_json::to_string_pretty(&cache.stats()) {
        Ok(stats) => log::info!("Cache stats: {}", stats),
        Err(e) => log::warn!("Failed to serialize cache stats: {}", e),
    }
    log::info!("Drew {} bricks", sink.drawn);
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--verbose") {
        logging::init_with_filter("debug");
    } else {
        logging::init();
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
