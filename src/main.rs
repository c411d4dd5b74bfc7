use std::{path::PathBuf, sync::Arc};

use svc_bus::{Orchestrator, StartOptions};

mod codec;
mod config;

const USAGE: &str = "usage: svc-relay <input> [work_dir]";

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Trace)
        .filter_module("svc_bus", log::LevelFilter::Trace)
        .filter_module("svc_relay", log::LevelFilter::Trace)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let Some(source) = args.next() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };
    let work_dir = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("svc-out"));

    let config = config::RelayConfig::load()?;
    let level = config.level_filter()?;
    codec::init(level)?;

    let orchestrator = Arc::new(Orchestrator::new(
        codec::FfmpegOpenH264Backend::new(config.dump_decoded),
        config.svc.clone(),
    ));
    let options = StartOptions::new(source)
        .work_dir(work_dir)
        .queue_capacity(config.queue_capacity)
        .log_level(level);

    // codec setup and thread spawning block
    let starter = orchestrator.clone();
    tokio::task::spawn_blocking(move || starter.start(options)).await??;

    let input_done = orchestrator.input_done();
    tokio::select! {
        _ = input_done.cancelled() => {
            log::info!("input finished, draining pipeline");
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted, draining pipeline");
        },
    }

    let stopper = orchestrator.clone();
    tokio::task::spawn_blocking(move || {
        stopper.interrupt().stop();
    })
    .await?;

    if let Some(report) = orchestrator.stats() {
        for slot in &report.slots {
            log::info!(
                "{}: segments: {}, bytes: {}, decoded: {}, errors: {}",
                slot.tag,
                slot.segments,
                slot.bytes,
                slot.decoded,
                slot.errors
            );
        }
    }
    Ok(())
}
