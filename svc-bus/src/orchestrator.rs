//! Pipeline wiring and lifecycle.
//!
//! ```text
//!                                                        ┌─► SVC decoder (T0,S0)
//! reader ─► H264 decoder ─► SVC encoder ─► dispatcher ───┼─► SVC decoder (T0,S1)
//!                                                        ├─► ...
//!                                                        └─► SVC decoder (Tn,Sm)
//! ```
//!
//! Stages are built downstream-first so that each one only ever holds
//! handles to stages that already exist, and threads start in the same
//! order with the reader last. Shutdown joins them in the opposite order,
//! driven by one sentinel injected at the H.264 decoder.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::{
    channel::DEFAULT_CAPACITY,
    codec::{CodecBackend, PacketSource},
    config::{LayerConfig, SvcConfig, Topology},
    grid::DecoderGrid,
    report::{PipelineCounters, RunReport},
    stage::PipelineStage,
    types::{Packet, Picture},
    wiring::{EncoderFeed, GridDispatch},
};

/// Arguments of `Orchestrator::start`.
#[derive(Clone, Debug)]
pub struct StartOptions {
    /// file path or URL of the input media
    pub source: String,
    /// where the run report goes; empty disables it
    pub work_dir: PathBuf,
    pub queue_capacity: usize,
    pub log_level: log::LevelFilter,
}

impl StartOptions {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            work_dir: PathBuf::new(),
            queue_capacity: DEFAULT_CAPACITY,
            log_level: log::LevelFilter::Info,
        }
    }

    pub fn work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn log_level(mut self, level: log::LevelFilter) -> Self {
        self.log_level = level;
        self
    }
}

struct Running {
    source: String,
    work_dir: PathBuf,
    reader: Option<JoinHandle<()>>,
    decoder: Arc<PipelineStage<Packet>>,
    encoders: Vec<Arc<PipelineStage<Picture>>>,
    grids: Vec<Arc<DecoderGrid>>,
    counters: Arc<PipelineCounters>,
}

impl Running {
    fn report(&self) -> RunReport {
        let slots = self.grids.iter().flat_map(|g| g.reports()).collect();
        RunReport::new(&self.source, &self.counters, slots)
    }
}

/// Owns the stages of one pipeline and their start/stop ordering.
pub struct Orchestrator<B: CodecBackend> {
    backend: B,
    config: SvcConfig,
    started: AtomicBool,
    interrupt: Mutex<CancellationToken>,
    input_done: Mutex<CancellationToken>,
    running: Mutex<Option<Running>>,
    last_report: Mutex<Option<RunReport>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: CodecBackend> Orchestrator<B> {
    pub fn new(backend: B, mut config: SvcConfig) -> Self {
        config.clamp();
        Self {
            backend,
            config,
            started: AtomicBool::new(false),
            interrupt: Mutex::new(CancellationToken::new()),
            input_done: Mutex::new(CancellationToken::new()),
            running: Mutex::new(None),
            last_report: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SvcConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Cancelled once the read loop of the current run has exited.
    pub fn input_done(&self) -> CancellationToken {
        lock(&self.input_done).clone()
    }

    pub fn is_input_finished(&self) -> bool {
        lock(&self.input_done).is_cancelled()
    }

    /// Builds and starts the pipeline. A second call while running is ignored.
    pub fn start(&self, options: StartOptions) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            log::warn!("Orchestrator has already started");
            return Ok(());
        }

        match self.start_pipeline(options) {
            Ok(running) => {
                *lock(&self.running) = Some(running);
                Ok(())
            }
            Err(e) => {
                self.started.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn start_pipeline(&self, options: StartOptions) -> anyhow::Result<Running> {
        log::set_max_level(options.log_level);

        let source = self
            .backend
            .open_source(&options.source)
            .with_context(|| format!("open input {}", options.source))?;
        let desc = source.descriptor().clone();
        log::debug!(
            "input: {}x{}, fps: {:.2}, time_base: {}/{}",
            desc.width,
            desc.height,
            desc.fps(),
            desc.time_base.0,
            desc.time_base.1
        );

        let mut config = self.config.clone();
        config.normalize(desc.width, desc.height)?;
        log::debug!(
            "svc layers: temporal: {}, spatial: {}, topology: {:?}",
            config.temporal_num,
            config.spatial_num,
            config.topology
        );

        let capacity = options.queue_capacity.max(1);
        let counters = Arc::new(PipelineCounters::default());

        let plan: Vec<(&str, LayerConfig)> = match config.topology {
            Topology::Combined => vec![("SVC", config.combined_layers())],
            Topology::Independent => vec![
                ("SVC_SPATIAL", config.spatial_only_layers()),
                ("SVC_TEMPORAL", config.temporal_only_layers()),
            ],
        };

        // grids first: the encoders dispatch into them
        let mut grids = Vec::with_capacity(plan.len());
        let mut encoders = Vec::with_capacity(plan.len());
        for (label, layers) in &plan {
            let grid = Arc::new(DecoderGrid::build(
                &self.backend,
                label,
                layers.temporal_layers,
                &layers.spatial_layers,
                capacity,
                &options.work_dir,
            ));

            let codec = self
                .backend
                .open_encoder(desc.width, desc.height, layers)
                .with_context(|| format!("open SVC encoder {}", label))?;
            let encoder = Arc::new(PipelineStage::new(format!("{}_ENCODER", label), capacity));
            encoder.initialize(codec, GridDispatch::new(grid.clone(), counters.clone()))?;

            grids.push(grid);
            encoders.push(encoder);
        }

        let codec = self
            .backend
            .open_decoder(&source)
            .context("open H264 decoder")?;
        let decoder = Arc::new(PipelineStage::new("H264_DECODER", capacity));
        decoder.initialize(codec, EncoderFeed::new(encoders.clone(), counters.clone()))?;

        for grid in &grids {
            grid.start_all()?;
        }
        for encoder in &encoders {
            encoder.start()?;
        }
        decoder.start()?;

        // an interrupt raised before start stays pending for this run
        let interrupt = lock(&self.interrupt).clone();
        if interrupt.is_cancelled() {
            log::info!("interrupt already pending, reader will stop at once");
        }
        let input_done = CancellationToken::new();
        *lock(&self.input_done) = input_done.clone();

        let reader = {
            let decoder = decoder.clone();
            let counters = counters.clone();
            std::thread::Builder::new()
                .name("svc-reader".to_string())
                .spawn(move || {
                    read_loop(source, &decoder, &interrupt, &counters);
                    input_done.cancel();
                })
                .context("spawn read thread")?
        };

        log::info!("pipeline started, input: {}", options.source);
        Ok(Running {
            source: options.source,
            work_dir: options.work_dir,
            reader: Some(reader),
            decoder,
            encoders,
            grids,
            counters,
        })
    }

    /// Asks the read loop to stop at its next packet. Channel waits are not interrupted.
    /// Before `start`, the request applies to the next run.
    pub fn interrupt(&self) -> &Self {
        lock(&self.interrupt).cancel();
        self
    }

    /// Joins every thread in pipeline order. Without a prior `interrupt`,
    /// this waits for the input to end.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            log::warn!("Orchestrator has not started");
            return;
        }
        let Some(mut running) = lock(&self.running).take() else {
            return;
        };

        if let Some(reader) = running.reader.take() {
            if reader.join().is_err() {
                log::error!("read thread panicked");
            }
        }
        // consumed by this run
        *lock(&self.interrupt) = CancellationToken::new();

        running.decoder.send_eof();
        running.decoder.stop();
        for encoder in &running.encoders {
            encoder.stop();
        }
        for grid in &running.grids {
            grid.stop_all();
        }

        let report = running.report();
        log::info!(
            "pipeline stopped: packets: {}, pictures: {}, frames: {}, routing faults: {}",
            report.packets_read,
            report.pictures_decoded,
            report.frames_encoded,
            report.routing_faults
        );
        if !running.work_dir.as_os_str().is_empty() {
            match report.write_to(&running.work_dir) {
                Ok(path) => log::info!("run report written to {}", path.display()),
                Err(e) => log::warn!("run report not written: {:#}", e),
            }
        }
        *lock(&self.last_report) = Some(report);
    }

    /// Live counters while running, the final report after `stop`.
    pub fn stats(&self) -> Option<RunReport> {
        if let Some(running) = lock(&self.running).as_ref() {
            return Some(running.report());
        }
        lock(&self.last_report).clone()
    }
}

fn read_loop<S: PacketSource>(
    mut source: S,
    decoder: &PipelineStage<Packet>,
    interrupt: &CancellationToken,
    counters: &PipelineCounters,
) {
    loop {
        if interrupt.is_cancelled() {
            log::info!("reader: interrupted");
            break;
        }
        match source.read_packet() {
            Ok(Some(packet)) => {
                PipelineCounters::incr(&counters.packets_read, 1);
                if !decoder.put(packet) {
                    log::warn!("reader: decoder no longer accepts packets");
                    break;
                }
            }
            Ok(None) => {
                log::info!("reader: end of input");
                break;
            }
            Err(e) => {
                log::error!("reader: failed to read packet: {:#}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;
