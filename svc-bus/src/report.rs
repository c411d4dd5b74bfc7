use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use anyhow::Context;
use serde::Serialize;

use crate::types::GridSlot;

/// Counters of one grid decoder, updated from the encoder and decoder threads.
#[derive(Debug, Default)]
pub struct SlotStats {
    segments: AtomicU64,
    bytes: AtomicU64,
    decoded: AtomicU64,
    errors: AtomicU64,
    finished: AtomicBool,
}

impl SlotStats {
    pub fn record_segment(&self, len: usize) {
        self.segments.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_decoded(&self, pictures: usize) {
        self.decoded.fetch_add(pictures as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn snapshot(&self, slot: GridSlot, tag: &str) -> SlotReport {
        SlotReport {
            slot,
            tag: tag.to_string(),
            segments: self.segments.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            finished: self.is_finished(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SlotReport {
    pub slot: GridSlot,
    pub tag: String,
    pub segments: u64,
    pub bytes: u64,
    pub decoded: u64,
    pub errors: u64,
    pub finished: bool,
}

/// Counters of the pipeline stages ahead of the grid.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub packets_read: AtomicU64,
    pub pictures_decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub encode_errors: AtomicU64,
    pub routing_faults: AtomicU64,
}

impl PipelineCounters {
    pub fn incr(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunReport {
    pub source: String,
    pub packets_read: u64,
    pub pictures_decoded: u64,
    pub decode_errors: u64,
    pub frames_encoded: u64,
    pub frames_skipped: u64,
    pub encode_errors: u64,
    pub routing_faults: u64,
    pub slots: Vec<SlotReport>,
}

impl RunReport {
    pub fn new(source: &str, counters: &PipelineCounters, slots: Vec<SlotReport>) -> Self {
        Self {
            source: source.to_string(),
            packets_read: counters.packets_read.load(Ordering::Relaxed),
            pictures_decoded: counters.pictures_decoded.load(Ordering::Relaxed),
            decode_errors: counters.decode_errors.load(Ordering::Relaxed),
            frames_encoded: counters.frames_encoded.load(Ordering::Relaxed),
            frames_skipped: counters.frames_skipped.load(Ordering::Relaxed),
            encode_errors: counters.encode_errors.load(Ordering::Relaxed),
            routing_faults: counters.routing_faults.load(Ordering::Relaxed),
            slots,
        }
    }

    pub fn slot(&self, tag: &str) -> Option<&SlotReport> {
        self.slots.iter().find(|s| s.tag == tag)
    }

    /// Writes the report as `report.json` under `dir`.
    pub fn write_to(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create work dir {}", dir.display()))?;
        let path = dir.join("report.json");
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
