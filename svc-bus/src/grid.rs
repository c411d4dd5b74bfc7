use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    codec::{CodecBackend, SlotContext},
    config::SpatialLayer,
    report::{SlotReport, SlotStats},
    stage::PipelineStage,
    types::{GridSlot, RoutedSegment},
    wiring::SlotSink,
};

struct GridCell {
    stage: PipelineStage<RoutedSegment>,
    stats: Arc<SlotStats>,
}

/// `temporal_num x spatial_num` SVC decoder stages, addressed by `GridSlot`.
///
/// Built once before any thread starts and shared read-only afterwards.
/// A slot whose decoder failed to open stays empty.
pub struct DecoderGrid {
    label: String,
    temporal_num: usize,
    spatial_num: usize,
    // row-major: temporal * spatial_num + spatial
    cells: Vec<Option<GridCell>>,
    missed: AtomicU64,
}

impl DecoderGrid {
    /// Opens one decoder per slot. `layers[s]` describes spatial level `s`.
    pub fn build<B: CodecBackend>(
        backend: &B,
        label: &str,
        temporal_num: usize,
        layers: &[SpatialLayer],
        capacity: usize,
        work_dir: &Path,
    ) -> Self {
        let temporal_num = temporal_num.max(1);
        let spatial_num = layers.len();
        let mut cells = Vec::with_capacity(temporal_num * spatial_num);

        for temporal in 0..temporal_num {
            for (spatial, layer) in layers.iter().enumerate() {
                let slot = GridSlot::new(temporal, spatial);
                let tag = format!("{}_T{}_{}x{}", label, temporal, layer.width, layer.height);
                let ctx = SlotContext {
                    slot,
                    tag: tag.clone(),
                    width: layer.width,
                    height: layer.height,
                    work_dir: work_dir.to_path_buf(),
                };

                let cell = match backend.open_svc_decoder(&ctx) {
                    Ok(decoder) => {
                        let stage = PipelineStage::new(tag.clone(), capacity);
                        let stats = Arc::new(SlotStats::default());
                        let sink = SlotSink::new(tag.clone(), stats.clone());
                        match stage.initialize(decoder, sink) {
                            Ok(()) => Some(GridCell { stage, stats }),
                            Err(e) => {
                                log::error!("grid {}: initialize {} failed: {:#}", label, tag, e);
                                None
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("grid {}: open decoder {} failed: {:#}", label, tag, e);
                        None
                    }
                };
                cells.push(cell);
            }
        }

        log::debug!(
            "grid {}: {}x{} slots, {} decoders registered",
            label,
            temporal_num,
            spatial_num,
            cells.iter().filter(|c| c.is_some()).count()
        );

        Self {
            label: label.to_string(),
            temporal_num,
            spatial_num,
            cells,
            missed: AtomicU64::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn temporal_num(&self) -> usize {
        self.temporal_num
    }

    pub fn spatial_num(&self) -> usize {
        self.spatial_num
    }

    fn index(&self, slot: GridSlot) -> Option<usize> {
        if slot.temporal < self.temporal_num && slot.spatial < self.spatial_num {
            Some(slot.temporal * self.spatial_num + slot.spatial)
        } else {
            None
        }
    }

    fn cell(&self, slot: GridSlot) -> Option<&GridCell> {
        self.index(slot).and_then(|i| self.cells[i].as_ref())
    }

    pub fn stage(&self, slot: GridSlot) -> Option<&PipelineStage<RoutedSegment>> {
        self.cell(slot).map(|c| &c.stage)
    }

    pub fn is_registered(&self, slot: GridSlot) -> bool {
        self.cell(slot).is_some()
    }

    /// Slots that have a decoder.
    pub fn registered(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Segments that found no decoder.
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    /// Hands one segment to the decoder of its slot, blocking while that
    /// decoder's queue is full. A segment for an empty slot is dropped.
    pub fn deliver(&self, segment: RoutedSegment) -> anyhow::Result<()> {
        let slot = segment.slot;
        let Some(cell) = self.cell(slot) else {
            self.missed.fetch_add(1, Ordering::Relaxed);
            anyhow::bail!("grid {}: no decoder registered for {}", self.label, slot);
        };

        let len = segment.len();
        if !cell.stage.put(segment) {
            anyhow::bail!(
                "grid {}: decoder {} no longer accepts input",
                self.label,
                cell.stage.tag()
            );
        }
        cell.stats.record_segment(len);
        Ok(())
    }

    /// Queues one sentinel on every registered decoder.
    pub fn broadcast_eof(&self) {
        log::debug!("grid {}: sending end of stream to all decoders", self.label);
        for cell in self.cells.iter().flatten() {
            cell.stage.send_eof();
        }
    }

    pub fn start_all(&self) -> anyhow::Result<()> {
        for cell in self.cells.iter().flatten() {
            cell.stage.start()?;
        }
        Ok(())
    }

    /// Joins every decoder; each returns once it has seen its sentinel.
    pub fn stop_all(&self) {
        for cell in self.cells.iter().flatten() {
            cell.stage.stop();
        }
    }

    pub fn reports(&self) -> Vec<SlotReport> {
        let mut reports = Vec::with_capacity(self.cells.len());
        for temporal in 0..self.temporal_num {
            for spatial in 0..self.spatial_num {
                let slot = GridSlot::new(temporal, spatial);
                if let Some(cell) = self.cell(slot) {
                    reports.push(cell.stats.snapshot(slot, cell.stage.tag()));
                }
            }
        }
        reports
    }
}

#[cfg(test)]
#[path = "grid_test.rs"]
mod grid_test;
