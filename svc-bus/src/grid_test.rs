use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;

use super::DecoderGrid;
use crate::{
    config::SpatialLayer,
    report::PipelineCounters,
    stage::{Downstream, StageOutput},
    testing::{MockBackend, frame},
    types::{FrameType, GridSlot, RoutedSegment},
    wiring::GridDispatch,
};

fn layers() -> Vec<SpatialLayer> {
    vec![
        SpatialLayer::new(320, 180, 300_000),
        SpatialLayer::new(640, 360, 800_000),
    ]
}

fn segment(temporal: usize, spatial: usize, len: usize) -> RoutedSegment {
    RoutedSegment {
        slot: GridSlot::new(temporal, spatial),
        payload: Bytes::from(vec![0u8; len]),
        timestamp: 0,
    }
}

#[test]
fn test_build_registers_every_slot() {
    let backend = MockBackend::default();
    let grid = DecoderGrid::build(&backend, "SVC", 2, &layers(), 4, Path::new("."));

    assert_eq!(grid.temporal_num(), 2);
    assert_eq!(grid.spatial_num(), 2);
    assert_eq!(grid.registered(), 4);
    assert_eq!(
        grid.stage(GridSlot::new(1, 1)).unwrap().tag(),
        "SVC_T1_640x360"
    );
    assert!(grid.stage(GridSlot::new(2, 0)).is_none());
}

#[test]
fn test_failed_slot_stays_empty_and_drops_segments() {
    let mut backend = MockBackend::default();
    backend.fail_slots.insert(GridSlot::new(0, 1));
    let grid = DecoderGrid::build(&backend, "SVC", 1, &layers(), 4, Path::new("."));
    assert_eq!(grid.registered(), 1);
    assert!(!grid.is_registered(GridSlot::new(0, 1)));

    grid.start_all().unwrap();
    assert!(grid.deliver(segment(0, 1, 10)).is_err());
    assert!(grid.deliver(segment(3, 0, 10)).is_err());
    assert_eq!(grid.missed(), 2);

    grid.deliver(segment(0, 0, 10)).unwrap();
    grid.broadcast_eof();
    grid.stop_all();

    assert_eq!(backend.received_by("SVC_T0_320x180"), vec![10]);
    let reports = grid.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].segments, 1);
    assert_eq!(reports[0].bytes, 10);
}

#[test]
fn test_encoder_output_reaches_expected_slots() {
    let backend = MockBackend::default();
    let grid = Arc::new(DecoderGrid::build(&backend, "SVC", 2, &layers(), 8, Path::new(".")));
    grid.start_all().unwrap();

    let counters = Arc::new(PipelineCounters::default());
    let mut dispatch = GridDispatch::new(grid.clone(), counters.clone());
    dispatch.deliver(StageOutput::Item(Ok(vec![frame(0, &[100, 50])])));
    dispatch.deliver(StageOutput::Item(Ok(vec![frame(1, &[80, 40])])));
    dispatch.deliver(StageOutput::Eof);
    grid.stop_all();

    assert_eq!(backend.received_by("SVC_T0_320x180"), vec![100]);
    assert_eq!(backend.received_by("SVC_T0_640x360"), vec![150]);
    assert_eq!(backend.received_by("SVC_T1_320x180"), vec![100, 80]);
    assert_eq!(backend.received_by("SVC_T1_640x360"), vec![150, 120]);
    assert_eq!(counters.frames_encoded.load(Ordering::Relaxed), 2);
    assert_eq!(counters.routing_faults.load(Ordering::Relaxed), 0);
}

#[test]
fn test_encoder_eof_reaches_every_decoder_once() {
    let backend = MockBackend::default();
    let grid = Arc::new(DecoderGrid::build(&backend, "SVC", 3, &layers(), 2, Path::new(".")));
    grid.start_all().unwrap();

    let mut dispatch = GridDispatch::new(grid.clone(), Arc::new(PipelineCounters::default()));
    dispatch.deliver(StageOutput::Eof);
    grid.stop_all();
    // a second stop joins nothing and releases nothing
    grid.stop_all();

    assert_eq!(backend.svc_closed.load(Ordering::SeqCst), 6);
    let reports = grid.reports();
    assert_eq!(reports.len(), 6);
    assert!(reports.iter().all(|r| r.finished && r.segments == 0));
}

#[test]
fn test_skip_frames_and_bad_access_units_are_counted() {
    let backend = MockBackend::default();
    let grid = Arc::new(DecoderGrid::build(&backend, "SVC", 1, &layers(), 4, Path::new(".")));
    grid.start_all().unwrap();

    let counters = Arc::new(PipelineCounters::default());
    let mut dispatch = GridDispatch::new(grid.clone(), counters.clone());

    let mut skipped = frame(0, &[10, 10]);
    skipped.frame_type = FrameType::Skip;
    dispatch.deliver(StageOutput::Item(Ok(vec![skipped])));
    // temporal id 1 does not exist in a single-tier grid
    dispatch.deliver(StageOutput::Item(Ok(vec![frame(1, &[10])])));
    dispatch.deliver(StageOutput::Item(Err(anyhow::anyhow!("encoder busy"))));
    dispatch.deliver(StageOutput::Eof);
    grid.stop_all();

    let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
    assert_eq!(read(&counters.frames_skipped), 1);
    assert_eq!(read(&counters.routing_faults), 1);
    assert_eq!(read(&counters.encode_errors), 1);
    assert_eq!(read(&counters.frames_encoded), 1);
    assert!(backend.received_by("SVC_T0_320x180").is_empty());
}
