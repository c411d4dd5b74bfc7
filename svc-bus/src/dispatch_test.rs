use std::collections::BTreeMap;

use bytes::Bytes;

use super::LayerDispatcher;
use crate::testing::{frame, layer};
use crate::types::{EncodedFrame, EncodedLayer, FrameType, GridSlot, RoutedSegment};

fn by_slot(segments: &[RoutedSegment]) -> BTreeMap<(usize, usize), usize> {
    segments
        .iter()
        .map(|s| ((s.slot.temporal, s.slot.spatial), s.len()))
        .collect()
}

#[test]
fn test_base_temporal_layer_reaches_every_tier() {
    let dispatcher = LayerDispatcher::new(2, 2);
    let segments = dispatcher.dispatch(&frame(0, &[100, 50])).unwrap();

    assert_eq!(segments.len(), 4);
    let expected: BTreeMap<_, _> = [((0, 0), 100), ((0, 1), 150), ((1, 0), 100), ((1, 1), 150)]
        .into_iter()
        .collect();
    assert_eq!(by_slot(&segments), expected);
}

#[test]
fn test_upper_temporal_layer_skips_lower_tiers() {
    let dispatcher = LayerDispatcher::new(2, 2);
    let segments = dispatcher.dispatch(&frame(1, &[80, 40])).unwrap();

    assert_eq!(segments.len(), 2);
    let expected: BTreeMap<_, _> = [((1, 0), 80), ((1, 1), 120)].into_iter().collect();
    assert_eq!(by_slot(&segments), expected);
}

#[test]
fn test_segment_count_property() {
    for temporal_num in 1..=4 {
        for spatial_num in 1..=4 {
            let dispatcher = LayerDispatcher::new(temporal_num, spatial_num);
            for tc in 0..temporal_num {
                for layers in 1..=spatial_num {
                    let sizes: Vec<usize> = (0..layers).map(|s| 7 + s * 3).collect();
                    let segments = dispatcher.dispatch(&frame(tc as u8, &sizes)).unwrap();
                    assert_eq!(segments.len(), layers * (temporal_num - tc));
                    assert_eq!(segments.len(), dispatcher.segment_count(layers, tc));
                    assert!(segments.iter().all(|s| s.slot.temporal >= tc));
                }
            }
        }
    }
}

#[test]
fn test_payload_is_ascending_concatenation() {
    let dispatcher = LayerDispatcher::new(1, 3);
    let f = frame(0, &[4, 3, 2]);
    let segments = dispatcher.dispatch(&f).unwrap();

    assert_eq!(segments.len(), 3);
    let level2 = segments
        .iter()
        .find(|s| s.slot == GridSlot::new(0, 2))
        .unwrap();
    assert_eq!(level2.payload.as_ref(), &[0, 0, 0, 0, 1, 1, 1, 2, 2]);

    for seg in &segments {
        let nal_total: usize = f.layers[..=seg.slot.spatial]
            .iter()
            .flat_map(|l| l.nal_lengths.iter())
            .sum();
        assert_eq!(seg.len(), nal_total);
        assert_eq!(seg.timestamp, f.timestamp);
    }
}

#[test]
fn test_payload_bytes_beyond_nal_lengths_are_ignored() {
    let dispatcher = LayerDispatcher::new(1, 1);
    let f = EncodedFrame {
        timestamp: 0,
        frame_type: FrameType::Idr,
        layers: vec![EncodedLayer::new(
            0,
            0,
            vec![2, 1],
            Bytes::from_static(&[9, 8, 7, 6, 5]),
        )],
    };
    let segments = dispatcher.dispatch(&f).unwrap();
    assert_eq!(segments[0].payload.as_ref(), &[9, 8, 7]);
}

#[test]
fn test_each_destination_owns_a_distinct_buffer() {
    let dispatcher = LayerDispatcher::new(3, 1);
    let segments = dispatcher.dispatch(&frame(0, &[16])).unwrap();
    assert_eq!(segments.len(), 3);
    let ptrs: Vec<*const u8> = segments.iter().map(|s| s.payload.as_ptr()).collect();
    assert_ne!(ptrs[0], ptrs[1]);
    assert_ne!(ptrs[1], ptrs[2]);
    assert!(segments.iter().all(|s| s.payload == segments[0].payload));
}

#[test]
fn test_spatial_only_collapses_to_rule_a() {
    let dispatcher = LayerDispatcher::spatial_only(3);
    let segments = dispatcher.dispatch(&frame(0, &[10, 20, 30])).unwrap();
    let expected: BTreeMap<_, _> = [((0, 0), 10), ((0, 1), 30), ((0, 2), 60)]
        .into_iter()
        .collect();
    assert_eq!(by_slot(&segments), expected);
}

#[test]
fn test_temporal_only_collapses_to_rule_b() {
    let dispatcher = LayerDispatcher::temporal_only(4);
    let segments = dispatcher.dispatch(&frame(2, &[25])).unwrap();
    let expected: BTreeMap<_, _> = [((2, 0), 25), ((3, 0), 25)].into_iter().collect();
    assert_eq!(by_slot(&segments), expected);
}

#[test]
fn test_empty_access_unit_routes_nothing() {
    let dispatcher = LayerDispatcher::new(2, 2);
    let f = EncodedFrame {
        timestamp: 0,
        frame_type: FrameType::P,
        layers: Vec::new(),
    };
    assert!(dispatcher.dispatch(&f).unwrap().is_empty());
}

#[test]
fn test_malformed_access_units_are_rejected() {
    let dispatcher = LayerDispatcher::new(2, 2);

    // temporal id beyond the grid
    assert!(dispatcher.dispatch(&frame(2, &[10])).is_err());

    // more spatial layers than levels
    assert!(dispatcher.dispatch(&frame(0, &[10, 10, 10])).is_err());

    // spatial ids out of order
    let mut f = frame(0, &[10, 10]);
    f.layers.swap(0, 1);
    assert!(dispatcher.dispatch(&f).is_err());

    // mixed temporal ids
    let f = EncodedFrame {
        timestamp: 0,
        frame_type: FrameType::P,
        layers: vec![layer(0, 0, 10), layer(1, 1, 10)],
    };
    assert!(dispatcher.dispatch(&f).is_err());

    // payload shorter than its nal units
    let f = EncodedFrame {
        timestamp: 0,
        frame_type: FrameType::P,
        layers: vec![EncodedLayer::new(0, 0, vec![8], Bytes::from_static(&[1, 2]))],
    };
    assert!(dispatcher.dispatch(&f).is_err());
}
