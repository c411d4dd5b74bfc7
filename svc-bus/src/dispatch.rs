//! Routing of encoded SVC layers to the decoder grid.
//!
//! Spatial layers are differential: the decoder of spatial level `s` needs
//! layers `0..=s` of the same access unit, concatenated in ascending order
//! (e.g. 1080p = 360p base + 480p + 720p + 1080p enhancements).
//!
//! Temporal tiers are cumulative: tier `t` needs every access unit whose
//! temporal id is `<= t`. With the OpenH264 GOP layout (`[0]`, `[0,1]`,
//! `[0,2,1,2]`, `[0,3,2,3,1,3,2,3]`) an access unit with temporal id `k`
//! goes to tiers `k..temporal_num`.
//!
//! Temporal ids are never concatenated; spatial layers always are.

use bytes::{Bytes, BytesMut};

use crate::types::{EncodedFrame, GridSlot, RoutedSegment};

/// Computes the destinations of every access unit for a `temporal_num x spatial_num` grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerDispatcher {
    temporal_num: usize,
    spatial_num: usize,
}

impl LayerDispatcher {
    pub fn new(temporal_num: usize, spatial_num: usize) -> Self {
        Self {
            temporal_num: temporal_num.max(1),
            spatial_num: spatial_num.max(1),
        }
    }

    /// Spatial scalability only: one tier.
    pub fn spatial_only(spatial_num: usize) -> Self {
        Self::new(1, spatial_num)
    }

    /// Temporal scalability only: one spatial level.
    pub fn temporal_only(temporal_num: usize) -> Self {
        Self::new(temporal_num, 1)
    }

    pub fn temporal_num(&self) -> usize {
        self.temporal_num
    }

    pub fn spatial_num(&self) -> usize {
        self.spatial_num
    }

    /// Number of segments `dispatch` produces for an access unit.
    pub fn segment_count(&self, layers: usize, temporal_id: usize) -> usize {
        layers * self.temporal_num.saturating_sub(temporal_id)
    }

    /// Splits one access unit into the segments each grid decoder must receive.
    ///
    /// A malformed access unit is rejected as a whole; no partial routing.
    pub fn dispatch(&self, frame: &EncodedFrame) -> anyhow::Result<Vec<RoutedSegment>> {
        let Some(temporal_id) = frame.temporal_id() else {
            return Ok(Vec::new());
        };
        let temporal_id = temporal_id as usize;
        if temporal_id >= self.temporal_num {
            anyhow::bail!(
                "temporal id {} outside {} tiers",
                temporal_id,
                self.temporal_num
            );
        }

        let total: usize = frame.layers.iter().map(|l| l.len()).sum();
        let mut prefix = BytesMut::with_capacity(total);
        let mut segments =
            Vec::with_capacity(self.segment_count(frame.layers.len(), temporal_id));

        for (index, layer) in frame.layers.iter().enumerate() {
            let spatial = layer.spatial_id as usize;
            if spatial != index {
                anyhow::bail!(
                    "layer {} has spatial id {}, expected ascending ids from 0",
                    index,
                    spatial
                );
            }
            if spatial >= self.spatial_num {
                anyhow::bail!(
                    "spatial id {} outside {} levels",
                    spatial,
                    self.spatial_num
                );
            }
            if layer.temporal_id as usize != temporal_id {
                anyhow::bail!(
                    "access unit mixes temporal ids {} and {}",
                    temporal_id,
                    layer.temporal_id
                );
            }
            let len = layer.len();
            if layer.payload.len() < len {
                anyhow::bail!(
                    "layer {} payload is {} bytes, nal units need {}",
                    index,
                    layer.payload.len(),
                    len
                );
            }

            prefix.extend_from_slice(&layer.payload[..len]);
            for temporal in temporal_id..self.temporal_num {
                segments.push(RoutedSegment {
                    slot: GridSlot::new(temporal, spatial),
                    // every destination owns its buffer
                    payload: Bytes::copy_from_slice(&prefix),
                    timestamp: frame.timestamp,
                });
            }
        }

        Ok(segments)
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod dispatch_test;
