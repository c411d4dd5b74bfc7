use serde::{Deserialize, Serialize};

/// Upper bounds of the SVC encoder.
pub const MAX_SPATIAL_LAYERS: usize = 4;
pub const MAX_TEMPORAL_LAYERS: usize = 4;

/// One resolution tier of the scalable stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialLayer {
    pub width: u32,
    pub height: u32,
    // bps
    pub bitrate: u32,
}

impl SpatialLayer {
    pub fn new(width: u32, height: u32, bitrate: u32) -> Self {
        Self {
            width,
            height,
            bitrate,
        }
    }
}

/// How the encoded layers reach the decoders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// One encoder producing spatial and temporal layers, one `T x S` grid.
    #[default]
    Combined,
    /// A spatial-only encoder and a temporal-only encoder, each with its own grid.
    Independent,
}

/// Parameters handed to the SVC encoder adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerConfig {
    /// ascending resolution
    pub spatial_layers: Vec<SpatialLayer>,
    pub temporal_layers: usize,
    pub frame_rate: f32,
    pub intra_period: u32,
}

impl LayerConfig {
    pub fn total_bitrate(&self) -> u64 {
        self.spatial_layers.iter().map(|l| l.bitrate as u64).sum()
    }
}

/// Scalability settings of one pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SvcConfig {
    pub temporal_num: usize,
    pub spatial_num: usize,
    pub spatial_layers: Vec<SpatialLayer>,
    #[serde(default)]
    pub topology: Topology,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f32,
    #[serde(default = "default_intra_period")]
    pub intra_period: u32,
}

fn default_frame_rate() -> f32 {
    25.0
}

fn default_intra_period() -> u32 {
    50
}

impl Default for SvcConfig {
    fn default() -> Self {
        Self::new(
            4,
            4,
            vec![
                SpatialLayer::new(640, 360, 600 * 1024),
                SpatialLayer::new(854, 480, 1000 * 1024),
                SpatialLayer::new(1280, 720, 2000 * 1024),
                SpatialLayer::new(1920, 1080, 4500 * 1024),
            ],
        )
    }
}

impl SvcConfig {
    /// Clamps the layer counts to what the encoder supports and to the
    /// number of spatial layers actually described.
    pub fn new(temporal_num: usize, spatial_num: usize, spatial_layers: Vec<SpatialLayer>) -> Self {
        let mut config = Self {
            temporal_num,
            spatial_num,
            spatial_layers,
            topology: Topology::Combined,
            frame_rate: default_frame_rate(),
            intra_period: default_intra_period(),
        };
        config.clamp();
        config
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn clamp(&mut self) {
        self.temporal_num = self.temporal_num.clamp(1, MAX_TEMPORAL_LAYERS);
        self.spatial_num = self
            .spatial_num
            .min(MAX_SPATIAL_LAYERS)
            .min(self.spatial_layers.len())
            .max(1);
    }

    /// Drops the layers beyond `spatial_num` and forces the top layer to the
    /// source resolution.
    pub fn normalize(&mut self, source_width: u32, source_height: u32) -> anyhow::Result<()> {
        self.clamp();
        if self.spatial_layers.is_empty() {
            anyhow::bail!("no spatial layer configured");
        }
        self.spatial_layers.truncate(self.spatial_num);
        if let Some(top) = self.spatial_layers.last_mut() {
            if top.width != source_width || top.height != source_height {
                log::debug!(
                    "top spatial layer {}x{} adjusted to source {}x{}",
                    top.width,
                    top.height,
                    source_width,
                    source_height
                );
                top.width = source_width;
                top.height = source_height;
            }
        }
        Ok(())
    }

    /// Encoder parameters for the combined topology.
    pub fn combined_layers(&self) -> LayerConfig {
        LayerConfig {
            spatial_layers: self.spatial_layers.clone(),
            temporal_layers: self.temporal_num,
            frame_rate: self.frame_rate,
            intra_period: self.intra_period,
        }
    }

    /// Encoder parameters for the spatial-only stream of the independent topology.
    pub fn spatial_only_layers(&self) -> LayerConfig {
        LayerConfig {
            temporal_layers: 1,
            ..self.combined_layers()
        }
    }

    /// Encoder parameters for the temporal-only stream of the independent topology:
    /// a single layer at the top resolution.
    pub fn temporal_only_layers(&self) -> LayerConfig {
        let top: Vec<SpatialLayer> = self.spatial_layers.last().copied().into_iter().collect();
        LayerConfig {
            spatial_layers: top,
            ..self.combined_layers()
        }
    }
}

/// Temporal id of each picture within one GOP for `temporal_num` layers.
pub fn temporal_pattern(temporal_num: usize) -> &'static [u8] {
    match temporal_num.clamp(1, MAX_TEMPORAL_LAYERS) {
        1 => &[0],
        2 => &[0, 1],
        3 => &[0, 2, 1, 2],
        _ => &[0, 3, 2, 3, 1, 3, 2, 3],
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
