use serde::{Deserialize, Serialize};

use crate::layout::PlayRegion;
use crate::topology::NibMode;

pub const CONNECT_RADIUS_PX: f32 = 10.0;
pub const MIN_UPDATE_DISTANCE: f32 = 0.01;
pub const FLUSH_INTERVAL_MS: u64 = 1000;

/// Session tunables. Every field falls back to its default when missing from
/// a config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub nib_mode: NibMode,
    /// Screen distance at which facing key points snap together.
    pub connect_radius_px: f32,
    /// Authoritative moves shorter than this (canonical units) are ignored.
    pub min_update_distance: f32,
    pub flush_interval_ms: u64,
    pub play_region: PlayRegion,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            nib_mode: NibMode::default(),
            connect_radius_px: CONNECT_RADIUS_PX,
            min_update_distance: MIN_UPDATE_DISTANCE,
            flush_interval_ms: FLUSH_INTERVAL_MS,
            play_region: PlayRegion::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"nib_mode":"edge-seeds","connect_radius_px":14.0}"#).unwrap();
        assert_eq!(config.nib_mode, NibMode::EdgeSeeds);
        assert_eq!(config.connect_radius_px, 14.0);
        assert_eq!(config.flush_interval_ms, FLUSH_INTERVAL_MS);
        assert_eq!(config.play_region, PlayRegion::default());
    }
}
