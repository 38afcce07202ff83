// Copyright 2025 Phalanx Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Camera-focus save file (`sample_save.json`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Persisted camera and window state. Key names match the on-disk schema.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveState {
    pub rts_focus_x: f32,
    pub rts_focus_y: f32,
    pub rts_focus_z: f32,
    #[serde(rename = "yawDeg")]
    pub yaw_deg: f32,
    #[serde(rename = "pitchDeg")]
    pub pitch_deg: f32,
    pub height: f32,
    pub win_w: u32,
    pub win_h: u32,
    pub win_x: i32,
    pub win_y: i32,
}

impl Default for SaveState {
    fn default() -> Self {
        Self {
            rts_focus_x: 0.0,
            rts_focus_y: 0.0,
            rts_focus_z: 0.0,
            yaw_deg: 0.0,
            pitch_deg: -55.0,
            height: 18.0,
            win_w: 1600,
            win_h: 900,
            win_x: 80,
            win_y: 80,
        }
    }
}

impl SaveState {
    /// Load from `path`; a missing or unreadable file yields defaults.
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
