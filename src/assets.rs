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

//! Model asset surface consumed by the ECS core.
//!
//! The renderer and GPU upload paths live outside this crate; gameplay only
//! needs opaque handles, clip metadata, and a way to evaluate a pose
//! (clip + time -> per-node global matrices). Pose evaluation itself is a
//! pluggable black box.

use ahash::AHashMap;
use glam::Mat4;

use crate::error::{EngineError, Result};

/// Opaque handle to a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelHandle(pub u32);

impl ModelHandle {
    pub const INVALID: ModelHandle = ModelHandle(u32::MAX);

    pub fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }
}

impl Default for ModelHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Animation clip indices of the stock knight model.
pub mod knight_clips {
    /// Stand_Attack_1 .. Stand_Attack_8
    pub const ATTACK_START: u32 = 36;
    pub const ATTACK_END: u32 = 43;

    /// Stand_Damage_0 .. Stand_Damage_4
    pub const DAMAGE_START: u32 = 52;
    pub const DAMAGE_END: u32 = 56;

    /// Stand_Death_0 .. Stand_Death_3
    pub const DEATH_START: u32 = 61;
    pub const DEATH_END: u32 = 64;

    pub const RUN: u32 = 28;
    pub const IDLE: u32 = 65;
}

/// Per-clip metadata.
#[derive(Debug, Clone)]
pub struct ClipInfo {
    pub name: String,
    pub duration_sec: f32,
}

/// One skin: joints reference model nodes and carry inverse bind matrices.
#[derive(Debug, Clone, Default)]
pub struct SkinData {
    pub joint_base: u32,
    pub joint_count: u32,
    pub joint_node_indices: Vec<u32>,
    pub inverse_bind: Vec<Mat4>,
}

/// Pose sampler signature: (clip, time, out node globals).
pub type PoseSampler = Box<dyn Fn(u32, f32, &mut Vec<Mat4>) + Send + Sync>;

/// Cached model data the ECS core reads: clips, node/joint layout, and the
/// pose sampler. Geometry never crosses this boundary.
pub struct ModelData {
    pub clips: Vec<ClipInfo>,
    pub node_count: u32,
    pub total_joint_count: u32,
    pub skins: Vec<SkinData>,
    sampler: PoseSampler,
}

impl ModelData {
    /// Model with a rest-pose sampler (identity node globals).
    pub fn new(node_count: u32, clips: Vec<ClipInfo>) -> Self {
        Self {
            clips,
            node_count,
            total_joint_count: 0,
            skins: Vec::new(),
            sampler: Box::new(|_, _, _| {}),
        }
    }

    pub fn with_skins(mut self, skins: Vec<SkinData>) -> Self {
        self.total_joint_count = skins.iter().map(|s| s.joint_count).sum();
        self.skins = skins;
        self
    }

    pub fn with_sampler(mut self, sampler: PoseSampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Evaluate node global matrices for `clip` at `time_sec` into `out`.
    /// `out` always comes back with exactly `node_count` entries; the
    /// sampler fills what it knows and the rest stay identity.
    pub fn evaluate_pose_into(&self, clip: u32, time_sec: f32, out: &mut Vec<Mat4>) {
        out.clear();
        out.resize(self.node_count as usize, Mat4::IDENTITY);
        (self.sampler)(clip, time_sec, out);
        out.resize(self.node_count as usize, Mat4::IDENTITY);
    }
}

/// Resolves model paths to handles and owns the cached model data.
#[derive(Default)]
pub struct AssetCatalog {
    models: Vec<ModelData>,
    by_path: AHashMap<String, ModelHandle>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register model data under `path` and return its handle.
    /// Registering an already-known path replaces the data in place.
    pub fn register_model(&mut self, path: &str, data: ModelData) -> ModelHandle {
        if let Some(&handle) = self.by_path.get(path) {
            self.models[handle.0 as usize] = data;
            return handle;
        }
        let handle = ModelHandle(self.models.len() as u32);
        self.models.push(data);
        self.by_path.insert(path.to_string(), handle);
        handle
    }

    /// Resolve `path` to a handle. Unknown paths intern a clip-less
    /// placeholder so repeated lookups stay stable; empty paths fail.
    pub fn load_model(&mut self, path: &str) -> Result<ModelHandle> {
        if path.is_empty() {
            return Err(EngineError::Asset("empty model path".to_string()));
        }
        if let Some(&handle) = self.by_path.get(path) {
            return Ok(handle);
        }
        Ok(self.register_model(path, ModelData::new(0, Vec::new())))
    }

    pub fn model(&self, handle: ModelHandle) -> Option<&ModelData> {
        self.models.get(handle.0 as usize)
    }
}
