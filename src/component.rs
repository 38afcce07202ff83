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

//! Component data types, the name <-> id registry, and typed defaults.
//!
//! Components are referred to by name in data files (prefabs, scenarios) and
//! by dense `u32` id everywhere else. The registry interns names in
//! first-come order; ids are stable for the process lifetime.

use glam::{Mat4, Vec2};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::assets::ModelHandle;
use crate::mask::ComponentMask;

/// Well-known component names used by the built-in systems.
pub mod names {
    pub const POSITION: &str = "Position";
    pub const VELOCITY: &str = "Velocity";
    pub const HEALTH: &str = "Health";
    pub const MOVE_TARGET: &str = "MoveTarget";
    pub const MOVE_SPEED: &str = "MoveSpeed";
    pub const RADIUS: &str = "Radius";
    pub const SEPARATION: &str = "Separation";
    pub const AVOIDANCE_PARAMS: &str = "AvoidanceParams";
    pub const RENDER_MODEL: &str = "RenderModel";
    pub const RENDER_ANIMATION: &str = "RenderAnimation";
    pub const FACING: &str = "Facing";
    pub const OBSTACLE_RADIUS: &str = "ObstacleRadius";
    pub const PATH: &str = "Path";
    pub const POSE_PALETTE: &str = "PosePalette";
    pub const TEAM: &str = "Team";
    pub const ATTACK_COOLDOWN: &str = "AttackCooldown";

    // Tags: present only in the signature mask, no column storage.
    pub const SELECTED: &str = "Selected";
    pub const DEAD: &str = "Dead";
    pub const DISABLED: &str = "Disabled";
    pub const OBSTACLE: &str = "Obstacle";
}

// -----------------------
// Component data types
// -----------------------

/// Spatial position in world space.
/// Gameplay convention: X/Z is the ground plane (meters), Y is height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Linear velocity (units per second), world space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Hit points; a unit dies when this drops to zero or below.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub value: f32,
}

impl Default for Health {
    fn default() -> Self {
        Self { value: 100.0 }
    }
}

/// Target position for movement. `active == 0` means no order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveTarget {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub active: u8,
}

/// Movement speed in meters per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveSpeed {
    pub value: f32,
}

impl Default for MoveSpeed {
    fn default() -> Self {
        Self { value: 5.0 }
    }
}

/// Physical radius used by local avoidance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Radius {
    pub r: f32,
}

impl Default for Radius {
    fn default() -> Self {
        Self { r: 0.07 }
    }
}

/// Desired extra spacing beyond physical radii (meters).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Separation {
    pub value: f32,
}

/// Tunables for local avoidance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvoidanceParams {
    pub strength: f32,
    pub max_accel: f32,
    pub blend: f32,
}

impl Default for AvoidanceParams {
    fn default() -> Self {
        Self {
            strength: 1.0,
            max_accel: 0.9,
            blend: 0.55,
        }
    }
}

/// Handle to a renderable model asset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderModel {
    pub handle: ModelHandle,
}

/// Per-entity animation state (node TRS sampling; no blending).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderAnimation {
    pub clip_index: u32,
    pub time_sec: f32,
    pub speed: f32,
    pub looping: bool,
    pub playing: bool,
}

impl Default for RenderAnimation {
    fn default() -> Self {
        Self {
            clip_index: 0,
            time_sec: 0.0,
            speed: 1.0,
            looping: false,
            playing: false,
        }
    }
}

/// Entity facing: rotation around the Y axis in radians.
/// 0 faces +Z, PI/2 faces +X.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Facing {
    pub yaw: f32,
}

/// Footprint radius of a static obstacle, used by the nav-grid builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObstacleRadius {
    pub r: f32,
}

/// Planned route: waypoints in world space, consumed front to back.
/// `count == 0` with `valid == true` means the target is directly visible.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Path {
    pub waypoints: [Vec2; Path::MAX_WAYPOINTS],
    pub count: u32,
    pub current: u32,
    pub valid: bool,
}

impl Path {
    pub const MAX_WAYPOINTS: usize = 16;
}

/// Cached node and joint matrices produced by the pose-update system.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PosePalette {
    pub node_palette: Vec<Mat4>,
    pub joint_palette: Vec<Mat4>,
    pub node_count: u32,
    pub joint_count: u32,
}

/// Team membership for combat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: u8,
}

/// Melee attack cooldown. `interval` is the per-unit attack period;
/// `timer` counts down to the next allowed swing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackCooldown {
    pub timer: f32,
    pub interval: f32,
}

impl Default for AttackCooldown {
    fn default() -> Self {
        Self {
            timer: 0.0,
            interval: 1.2,
        }
    }
}

/// Typed default per component id, applied to freshly created rows.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Position(Position),
    Velocity(Velocity),
    Health(Health),
    MoveTarget(MoveTarget),
    MoveSpeed(MoveSpeed),
    Radius(Radius),
    Separation(Separation),
    AvoidanceParams(AvoidanceParams),
    RenderModel(RenderModel),
    RenderAnimation(RenderAnimation),
    Facing(Facing),
    ObstacleRadius(ObstacleRadius),
    Team(Team),
    AttackCooldown(AttackCooldown),
}

// -----------------------
// Component registry
// -----------------------

/// Interns component names to stable dense ids, first-come order.
/// Ids are permanent within a session; there is no removal.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    name_to_id: FxHashMap<String, u32>,
    id_to_name: Vec<String>,
}

impl ComponentRegistry {
    /// Sentinel returned by [`Self::id`] for unknown names.
    pub const INVALID_ID: u32 = u32::MAX;

    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing id for `name` or assign the next free one.
    pub fn ensure(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = self.id_to_name.len() as u32;
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.push(name.to_string());
        id
    }

    /// Look up an id by name; `INVALID_ID` if unknown.
    pub fn id(&self, name: &str) -> u32 {
        self.name_to_id
            .get(name)
            .copied()
            .unwrap_or(Self::INVALID_ID)
    }

    /// Look up the original name by id.
    pub fn name(&self, id: u32) -> Option<&str> {
        self.id_to_name.get(id as usize).map(String::as_str)
    }

    /// Total number of registered components.
    pub fn count(&self) -> u32 {
        self.id_to_name.len() as u32
    }

    /// Build a signature mask from a list of component names,
    /// registering any that are new.
    pub fn mask_from_names(&mut self, component_names: &[&str]) -> ComponentMask {
        let mut mask = ComponentMask::new();
        for name in component_names {
            mask.set(self.ensure(name));
        }
        mask
    }
}
