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

//! Gameplay systems. Each system declares required/excluded component masks
//! at construction and updates over matching stores; the runner sequences
//! them in a fixed per-tick order.

pub mod animation;
pub mod avoidance;
pub mod combat;
pub mod command;
pub mod movement;
pub mod nav_builder;
pub mod pathfinding;
pub mod pose;
pub mod spatial;
pub mod steering;

pub use animation::CharacterAnimationSystem;
pub use avoidance::LocalAvoidanceSystem;
pub use combat::{CombatAnimSet, CombatConfig, CombatSystem, TeamStats};
pub use command::CommandSystem;
pub use movement::MovementSystem;
pub use nav_builder::NavGridBuilderSystem;
pub use pathfinding::PathfindingSystem;
pub use pose::PoseUpdateSystem;
pub use spatial::SpatialIndexSystem;
pub use steering::SteeringSystem;
