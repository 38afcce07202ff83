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

//! Phalanx - data-oriented RTS engine core.
//!
//! An archetype-partitioned column-store ECS with dynamic component masks,
//! dirty-tracking queries, prefab spawning, and the gameplay pipeline that
//! drives mass-unit combat: A* pathfinding, steering, spatial hashing, and
//! an auto-combat system with deferred mutation.

pub mod archetype;
pub mod assets;
pub mod component;
pub mod context;
pub mod entity;
pub mod error;
pub mod mask;
pub mod nav;
pub mod prefab;
pub mod query;
pub mod runner;
pub mod save;
pub mod scenario;
pub mod spawn;
pub mod store;
pub mod systems;

// Re-exports for convenience
pub use archetype::{Archetype, ArchetypeManager};
pub use assets::{AssetCatalog, ModelData, ModelHandle};
pub use component::{ComponentRegistry, DefaultValue};
pub use context::EcsContext;
pub use entity::{Entity, EntityRecord, EntityTable};
pub use error::{EngineError, Result};
pub use mask::ComponentMask;
pub use nav::NavGrid;
pub use prefab::{load_prefab_from_json, Prefab, PrefabManager};
pub use query::{QueryEngine, QueryId, INVALID_QUERY};
pub use runner::SystemRunner;
pub use save::SaveState;
pub use scenario::{spawn_from_scenario, ScenarioSummary, StartZone};
pub use spawn::{spawn_from_prefab, SpawnResult};
pub use store::{ArchetypeStore, StoreManager};
