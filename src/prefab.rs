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

//! Prefabs: spawn templates with a resolved signature and typed defaults.
//!
//! Prefab JSON schema:
//! ```json
//! {
//!   "name": "Knight",
//!   "components": ["Position", "Velocity", "Health"],
//!   "visual": { "model": "units/knight.smodel" },
//!   "Health": { "value": 140.0 },
//!   "MoveSpeed": { "value": 4.5 }
//! }
//! ```
//! Component names become registry ids; a `visual` block adds `RenderModel`
//! and `RenderAnimation` to the signature and resolves the model path.

use ahash::AHashMap;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::archetype::ArchetypeManager;
use crate::assets::{knight_clips, AssetCatalog};
use crate::component::{
    names, AttackCooldown, AvoidanceParams, ComponentRegistry, DefaultValue, Facing, Health,
    MoveSpeed, MoveTarget, ObstacleRadius, Position, Radius, RenderAnimation, RenderModel,
    Separation, Team, Velocity,
};
use crate::error::{EngineError, Result};
use crate::mask::ComponentMask;

/// A spawn template: component signature, its archetype, and typed defaults.
#[derive(Debug, Clone)]
pub struct Prefab {
    pub name: String,
    pub signature: ComponentMask,
    pub archetype_id: u32,
    pub defaults: FxHashMap<u32, DefaultValue>,
}

impl Prefab {
    /// Drop defaults whose component id is not in the signature.
    /// Returns how many were dropped.
    pub fn validate_defaults(&mut self) -> usize {
        let before = self.defaults.len();
        let signature = self.signature.clone();
        self.defaults.retain(|&comp_id, _| signature.has(comp_id));
        before - self.defaults.len()
    }
}

/// Prefab dictionary keyed by name.
#[derive(Debug, Default)]
pub struct PrefabManager {
    prefabs: AHashMap<String, Prefab>,
}

impl PrefabManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, prefab: Prefab) {
        self.prefabs.insert(prefab.name.clone(), prefab);
    }

    pub fn get(&self, name: &str) -> Option<&Prefab> {
        self.prefabs.get(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.prefabs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.prefabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefabs.is_empty()
    }
}

/// Parse one prefab from JSON text. The signature mask is built from the
/// component name list, the archetype id resolved after any visual-block
/// additions, and defaults validated against the final signature.
///
/// A malformed file fails as a whole; a malformed *default* inside an
/// otherwise good file is logged and dropped.
pub fn load_prefab_from_json(
    json_text: &str,
    registry: &mut ComponentRegistry,
    archetypes: &mut ArchetypeManager,
    assets: &mut AssetCatalog,
) -> Result<Prefab> {
    let root: Value = serde_json::from_str(json_text)?;
    let obj = root
        .as_object()
        .ok_or_else(|| EngineError::Config("prefab root is not an object".to_string()))?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Config("prefab is missing \"name\"".to_string()))?
        .to_string();

    let mut signature = ComponentMask::new();
    if let Some(components) = obj.get("components").and_then(Value::as_array) {
        for entry in components {
            match entry.as_str() {
                Some(component_name) => signature.set(registry.ensure(component_name)),
                None => {
                    return Err(EngineError::Config(format!(
                        "prefab {name}: non-string component entry"
                    )))
                }
            }
        }
    }

    let mut defaults: FxHashMap<u32, DefaultValue> = FxHashMap::default();

    // Optional visuals: a model path adds RenderModel + RenderAnimation.
    if let Some(model_path) = obj
        .get("visual")
        .and_then(|v| v.get("model"))
        .and_then(Value::as_str)
    {
        match assets.load_model(model_path) {
            Ok(handle) => {
                let rm_id = registry.ensure(names::RENDER_MODEL);
                signature.set(rm_id);
                defaults.insert(rm_id, DefaultValue::RenderModel(RenderModel { handle }));

                let ra_id = registry.ensure(names::RENDER_ANIMATION);
                signature.set(ra_id);
                defaults.insert(
                    ra_id,
                    DefaultValue::RenderAnimation(RenderAnimation {
                        clip_index: knight_clips::IDLE,
                        time_sec: 0.0,
                        speed: 1.0,
                        looping: true,
                        playing: true,
                    }),
                );
            }
            Err(err) => {
                warn!(prefab = %name, model = model_path, %err, "failed to load model");
            }
        }
    }

    // Resolve the archetype after any signature adjustments.
    let archetype_id = archetypes.get_or_create(&signature);

    parse_default::<Position>(obj, names::POSITION, &name, registry, &mut defaults, DefaultValue::Position);
    parse_default::<Velocity>(obj, names::VELOCITY, &name, registry, &mut defaults, DefaultValue::Velocity);
    parse_default::<Health>(obj, names::HEALTH, &name, registry, &mut defaults, DefaultValue::Health);
    parse_default::<MoveTarget>(obj, names::MOVE_TARGET, &name, registry, &mut defaults, DefaultValue::MoveTarget);
    parse_default::<MoveSpeed>(obj, names::MOVE_SPEED, &name, registry, &mut defaults, DefaultValue::MoveSpeed);
    parse_default::<Radius>(obj, names::RADIUS, &name, registry, &mut defaults, DefaultValue::Radius);
    parse_default::<Separation>(obj, names::SEPARATION, &name, registry, &mut defaults, DefaultValue::Separation);
    parse_default::<AvoidanceParams>(obj, names::AVOIDANCE_PARAMS, &name, registry, &mut defaults, DefaultValue::AvoidanceParams);
    parse_default::<Facing>(obj, names::FACING, &name, registry, &mut defaults, DefaultValue::Facing);
    parse_default::<ObstacleRadius>(obj, names::OBSTACLE_RADIUS, &name, registry, &mut defaults, DefaultValue::ObstacleRadius);
    parse_default::<Team>(obj, names::TEAM, &name, registry, &mut defaults, DefaultValue::Team);
    parse_default::<AttackCooldown>(obj, names::ATTACK_COOLDOWN, &name, registry, &mut defaults, DefaultValue::AttackCooldown);
    parse_default::<RenderAnimation>(obj, names::RENDER_ANIMATION, &name, registry, &mut defaults, DefaultValue::RenderAnimation);

    let mut prefab = Prefab {
        name,
        signature,
        archetype_id,
        defaults,
    };

    let dropped = prefab.validate_defaults();
    if dropped > 0 {
        warn!(
            prefab = %prefab.name,
            dropped,
            "dropped defaults for components outside the signature"
        );
    }

    Ok(prefab)
}

fn parse_default<T: DeserializeOwned>(
    obj: &serde_json::Map<String, Value>,
    component_name: &str,
    prefab_name: &str,
    registry: &mut ComponentRegistry,
    defaults: &mut FxHashMap<u32, DefaultValue>,
    wrap: fn(T) -> DefaultValue,
) {
    let Some(value) = obj.get(component_name) else {
        return;
    };
    match serde_json::from_value::<T>(value.clone()) {
        Ok(parsed) => {
            defaults.insert(registry.ensure(component_name), wrap(parsed));
        }
        Err(err) => {
            warn!(
                prefab = prefab_name,
                component = component_name,
                %err,
                "dropping malformed default"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(text: &str) -> (Prefab, ComponentRegistry) {
        let mut registry = ComponentRegistry::new();
        let mut archetypes = ArchetypeManager::new();
        let mut assets = AssetCatalog::new();
        let prefab =
            load_prefab_from_json(text, &mut registry, &mut archetypes, &mut assets).unwrap();
        (prefab, registry)
    }

    #[test]
    fn parses_signature_and_defaults() {
        let (prefab, registry) = load(
            r#"{
                "name": "Soldier",
                "components": ["Position", "Velocity", "Health"],
                "Position": { "x": 1.0, "y": 0.0, "z": 2.0 },
                "Health": { "value": 120.0 }
            }"#,
        );

        assert_eq!(prefab.name, "Soldier");
        assert!(prefab.signature.has(registry.id(names::POSITION)));
        assert!(prefab.signature.has(registry.id(names::HEALTH)));
        assert_eq!(prefab.defaults.len(), 2);
        match prefab.defaults.get(&registry.id(names::HEALTH)) {
            Some(DefaultValue::Health(h)) => assert_eq!(h.value, 120.0),
            other => panic!("unexpected health default: {other:?}"),
        }
    }

    #[test]
    fn visual_block_extends_signature() {
        let (prefab, registry) = load(
            r#"{
                "name": "Knight",
                "components": ["Position"],
                "visual": { "model": "units/knight.smodel" }
            }"#,
        );

        assert!(prefab.signature.has(registry.id(names::RENDER_MODEL)));
        assert!(prefab.signature.has(registry.id(names::RENDER_ANIMATION)));
        match prefab.defaults.get(&registry.id(names::RENDER_ANIMATION)) {
            Some(DefaultValue::RenderAnimation(ra)) => {
                assert_eq!(ra.clip_index, knight_clips::IDLE);
                assert!(ra.playing);
                assert!(ra.looping);
            }
            other => panic!("unexpected animation default: {other:?}"),
        }
    }

    #[test]
    fn defaults_outside_signature_are_dropped() {
        let (prefab, registry) = load(
            r#"{
                "name": "Rock",
                "components": ["Position"],
                "Velocity": { "x": 1.0, "y": 0.0, "z": 0.0 }
            }"#,
        );
        assert!(!prefab.defaults.contains_key(&registry.id(names::VELOCITY)));
    }

    #[test]
    fn missing_name_is_a_config_error() {
        let mut registry = ComponentRegistry::new();
        let mut archetypes = ArchetypeManager::new();
        let mut assets = AssetCatalog::new();
        let err = load_prefab_from_json(
            r#"{ "components": ["Position"] }"#,
            &mut registry,
            &mut archetypes,
            &mut assets,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn same_component_set_shares_an_archetype() {
        let mut registry = ComponentRegistry::new();
        let mut archetypes = ArchetypeManager::new();
        let mut assets = AssetCatalog::new();

        let a = load_prefab_from_json(
            r#"{ "name": "A", "components": ["Position", "Health"] }"#,
            &mut registry,
            &mut archetypes,
            &mut assets,
        )
        .unwrap();
        let b = load_prefab_from_json(
            r#"{ "name": "B", "components": ["Health", "Position"] }"#,
            &mut registry,
            &mut archetypes,
            &mut assets,
        )
        .unwrap();
        assert_eq!(a.archetype_id, b.archetype_id);
    }
}
