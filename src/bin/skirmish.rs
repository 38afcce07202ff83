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

//! Headless skirmish demo: loads prefabs and a battle scenario (files next
//! to the executable when present, built-in data otherwise), runs the
//! simulation to a conclusion, and prints per-team stats along the way.

use std::path::Path;
use std::process::ExitCode;

use tracing::{info, warn};

use phalanx::assets::{AssetCatalog, ClipInfo, ModelData};
use phalanx::error::Result;
use phalanx::nav::NavGrid;
use phalanx::prefab::load_prefab_from_json;
use phalanx::save::SaveState;
use phalanx::scenario::spawn_from_scenario;
use phalanx::{EcsContext, SystemRunner};

const SAVE_PATH: &str = "sample_save.json";
const SCENARIO_PATH: &str = "BattleConfig.json";
const PREFAB_PATHS: &[&str] = &["Knight.json"];

const BUILTIN_KNIGHT: &str = r#"{
    "name": "Knight",
    "components": ["Position", "Velocity", "Health", "MoveTarget", "MoveSpeed",
                   "Facing", "Team", "AttackCooldown", "Radius", "Separation",
                   "AvoidanceParams", "Path", "PosePalette"],
    "visual": { "model": "units/knight.smodel" },
    "Health": { "value": 140.0 },
    "MoveSpeed": { "value": 4.5 },
    "Radius": { "r": 0.4 },
    "Separation": { "value": 0.1 },
    "AttackCooldown": { "interval": 1.2 }
}"#;

const BUILTIN_SCENARIO: &str = r#"{
    "name": "builtin-skirmish",
    "anchors": {
        "west": { "x": -25.0, "z": 0.0 },
        "east": { "x": 25.0, "z": 0.0 }
    },
    "spawnGroups": [
        {
            "id": "west-knights",
            "unitType": "Knight",
            "count": 24,
            "anchor": "west",
            "team": 0,
            "facingYawDeg": 90.0,
            "formation": { "kind": "grid", "spacing_m": "auto", "jitter_m": 0.15 }
        },
        {
            "id": "east-knights",
            "unitType": "Knight",
            "count": 24,
            "anchor": "east",
            "team": 1,
            "facingYawDeg": -90.0,
            "formation": { "kind": "grid", "spacing_m": "auto", "jitter_m": 0.15 }
        }
    ],
    "combat": { "meleeRange": 2.0, "damageMin": 12.0, "damageMax": 28.0 },
    "startZone": { "x": 0.0, "z": 0.0, "radius": 10.0 }
}"#;

fn read_or_builtin(path: &str, builtin: &'static str) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            info!(path, "loaded file");
            text
        }
        Err(_) => builtin.to_string(),
    }
}

fn run() -> Result<()> {
    let save = SaveState::load(Path::new(SAVE_PATH));
    info!(
        focus_x = save.rts_focus_x,
        focus_z = save.rts_focus_z,
        "camera state loaded"
    );

    let mut ecs = EcsContext::new();
    let mut assets = AssetCatalog::new();

    // A stand-in knight model: the real renderer would load geometry; the
    // simulation only needs clip metadata.
    let clips = (0..=66)
        .map(|i| ClipInfo {
            name: format!("clip_{i}"),
            duration_sec: 1.0,
        })
        .collect();
    assets.register_model("units/knight.smodel", ModelData::new(1, clips));

    for path in PREFAB_PATHS {
        let text = read_or_builtin(path, BUILTIN_KNIGHT);
        match load_prefab_from_json(&text, &mut ecs.components, &mut ecs.archetypes, &mut assets) {
            Ok(prefab) => {
                info!(prefab = %prefab.name, "prefab registered");
                ecs.prefabs.add(prefab);
            }
            Err(err) => warn!(path, %err, "skipping bad prefab"),
        }
    }

    let scenario_text = read_or_builtin(SCENARIO_PATH, BUILTIN_SCENARIO);
    let summary = spawn_from_scenario(&mut ecs, &scenario_text, false)?;

    let nav_grid = NavGrid::new(2.0, -100.0, -100.0, 100.0, 100.0)?;
    let mut runner = SystemRunner::new(&mut ecs, nav_grid);
    if let Some(cfg) = summary.combat {
        runner.combat_mut().apply_config(cfg);
    }

    // Kick off the two-leg charge through the start zone's centre.
    let (click_x, click_z) = summary
        .start_zone
        .map(|z| (z.x, z.z))
        .unwrap_or((0.0, 0.0));
    runner.combat_mut().start_battle_at(click_x, click_z);

    let dt = 1.0 / 60.0;
    let max_ticks = 60 * 120; // two simulated minutes
    for tick in 0..max_ticks {
        runner.update(&mut ecs, &assets, dt);

        if tick % 300 == 0 {
            let a = runner.combat().team_stats(0);
            let b = runner.combat().team_stats(1);
            info!(
                tick,
                team0_alive = a.alive,
                team0_hp = a.current_hp,
                team1_alive = b.alive,
                team1_hp = b.current_hp,
                "battle status"
            );
        }

        let a = runner.combat().team_stats(0);
        let b = runner.combat().team_stats(1);
        if (a.alive == 0 || b.alive == 0) && runner.combat().pending_deaths() == 0 && tick > 60 {
            info!(
                tick,
                team0_alive = a.alive,
                team1_alive = b.alive,
                "battle decided"
            );
            break;
        }
    }

    save.save(Path::new(SAVE_PATH))?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "initialisation failed");
            ExitCode::FAILURE
        }
    }
}
