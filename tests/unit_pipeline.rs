//! Full-pipeline movement tests: command dispatch through pathfinding,
//! steering, and integration over real ticks.

use phalanx::assets::AssetCatalog;
use phalanx::nav::NavGrid;
use phalanx::prefab::load_prefab_from_json;
use phalanx::scenario::spawn_from_scenario;
use phalanx::{EcsContext, SystemRunner};

const UNIT_PREFAB: &str = r#"{
    "name": "Scout",
    "components": ["Position", "Velocity", "MoveTarget", "MoveSpeed",
                   "Facing", "Path"],
    "MoveSpeed": { "value": 5.0 }
}"#;

const OBSTACLE_PREFAB: &str = r#"{
    "name": "Boulder",
    "components": ["Position", "Obstacle", "ObstacleRadius"],
    "ObstacleRadius": { "r": 1.0 }
}"#;

fn setup(with_obstacles: bool) -> (EcsContext, AssetCatalog, SystemRunner) {
    let mut ecs = EcsContext::new();
    let mut assets = AssetCatalog::new();

    for text in [UNIT_PREFAB, OBSTACLE_PREFAB] {
        let prefab =
            load_prefab_from_json(text, &mut ecs.components, &mut ecs.archetypes, &mut assets)
                .unwrap();
        ecs.prefabs.add(prefab);
    }

    let mut scenario = String::from(
        r#"{
        "name": "pipeline",
        "spawnGroups": [
            { "id": "scout", "unitType": "Scout", "count": 1 }"#,
    );
    if with_obstacles {
        // A wall of boulders across x = 10, z in [-8, 8].
        scenario.push_str(
            r#",
            { "id": "wall", "unitType": "Boulder", "count": 9,
              "anchor": "wall",
              "formation": { "kind": "grid", "columns": 1, "spacing_m": 2.0 } }"#,
        );
    }
    scenario.push_str(
        r#"
        ],
        "anchors": { "wall": { "x": 10.0, "z": 0.0 } }
    }"#,
    );
    spawn_from_scenario(&mut ecs, &scenario, true).unwrap();

    let nav_grid = NavGrid::new(1.0, -30.0, -30.0, 30.0, 30.0).unwrap();
    let runner = SystemRunner::new(&mut ecs, nav_grid);
    (ecs, assets, runner)
}

fn scout_position(ecs: &EcsContext) -> (f32, f32) {
    for (_, store) in ecs.stores.iter() {
        if let (Some(positions), Some(_)) = (store.positions(), store.move_speeds()) {
            if store.size() == 1 {
                return (positions[0].x, positions[0].z);
            }
        }
    }
    panic!("scout not found");
}

#[test]
fn commanded_unit_walks_to_the_click() {
    let (mut ecs, assets, mut runner) = setup(false);
    runner.set_global_move_target(15.0, 0.0, 12.0);

    let dt = 1.0 / 30.0;
    for _ in 0..400 {
        runner.update(&mut ecs, &assets, dt);
    }

    let (x, z) = scout_position(&ecs);
    let dist = ((x - 15.0).powi(2) + (z - 12.0).powi(2)).sqrt();
    // Arrival radius is 1 m; the single-unit formation offset is zero.
    assert!(dist <= 1.2, "scout stopped {dist} m from the target");
}

#[test]
fn unit_detours_around_a_wall() {
    let (mut ecs, assets, mut runner) = setup(true);
    // Scout starts at the origin; the target sits on the far side of the
    // boulder wall.
    runner.set_global_move_target(20.0, 0.0, 0.0);

    let dt = 1.0 / 30.0;
    let mut max_deviation = 0.0f32;
    for _ in 0..900 {
        runner.update(&mut ecs, &assets, dt);
        let (_, z) = scout_position(&ecs);
        max_deviation = max_deviation.max(z.abs());
    }

    // The straight line to the target is blocked.
    assert!(!runner.nav_grid().line_check(0.0, 0.0, 20.0, 0.0));

    let (x, z) = scout_position(&ecs);
    let dist = ((x - 20.0).powi(2) + z.powi(2)).sqrt();
    assert!(dist <= 1.2, "scout stopped {dist} m from the target");
    // It had to leave the straight line to get there.
    assert!(
        max_deviation > 1.5,
        "scout never detoured (max |z| = {max_deviation})"
    );
}

#[test]
fn idle_unit_generates_no_work() {
    let (mut ecs, assets, mut runner) = setup(false);

    let dt = 1.0 / 30.0;
    for _ in 0..10 {
        runner.update(&mut ecs, &assets, dt);
    }
    let before = scout_position(&ecs);
    for _ in 0..100 {
        runner.update(&mut ecs, &assets, dt);
    }
    let after = scout_position(&ecs);
    assert_eq!(before, after, "unit drifted without a move order");
}
