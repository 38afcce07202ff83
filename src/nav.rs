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

//! 2D walkability grid for pathfinding.
//!
//! Cells map to the X/Z ground plane; world <-> grid conversion goes through
//! cell centres. Line-of-sight checks run Bresenham in grid space.

use crate::error::{EngineError, Result};

/// Walkability grid: `blocked[gz * width + gx] != 0` means blocked.
#[derive(Debug, Clone)]
pub struct NavGrid {
    pub cell_size: f32,
    pub world_min_x: f32,
    pub world_min_z: f32,
    pub width: i32,
    pub height: i32,

    /// 0 = walkable, 1 = blocked.
    pub blocked: Vec<u8>,

    /// Set when obstacles change; the builder system rebuilds and clears it.
    pub dirty: bool,
}

impl NavGrid {
    /// Build an all-walkable grid covering `[min, max]` in world space.
    /// Cell sizes below 0.1 m fall back to 2 m.
    pub fn new(cell_size: f32, min_x: f32, min_z: f32, max_x: f32, max_z: f32) -> Result<Self> {
        let cell_size = if cell_size > 0.1 { cell_size } else { 2.0 };
        let width = ((max_x - min_x) / cell_size).ceil() as i32;
        let height = ((max_z - min_z) / cell_size).ceil() as i32;
        if width < 1 || height < 1 {
            return Err(EngineError::InvalidGrid { width, height });
        }
        Ok(Self {
            cell_size,
            world_min_x: min_x,
            world_min_z: min_z,
            width,
            height,
            blocked: vec![0; (width * height) as usize],
            dirty: true,
        })
    }

    /// Reset every cell to walkable.
    pub fn clear(&mut self) {
        self.blocked.fill(0);
    }

    pub fn world_to_grid_x(&self, wx: f32) -> i32 {
        ((wx - self.world_min_x) / self.cell_size).floor() as i32
    }

    pub fn world_to_grid_z(&self, wz: f32) -> i32 {
        ((wz - self.world_min_z) / self.cell_size).floor() as i32
    }

    /// Cell centre X in world space.
    pub fn grid_to_world_x(&self, gx: i32) -> f32 {
        self.world_min_x + (gx as f32 + 0.5) * self.cell_size
    }

    /// Cell centre Z in world space.
    pub fn grid_to_world_z(&self, gz: i32) -> f32 {
        self.world_min_z + (gz as f32 + 0.5) * self.cell_size
    }

    pub fn is_valid(&self, gx: i32, gz: i32) -> bool {
        gx >= 0 && gx < self.width && gz >= 0 && gz < self.height
    }

    pub fn is_walkable(&self, gx: i32, gz: i32) -> bool {
        self.is_valid(gx, gz) && self.blocked[(gz * self.width + gx) as usize] == 0
    }

    /// Straight-line check in world space.
    pub fn line_check(&self, x0: f32, z0: f32, x1: f32, z1: f32) -> bool {
        self.line_check_grid(
            self.world_to_grid_x(x0),
            self.world_to_grid_z(z0),
            self.world_to_grid_x(x1),
            self.world_to_grid_z(z1),
        )
    }

    /// Bresenham line-of-sight entirely in grid space: every cell along the
    /// line must be walkable.
    pub fn line_check_grid(&self, mut gx0: i32, mut gz0: i32, gx1: i32, gz1: i32) -> bool {
        let dx = (gx1 - gx0).abs();
        let dz = (gz1 - gz0).abs();
        let sx = if gx0 < gx1 { 1 } else { -1 };
        let sz = if gz0 < gz1 { 1 } else { -1 };
        let mut err = dx - dz;

        loop {
            if !self.is_walkable(gx0, gz0) {
                return false;
            }
            if gx0 == gx1 && gz0 == gz1 {
                break;
            }
            let e2 = 2 * err;
            if e2 > -dz {
                err -= dz;
                gx0 += sx;
            }
            if e2 < dx {
                err += dx;
                gz0 += sz;
            }
        }
        true
    }

    /// Stamp a circular obstacle footprint: bounding box scan, then a
    /// centre-distance test per cell.
    pub fn mark_obstacle(&mut self, wx: f32, wz: f32, radius: f32) {
        let gx_min = self.world_to_grid_x(wx - radius).max(0);
        let gx_max = self.world_to_grid_x(wx + radius).min(self.width - 1);
        let gz_min = self.world_to_grid_z(wz - radius).max(0);
        let gz_max = self.world_to_grid_z(wz + radius).min(self.height - 1);

        for gz in gz_min..=gz_max {
            for gx in gx_min..=gx_max {
                let dx = self.grid_to_world_x(gx) - wx;
                let dz = self.grid_to_world_z(gz) - wz;
                if dx * dx + dz * dz <= radius * radius {
                    self.blocked[(gz * self.width + gx) as usize] = 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_10x10() -> NavGrid {
        NavGrid::new(1.0, 0.0, 0.0, 10.0, 10.0).unwrap()
    }

    #[test]
    fn rejects_degenerate_extents() {
        assert!(NavGrid::new(1.0, 0.0, 0.0, 0.0, 0.0).is_err());
        assert!(NavGrid::new(1.0, 5.0, 5.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn world_grid_round_trip_through_centres() {
        let grid = grid_10x10();
        let gx = grid.world_to_grid_x(3.4);
        assert_eq!(gx, 3);
        assert_eq!(grid.grid_to_world_x(gx), 3.5);
        assert_eq!(grid.world_to_grid_x(grid.grid_to_world_x(7)), 7);
    }

    #[test]
    fn out_of_bounds_is_unwalkable() {
        let grid = grid_10x10();
        assert!(!grid.is_walkable(-1, 0));
        assert!(!grid.is_walkable(0, 10));
        assert!(grid.is_walkable(0, 0));
    }

    #[test]
    fn line_check_crosses_open_grid() {
        let grid = grid_10x10();
        assert!(grid.line_check_grid(0, 0, 9, 9));
        assert!(grid.line_check(0.5, 0.5, 9.5, 9.5));
    }

    #[test]
    fn line_check_hits_wall() {
        let mut grid = grid_10x10();
        for gz in 0..10 {
            grid.blocked[(gz * 10 + 5) as usize] = 1;
        }
        assert!(!grid.line_check_grid(0, 4, 9, 4));
        assert!(grid.line_check_grid(0, 4, 4, 4));
    }

    #[test]
    fn mark_obstacle_stamps_circle() {
        let mut grid = grid_10x10();
        grid.mark_obstacle(5.0, 5.0, 1.5);
        assert!(!grid.is_walkable(4, 4));
        assert!(!grid.is_walkable(5, 5));
        // Corners of the bounding box lie outside the circle.
        assert!(grid.is_walkable(3, 3));
        assert!(grid.is_walkable(0, 0));
    }
}
