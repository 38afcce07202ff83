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

//! Entity handles and the entity -> (archetype, row) table.

use rustc_hash::FxHashMap;

/// Compact entity handle with a generation check to detect stale references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    pub index: u32,
    pub generation: u32,
}

impl Entity {
    pub const INVALID: Entity = Entity {
        index: u32::MAX,
        generation: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.index != u32::MAX
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Which archetype store and row hold this entity's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRecord {
    pub archetype_id: u32,
    pub row: u32,
}

/// Creates and destroys entity handles and tracks store membership.
///
/// Indices are recycled through a freelist; every reuse bumps the
/// generation so stale handles fail `is_alive` and `find`.
#[derive(Debug, Default)]
pub struct EntityTable {
    generations: Vec<u32>,
    free: Vec<u32>,
    records: FxHashMap<u32, EntityRecord>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new entity handle, reusing a free index when available.
    pub fn create(&mut self) -> Entity {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.generations.push(0);
                (self.generations.len() - 1) as u32
            }
        };
        // A fresh generation marks the handle as alive.
        self.generations[index as usize] += 1;
        Entity {
            index,
            generation: self.generations[index as usize],
        }
    }

    /// Destroy an entity: erase its record and invalidate the handle
    /// via a generation bump on next reuse.
    pub fn destroy(&mut self, entity: Entity) {
        if !self.is_alive(entity) {
            return;
        }
        self.records.remove(&entity.index);
        self.generations[entity.index as usize] += 1;
        self.free.push(entity.index);
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        (entity.index as usize) < self.generations.len()
            && self.generations[entity.index as usize] == entity.generation
    }

    /// Attach the entity to an archetype store and row.
    pub fn attach(&mut self, entity: Entity, archetype_id: u32, row: u32) {
        if !self.is_alive(entity) {
            return;
        }
        self.records
            .insert(entity.index, EntityRecord { archetype_id, row });
    }

    /// Remove the entity's store mapping without destroying the handle.
    pub fn detach(&mut self, entity: Entity) {
        if !self.is_alive(entity) {
            return;
        }
        self.records.remove(&entity.index);
    }

    /// Find the entity's record; `None` for dead or unattached handles.
    pub fn find(&self, entity: Entity) -> Option<EntityRecord> {
        if !self.is_alive(entity) {
            return None;
        }
        self.records.get(&entity.index).copied()
    }

    /// Number of live entity handles.
    pub fn live_count(&self) -> usize {
        self.generations.len() - self.free.len()
    }
}
