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

//! Compiled queries with cached archetype matches and per-row dirty bits.
//!
//! A query is compiled once against the stores that exist at creation time;
//! [`QueryEngine::on_store_created`] keeps the match lists current as new
//! stores appear. Dirty-enabled queries carry one bitset per matching store,
//! parallel to the match list; systems consume-and-clear those bits to visit
//! only rows that changed.

use rustc_hash::FxHashMap;

use crate::mask::ComponentMask;
use crate::store::StoreManager;

/// Identifier of a compiled query.
pub type QueryId = u32;

/// A query with no valid id; used as the "not created yet" sentinel.
pub const INVALID_QUERY: QueryId = u32::MAX;

/// Compiled query: filter masks plus the cached list of matching archetypes.
#[derive(Debug, Default)]
pub struct Query {
    pub required: ComponentMask,
    pub excluded: ComponentMask,
    pub matching_archetype_ids: Vec<u32>,

    // Dirty tracking (optional).
    pub dirty_enabled: bool,
    pub dirty_components: ComponentMask,

    /// O(1) lookup of a matching archetype's position in the match list.
    archetype_to_match_index: FxHashMap<u32, u32>,

    /// Parallel to `matching_archetype_ids`: one bitset per matching store.
    /// Bit `r` of `dirty_bits[m]` set means row `r` of that store is dirty.
    dirty_bits: Vec<Vec<u64>>,
}

impl Query {
    fn match_index(&self, archetype_id: u32) -> Option<usize> {
        self.archetype_to_match_index
            .get(&archetype_id)
            .map(|&m| m as usize)
    }
}

/// Owns all compiled queries and routes dirty marks to them.
#[derive(Debug, Default)]
pub struct QueryEngine {
    queries: Vec<Query>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a query against all currently live stores. An archetype
    /// matches when its signature contains every required bit and none of
    /// the excluded ones; match order is store-creation order.
    pub fn create_query(
        &mut self,
        required: &ComponentMask,
        excluded: &ComponentMask,
        stores: &StoreManager,
    ) -> QueryId {
        let id = self.queries.len() as QueryId;
        let mut query = Query {
            required: required.clone(),
            excluded: excluded.clone(),
            ..Query::default()
        };

        for (archetype_id, store) in stores.iter() {
            if !store.signature().matches(required, excluded) {
                continue;
            }
            let match_idx = query.matching_archetype_ids.len() as u32;
            query.matching_archetype_ids.push(archetype_id);
            query.archetype_to_match_index.insert(archetype_id, match_idx);
        }

        self.queries.push(query);
        id
    }

    /// As [`Self::create_query`], plus dirty tracking on `dirty_components`.
    /// Every row that already exists in a matching store is pre-marked dirty
    /// so the first consumer sees the full current population.
    pub fn create_dirty_query(
        &mut self,
        required: &ComponentMask,
        excluded: &ComponentMask,
        dirty_components: &ComponentMask,
        stores: &StoreManager,
    ) -> QueryId {
        let id = self.create_query(required, excluded, stores);
        let query = &mut self.queries[id as usize];
        query.dirty_enabled = true;
        query.dirty_components = dirty_components.clone();

        query.dirty_bits.clear();
        query
            .dirty_bits
            .resize(query.matching_archetype_ids.len(), Vec::new());

        for (m, &archetype_id) in query.matching_archetype_ids.iter().enumerate() {
            let n = stores.get(archetype_id).map(|s| s.size()).unwrap_or(0);
            let bits = &mut query.dirty_bits[m];
            ensure_bitset_len(bits, n);
            for row in 0..n {
                set_bit(bits, row);
            }
        }

        id
    }

    pub fn get(&self, id: QueryId) -> Option<&Query> {
        self.queries.get(id as usize)
    }

    /// Cached matching archetype ids for `id`; empty for unknown queries.
    pub fn matching_ids(&self, id: QueryId) -> &[u32] {
        self.queries
            .get(id as usize)
            .map(|q| q.matching_archetype_ids.as_slice())
            .unwrap_or(&[])
    }

    /// Register a freshly created store with every query whose predicate
    /// accepts its signature. New stores start with zero rows, so a
    /// dirty-enabled query just gains an empty bitset; rows become dirty
    /// through explicit marks (spawn marks the whole row).
    pub fn on_store_created(&mut self, archetype_id: u32, signature: &ComponentMask) {
        for query in &mut self.queries {
            if !signature.matches(&query.required, &query.excluded) {
                continue;
            }
            let match_idx = query.matching_archetype_ids.len() as u32;
            query.matching_archetype_ids.push(archetype_id);
            query.archetype_to_match_index.insert(archetype_id, match_idx);
            if query.dirty_enabled {
                query.dirty_bits.push(Vec::new());
            }
        }
    }

    /// Set bit `row` for every dirty-enabled query that watches `comp_id`
    /// and matches `archetype_id`. Bitsets grow on demand; a row index past
    /// the current length is never an error.
    pub fn mark_dirty_component(
        &mut self,
        comp_id: u32,
        archetype_id: u32,
        row: u32,
        store_size: u32,
    ) {
        for query in &mut self.queries {
            if !query.dirty_enabled || !query.dirty_components.has(comp_id) {
                continue;
            }
            let Some(m) = query.match_index(archetype_id) else {
                continue;
            };
            let bits = &mut query.dirty_bits[m];
            ensure_bitset_len(bits, store_size);
            set_bit(bits, row);
        }
    }

    /// Set bit `row` for every dirty-enabled query matching the store,
    /// regardless of its dirty-component set. Used when a whole row appears
    /// (prefab spawn, tag migration).
    pub fn mark_row_dirty_all(&mut self, archetype_id: u32, row: u32, store_size: u32) {
        for query in &mut self.queries {
            if !query.dirty_enabled {
                continue;
            }
            let Some(m) = query.match_index(archetype_id) else {
                continue;
            };
            let bits = &mut query.dirty_bits[m];
            ensure_bitset_len(bits, store_size);
            set_bit(bits, row);
        }
    }

    /// Pop and clear the dirty rows for `(id, archetype_id)`, ascending.
    /// Idempotent: an immediate second call returns nothing.
    pub fn consume_dirty_rows(&mut self, id: QueryId, archetype_id: u32) -> Vec<u32> {
        let mut rows = Vec::new();
        self.consume_dirty_rows_into(id, archetype_id, &mut rows);
        rows
    }

    /// Buffer-reusing variant of [`Self::consume_dirty_rows`]; clears `out`
    /// and fills it with the dirty row indices in ascending order.
    pub fn consume_dirty_rows_into(&mut self, id: QueryId, archetype_id: u32, out: &mut Vec<u32>) {
        out.clear();
        let Some(query) = self.queries.get_mut(id as usize) else {
            return;
        };
        if !query.dirty_enabled {
            return;
        }
        let Some(m) = query.match_index(archetype_id) else {
            return;
        };
        let bits = &mut query.dirty_bits[m];
        for (w, word) in bits.iter_mut().enumerate() {
            let mut value = *word;
            while value != 0 {
                let bit = value.trailing_zeros();
                out.push(w as u32 * 64 + bit);
                value &= value - 1;
            }
            *word = 0;
        }
    }

    /// Repair dirty bits after a swap-remove in `archetype_id`: the entity
    /// from `last_row` now lives in `removed_row`, so bit `removed_row`
    /// takes the old value of bit `last_row` and bit `last_row` clears.
    pub fn on_row_swap_removed(&mut self, archetype_id: u32, removed_row: u32, last_row: u32) {
        for query in &mut self.queries {
            if !query.dirty_enabled {
                continue;
            }
            let Some(m) = query.match_index(archetype_id) else {
                continue;
            };
            let bits = &mut query.dirty_bits[m];
            let last_was_dirty = get_bit(bits, last_row);
            clear_bit(bits, last_row);
            if removed_row != last_row {
                if last_was_dirty {
                    ensure_bitset_len(bits, removed_row + 1);
                    set_bit(bits, removed_row);
                } else {
                    clear_bit(bits, removed_row);
                }
            }
        }
    }

    pub fn count(&self) -> u32 {
        self.queries.len() as u32
    }
}

fn ensure_bitset_len(bits: &mut Vec<u64>, row_count: u32) {
    let need = (row_count as usize).div_ceil(64);
    if bits.len() < need {
        bits.resize(need, 0);
    }
}

fn set_bit(bits: &mut Vec<u64>, row: u32) {
    let (word, bit) = ((row / 64) as usize, row % 64);
    if word >= bits.len() {
        bits.resize(word + 1, 0);
    }
    bits[word] |= 1u64 << bit;
}

fn clear_bit(bits: &mut [u64], row: u32) {
    let (word, bit) = ((row / 64) as usize, row % 64);
    if word < bits.len() {
        bits[word] &= !(1u64 << bit);
    }
}

fn get_bit(bits: &[u64], row: u32) -> bool {
    let (word, bit) = ((row / 64) as usize, row % 64);
    word < bits.len() && (bits[word] & (1u64 << bit)) != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{names, ComponentRegistry};
    use crate::entity::Entity;

    fn setup(
        store_names: &[&str],
        rows: u32,
    ) -> (ComponentRegistry, StoreManager, QueryEngine, u32) {
        let mut reg = ComponentRegistry::new();
        let sig = reg.mask_from_names(store_names);
        let mut stores = StoreManager::new();
        let archetype_id = 0;
        let store = stores.get_or_create(archetype_id, &sig, &mut reg, |_, _| {});
        for i in 0..rows {
            store.create_row(Entity {
                index: i,
                generation: 1,
            });
        }
        (reg, stores, QueryEngine::new(), archetype_id)
    }

    #[test]
    fn query_matches_on_required_and_excluded() {
        let (mut reg, mut stores, mut queries, _) = setup(&[names::POSITION, names::VELOCITY], 0);

        // Second store carrying the excluded tag.
        let dead_sig = reg.mask_from_names(&[names::POSITION, names::DEAD]);
        stores.get_or_create(1, &dead_sig, &mut reg, |_, _| {});

        let required = ComponentMask::from_ids(&[reg.id(names::POSITION)]);
        let excluded = ComponentMask::from_ids(&[reg.id(names::DEAD)]);
        let q = queries.create_query(&required, &excluded, &stores);

        assert_eq!(queries.matching_ids(q), &[0]);
    }

    #[test]
    fn dirty_query_premarks_existing_rows() {
        let (reg, stores, mut queries, archetype_id) = setup(&[names::POSITION], 5);

        let required = ComponentMask::from_ids(&[reg.id(names::POSITION)]);
        let dirty = required.clone();
        let q = queries.create_dirty_query(&required, &ComponentMask::new(), &dirty, &stores);

        let rows = queries.consume_dirty_rows(q, archetype_id);
        assert_eq!(rows, vec![0, 1, 2, 3, 4]);

        // Consume-and-clear: second call is empty.
        assert!(queries.consume_dirty_rows(q, archetype_id).is_empty());
    }

    #[test]
    fn marks_after_consume_survive_to_next_consume() {
        let (reg, stores, mut queries, archetype_id) = setup(&[names::POSITION], 3);
        let position_id = reg.id(names::POSITION);

        let required = ComponentMask::from_ids(&[position_id]);
        let q = queries.create_dirty_query(&required, &ComponentMask::new(), &required, &stores);
        queries.consume_dirty_rows(q, archetype_id);

        queries.mark_dirty_component(position_id, archetype_id, 2, 3);
        assert_eq!(queries.consume_dirty_rows(q, archetype_id), vec![2]);
    }

    #[test]
    fn unrelated_component_does_not_mark() {
        let (mut reg, stores, mut queries, archetype_id) = setup(&[names::POSITION], 2);
        let position_id = reg.id(names::POSITION);
        let other_id = reg.ensure(names::HEALTH);

        let required = ComponentMask::from_ids(&[position_id]);
        let dirty = ComponentMask::from_ids(&[position_id]);
        let q = queries.create_dirty_query(&required, &ComponentMask::new(), &dirty, &stores);
        queries.consume_dirty_rows(q, archetype_id);

        queries.mark_dirty_component(other_id, archetype_id, 0, 2);
        assert!(queries.consume_dirty_rows(q, archetype_id).is_empty());
    }

    #[test]
    fn excluded_store_receives_no_marks() {
        let (mut reg, mut stores, mut queries, _) = setup(&[names::POSITION], 1);
        let position_id = reg.id(names::POSITION);

        let dead_sig = reg.mask_from_names(&[names::POSITION, names::DEAD]);
        let dead_store = stores.get_or_create(1, &dead_sig, &mut reg, |_, _| {});
        dead_store.create_row(Entity {
            index: 9,
            generation: 1,
        });

        let required = ComponentMask::from_ids(&[position_id]);
        let excluded = ComponentMask::from_ids(&[reg.id(names::DEAD)]);
        let q = queries.create_dirty_query(&required, &excluded, &required, &stores);
        queries.consume_dirty_rows(q, 0);

        // Marks against the excluded store fall on the floor.
        queries.mark_dirty_component(position_id, 1, 0, 1);
        assert!(queries.consume_dirty_rows(q, 1).is_empty());
    }

    #[test]
    fn new_store_registers_incrementally() {
        let (mut reg, mut stores, mut queries, _) = setup(&[names::POSITION], 0);
        let position_id = reg.id(names::POSITION);

        let required = ComponentMask::from_ids(&[position_id]);
        let q = queries.create_dirty_query(&required, &ComponentMask::new(), &required, &stores);

        let sig = reg.mask_from_names(&[names::POSITION, names::HEALTH]);
        let engine = &mut queries;
        stores.get_or_create(1, &sig, &mut reg, |id, s| engine.on_store_created(id, s));

        assert_eq!(queries.matching_ids(q), &[0, 1]);

        // Rows in the new store become dirty only via explicit marks.
        assert!(queries.consume_dirty_rows(q, 1).is_empty());
        queries.mark_row_dirty_all(1, 0, 1);
        assert_eq!(queries.consume_dirty_rows(q, 1), vec![0]);
    }

    #[test]
    fn swap_remove_transfers_last_rows_bit() {
        let (reg, stores, mut queries, archetype_id) = setup(&[names::POSITION], 4);
        let position_id = reg.id(names::POSITION);

        let required = ComponentMask::from_ids(&[position_id]);
        let q = queries.create_dirty_query(&required, &ComponentMask::new(), &required, &stores);
        queries.consume_dirty_rows(q, archetype_id);

        // Mark only the last row dirty, then "remove" row 1: the bit must
        // follow the relocated row.
        queries.mark_dirty_component(position_id, archetype_id, 3, 4);
        queries.on_row_swap_removed(archetype_id, 1, 3);
        assert_eq!(queries.consume_dirty_rows(q, archetype_id), vec![1]);

        // A clean last row must scrub any stale bit left on the removed row.
        queries.mark_dirty_component(position_id, archetype_id, 1, 3);
        queries.on_row_swap_removed(archetype_id, 1, 2);
        assert!(queries.consume_dirty_rows(q, archetype_id).is_empty());
    }
}
