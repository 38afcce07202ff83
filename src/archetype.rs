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

//! Archetype registry: signature -> dense archetype id interning.

use rustc_hash::FxHashMap;

use crate::mask::ComponentMask;

/// An archetype: a dense id plus the component signature it stands for.
#[derive(Debug, Clone)]
pub struct Archetype {
    pub id: u32,
    pub signature: ComponentMask,
}

/// Assigns archetype ids by first-seen signature key.
/// Ids are dense (`0..n`) and stable for the process lifetime.
#[derive(Debug, Default)]
pub struct ArchetypeManager {
    key_to_id: FxHashMap<String, u32>,
    archetypes: Vec<Archetype>,
}

impl ArchetypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing id for `signature` or create a new archetype.
    /// Deduplicates on the mask's canonical key, so equal sets always map
    /// to the same id.
    pub fn get_or_create(&mut self, signature: &ComponentMask) -> u32 {
        let key = signature.key();
        if let Some(&id) = self.key_to_id.get(&key) {
            return id;
        }
        let id = self.archetypes.len() as u32;
        self.key_to_id.insert(key, id);
        self.archetypes.push(Archetype {
            id,
            signature: signature.clone(),
        });
        id
    }

    /// Retrieve archetype info by id.
    pub fn get(&self, id: u32) -> Option<&Archetype> {
        self.archetypes.get(id as usize)
    }

    pub fn count(&self) -> u32 {
        self.archetypes.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let mut mgr = ArchetypeManager::new();
        let sig = ComponentMask::from_ids(&[0, 2, 5]);
        let id = mgr.get_or_create(&sig);
        assert_eq!(mgr.get_or_create(&sig), id);
        assert_eq!(mgr.count(), 1);

        // Insertion-order-independent: same set, same id.
        let same = ComponentMask::from_ids(&[5, 0, 2]);
        assert_eq!(mgr.get_or_create(&same), id);
    }

    #[test]
    fn ids_are_dense() {
        let mut mgr = ArchetypeManager::new();
        let a = mgr.get_or_create(&ComponentMask::from_ids(&[0]));
        let b = mgr.get_or_create(&ComponentMask::from_ids(&[1]));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert!(mgr.get(b).is_some());
        assert!(mgr.get(2).is_none());
    }
}
