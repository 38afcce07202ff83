//! Dynamic component mask backed by 64-bit words.
//! Bit `id` is set when the component with that registry id is present.
//! Masks stay inline (no heap) until a component id crosses 128.

use std::fmt::Write as _;

use smallvec::SmallVec;

/// Set of component ids identifying an archetype signature or a query filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentMask {
    words: SmallVec<[u64; 2]>,
}

impl ComponentMask {
    /// Empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mask from a list of component ids.
    pub fn from_ids(ids: &[u32]) -> Self {
        let mut mask = Self::new();
        for &id in ids {
            mask.set(id);
        }
        mask
    }

    /// Set the bit for `comp_id`, growing the word vector as needed.
    pub fn set(&mut self, comp_id: u32) {
        let (word, bit) = bit_pos(comp_id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << bit;
    }

    /// Clear the bit for `comp_id`.
    pub fn clear(&mut self, comp_id: u32) {
        let (word, bit) = bit_pos(comp_id);
        if word < self.words.len() {
            self.words[word] &= !(1u64 << bit);
        }
    }

    /// Check whether the bit for `comp_id` is set.
    pub fn has(&self, comp_id: u32) -> bool {
        let (word, bit) = bit_pos(comp_id);
        if word >= self.words.len() {
            return false;
        }
        (self.words[word] & (1u64 << bit)) != 0
    }

    /// True if every bit in `rhs` is also set in `self`.
    pub fn contains_all(&self, rhs: &Self) -> bool {
        let n = self.words.len().max(rhs.words.len());
        for i in 0..n {
            let a = self.words.get(i).copied().unwrap_or(0);
            let b = rhs.words.get(i).copied().unwrap_or(0);
            if (a & b) != b {
                return false;
            }
        }
        true
    }

    /// True if no bit in `rhs` is set in `self`.
    pub fn contains_none(&self, rhs: &Self) -> bool {
        let n = self.words.len().max(rhs.words.len());
        for i in 0..n {
            let a = self.words.get(i).copied().unwrap_or(0);
            let b = rhs.words.get(i).copied().unwrap_or(0);
            if (a & b) != 0 {
                return false;
            }
        }
        true
    }

    /// Required/excluded match in one call.
    pub fn matches(&self, required: &Self, excluded: &Self) -> bool {
        self.contains_all(required) && self.contains_none(excluded)
    }

    /// Union of `self` and a single extra bit, as a new mask.
    pub fn with(&self, comp_id: u32) -> Self {
        let mut mask = self.clone();
        mask.set(comp_id);
        mask
    }

    /// Canonical string key: hex of the words, high word first.
    /// Trailing zero words do not change the key, so equal sets always
    /// produce equal keys regardless of capacity history.
    pub fn key(&self) -> String {
        let top = self
            .words
            .iter()
            .rposition(|&w| w != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        if top == 0 {
            return "0".to_string();
        }
        let mut out = String::with_capacity(top * 16);
        for i in (0..top).rev() {
            let _ = write!(out, "{:016x}", self.words[i]);
        }
        out
    }

    /// Backing words, low word first.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Iterator over set bit indices in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros();
                w &= w - 1;
                Some(wi as u32 * 64 + bit)
            })
        })
    }
}

fn bit_pos(comp_id: u32) -> (usize, u32) {
    ((comp_id / 64) as usize, comp_id % 64)
}
