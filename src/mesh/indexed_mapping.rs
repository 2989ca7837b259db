use super::NO_ID;

#[cfg(feature = "json_export")]
use json::JsonValue;
use rayon::prelude::*;
use std::ops::{Index, Range};

/// Array-of-arrays adjacency map stored in compressed row form.
///
/// The values related to `key` live in `values[offsets[key]..offsets[key + 1]]`. Instances
/// are only ever created with exact capacity: first count the number of values for each
/// key, then fill the bins (see [`MappingFiller`] and [`IndexedMapping::par_from_fn`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedMapping {
    offsets: Vec<usize>,
    values: Vec<usize>,
}

impl IndexedMapping {
    /// Allocate exact-capacity bins for the given per-key counts, to be filled sequentially
    pub fn from_counts(counts: &[usize]) -> MappingFiller {
        let offsets = prefix_offsets(counts);
        let total = offsets[counts.len()];

        MappingFiller {
            cursors: offsets[..counts.len()].to_vec(),
            offsets,
            values: vec![NO_ID; total],
        }
    }

    /// Allocate exact-capacity bins and fill each one in parallel.
    ///
    /// `fill(key, bin)` must write every slot of `bin` (its length is `counts[key]`).
    pub fn par_from_fn<F>(counts: &[usize], fill: F) -> Self
    where
        F: Fn(usize, &mut [usize]) + Sync + Send,
    {
        let offsets = prefix_offsets(counts);
        let mut values = vec![NO_ID; offsets[counts.len()]];

        let mut bins: Vec<&mut [usize]> = Vec::with_capacity(counts.len());
        let mut rest = values.as_mut_slice();
        for &count in counts {
            let (bin, tail) = std::mem::take(&mut rest).split_at_mut(count);
            bins.push(bin);
            rest = tail;
        }

        bins.into_par_iter()
            .enumerate()
            .for_each(|(key, bin)| fill(key, bin));

        assert!(
            !values.par_iter().any(|v| *v == NO_ID),
            "A bin was left partially empty; cannot build IndexedMapping!"
        );

        Self { offsets, values }
    }

    /// Every key maps to exactly `arity` values taken in order from `values`
    pub fn uniform(arity: usize, values: Vec<usize>) -> Self {
        assert!(
            arity > 0 && values.len() % arity == 0,
            "Number of values must be a multiple of the arity; cannot build uniform IndexedMapping!"
        );

        let offsets = (0..=(values.len() / arity)).map(|k| k * arity).collect();
        Self { offsets, values }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of stored values
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, key: usize) -> &[usize] {
        &self.values[self.offsets[key]..self.offsets[key + 1]]
    }

    /// Positions of the values of `key` within the flat value array
    pub fn range(&self, key: usize) -> Range<usize> {
        self.offsets[key]..self.offsets[key + 1]
    }

    pub fn size_of(&self, key: usize) -> usize {
        self.offsets[key + 1] - self.offsets[key]
    }

    pub fn contains(&self, key: usize, value: usize) -> bool {
        self.get(key).contains(&value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> + '_ {
        self.offsets
            .windows(2)
            .map(move |w| &self.values[w[0]..w[1]])
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::from(
            self.iter()
                .map(|bin| JsonValue::from(bin.to_vec()))
                .collect::<Vec<_>>(),
        )
    }
}

impl Index<usize> for IndexedMapping {
    type Output = [usize];

    fn index(&self, key: usize) -> &[usize] {
        self.get(key)
    }
}

/// Exact-capacity [`IndexedMapping`] under construction.
pub struct MappingFiller {
    offsets: Vec<usize>,
    values: Vec<usize>,
    cursors: Vec<usize>,
}

impl MappingFiller {
    /// Append a value to the bin of `key`
    pub fn push(&mut self, key: usize, value: usize) {
        let cursor = self.cursors[key];
        assert!(
            cursor < self.offsets[key + 1],
            "Bin {} is already full; cannot push value {}!",
            key,
            value
        );

        self.values[cursor] = value;
        self.cursors[key] += 1;
    }

    pub fn finish(self) -> IndexedMapping {
        for (key, cursor) in self.cursors.iter().enumerate() {
            assert!(
                *cursor == self.offsets[key + 1],
                "Bin {} holds {} of its {} values; cannot finish IndexedMapping!",
                key,
                cursor - self.offsets[key],
                self.offsets[key + 1] - self.offsets[key]
            );
        }

        IndexedMapping {
            offsets: self.offsets,
            values: self.values,
        }
    }
}

fn prefix_offsets(counts: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    offsets.push(0);
    let mut total = 0;
    for count in counts {
        total += count;
        offsets.push(total);
    }
    offsets
}
