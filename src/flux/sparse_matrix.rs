use std::collections::BTreeMap;

use nalgebra::DMatrix;

/// Wrapper around a BTreeMap to store square (not necessarily symmetric) matrices sparsely.
///
/// Entries are kept in row-major order; inserting at an occupied position accumulates.
#[derive(Clone, Debug)]
pub struct SparseMatrix {
    /// Size of the square matrix
    pub dimension: usize,
    /// Matrix Entries
    entries: BTreeMap<[u32; 2], f64>,
}

impl SparseMatrix {
    pub fn new(dimension: usize) -> Self {
        assert!(
            dimension <= (std::u32::MAX as usize),
            "Matrix Dimension cannot exceed the size of a u32!"
        );

        Self {
            dimension,
            entries: BTreeMap::new(),
        }
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    fn coordinates(&self, [row_idx, col_idx]: [usize; 2]) -> [u32; 2] {
        assert!(
            row_idx < self.dimension,
            "row_idx exceeded matrix dimension; cannot insert value!"
        );
        assert!(
            col_idx < self.dimension,
            "col_idx exceeded matrix dimension; cannot insert value!"
        );

        // the dimension fits in a u32
        [row_idx as u32, col_idx as u32]
    }

    /// Add a value to the entry at `[row, col]`
    pub fn insert(&mut self, rc: [usize; 2], value: f64) {
        let coordinates = self.coordinates(rc);
        *self.entries.entry(coordinates).or_insert(0.0) += value;
    }

    /// Insert a group of entries
    pub fn insert_group(&mut self, entry_group: impl IntoIterator<Item = ([usize; 2], f64)>) {
        for (rc, value) in entry_group {
            self.insert(rc, value);
        }
    }

    /// Value at `[row, col]` (zero where nothing was inserted)
    pub fn get(&self, [row_idx, col_idx]: [usize; 2]) -> f64 {
        if row_idx >= self.dimension || col_idx >= self.dimension {
            return 0.0;
        }
        self.entries
            .get(&[row_idx as u32, col_idx as u32])
            .copied()
            .unwrap_or(0.0)
    }

    pub fn contains(&self, [row_idx, col_idx]: [usize; 2]) -> bool {
        row_idx < self.dimension
            && col_idx < self.dimension
            && self.entries.contains_key(&[row_idx as u32, col_idx as u32])
    }

    /// Iterate over the stored entries in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = ([usize; 2], f64)> + '_ {
        self.entries
            .iter()
            .map(|(coords, value)| ([coords[0] as usize, coords[1] as usize], *value))
    }

    /// Column indices of the stored entries on each row
    pub fn sparsity_pattern(&self) -> Vec<Vec<usize>> {
        let mut pattern = vec![Vec::new(); self.dimension];
        for ([r, c], _) in self.iter() {
            pattern[r].push(c);
        }
        pattern
    }
}

impl From<SparseMatrix> for DMatrix<f64> {
    fn from(sm: SparseMatrix) -> Self {
        let mut dense = DMatrix::zeros(sm.dimension, sm.dimension);

        for ([r, c], v) in sm.iter() {
            dense[(r, c)] = v;
        }

        dense
    }
}
