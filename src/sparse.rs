//! Sparse Jacobian structure for stacked residual blocks.
//!
//! The optimization problem is a column of residual blocks, each touching a
//! handful of variables. Every variable owns a contiguous block of columns
//! (its tangent width), every residual block owns a contiguous block of
//! rows, and the stacked Jacobian is stored structurally as CSR. The
//! structure is built once per variable/residual set and reused unchanged
//! across iterations; only the numeric values are refreshed via
//! [`SparseStructure::gather`].
//!
//! The normal-equations matrix AᵗA is factorized at variable-block
//! granularity, so alongside the scalar CSR layout this module derives the
//! block sparsity pattern of AᵗA: two variable blocks are adjacent iff they
//! co-occur in at least one residual block.

use crate::core::{OrbitError, OrbitResult};
use nalgebra::{DMatrix, DVector};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// One residual block's structural footprint: its row count and the indices
/// of the variables it touches, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidualLayout {
    pub num_rows: usize,
    pub variables: Vec<usize>,
}

/// A residual block that can produce its numeric value and local Jacobians.
///
/// `evaluate` returns the residual vector (length [`ResidualBlock::dim`])
/// and one dense Jacobian per touched variable, in the same order as
/// [`ResidualBlock::variables`], each shaped `(dim, tangent width)`.
pub trait ResidualBlock {
    fn dim(&self) -> usize;
    fn variables(&self) -> &[usize];
    fn evaluate(&self) -> OrbitResult<(DVector<f64>, Vec<DMatrix<f64>>)>;
}

/// Block sparsity pattern of AᵗA in CSR form over variable blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPattern {
    pub block_ptr: Vec<usize>,
    pub block_ind: Vec<usize>,
}

/// CSR layout of the stacked Jacobian plus the variable block map.
///
/// Invariants, enforced at construction: `row_ptr` is monotonically
/// non-decreasing with `row_ptr[num_rows] == col_ind.len()`, every entry of
/// `col_ind` lies in `[0, num_cols)`, and the column blocks of each row are
/// sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseStructure {
    row_ptr: Vec<usize>,
    col_ind: Vec<usize>,
    num_rows: usize,
    num_cols: usize,
    var_start_cols: Vec<usize>,
    var_dims: Vec<usize>,
    layouts: Vec<ResidualLayout>,
    row_offsets: Vec<usize>,
}

impl SparseStructure {
    /// Build the CSR structure for the given ordered variables and residual
    /// layouts.
    ///
    /// `var_dims[i]` is the tangent width of variable `i`; variable `i`
    /// occupies columns `[var_start_cols[i], var_start_cols[i] +
    /// var_dims[i])`. Residual blocks stack top to bottom in the order
    /// given. Rebuilding from the same inputs yields identical arrays.
    pub fn build(var_dims: &[usize], layouts: &[ResidualLayout]) -> OrbitResult<SparseStructure> {
        if var_dims.iter().any(|&d| d == 0) {
            return Err(OrbitError::InvalidInput(
                "variable tangent width must be positive".to_string(),
            ));
        }
        let mut var_start_cols = Vec::with_capacity(var_dims.len());
        let mut num_cols = 0;
        for &dim in var_dims {
            var_start_cols.push(num_cols);
            num_cols += dim;
        }

        let mut row_ptr = vec![0];
        let mut col_ind = Vec::new();
        let mut row_offsets = Vec::with_capacity(layouts.len());
        let mut num_rows = 0;

        for (block_idx, layout) in layouts.iter().enumerate() {
            if layout.num_rows == 0 {
                return Err(OrbitError::InvalidInput(format!(
                    "residual block {block_idx} has zero rows"
                )));
            }
            for &v in &layout.variables {
                if v >= var_dims.len() {
                    return Err(OrbitError::InvalidInput(format!(
                        "residual block {block_idx} references variable {v}, only {} exist",
                        var_dims.len()
                    )));
                }
            }
            // Column blocks within a row must be sorted; variable order in
            // the layout is free, so sort a copy.
            let mut sorted_vars = layout.variables.clone();
            sorted_vars.sort_unstable();
            if sorted_vars.windows(2).any(|w| w[0] == w[1]) {
                return Err(OrbitError::InvalidInput(format!(
                    "residual block {block_idx} touches a variable twice"
                )));
            }

            row_offsets.push(num_rows);
            for _ in 0..layout.num_rows {
                for &v in &sorted_vars {
                    let start = var_start_cols[v];
                    col_ind.extend(start..start + var_dims[v]);
                }
                row_ptr.push(col_ind.len());
            }
            num_rows += layout.num_rows;
        }

        debug!(
            num_rows,
            num_cols,
            nnz = col_ind.len(),
            num_variables = var_dims.len(),
            num_residual_blocks = layouts.len(),
            "built sparse structure"
        );

        Ok(SparseStructure {
            row_ptr,
            col_ind,
            num_rows,
            num_cols,
            var_start_cols,
            var_dims: var_dims.to_vec(),
            layouts: layouts.to_vec(),
            row_offsets,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn nnz(&self) -> usize {
        self.col_ind.len()
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_ind(&self) -> &[usize] {
        &self.col_ind
    }

    pub fn var_start_cols(&self) -> &[usize] {
        &self.var_start_cols
    }

    pub fn var_dims(&self) -> &[usize] {
        &self.var_dims
    }

    pub fn num_variables(&self) -> usize {
        self.var_dims.len()
    }

    /// Variable owning the given column.
    fn var_of_col(&self, col: usize) -> usize {
        match self.var_start_cols.binary_search(&col) {
            Ok(v) => v,
            Err(v) => v - 1,
        }
    }

    /// Structure-only transpose of the Jacobian pattern, as (col_ptr,
    /// row_ind) of Aᵗ in CSR form (equivalently, A in CSC form). Values are
    /// irrelevant; only the pattern feeds the block analysis.
    pub fn mock_csc_transpose(&self) -> (Vec<usize>, Vec<usize>) {
        let mut col_counts = vec![0usize; self.num_cols];
        for &c in &self.col_ind {
            col_counts[c] += 1;
        }
        let mut col_ptr = vec![0usize; self.num_cols + 1];
        for c in 0..self.num_cols {
            col_ptr[c + 1] = col_ptr[c] + col_counts[c];
        }
        let mut cursor = col_ptr[..self.num_cols].to_vec();
        let mut row_ind = vec![0usize; self.col_ind.len()];
        for r in 0..self.num_rows {
            for &c in &self.col_ind[self.row_ptr[r]..self.row_ptr[r + 1]] {
                row_ind[cursor[c]] = r;
                cursor[c] += 1;
            }
        }
        (col_ptr, row_ind)
    }

    /// Block sparsity pattern of AᵗA over variable blocks.
    ///
    /// Collapses the transposed pattern's fine columns into per-variable
    /// block rows, then forms the symbolic product block_Aᵗ · block_Aᵗᵀ
    /// with a marker workspace: block `(i, j)` is present iff variables `i`
    /// and `j` co-occur in some residual row. Indices come out sorted and
    /// deduplicated.
    pub fn block_ata_pattern(&self) -> BlockPattern {
        let num_vars = self.num_variables();
        let (col_ptr, row_ind) = self.mock_csc_transpose();

        let mut block_ptr = vec![0usize];
        let mut block_ind = Vec::new();
        // marker[j] == i means block column j was already emitted for block
        // row i.
        let mut marker = vec![usize::MAX; num_vars];

        for i in 0..num_vars {
            let row_start = block_ind.len();
            let col_lo = self.var_start_cols[i];
            let col_hi = col_lo + self.var_dims[i];
            for c in col_lo..col_hi {
                for &r in &row_ind[col_ptr[c]..col_ptr[c + 1]] {
                    for &fine_col in &self.col_ind[self.row_ptr[r]..self.row_ptr[r + 1]] {
                        let j = self.var_of_col(fine_col);
                        if marker[j] != i {
                            marker[j] = i;
                            block_ind.push(j);
                        }
                    }
                }
            }
            block_ind[row_start..].sort_unstable();
            block_ptr.push(block_ind.len());
        }

        BlockPattern {
            block_ptr,
            block_ind,
        }
    }

    /// Evaluate every residual block and scatter the local Jacobians into
    /// the CSR value layout.
    ///
    /// `blocks` must match the layouts the structure was built from, one per
    /// residual block in the same order. Returns the CSR value array
    /// (aligned with `col_ind`) and the stacked residual vector.
    pub fn gather(
        &self,
        blocks: &[&dyn ResidualBlock],
    ) -> OrbitResult<(Vec<f64>, DVector<f64>)> {
        if blocks.len() != self.layouts.len() {
            return Err(OrbitError::InvalidInput(format!(
                "structure was built for {} residual blocks, got {}",
                self.layouts.len(),
                blocks.len()
            )));
        }

        let mut a_values = vec![0.0; self.col_ind.len()];
        let mut residual_vec = DVector::zeros(self.num_rows);

        for (block_idx, (block, layout)) in blocks.iter().zip(&self.layouts).enumerate() {
            if block.dim() != layout.num_rows || block.variables() != layout.variables.as_slice() {
                return Err(OrbitError::InvalidInput(format!(
                    "residual block {block_idx} does not match the built structure"
                )));
            }
            let (residual, jacobians) = block.evaluate()?;
            if residual.len() != layout.num_rows {
                return Err(OrbitError::Shape(format!(
                    "residual block {block_idx} returned {} rows, expected {}",
                    residual.len(),
                    layout.num_rows
                )));
            }
            if jacobians.len() != layout.variables.len() {
                return Err(OrbitError::Shape(format!(
                    "residual block {block_idx} returned {} jacobians, expected {}",
                    jacobians.len(),
                    layout.variables.len()
                )));
            }
            for (&v, jac) in layout.variables.iter().zip(&jacobians) {
                if jac.nrows() != layout.num_rows || jac.ncols() != self.var_dims[v] {
                    return Err(OrbitError::Shape(format!(
                        "residual block {block_idx} jacobian for variable {v} is {} x {}, \
                         expected {} x {}",
                        jac.nrows(),
                        jac.ncols(),
                        layout.num_rows,
                        self.var_dims[v]
                    )));
                }
            }

            let row_offset = self.row_offsets[block_idx];
            residual_vec
                .rows_mut(row_offset, layout.num_rows)
                .copy_from(&residual);

            // CSR entries of each row are grouped by variable in ascending
            // column order; walk them in that order.
            let mut order: Vec<usize> = (0..layout.variables.len()).collect();
            order.sort_unstable_by_key(|&k| layout.variables[k]);
            for local_r in 0..layout.num_rows {
                let mut pos = self.row_ptr[row_offset + local_r];
                for &k in &order {
                    let jac = &jacobians[k];
                    for c in 0..jac.ncols() {
                        a_values[pos] = jac[(local_r, c)];
                        pos += 1;
                    }
                }
            }
        }

        Ok((a_values, residual_vec))
    }

    /// Hash of the sparsity pattern, used by the solver to detect that a
    /// cached symbolic decomposition belongs to a different structure.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.num_rows.hash(&mut hasher);
        self.num_cols.hash(&mut hasher);
        self.row_ptr.hash(&mut hasher);
        self.col_ind.hash(&mut hasher);
        self.var_start_cols.hash(&mut hasher);
        self.var_dims.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 3 variables of widths {3, 6, 3}, 4 residual blocks. Mirrors the
    // dense-equivalence system used by the solver tests.
    fn example_inputs() -> (Vec<usize>, Vec<ResidualLayout>) {
        let var_dims = vec![3, 6, 3];
        let layouts = vec![
            ResidualLayout {
                num_rows: 3,
                variables: vec![0],
            },
            ResidualLayout {
                num_rows: 2,
                variables: vec![0, 1],
            },
            ResidualLayout {
                num_rows: 4,
                variables: vec![1, 2],
            },
            ResidualLayout {
                num_rows: 3,
                variables: vec![2],
            },
        ];
        (var_dims, layouts)
    }

    struct ConstantBlock {
        variables: Vec<usize>,
        residual: DVector<f64>,
        jacobians: Vec<DMatrix<f64>>,
    }

    impl ResidualBlock for ConstantBlock {
        fn dim(&self) -> usize {
            self.residual.len()
        }

        fn variables(&self) -> &[usize] {
            &self.variables
        }

        fn evaluate(&self) -> OrbitResult<(DVector<f64>, Vec<DMatrix<f64>>)> {
            Ok((self.residual.clone(), self.jacobians.clone()))
        }
    }

    fn filled_block(variables: Vec<usize>, num_rows: usize, var_dims: &[usize], seed: f64) -> ConstantBlock {
        let mut counter = seed;
        let mut next = || {
            counter += 1.0;
            (counter * 0.37).sin()
        };
        let residual = DVector::from_fn(num_rows, |_, _| next());
        let jacobians = variables
            .iter()
            .map(|&v| DMatrix::from_fn(num_rows, var_dims[v], |_, _| next()))
            .collect();
        ConstantBlock {
            variables,
            residual,
            jacobians,
        }
    }

    #[test]
    fn test_csr_invariants() {
        let (var_dims, layouts) = example_inputs();
        let s = SparseStructure::build(&var_dims, &layouts).unwrap();
        assert_eq!(s.num_rows(), 12);
        assert_eq!(s.num_cols(), 12);
        assert_eq!(s.row_ptr().len(), s.num_rows() + 1);
        assert_eq!(*s.row_ptr().last().unwrap(), s.nnz());
        assert!(s.row_ptr().windows(2).all(|w| w[0] <= w[1]));
        assert!(s.col_ind().iter().all(|&c| c < s.num_cols()));
        // Columns of each row sorted ascending (no duplicates).
        for r in 0..s.num_rows() {
            let row = &s.col_ind()[s.row_ptr()[r]..s.row_ptr()[r + 1]];
            assert!(row.windows(2).all(|w| w[0] < w[1]));
        }
        assert_eq!(s.var_start_cols(), &[0, 3, 9]);
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let (var_dims, layouts) = example_inputs();
        let a = SparseStructure::build(&var_dims, &layouts).unwrap();
        let b = SparseStructure::build(&var_dims, &layouts).unwrap();
        assert_eq!(a.row_ptr(), b.row_ptr());
        assert_eq!(a.col_ind(), b.col_ind());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_pattern() {
        let (var_dims, mut layouts) = example_inputs();
        let a = SparseStructure::build(&var_dims, &layouts).unwrap();
        layouts[1].variables = vec![0, 2];
        let b = SparseStructure::build(&var_dims, &layouts).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_build_rejects_bad_variable_index() {
        let layouts = vec![ResidualLayout {
            num_rows: 2,
            variables: vec![0, 3],
        }];
        let err = SparseStructure::build(&[3, 6, 3], &layouts).unwrap_err();
        assert!(matches!(err, OrbitError::InvalidInput(_)));
    }

    #[test]
    fn test_build_rejects_duplicate_variable() {
        let layouts = vec![ResidualLayout {
            num_rows: 2,
            variables: vec![1, 1],
        }];
        let err = SparseStructure::build(&[3, 6, 3], &layouts).unwrap_err();
        assert!(matches!(err, OrbitError::InvalidInput(_)));
    }

    #[test]
    fn test_mock_csc_transpose_matches_pattern() {
        let (var_dims, layouts) = example_inputs();
        let s = SparseStructure::build(&var_dims, &layouts).unwrap();
        let (col_ptr, row_ind) = s.mock_csc_transpose();
        assert_eq!(col_ptr.len(), s.num_cols() + 1);
        assert_eq!(*col_ptr.last().unwrap(), s.nnz());
        // Column 0 is touched by residual blocks 0 (rows 0..3) and 1 (rows
        // 3..5).
        assert_eq!(&row_ind[col_ptr[0]..col_ptr[1]], &[0, 1, 2, 3, 4]);
        // Transposing back row by row recovers the CSR pattern.
        let mut nnz_per_row = vec![0usize; s.num_rows()];
        for &r in &row_ind {
            nnz_per_row[r] += 1;
        }
        for r in 0..s.num_rows() {
            assert_eq!(nnz_per_row[r], s.row_ptr()[r + 1] - s.row_ptr()[r]);
        }
    }

    #[test]
    fn test_block_pattern_is_cooccurrence() {
        let (var_dims, layouts) = example_inputs();
        let s = SparseStructure::build(&var_dims, &layouts).unwrap();
        let pattern = s.block_ata_pattern();
        assert_eq!(pattern.block_ptr, vec![0, 2, 5, 7]);
        // Variable 0 co-occurs with {0, 1}; 1 with {0, 1, 2}; 2 with {1, 2}.
        assert_eq!(&pattern.block_ind[0..2], &[0, 1]);
        assert_eq!(&pattern.block_ind[2..5], &[0, 1, 2]);
        assert_eq!(&pattern.block_ind[5..7], &[1, 2]);
    }

    #[test]
    fn test_gather_matches_dense_assembly() {
        let (var_dims, layouts) = example_inputs();
        let s = SparseStructure::build(&var_dims, &layouts).unwrap();
        let blocks: Vec<ConstantBlock> = layouts
            .iter()
            .enumerate()
            .map(|(i, l)| filled_block(l.variables.clone(), l.num_rows, &var_dims, i as f64 * 10.0))
            .collect();
        let refs: Vec<&dyn ResidualBlock> = blocks.iter().map(|b| b as &dyn ResidualBlock).collect();
        let (a_values, residual) = s.gather(&refs).unwrap();

        // Densify via the CSR layout and compare against direct placement.
        let mut sparse_dense = DMatrix::<f64>::zeros(s.num_rows(), s.num_cols());
        for r in 0..s.num_rows() {
            for pos in s.row_ptr()[r]..s.row_ptr()[r + 1] {
                sparse_dense[(r, s.col_ind()[pos])] = a_values[pos];
            }
        }
        let mut expected = DMatrix::<f64>::zeros(s.num_rows(), s.num_cols());
        let mut expected_residual = DVector::<f64>::zeros(s.num_rows());
        let mut row = 0;
        for block in &blocks {
            let (res, jacs) = block.evaluate().unwrap();
            expected_residual.rows_mut(row, res.len()).copy_from(&res);
            for (&v, jac) in block.variables.iter().zip(&jacs) {
                expected
                    .view_mut((row, s.var_start_cols()[v]), (jac.nrows(), jac.ncols()))
                    .copy_from(jac);
            }
            row += res.len();
        }
        assert_eq!(sparse_dense, expected);
        assert_eq!(residual, expected_residual);
    }

    #[test]
    fn test_gather_rejects_mismatched_block() {
        let (var_dims, layouts) = example_inputs();
        let s = SparseStructure::build(&var_dims, &layouts).unwrap();
        let mut blocks: Vec<ConstantBlock> = layouts
            .iter()
            .map(|l| filled_block(l.variables.clone(), l.num_rows, &var_dims, 0.0))
            .collect();
        // Wrong jacobian width for variable 1.
        blocks[1].jacobians[1] = DMatrix::zeros(2, 5);
        let refs: Vec<&dyn ResidualBlock> = blocks.iter().map(|b| b as &dyn ResidualBlock).collect();
        let err = s.gather(&refs).unwrap_err();
        assert!(matches!(err, OrbitError::Shape(_)));
    }
}
