//! Compressed Sparse Column matrix with value-sorted columns.
//!
//! CSC format is the natural layout for column-wise split finding: the
//! enumerator walks one feature at a time and needs every observed value of
//! that feature together with the owning row. Columns are additionally kept
//! sorted ascending by feature value, which is the order the split scan is
//! defined on.
//!
//! A `NaN` input value marks a missing observation and is not stored; rows
//! absent from a column follow the split's default direction during
//! repositioning.

/// One observed feature value: owning row index plus the value itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    /// Row (instance) index.
    pub index: u32,
    /// Observed feature value.
    pub fvalue: f32,
}

impl Entry {
    /// Create a new entry.
    #[inline]
    pub fn new(index: u32, fvalue: f32) -> Self {
        Self { index, fvalue }
    }
}

/// Compressed Sparse Column matrix for column-wise split finding.
///
/// # Structure
///
/// - `entries`: Observed `(row, value)` pairs, stored column by column,
///   each column sorted ascending by value (ties by row index).
/// - `col_ptrs`: Starting offset in `entries` for each column; length is
///   `num_cols + 1` with `col_ptrs[num_cols] == nnz`.
///
/// # Example
///
/// ```
/// use robustboost::data::CscMatrix;
///
/// // 3 rows x 2 features, column-major, one missing value
/// let m = CscMatrix::from_column_major(&[2.0, 1.0, 3.0, 0.5, f32::NAN, 0.25], 3, 2);
///
/// let col0: Vec<f32> = m.column(0).iter().map(|e| e.fvalue).collect();
/// assert_eq!(col0, vec![1.0, 2.0, 3.0]); // sorted by value
/// assert_eq!(m.col_size(1), 2); // NaN not stored
/// ```
#[derive(Debug, Clone)]
pub struct CscMatrix {
    entries: Box<[Entry]>,
    col_ptrs: Box<[u32]>,
    num_rows: usize,
    num_cols: usize,
    max_row_index: Option<u32>,
}

impl CscMatrix {
    /// Build from a dense column-major value buffer.
    ///
    /// `values.len()` must equal `num_rows * num_cols`; column `j` occupies
    /// `values[j * num_rows .. (j + 1) * num_rows]`. `NaN` values are
    /// treated as missing and skipped.
    pub fn from_column_major(values: &[f32], num_rows: usize, num_cols: usize) -> Self {
        assert_eq!(
            values.len(),
            num_rows * num_cols,
            "value buffer must be num_rows * num_cols"
        );

        let columns = (0..num_cols)
            .map(|col| {
                let slice = &values[col * num_rows..(col + 1) * num_rows];
                slice
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| !v.is_nan())
                    .map(|(row, &v)| (row as u32, v))
                    .collect()
            })
            .collect();

        Self::from_columns(columns, num_rows)
    }

    /// Build from per-column `(row, value)` pairs.
    ///
    /// Pairs need not be sorted; each column is sorted ascending by value
    /// here (ties by row index, keeping construction deterministic).
    ///
    /// # Panics
    ///
    /// Panics if a value is `NaN` (missing values are simply not listed) or
    /// a row index is out of bounds.
    pub fn from_columns(columns: Vec<Vec<(u32, f32)>>, num_rows: usize) -> Self {
        let num_cols = columns.len();
        let nnz: usize = columns.iter().map(Vec::len).sum();

        let mut entries = Vec::with_capacity(nnz);
        let mut col_ptrs = Vec::with_capacity(num_cols + 1);
        col_ptrs.push(0u32);

        let mut max_row_index = None;
        for column in columns {
            let start = entries.len();
            for (row, value) in column {
                assert!(!value.is_nan(), "missing values must be omitted, not NaN");
                assert!(
                    (row as usize) < num_rows,
                    "row index {} out of bounds ({})",
                    row,
                    num_rows
                );
                max_row_index = Some(max_row_index.map_or(row, |m: u32| m.max(row)));
                entries.push(Entry::new(row, value));
            }
            entries[start..].sort_unstable_by(|a, b| {
                a.fvalue
                    .partial_cmp(&b.fvalue)
                    .expect("feature values are non-NaN")
                    .then(a.index.cmp(&b.index))
            });
            col_ptrs.push(entries.len() as u32);
        }

        Self {
            entries: entries.into_boxed_slice(),
            col_ptrs: col_ptrs.into_boxed_slice(),
            num_rows,
            num_cols,
            max_row_index,
        }
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns (features).
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Number of stored (observed) values.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Largest row index referenced by any entry, if the matrix is non-empty.
    #[inline]
    pub fn max_row_index(&self) -> Option<u32> {
        self.max_row_index
    }

    /// The entries of a column, sorted ascending by value.
    #[inline]
    pub fn column(&self, col: usize) -> &[Entry] {
        assert!(col < self.num_cols, "column {} out of bounds", col);
        let start = self.col_ptrs[col] as usize;
        let end = self.col_ptrs[col + 1] as usize;
        &self.entries[start..end]
    }

    /// Number of observed values in a column.
    #[inline]
    pub fn col_size(&self, col: usize) -> usize {
        assert!(col < self.num_cols, "column {} out of bounds", col);
        (self.col_ptrs[col + 1] - self.col_ptrs[col]) as usize
    }

    /// Fraction of rows with an observed value in this column.
    pub fn col_density(&self, col: usize) -> f32 {
        if self.num_rows == 0 {
            return 1.0;
        }
        self.col_size(col) as f32 / self.num_rows as f32
    }
}
