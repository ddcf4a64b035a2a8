use ndarray::{Array2, Axis};
use rustc_hash::FxHashMap;
use sprs::CsMat;

use crate::error::{AnnotateError, Result};

/// 発現値の格納形式。mtx 入力は疎行列のまま保持する。
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Dense(Array2<f64>),
    /// CSR（行 = 細胞）。
    Sparse(CsMat<f64>),
}

impl Expression {
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Dense(values) => values.dim(),
            Self::Sparse(values) => values.shape(),
        }
    }

    #[must_use]
    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    fn transpose(self) -> Self {
        match self {
            Self::Dense(values) => {
                Self::Dense(values.reversed_axes().as_standard_layout().into_owned())
            }
            Self::Sparse(values) => Self::Sparse(into_csr(values.transpose_into())),
        }
    }
}

pub(crate) fn into_csr(values: CsMat<f64>) -> CsMat<f64> {
    if values.is_csr() {
        values
    } else {
        values.to_other_storage()
    }
}

/// 細胞 × 遺伝子の発現行列。
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionMatrix {
    cells: Vec<String>,
    genes: Vec<String>,
    values: Expression,
}

impl ExpressionMatrix {
    /// 密行列から作る。
    ///
    /// # Errors
    /// 行列の形状と細胞名・遺伝子名の数が一致しない場合は [`AnnotateError::ShapeMismatch`]。
    pub fn new(cells: Vec<String>, genes: Vec<String>, values: Array2<f64>) -> Result<Self> {
        Self::from_expression(cells, genes, Expression::Dense(values))
    }

    /// 疎行列から作る。CSC で渡された場合は CSR に変換する。
    ///
    /// # Errors
    /// 形状が一致しない場合は [`AnnotateError::ShapeMismatch`]。
    pub fn from_sparse(cells: Vec<String>, genes: Vec<String>, values: CsMat<f64>) -> Result<Self> {
        Self::from_expression(cells, genes, Expression::Sparse(into_csr(values)))
    }

    fn from_expression(cells: Vec<String>, genes: Vec<String>, values: Expression) -> Result<Self> {
        let (rows, cols) = values.shape();
        if (rows, cols) != (cells.len(), genes.len()) {
            return Err(AnnotateError::ShapeMismatch {
                rows,
                cols,
                cells: cells.len(),
                genes: genes.len(),
            });
        }
        Ok(Self {
            cells,
            genes,
            values,
        })
    }

    #[must_use]
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    #[must_use]
    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    #[must_use]
    pub fn values(&self) -> &Expression {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut Expression {
        &mut self.values
    }

    #[must_use]
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.values.is_sparse()
    }

    /// 細胞名だけを差し替える。
    pub(crate) fn with_cells(self, cells: Vec<String>) -> Result<Self> {
        Self::from_expression(cells, self.genes, self.values)
    }

    /// 遺伝子 × 細胞で与えられた行列を細胞 × 遺伝子に入れ替える。
    #[must_use]
    pub fn transpose(self) -> Self {
        Self {
            cells: self.genes,
            genes: self.cells,
            values: self.values.transpose(),
        }
    }

    /// 重複した遺伝子名に `-1`, `-2`, … を付けて一意にする。
    pub fn make_genes_unique(&mut self) {
        make_unique(&mut self.genes);
    }

    /// 最小値（空行列なら `None`）。疎行列では格納されていない 0 も含めて考える。
    #[must_use]
    pub fn min_value(&self) -> Option<f64> {
        match &self.values {
            Expression::Dense(values) => values.iter().copied().reduce(f64::min),
            Expression::Sparse(values) => {
                let (rows, cols) = values.shape();
                if rows == 0 || cols == 0 {
                    return None;
                }
                let stored = values.data().iter().copied().reduce(f64::min);
                if values.nnz() < rows * cols {
                    Some(stored.map_or(0.0, |min| min.min(0.0)))
                } else {
                    stored
                }
            }
        }
    }

    /// 指定した列だけを密行列として取り出す（列はこの順に並ぶ）。
    #[must_use]
    pub fn dense_columns(&self, columns: &[usize]) -> Array2<f64> {
        match &self.values {
            Expression::Dense(values) => values.select(Axis(1), columns),
            Expression::Sparse(values) => {
                let mut targets: Vec<Vec<usize>> = vec![Vec::new(); values.cols()];
                for (position, &column) in columns.iter().enumerate() {
                    targets[column].push(position);
                }
                let mut out = Array2::zeros((values.rows(), columns.len()));
                for (i, row) in values.outer_iterator().enumerate() {
                    for (j, &value) in row.iter() {
                        for &position in &targets[j] {
                            out[[i, position]] = value;
                        }
                    }
                }
                out
            }
        }
    }

    /// 行列全体を密行列にする。
    #[must_use]
    pub fn to_dense(&self) -> Array2<f64> {
        match &self.values {
            Expression::Dense(values) => values.clone(),
            Expression::Sparse(values) => values.to_dense(),
        }
    }

    /// 遺伝子ごとの発現細胞数（値が正の細胞）。
    #[must_use]
    pub fn gene_detection_counts(&self) -> Vec<usize> {
        match &self.values {
            Expression::Dense(values) => values
                .axis_iter(Axis(1))
                .map(|col| col.iter().filter(|v| **v > 0.0).count())
                .collect(),
            Expression::Sparse(values) => {
                let mut counts = vec![0; values.cols()];
                for row in values.outer_iterator() {
                    for (j, &value) in row.iter() {
                        if value > 0.0 {
                            counts[j] += 1;
                        }
                    }
                }
                counts
            }
        }
    }

    /// 遺伝子ごとの分散（母分散）。
    #[must_use]
    pub fn gene_variances(&self) -> Vec<f64> {
        match &self.values {
            Expression::Dense(values) => values
                .axis_iter(Axis(1))
                .map(|col| col.var(0.0))
                .collect(),
            Expression::Sparse(values) => {
                let n = values.rows();
                if n == 0 {
                    return vec![0.0; values.cols()];
                }
                let mut sums = vec![0.0; values.cols()];
                let mut squares = vec![0.0; values.cols()];
                for row in values.outer_iterator() {
                    for (j, &value) in row.iter() {
                        sums[j] += value;
                        squares[j] += value * value;
                    }
                }
                let n = n as f64;
                sums.iter()
                    .zip(&squares)
                    .map(|(sum, square)| {
                        let mean = sum / n;
                        (square / n - mean * mean).max(0.0)
                    })
                    .collect()
            }
        }
    }
}

pub(crate) fn make_unique(names: &mut [String]) {
    let mut seen: FxHashMap<String, usize> = FxHashMap::default();
    for name in names.iter() {
        seen.entry(name.clone()).or_insert(0);
    }
    let mut occurrences: FxHashMap<String, usize> = FxHashMap::default();
    for name in names.iter_mut() {
        let count = occurrences.entry(name.clone()).or_insert(0);
        if *count > 0 {
            let mut suffix = *count;
            let mut candidate = format!("{name}-{suffix}");
            while seen.contains_key(&candidate) {
                suffix += 1;
                candidate = format!("{name}-{suffix}");
            }
            *count = suffix + 1;
            seen.insert(candidate.clone(), 0);
            *name = candidate;
        } else {
            *count = 1;
        }
    }
}
