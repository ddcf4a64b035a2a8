//! 発現行列の型と、入力ファイルから予測用の log1p 正規化済み行列を得るまでの処理。
use std::path::{Path, PathBuf};

use tracing::info;

mod matrix;
pub mod normalize;
pub mod reader;

pub use matrix::{Expression, ExpressionMatrix};
pub use reader::{Delimiter, InputFormat, ReadOptions, read_matrix, read_name_list, read_neighbor_graph};

use crate::error::{AnnotateError, Result};

/// 入力ファイルの読み込みと正規化の設定。
#[derive(Debug, Clone, Default)]
pub struct InputOptions {
    pub read: ReadOptions,
    /// 入力が既に 10,000 カウント / 細胞で log1p 正規化済みなら `true`。
    /// この場合は再正規化せず、検証のみ行う。
    pub pre_normalized: bool,
    /// 主層がスケーリング済みのときに使う raw 層（log1p 正規化済み）。
    pub raw_input: Option<PathBuf>,
    /// raw 層（mtx）の遺伝子名ファイル。省略時は主層の遺伝子名ファイルを使う。
    pub raw_gene_file: Option<PathBuf>,
}

impl InputOptions {
    /// raw 層の読み込み設定。主層と遺伝子数が異なる場合に備えて遺伝子名ファイルだけ差し替える。
    fn raw_read_options(&self) -> ReadOptions {
        ReadOptions {
            gene_file: self
                .raw_gene_file
                .clone()
                .or_else(|| self.read.gene_file.clone()),
            ..self.read.clone()
        }
    }
}

/// 入力ファイルを読み込み、予測に使う log1p 正規化済み行列を返す。
///
/// # Errors
/// 読み込み・正規化・検証のいずれかに失敗した場合。
pub fn load_expression(path: &Path, options: &InputOptions) -> Result<ExpressionMatrix> {
    info!(path = %path.display(), "loading input data");
    let mut matrix = read_matrix(path, &options.read)?;
    if matrix.n_cells() == 0 || matrix.n_genes() == 0 {
        return Err(AnnotateError::EmptyMatrix);
    }

    let matrix = if options.pre_normalized {
        let raw_read = options.raw_read_options();
        let raw = options
            .raw_input
            .as_deref()
            .map(|raw_path| read_matrix(raw_path, &raw_read))
            .transpose()?;
        normalize::select_normalized_layer(matrix, raw)?
    } else {
        normalize::normalize_log1p(&mut matrix);
        matrix
    };

    info!(
        cells = matrix.n_cells(),
        genes = matrix.n_genes(),
        "input data loaded"
    );
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn raw_mtx_layer_uses_its_own_gene_file() {
        let dir = tempfile::tempdir().unwrap();
        // 主層: 2 細胞 × 2 遺伝子のスケーリング済み値
        let main = write(
            dir.path(),
            "scaled.mtx",
            "%%MatrixMarket matrix coordinate real general\n2 2 4\n1 1 -0.5\n1 2 1.2\n2 1 0.3\n2 2 -1.1\n",
        );
        // raw 層: 2 細胞 × 3 遺伝子、各細胞 log1p(10000 / 3)
        let v = (10_000.0_f64 / 3.0).ln_1p();
        let raw = write(
            dir.path(),
            "raw.mtx",
            &format!(
                "%%MatrixMarket matrix coordinate real general\n2 3 6\n1 1 {v}\n1 2 {v}\n1 3 {v}\n2 1 {v}\n2 2 {v}\n2 3 {v}\n"
            ),
        );
        let genes = write(dir.path(), "genes.tsv", "CD3E\nMS4A1\n");
        let raw_genes = write(dir.path(), "raw_genes.tsv", "CD3E\nMS4A1\nLYZ\n");
        let cells = write(dir.path(), "cells.tsv", "c1\nc2\n");

        let options = InputOptions {
            read: ReadOptions {
                transpose: false,
                gene_file: Some(genes),
                cell_file: Some(cells),
            },
            pre_normalized: true,
            raw_input: Some(raw),
            raw_gene_file: Some(raw_genes),
        };
        let layer = load_expression(&main, &options).unwrap();
        assert_eq!(layer.genes(), ["CD3E", "MS4A1", "LYZ"]);
        assert_eq!(layer.cells(), ["c1", "c2"]);
        assert!(layer.is_sparse());
    }

    #[test]
    fn raw_mtx_layer_without_its_gene_file_reports_the_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(
            dir.path(),
            "scaled.mtx",
            "%%MatrixMarket matrix coordinate real general\n1 2 2\n1 1 -0.5\n1 2 1.2\n",
        );
        let raw = write(
            dir.path(),
            "raw.mtx",
            "%%MatrixMarket matrix coordinate real general\n1 3 1\n1 1 9.2\n",
        );
        let options = InputOptions {
            read: ReadOptions {
                transpose: false,
                gene_file: Some(write(dir.path(), "genes.tsv", "CD3E\nMS4A1\n")),
                cell_file: Some(write(dir.path(), "cells.tsv", "c1\n")),
            },
            pre_normalized: true,
            raw_input: Some(raw),
            raw_gene_file: None,
        };
        let err = load_expression(&main, &options).unwrap_err();
        assert!(matches!(
            err,
            AnnotateError::CompanionCountMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
    }
}
