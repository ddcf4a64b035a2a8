//! アノテーション処理のエラー型。
use std::path::PathBuf;

use thiserror::Error;

use crate::model::ModelError;

/// 入力読み込みから予測・エクスポートまでのエラー。
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error(
        "unsupported input file type: {path} (supported: .csv, .txt, .tsv, .tab, .mtx, .mtx.gz)"
    )]
    UnsupportedFormat { path: PathBuf },

    #[error("{path}: HDF5 containers are not read directly, export the matrix to .mtx or .csv first")]
    HdfContainer { path: PathBuf },

    #[error("missing `gene_file` and/or `cell_file`, both are required together with an mtx input")]
    MissingCompanionFiles,

    #[error("the number of {kind} in {file} ({found}) does not match the number of {kind} in the matrix ({expected})")]
    CompanionCountMismatch {
        kind: &'static str,
        file: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("scaled expression detected and no raw layer is available")]
    ScaledExpression,

    #[error("raw layer shape mismatch: expected {expected} cells, got {found}")]
    RawLayerMismatch { expected: usize, found: usize },

    #[error(
        "invalid expression matrix, expect log1p normalized expression to 10000 counts per cell (first cell sums to {sum:.2})"
    )]
    InvalidNormalization { sum: f64 },

    #[error("input matrix is empty")]
    EmptyMatrix,

    #[error("matrix is {rows}x{cols} but {cells} cell names and {genes} gene names were given")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        cells: usize,
        genes: usize,
    },

    #[error("unrecognized mode `{0}`, should be one of `best match` or `prob match`")]
    UnknownMode(String),

    #[error("probability threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("no overlapping genes between the input data and the model ({model_features} model features, {input_genes} input genes)")]
    NoGeneOverlap {
        model_features: usize,
        input_genes: usize,
    },

    #[error("over-clustering has {found} entries but {expected} cells were predicted")]
    ClusterLengthMismatch { expected: usize, found: usize },

    #[error("neighbor graph must be {expected}x{expected}, got {rows}x{cols}")]
    GraphShapeMismatch {
        expected: usize,
        rows: usize,
        cols: usize,
    },

    #[error("failed to export results to {path}")]
    Export {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T, E = AnnotateError> = std::result::Result<T, E>;
