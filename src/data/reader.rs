//! 区切りテキストと Matrix Market 形式の発現行列リーダー。
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use ndarray::Array2;
use sprs::{CsMat, TriMat};
use tracing::debug;

use super::ExpressionMatrix;
use super::matrix::into_csr;
use crate::error::{AnnotateError, Result};

/// 区切り文字。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Tab,
    /// タブがあればタブ、なければ空白（連続する空白は 1 つとみなす）。
    Whitespace,
}

impl Delimiter {
    fn byte(self) -> u8 {
        match self {
            Self::Comma => b',',
            Self::Tab => b'\t',
            Self::Whitespace => b' ',
        }
    }
}

/// 入力ファイルの形式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Delimited(Delimiter),
    MatrixMarket { gzip: bool },
}

impl InputFormat {
    /// 拡張子から形式を判定する。
    ///
    /// # Errors
    /// `.h5ad` は [`AnnotateError::HdfContainer`]、それ以外の未知の拡張子は
    /// [`AnnotateError::UnsupportedFormat`]。
    pub fn detect(path: &Path) -> Result<Self> {
        let name = lowercase_file_name(path);
        let format = if name.ends_with(".mtx.gz") {
            Self::MatrixMarket { gzip: true }
        } else if name.ends_with(".mtx") {
            Self::MatrixMarket { gzip: false }
        } else if name.ends_with(".csv") {
            Self::Delimited(Delimiter::Comma)
        } else if name.ends_with(".tsv") || name.ends_with(".tab") {
            Self::Delimited(Delimiter::Tab)
        } else if name.ends_with(".txt") {
            Self::Delimited(Delimiter::Whitespace)
        } else if name.ends_with(".h5ad") {
            return Err(AnnotateError::HdfContainer {
                path: path.to_path_buf(),
            });
        } else {
            return Err(AnnotateError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        };
        Ok(format)
    }
}

/// 発現行列の読み込み設定。
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// 入力が遺伝子 × 細胞なら `true`。
    pub transpose: bool,
    /// mtx 入力の遺伝子名ファイル（1 行 1 遺伝子）。
    pub gene_file: Option<PathBuf>,
    /// mtx 入力の細胞名ファイル（1 行 1 細胞）。
    pub cell_file: Option<PathBuf>,
}

/// 入力ファイルを細胞 × 遺伝子の行列として読み込む。値は変換しない。
///
/// # Errors
/// 形式が未対応、ファイルが読めない、内容が不正、または mtx の付随ファイルが
/// 欠けているか件数が一致しない場合。
pub fn read_matrix(path: &Path, options: &ReadOptions) -> Result<ExpressionMatrix> {
    let mut matrix = match InputFormat::detect(path)? {
        InputFormat::Delimited(delimiter) => {
            let matrix = read_delimited(path, delimiter)?;
            if options.transpose {
                matrix.transpose()
            } else {
                matrix
            }
        }
        InputFormat::MatrixMarket { gzip } => read_mtx_with_names(path, gzip, options)?,
    };
    matrix.make_genes_unique();
    debug!(
        path = %path.display(),
        cells = matrix.n_cells(),
        genes = matrix.n_genes(),
        "matrix read"
    );
    Ok(matrix)
}

/// 1 行 1 名のリストを読む。区切り文字があれば先頭列を使う。空行は無視する。
///
/// `.csv` はカンマ区切り、それ以外はタブ区切りとして読む。`.gz` は展開して読む。
///
/// # Errors
/// ファイルが読めない場合、または引用符が閉じていない場合。
pub fn read_name_list(path: &Path) -> Result<Vec<String>> {
    let name = lowercase_file_name(path);
    let gzip = name.ends_with(".gz");
    let delimiter = if name.trim_end_matches(".gz").ends_with(".csv") {
        Delimiter::Comma
    } else {
        Delimiter::Tab
    };
    let mut records = csv_reader(open_text(path, gzip)?, delimiter);
    let mut names = Vec::new();
    for record in records.records() {
        let record = record.map_err(|err| csv_error(path, err))?;
        if let Some(first) = record.get(0).filter(|field| !field.is_empty()) {
            names.push(first.to_string());
        }
    }
    Ok(names)
}

/// 正方の近傍グラフ（細胞 × 細胞の接続重み）を mtx から読み込む。
///
/// # Errors
/// 読み込みに失敗した場合、または `n_cells` × `n_cells` でない場合。
pub fn read_neighbor_graph(path: &Path, n_cells: usize) -> Result<CsMat<f64>> {
    let gzip = lowercase_file_name(path).ends_with(".gz");
    let triplets = read_mtx(path, gzip)?;
    let (rows, cols) = triplets.shape();
    if rows != n_cells || cols != n_cells {
        return Err(AnnotateError::GraphShapeMismatch {
            expected: n_cells,
            rows,
            cols,
        });
    }
    Ok(triplets.to_csr())
}

fn read_delimited(path: &Path, delimiter: Delimiter) -> Result<ExpressionMatrix> {
    let mut reader = open_text(path, false)?;
    let delimiter = match delimiter {
        Delimiter::Whitespace => {
            let head = reader.fill_buf().map_err(|source| io_error(path, source))?;
            if head.contains(&b'\t') {
                Delimiter::Tab
            } else {
                Delimiter::Whitespace
            }
        }
        other => other,
    };
    let mut records = csv_reader(reader, delimiter);
    let mut header: Option<Vec<String>> = None;
    let mut row_names = Vec::new();
    let mut values = Vec::new();
    let mut width = None;

    for record in records.records() {
        let record = record.map_err(|err| csv_error(path, err))?;
        let line_no = record
            .position()
            .map_or(0, |pos| usize::try_from(pos.line()).unwrap_or(usize::MAX));
        let fields: Vec<&str> = if delimiter == Delimiter::Whitespace {
            record.iter().filter(|field| !field.is_empty()).collect()
        } else {
            record.iter().collect()
        };
        if fields.iter().all(|field| field.is_empty()) {
            continue;
        }
        let Some(header_len) = header.as_ref().map(Vec::len) else {
            header = Some(fields.iter().map(ToString::to_string).collect());
            continue;
        };
        if fields.len() < 2 {
            return Err(malformed(path, line_no, "expected a row name followed by values"));
        }
        let n_values = fields.len() - 1;
        match width {
            None => {
                if header_len != n_values && header_len != n_values + 1 {
                    return Err(malformed(
                        path,
                        line_no,
                        format!("header has {header_len} columns but rows carry {n_values} values"),
                    ));
                }
                width = Some(n_values);
            }
            Some(expected) if expected != n_values => {
                return Err(malformed(
                    path,
                    line_no,
                    format!("expected {expected} values, found {n_values}"),
                ));
            }
            Some(_) => {}
        }
        row_names.push(fields[0].to_string());
        for raw in &fields[1..] {
            let value = raw.parse::<f64>().map_err(|err| {
                malformed(path, line_no, format!("invalid number `{raw}`: {err}"))
            })?;
            values.push(value);
        }
    }

    let header = header.ok_or(AnnotateError::EmptyMatrix)?;
    let n_cols = width.ok_or(AnnotateError::EmptyMatrix)?;
    let col_names = if header.len() == n_cols + 1 {
        header[1..].to_vec()
    } else {
        header
    };
    let values = Array2::from_shape_vec((row_names.len(), n_cols), values)
        .map_err(|err| malformed(path, 0, err.to_string()))?;
    ExpressionMatrix::new(row_names, col_names, values)
}

/// mtx を疎行列のまま読み、付随ファイルの件数を（転置後の）形状と照合する。
fn read_mtx_with_names(path: &Path, gzip: bool, options: &ReadOptions) -> Result<ExpressionMatrix> {
    let (Some(gene_file), Some(cell_file)) = (&options.gene_file, &options.cell_file) else {
        return Err(AnnotateError::MissingCompanionFiles);
    };
    let triplets = read_mtx(path, gzip)?;
    let csr: CsMat<f64> = triplets.to_csr();
    let values = if options.transpose {
        into_csr(csr.transpose_into())
    } else {
        csr
    };
    let (rows, cols) = values.shape();

    let genes = read_name_list(gene_file)?;
    let cells = read_name_list(cell_file)?;
    if genes.len() != cols {
        return Err(AnnotateError::CompanionCountMismatch {
            kind: "genes",
            file: gene_file.clone(),
            expected: cols,
            found: genes.len(),
        });
    }
    if cells.len() != rows {
        return Err(AnnotateError::CompanionCountMismatch {
            kind: "cells",
            file: cell_file.clone(),
            expected: rows,
            found: cells.len(),
        });
    }
    ExpressionMatrix::from_sparse(cells, genes, values)
}

/// coordinate 形式の Matrix Market を三つ組として読む。`symmetric` は両側に展開する。
fn read_mtx(path: &Path, gzip: bool) -> Result<TriMat<f64>> {
    let reader = open_text(path, gzip)?;
    let mut lines = reader.lines().enumerate();

    let (_, banner) = lines
        .next()
        .ok_or_else(|| malformed(path, 1, "empty Matrix Market file"))?;
    let banner = banner.map_err(|source| io_error(path, source))?.to_lowercase();
    let tokens: Vec<&str> = banner.split_whitespace().collect();
    if tokens.len() < 5 || tokens[0] != "%%matrixmarket" || tokens[1] != "matrix" {
        return Err(malformed(path, 1, "missing %%MatrixMarket matrix banner"));
    }
    if tokens[2] != "coordinate" {
        return Err(malformed(path, 1, "only coordinate Matrix Market files are supported"));
    }
    let pattern = match tokens[3] {
        "real" | "integer" | "double" => false,
        "pattern" => true,
        other => return Err(malformed(path, 1, format!("unsupported field type `{other}`"))),
    };
    let symmetric = match tokens[4] {
        "general" => false,
        "symmetric" => true,
        other => return Err(malformed(path, 1, format!("unsupported symmetry `{other}`"))),
    };

    let mut triplets: Option<TriMat<f64>> = None;
    let mut expected_nnz = 0usize;
    let mut seen = 0usize;
    for (idx, line) in lines {
        let line_no = idx + 1;
        let line = line.map_err(|source| io_error(path, source))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if triplets.is_none() {
            if parts.len() != 3 {
                return Err(malformed(path, line_no, "expected `rows cols entries` size line"));
            }
            let rows = parse_index(path, line_no, parts[0])?;
            let cols = parse_index(path, line_no, parts[1])?;
            expected_nnz = parse_index(path, line_no, parts[2])?;
            triplets = Some(TriMat::with_capacity((rows, cols), expected_nnz));
            continue;
        }
        let Some(mat) = triplets.as_mut() else {
            continue;
        };
        let needed = if pattern { 2 } else { 3 };
        if parts.len() < needed {
            return Err(malformed(path, line_no, "incomplete matrix entry"));
        }
        let row = parse_index(path, line_no, parts[0])?;
        let col = parse_index(path, line_no, parts[1])?;
        let (rows, cols) = mat.shape();
        if row == 0 || col == 0 || row > rows || col > cols {
            return Err(malformed(
                path,
                line_no,
                format!("entry ({row}, {col}) outside a {rows}x{cols} matrix"),
            ));
        }
        let value = if pattern {
            1.0
        } else {
            parts[2].parse::<f64>().map_err(|err| {
                malformed(path, line_no, format!("invalid value `{}`: {err}", parts[2]))
            })?
        };
        mat.add_triplet(row - 1, col - 1, value);
        if symmetric && row != col {
            mat.add_triplet(col - 1, row - 1, value);
        }
        seen += 1;
    }

    let triplets = triplets.ok_or_else(|| malformed(path, 0, "missing size line"))?;
    if seen != expected_nnz {
        return Err(malformed(
            path,
            0,
            format!("size line declares {expected_nnz} entries, found {seen}"),
        ));
    }
    Ok(triplets)
}

fn open_text(path: &Path, gzip: bool) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    let inner: Box<dyn Read> = if gzip {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(inner)))
}

fn parse_index(path: &Path, line: usize, raw: &str) -> Result<usize> {
    raw.parse::<usize>()
        .map_err(|err| malformed(path, line, format!("invalid integer `{raw}`: {err}")))
}

fn csv_reader<R: Read>(reader: R, delimiter: Delimiter) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter.byte())
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn csv_error(path: &Path, err: csv::Error) -> AnnotateError {
    let line = err
        .position()
        .map_or(0, |pos| usize::try_from(pos.line()).unwrap_or(usize::MAX));
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => io_error(path, source),
        _ => malformed(path, line, message),
    }
}

fn lowercase_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn io_error(path: &Path, source: std::io::Error) -> AnnotateError {
    AnnotateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn malformed(path: &Path, line: usize, message: impl Into<String>) -> AnnotateError {
    AnnotateError::Malformed {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}
