//! アノテーション結果と、そのエクスポート。
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ndarray::{Array2, ArrayView2};
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
use tracing::info;

use super::majority::majority_vote;
use crate::error::{AnnotateError, Result};

pub const LABELS_SHEET: &str = "Predicted Labels";
pub const PROBABILITY_SHEET: &str = "Probability Matrix";

/// 集計・参照するラベル列。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelColumn {
    #[default]
    PredictedLabels,
    MajorityVoting,
}

impl LabelColumn {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PredictedLabels => "predicted_labels",
            Self::MajorityVoting => "majority_voting",
        }
    }
}

/// 細胞ごとの予測ラベルと確率行列。
///
/// 多数決は新しい列を追加するだけで、個々の予測は変更しない。
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationResult {
    cells: Vec<String>,
    classes: Vec<String>,
    decision_matrix: Array2<f64>,
    probability_matrix: Array2<f64>,
    predicted_labels: Vec<String>,
    over_clustering: Option<Vec<String>>,
    majority_voting: Option<Vec<String>>,
}

impl AnnotationResult {
    pub(crate) fn new(
        cells: Vec<String>,
        classes: Vec<String>,
        decision_matrix: Array2<f64>,
        probability_matrix: Array2<f64>,
        predicted_labels: Vec<String>,
    ) -> Self {
        Self {
            cells,
            classes,
            decision_matrix,
            probability_matrix,
            predicted_labels,
            over_clustering: None,
            majority_voting: None,
        }
    }

    #[must_use]
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// 予測された細胞数。
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn decision_matrix(&self) -> ArrayView2<'_, f64> {
        self.decision_matrix.view()
    }

    #[must_use]
    pub fn probability_matrix(&self) -> ArrayView2<'_, f64> {
        self.probability_matrix.view()
    }

    #[must_use]
    pub fn predicted_labels(&self) -> &[String] {
        &self.predicted_labels
    }

    #[must_use]
    pub fn over_clustering(&self) -> Option<&[String]> {
        self.over_clustering.as_deref()
    }

    #[must_use]
    pub fn majority_voting(&self) -> Option<&[String]> {
        self.majority_voting.as_deref()
    }

    #[must_use]
    pub fn labels(&self, column: LabelColumn) -> Option<&[String]> {
        match column {
            LabelColumn::PredictedLabels => Some(&self.predicted_labels),
            LabelColumn::MajorityVoting => self.majority_voting(),
        }
    }

    /// 過剰クラスタリングを使って多数決を行い、2 列を追加した結果を返す。
    ///
    /// # Errors
    /// クラスタ割り当ての長さが細胞数と異なる場合。
    pub fn with_majority_vote(mut self, over_clustering: Vec<String>) -> Result<Self> {
        let voted = majority_vote(&self.predicted_labels, &over_clustering)?;
        self.over_clustering = Some(over_clustering);
        self.majority_voting = Some(voted);
        Ok(self)
    }

    /// 細胞種ごとの細胞数。多い順、同数ならラベル順。指定列がなければ `None`。
    #[must_use]
    pub fn summary_frequency(&self, by: LabelColumn) -> Option<Vec<(String, usize)>> {
        let labels = self.labels(by)?;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for label in labels {
            *counts.entry(label.as_str()).or_default() += 1;
        }
        let mut summary: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(label, count)| (label.to_string(), count))
            .collect();
        summary.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Some(summary)
    }

    /// ラベル表と確率行列を 2 シートの xlsx に書き出す。拡張子は `.xlsx` に置き換える。
    ///
    /// # Errors
    /// ブックの作成または保存に失敗した場合は [`AnnotateError::Export`]。
    pub fn write_excel(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref().with_extension("xlsx");
        self.build_workbook()
            .and_then(|mut workbook| workbook.save(&path))
            .map_err(|err| AnnotateError::Export {
                path: path.clone(),
                source: anyhow::Error::new(err),
            })?;
        info!(path = %path.display(), "annotation written to spreadsheet");
        Ok(path)
    }

    fn build_workbook(&self) -> Result<Workbook, XlsxError> {
        let mut workbook = Workbook::new();

        let sheet = workbook.add_worksheet();
        sheet.set_name(LABELS_SHEET)?;
        let header = self.label_header();
        for (col, name) in header.iter().enumerate().filter(|(_, name)| !name.is_empty()) {
            sheet.write_string(0, column_index(col)?, *name)?;
        }
        for (row, fields) in self.label_rows().enumerate() {
            let row = row_index(row + 1)?;
            for (col, value) in fields.iter().enumerate() {
                sheet.write_string(row, column_index(col)?, *value)?;
            }
        }

        let sheet = workbook.add_worksheet();
        sheet.set_name(PROBABILITY_SHEET)?;
        write_matrix_sheet(sheet, &self.cells, &self.classes, self.probability_matrix.view())?;

        Ok(workbook)
    }

    /// `predicted_labels.csv`、`probability_matrix.csv`、`decision_matrix.csv` を書き出す。
    ///
    /// # Errors
    /// ディレクトリの作成や書き込みに失敗した場合は [`AnnotateError::Export`]。
    pub fn write_tables(&self, dir: impl AsRef<Path>, prefix: &str) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|err| AnnotateError::Export {
            path: dir.to_path_buf(),
            source: anyhow::Error::new(err),
        })?;

        let labels_path = dir.join(format!("{prefix}predicted_labels.csv"));
        let probability_path = dir.join(format!("{prefix}probability_matrix.csv"));
        let decision_path = dir.join(format!("{prefix}decision_matrix.csv"));

        write_csv(&labels_path, |out| {
            out.write_record(self.label_header())?;
            for fields in self.label_rows() {
                out.write_record(fields)?;
            }
            Ok(())
        })?;
        write_csv(&probability_path, |out| {
            write_matrix_csv(out, &self.cells, &self.classes, self.probability_matrix.view())
        })?;
        write_csv(&decision_path, |out| {
            write_matrix_csv(out, &self.cells, &self.classes, self.decision_matrix.view())
        })?;

        info!(dir = %dir.display(), prefix, "annotation tables written");
        Ok(vec![labels_path, probability_path, decision_path])
    }

    fn label_header(&self) -> Vec<&str> {
        let mut header = vec!["", LabelColumn::PredictedLabels.as_str()];
        if self.over_clustering.is_some() {
            header.push("over_clustering");
        }
        if self.majority_voting.is_some() {
            header.push(LabelColumn::MajorityVoting.as_str());
        }
        header
    }

    fn label_rows(&self) -> impl Iterator<Item = Vec<&str>> {
        (0..self.cells.len()).map(move |i| {
            let mut fields = vec![self.cells[i].as_str(), self.predicted_labels[i].as_str()];
            if let Some(clusters) = &self.over_clustering {
                fields.push(clusters[i].as_str());
            }
            if let Some(voted) = &self.majority_voting {
                fields.push(voted[i].as_str());
            }
            fields
        })
    }
}

impl fmt::Display for AnnotationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types = self
            .summary_frequency(LabelColumn::PredictedLabels)
            .map_or(0, |summary| summary.len());
        write!(
            f,
            "{} cells predicted into {types} cell types",
            self.cell_count()
        )
    }
}

fn write_matrix_sheet(
    sheet: &mut Worksheet,
    cells: &[String],
    classes: &[String],
    matrix: ArrayView2<'_, f64>,
) -> Result<(), XlsxError> {
    for (col, class) in classes.iter().enumerate() {
        sheet.write_string(0, column_index(col + 1)?, class.as_str())?;
    }
    for (row, cell) in cells.iter().enumerate() {
        let excel_row = row_index(row + 1)?;
        sheet.write_string(excel_row, 0, cell.as_str())?;
        for (col, value) in matrix.row(row).iter().enumerate() {
            sheet.write_number(excel_row, column_index(col + 1)?, *value)?;
        }
    }
    Ok(())
}

fn row_index(row: usize) -> Result<u32, XlsxError> {
    u32::try_from(row).map_err(|_| XlsxError::RowColumnLimitError)
}

fn column_index(col: usize) -> Result<u16, XlsxError> {
    u16::try_from(col).map_err(|_| XlsxError::RowColumnLimitError)
}

fn write_csv(
    path: &Path,
    body: impl FnOnce(&mut csv::Writer<File>) -> csv::Result<()>,
) -> Result<()> {
    let export_error = |err: anyhow::Error| AnnotateError::Export {
        path: path.to_path_buf(),
        source: err,
    };
    let mut out = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))
        .map_err(export_error)?;
    body(&mut out).context("failed to write csv").map_err(export_error)?;
    out.flush().context("failed to flush csv").map_err(export_error)
}

fn write_matrix_csv(
    out: &mut csv::Writer<File>,
    cells: &[String],
    classes: &[String],
    matrix: ArrayView2<'_, f64>,
) -> csv::Result<()> {
    out.write_record(std::iter::once("").chain(classes.iter().map(String::as_str)))?;
    for (row, cell) in cells.iter().enumerate() {
        let mut record = Vec::with_capacity(classes.len() + 1);
        record.push(cell.clone());
        record.extend(matrix.row(row).iter().map(ToString::to_string));
        out.write_record(&record)?;
    }
    Ok(())
}
