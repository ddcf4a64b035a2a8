use std::fs;

use ndarray::{Array1, Array2, array};
use rstest::rstest;

use cell_annotator::annotate::align::align;
use cell_annotator::data::{InputOptions, ReadOptions};
use cell_annotator::model::{LinearClassifier, StandardScaler};
use cell_annotator::{
    AnnotateError, AnnotateOptions, Classifier, ExpressionMatrix, LabelColumn, Model,
    ModelDescription, PredictionMode, UNASSIGNED, annotate,
};

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

/// 3 クラス (A, B, C)、遺伝子 (g1, g2) の例示モデル。
fn worked_example_model() -> Model {
    let classifier = LinearClassifier::new(
        names(&["A", "B", "C"]),
        names(&["g1", "g2"]),
        array![[1.0, 0.0], [0.0, 1.0], [-1.0, -1.0]],
        array![0.0, 0.0, 0.0],
    )
    .unwrap();
    let scaler = StandardScaler::new(array![0.0, 0.0], array![1.0, 1.0]).unwrap();
    Model::new(classifier, scaler, ModelDescription::default()).unwrap()
}

#[test]
fn worked_example_scores_and_labels() {
    let model = worked_example_model();
    let matrix =
        ExpressionMatrix::new(names(&["cell"]), names(&["g1", "g2"]), array![[2.0, 0.0]]).unwrap();
    let classifier = Classifier::new(matrix, &model);

    let best = classifier.celltype(PredictionMode::BestMatch).unwrap();
    assert_eq!(best.decision_matrix().row(0).to_vec(), vec![2.0, 0.0, -2.0]);
    assert_eq!(best.predicted_labels(), ["A"]);

    let prob = classifier
        .celltype(PredictionMode::prob_match(0.5).unwrap())
        .unwrap();
    assert_eq!(prob.predicted_labels(), ["A"]);
    let p = prob.probability_matrix();
    assert!((p[[0, 0]] - 0.880_797).abs() < 1e-6);
    assert_eq!(p[[0, 1]], 0.5);
    assert!((p[[0, 2]] - 0.119_203).abs() < 1e-6);
}

#[test]
fn predictions_do_not_depend_on_input_gene_order() {
    let model = worked_example_model();
    let forward = ExpressionMatrix::new(
        names(&["c1", "c2", "c3"]),
        names(&["g1", "g2", "other"]),
        array![[2.0, 0.0, 5.0], [0.0, 3.0, 1.0], [0.5, 0.4, 0.0]],
    )
    .unwrap();
    let shuffled = ExpressionMatrix::new(
        names(&["c1", "c2", "c3"]),
        names(&["other", "g2", "g1"]),
        array![[5.0, 0.0, 2.0], [1.0, 3.0, 0.0], [0.0, 0.4, 0.5]],
    )
    .unwrap();

    let a = Classifier::new(forward, &model)
        .celltype(PredictionMode::BestMatch)
        .unwrap();
    let b = Classifier::new(shuffled, &model)
        .celltype(PredictionMode::BestMatch)
        .unwrap();
    assert_eq!(a.predicted_labels(), b.predicted_labels());
    assert_eq!(a.decision_matrix(), b.decision_matrix());
    assert_eq!(a.probability_matrix(), b.probability_matrix());
}

#[test]
fn probabilities_are_bounded_and_monotonic_in_score() {
    let model = worked_example_model();
    let matrix = ExpressionMatrix::new(
        names(&["c1", "c2", "c3", "c4"]),
        names(&["g1", "g2"]),
        array![[40.0, -40.0], [0.0, 0.0], [-3.0, 8.0], [1e6, 1e6]],
    )
    .unwrap();
    let result = Classifier::new(matrix, &model)
        .celltype(PredictionMode::BestMatch)
        .unwrap();
    let decision = result.decision_matrix();
    let probability = result.probability_matrix();
    for (d, p) in decision.iter().zip(probability.iter()) {
        assert!((0.0..=1.0).contains(p), "{p} out of range");
        assert!(!p.is_nan());
        if *d > 0.0 {
            assert!(*p > 0.5);
        }
    }
}

#[test]
fn prob_match_labels_are_sorted_joined_or_unassigned() {
    let classifier = LinearClassifier::new(
        names(&["T", "B", "NK"]),
        names(&["g1"]),
        array![[1.0], [1.0], [-1.0]],
        array![0.0, 0.0, 0.0],
    )
    .unwrap();
    let scaler = StandardScaler::new(array![0.0], array![1.0]).unwrap();
    let model = Model::new(classifier, scaler, ModelDescription::default()).unwrap();
    let matrix =
        ExpressionMatrix::new(names(&["c1", "c2"]), names(&["g1"]), array![[3.0], [0.0]]).unwrap();

    let result = Classifier::new(matrix, &model)
        .celltype(PredictionMode::ProbMatch { threshold: 0.5 })
        .unwrap();
    assert_eq!(result.predicted_labels(), ["B|T", UNASSIGNED]);
}

#[rstest]
#[case(-0.1)]
#[case(1.01)]
#[case(f64::NAN)]
fn thresholds_outside_unit_interval_are_rejected(#[case] threshold: f64) {
    assert!(matches!(
        PredictionMode::prob_match(threshold),
        Err(AnnotateError::InvalidThreshold(_))
    ));
}

#[test]
fn alignment_keeps_model_untouched_and_reusable() {
    let model = worked_example_model();
    let before = model.clone();
    let aligned = align(&model, &names(&["g2"])).unwrap();
    assert_eq!(aligned.features(), ["g2"]);
    assert_eq!(model, before);

    let err = align(&model, &names(&["x"])).unwrap_err();
    assert!(matches!(err, AnnotateError::NoGeneOverlap { .. }));
}

#[test]
fn majority_voting_is_constant_within_clusters() {
    let labels = names(&["A", "B", "A", "C", "C", "B", "A"]);
    let clusters = names(&["0", "0", "0", "1", "1", "1", "2"]);
    let voted =
        cell_annotator::annotate::majority::majority_vote(&labels, &clusters).unwrap();
    assert_eq!(voted, names(&["A", "A", "A", "C", "C", "C", "A"]));
    for (i, ci) in clusters.iter().enumerate() {
        for (j, cj) in clusters.iter().enumerate() {
            if ci == cj {
                assert_eq!(voted[i], voted[j]);
            }
        }
    }
}

#[test]
fn annotate_from_csv_with_over_clustering_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("counts.csv");
    let mut body = String::from("cell,g1,g2,g3\n");
    for i in 0..12 {
        if i < 6 {
            body.push_str(&format!("a{i},{},{},1\n", 20 + i, 1));
        } else {
            body.push_str(&format!("b{i},1,{},1\n", 20 + i));
        }
    }
    fs::write(&input, body).unwrap();

    let model = worked_example_model();
    let options = AnnotateOptions {
        input,
        input_options: InputOptions::default(),
        mode: PredictionMode::BestMatch,
        majority_voting: true,
        resolution: Some(0.2),
        ..AnnotateOptions::default()
    };
    let result = annotate(&options, &model).unwrap();
    assert_eq!(result.cell_count(), 12);
    assert_eq!(result.over_clustering().unwrap().len(), 12);
    assert_eq!(result.predicted_labels()[0], "A");
    assert_eq!(result.predicted_labels()[11], "B");
    assert_eq!(
        result.to_string(),
        "12 cells predicted into 2 cell types"
    );
    let summary = result.summary_frequency(LabelColumn::PredictedLabels).unwrap();
    assert_eq!(summary, vec![("A".to_string(), 6), ("B".to_string(), 6)]);

    let out = dir.path().join("out");
    let tables = result.write_tables(&out, "").unwrap();
    let labels = fs::read_to_string(&tables[0]).unwrap();
    assert!(labels.starts_with(",predicted_labels,over_clustering,majority_voting\n"));
    assert_eq!(labels.lines().count(), 13);

    let xlsx = result.write_excel(out.join("result")).unwrap();
    assert_eq!(xlsx.extension().unwrap(), "xlsx");
    assert!(xlsx.is_file());
}

#[test]
fn pre_normalized_input_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("norm.tsv");
    // log1p(5000) + log1p(5000): expm1 sums to 10000
    let v = 5000.0_f64.ln_1p();
    fs::write(&input, format!("cell\tg1\tg2\nc1\t{v}\t{v}\n")).unwrap();

    let model = worked_example_model();
    let options = AnnotateOptions {
        input: input.clone(),
        input_options: InputOptions {
            pre_normalized: true,
            ..InputOptions::default()
        },
        ..AnnotateOptions::default()
    };
    assert!(annotate(&options, &model).is_ok());

    fs::write(&input, "cell\tg1\tg2\nc1\t1.0\t2.0\n").unwrap();
    assert!(matches!(
        annotate(&options, &model),
        Err(AnnotateError::InvalidNormalization { .. })
    ));

    fs::write(&input, "cell\tg1\tg2\nc1\t-1.0\t2.0\n").unwrap();
    assert!(matches!(
        annotate(&options, &model),
        Err(AnnotateError::ScaledExpression)
    ));
}

/// 遺伝子 × 細胞の gzip mtx（2 遺伝子 × 3 細胞）と付随ファイルを書き出す。
fn write_gene_by_cell_mtx(dir: &std::path::Path, cell_names: &str) -> (std::path::PathBuf, ReadOptions) {
    use std::io::Write;

    let input = dir.join("matrix.mtx.gz");
    let body = "%%MatrixMarket matrix coordinate integer general\n\
                2 3 6\n1 1 9\n2 1 1\n1 2 1\n2 2 9\n1 3 8\n2 3 2\n";
    let mut encoder =
        flate2::write::GzEncoder::new(fs::File::create(&input).unwrap(), flate2::Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    encoder.finish().unwrap();

    let gene_file = dir.join("genes.tsv");
    fs::write(&gene_file, "g1\tENSG1\ng2\tENSG2\n").unwrap();
    let cell_file = dir.join("barcodes.tsv");
    fs::write(&cell_file, cell_names).unwrap();
    let read = ReadOptions {
        transpose: true,
        gene_file: Some(gene_file),
        cell_file: Some(cell_file),
    };
    (input, read)
}

#[test]
fn annotate_gene_by_cell_mtx_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (input, read) = write_gene_by_cell_mtx(dir.path(), "c1\nc2\nc3\n");
    let model = worked_example_model();
    let options = AnnotateOptions {
        input,
        input_options: InputOptions {
            read,
            ..InputOptions::default()
        },
        ..AnnotateOptions::default()
    };

    let result = annotate(&options, &model).unwrap();
    assert_eq!(result.cells(), ["c1", "c2", "c3"]);
    assert_eq!(result.predicted_labels(), ["A", "B", "A"]);
    let decision = result.decision_matrix();
    // g1 = log1p(9 / 10 * 10000), g2 = log1p(1 / 10 * 10000)
    assert!((decision[[0, 0]] - 9000.0_f64.ln_1p()).abs() < 1e-9);
    assert!((decision[[0, 1]] - 1000.0_f64.ln_1p()).abs() < 1e-9);
}

#[test]
fn gene_by_cell_mtx_checks_cell_names_against_columns() {
    let dir = tempfile::tempdir().unwrap();
    let (input, read) = write_gene_by_cell_mtx(dir.path(), "c1\nc2\n");
    let options = AnnotateOptions {
        input,
        input_options: InputOptions {
            read,
            ..InputOptions::default()
        },
        ..AnnotateOptions::default()
    };
    let err = annotate(&options, &worked_example_model()).unwrap_err();
    assert!(matches!(
        err,
        AnnotateError::CompanionCountMismatch {
            kind: "cells",
            expected: 3,
            found: 2,
            ..
        }
    ));
}

#[test]
fn unsupported_inputs_are_rejected_by_extension() {
    let model = worked_example_model();
    let options = |name: &str| AnnotateOptions {
        input: std::path::PathBuf::from(name),
        ..AnnotateOptions::default()
    };
    assert!(matches!(
        annotate(&options("data.h5ad"), &model),
        Err(AnnotateError::HdfContainer { .. })
    ));
    assert!(matches!(
        annotate(&options("data.xlsx"), &model),
        Err(AnnotateError::UnsupportedFormat { .. })
    ));
}

#[test]
fn synthetic_model_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let genes = 4;
    let classifier = LinearClassifier::new(
        names(&["X", "Y"]),
        (0..genes).map(|j| format!("g{j}")).collect(),
        Array2::from_shape_fn((2, genes), |(i, j)| (i as f64) - (j as f64) * 0.25),
        Array1::from(vec![0.5, -0.25]),
    )
    .unwrap();
    let scaler = StandardScaler::new(Array1::zeros(genes), Array1::ones(genes)).unwrap();
    let model = Model::new(classifier, scaler, ModelDescription::default()).unwrap();

    let path = model.write(dir.path().join("toy.pkl")).unwrap();
    assert_eq!(path.extension().unwrap(), "json");
    let loaded = Model::from_path(&path).unwrap();
    assert_eq!(loaded, model);
}
