use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::annotate::{AnnotateOptions, LabelColumn, PredictionMode, annotate};
use crate::annotate::scoring::DEFAULT_PROBABILITY_THRESHOLD;
use crate::config::Config;
use crate::data::{InputOptions, ReadOptions};
use crate::model::Model;
use crate::registry::ModelStore;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Automated cell type annotation for single-cell expression data", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Predict cell types for an expression matrix
    Annotate(AnnotateArgs),
    /// Manage the local model store
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },
}

#[derive(Args, Debug, Clone)]
pub struct AnnotateArgs {
    /// Expression matrix (.csv, .tsv, .tab, .txt, .mtx, .mtx.gz)
    #[arg(long, short = 'i')]
    pub input: PathBuf,

    /// Model name in the store or path to a model file (default model if omitted)
    #[arg(long, short = 'm', env = "CELL_ANNOTATOR_MODEL")]
    pub model: Option<String>,

    /// Input is gene-by-cell rather than cell-by-gene
    #[arg(long)]
    pub transpose: bool,

    /// Gene names for .mtx input, one per line
    #[arg(long, requires = "cell_file")]
    pub gene_file: Option<PathBuf>,

    /// Cell names for .mtx input, one per line
    #[arg(long, requires = "gene_file")]
    pub cell_file: Option<PathBuf>,

    /// Input is already log1p normalized to 10000 counts per cell
    #[arg(long)]
    pub pre_normalized: bool,

    /// Log1p normalized layer to use when the input holds scaled values
    #[arg(long, requires = "pre_normalized")]
    pub raw_input: Option<PathBuf>,

    /// Gene names for an .mtx raw layer whose genes differ from the main input
    #[arg(long, requires = "raw_input")]
    pub raw_gene_file: Option<PathBuf>,

    /// Prediction mode: best-match or prob-match
    #[arg(long, default_value = "best-match")]
    pub mode: String,

    /// Probability threshold for prob-match
    #[arg(long, default_value_t = DEFAULT_PROBABILITY_THRESHOLD)]
    pub p_thres: f64,

    /// Refine predictions by majority voting over an over-clustering
    #[arg(long)]
    pub majority_voting: bool,

    /// Precomputed over-clustering, one cluster id per cell
    #[arg(long, requires = "majority_voting")]
    pub over_clustering: Option<PathBuf>,

    /// Cell-by-cell connectivity matrix (.mtx) used for over-clustering
    #[arg(long, requires = "majority_voting", conflicts_with = "over_clustering")]
    pub neighbor_graph: Option<PathBuf>,

    /// Over-clustering resolution (chosen from the cell count if omitted)
    #[arg(long, requires = "majority_voting")]
    pub resolution: Option<f64>,

    /// Output directory for result tables
    #[arg(long, short = 'o', default_value = ".")]
    pub outdir: PathBuf,

    /// Prefix for output file names
    #[arg(long, short = 'p', default_value = "")]
    pub prefix: String,

    /// Write a single .xlsx workbook instead of CSV tables
    #[arg(long)]
    pub xlsx: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ModelsCommand {
    /// List models available in the local store (downloads all if empty)
    List,
    /// Download models listed in the remote index
    Download {
        /// Re-download the index and overwrite existing files
        #[arg(long)]
        force: bool,
        /// Models to download (all when omitted)
        names: Vec<String>,
    },
    /// Show model descriptions
    Describe {
        /// Read descriptions from the index instead of the model files
        #[arg(long)]
        from_index: bool,
    },
    /// Show the model index
    Index {
        /// Fetch the index from the server even when cached
        #[arg(long)]
        force: bool,
    },
}

/// コマンドを実行する。
///
/// # Errors
/// 各コマンドの失敗をコンテキスト付きで返す。
pub fn run(cli: Cli, config: &Config) -> Result<()> {
    let store = ModelStore::from_config(config).context("failed to set up the model store")?;
    match cli.command {
        Command::Annotate(args) => run_annotate(&args, &store),
        Command::Models { command } => run_models(command, &store),
    }
}

fn run_annotate(args: &AnnotateArgs, store: &ModelStore) -> Result<()> {
    let mode = PredictionMode::parse_with_threshold(&args.mode, args.p_thres)
        .context("invalid prediction mode")?;
    if matches!(mode, PredictionMode::BestMatch)
        && (args.p_thres - DEFAULT_PROBABILITY_THRESHOLD).abs() > f64::EPSILON
    {
        warn!("--p-thres is ignored in best-match mode");
    }

    let model = Model::load(args.model.as_deref(), store).context("failed to load model")?;
    info!(
        cell_types = model.cell_types().len(),
        features = model.features().len(),
        "model loaded"
    );

    let options = AnnotateOptions {
        input: args.input.clone(),
        input_options: InputOptions {
            read: ReadOptions {
                transpose: args.transpose,
                gene_file: args.gene_file.clone(),
                cell_file: args.cell_file.clone(),
            },
            pre_normalized: args.pre_normalized,
            raw_input: args.raw_input.clone(),
            raw_gene_file: args.raw_gene_file.clone(),
        },
        mode,
        majority_voting: args.majority_voting,
        over_clustering_file: args.over_clustering.clone(),
        neighbor_graph: args.neighbor_graph.clone(),
        resolution: args.resolution,
    };
    let result = annotate(&options, &model)
        .with_context(|| format!("failed to annotate {}", args.input.display()))?;

    let written = if args.xlsx {
        let path = args.outdir.join(format!("{}annotation_result.xlsx", args.prefix));
        std::fs::create_dir_all(&args.outdir)
            .with_context(|| format!("failed to create {}", args.outdir.display()))?;
        vec![result.write_excel(path).context("failed to write workbook")?]
    } else {
        result
            .write_tables(&args.outdir, &args.prefix)
            .context("failed to write result tables")?
    };

    println!("{result}");
    let column = if result.majority_voting().is_some() {
        LabelColumn::MajorityVoting
    } else {
        LabelColumn::PredictedLabels
    };
    for (label, count) in result.summary_frequency(column).unwrap_or_default() {
        println!("{label}\t{count}");
    }
    for path in written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn run_models(command: ModelsCommand, store: &ModelStore) -> Result<()> {
    match command {
        ModelsCommand::List => {
            for name in store.all_models().context("failed to list models")? {
                println!("{name}");
            }
        }
        ModelsCommand::Download { force, names } => {
            let report = store
                .download_models(force, &names)
                .context("failed to download models")?;
            println!(
                "downloaded {}, skipped {}, failed {}",
                report.downloaded.len(),
                report.skipped.len(),
                report.failed.len()
            );
            for name in &report.failed {
                println!("failed: {name}");
            }
        }
        ModelsCommand::Describe { from_index } => {
            for (name, details) in store
                .describe(!from_index)
                .context("failed to describe models")?
            {
                println!("{name}\t{details}");
            }
        }
        ModelsCommand::Index { force } => {
            let index = store.index(force).context("failed to read model index")?;
            let default = index.default_entry().map(|entry| entry.filename.clone());
            for entry in &index.models {
                let marker = if default.as_deref() == Some(entry.filename.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {}\t{}\t{}",
                    entry.filename,
                    entry.version.as_deref().unwrap_or("-"),
                    entry.date.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}
