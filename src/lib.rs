#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod annotate;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod observability;
pub mod registry;

pub use annotate::{
    AnnotateOptions, AnnotationResult, Classifier, LabelColumn, PredictionMode, UNASSIGNED,
    annotate,
};
pub use data::ExpressionMatrix;
pub use error::AnnotateError;
pub use model::{Model, ModelDescription};
