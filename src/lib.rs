//! Pit stop strategy prediction.
//!
//! Historical race sessions are reduced to per-stint statistics ([`data`],
//! [`dataset`]), and pre-trained models ([`predictor`]) turn the conditions of
//! a single race into a stint plan ([`strategy`]).

pub mod cli;
pub mod data;
pub mod dataset;
pub mod error;
pub mod model;
pub mod predictor;
pub mod strategy;

pub use error::{DataError, StrategyError};
pub use model::{estimate_degradation, Compound, DegradationFit, DegradationTable};
pub use predictor::{FeatureVector, LabelEncoder, ModelBundle, Predictor};
pub use strategy::{PlannedStint, RaceConditions, StrategyPlan, StrategyPredictor};
