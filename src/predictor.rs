//! Pre-trained model artifacts and the bundle handed to the strategy pipeline.
//!
//! Every predictor declares the named features it was trained on. Callers
//! build a [`FeatureVector`] keyed by name and the predictor picks its inputs
//! out of it in its own order, so feature order in the caller never matters.

use crate::error::{Result, StrategyError};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Named model inputs for one prediction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    values: Vec<(&'static str, f64)>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name`, replacing any previous value.
    pub fn with(mut self, name: &'static str, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &'static str, value: f64) {
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.iter().map(|(n, _)| *n)
    }

    /// Values in the order given by `names`.
    pub fn ordered(&self, model: &str, names: &[String]) -> Result<Vec<f64>> {
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| StrategyError::MissingFeature {
                    model: model.to_string(),
                    feature: name.clone(),
                })
            })
            .collect()
    }
}

/// A trained model. Classifiers return the integer class code as a float.
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<f64>;

    fn name(&self) -> &str;
}

/// `y = coefficients · x + intercept`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    #[serde(default)]
    pub name: String,
    pub features: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl Predictor for LinearRegressor {
    fn predict(&self, features: &FeatureVector) -> Result<f64> {
        if self.features.len() != self.coefficients.len() {
            return Err(StrategyError::ShapeMismatch {
                model: self.name.clone(),
                features: self.features.len(),
                coefficients: self.coefficients.len(),
            });
        }
        let x = Array1::from_vec(features.ordered(&self.name, &self.features)?);
        Ok(ArrayView1::from(&self.coefficients).dot(&x) + self.intercept)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// One linear score per class; the highest score wins, first class on ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    #[serde(default)]
    pub name: String,
    pub features: Vec<String>,
    pub classes: Vec<u32>,
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl Predictor for LinearClassifier {
    fn predict(&self, features: &FeatureVector) -> Result<f64> {
        let ragged = self
            .coefficients
            .iter()
            .any(|row| row.len() != self.features.len());
        let shape_mismatch = || StrategyError::ShapeMismatch {
            model: self.name.clone(),
            features: self.features.len(),
            coefficients: self.coefficients.iter().map(Vec::len).sum(),
        };
        if ragged
            || self.classes.is_empty()
            || self.coefficients.len() != self.classes.len()
            || self.intercepts.len() != self.classes.len()
        {
            return Err(shape_mismatch());
        }

        // one row of weights per class
        let flat: Vec<f64> = self.coefficients.iter().flatten().copied().collect();
        let weights = Array2::from_shape_vec((self.classes.len(), self.features.len()), flat)
            .map_err(|_| shape_mismatch())?;

        let x = Array1::from_vec(features.ordered(&self.name, &self.features)?);
        let scores = weights.dot(&x) + &ArrayView1::from(&self.intercepts);

        let mut best: Option<(u32, f64)> = None;
        for (class, &score) in self.classes.iter().zip(scores.iter()) {
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((*class, score));
            }
        }
        best.map(|(class, _)| f64::from(class))
            .ok_or_else(|| StrategyError::invalid_prediction(&self.name, f64::NAN))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// On-disk form of a predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    LinearRegressor(LinearRegressor),
    LinearClassifier(LinearClassifier),
}

impl ModelArtifact {
    pub fn into_predictor(self, fallback_name: &str) -> Box<dyn Predictor> {
        match self {
            ModelArtifact::LinearRegressor(mut m) => {
                if m.name.is_empty() {
                    m.name = fallback_name.to_string();
                }
                Box::new(m)
            }
            ModelArtifact::LinearClassifier(mut m) => {
                if m.name.is_empty() {
                    m.name = fallback_name.to_string();
                }
                Box::new(m)
            }
        }
    }
}

/// Closed bidirectional mapping between labels and integer codes.
/// A label's code is its index in `classes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoder {
    #[serde(default)]
    pub name: String,
    pub classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new(name: &str, classes: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            classes,
        }
    }

    pub fn encode(&self, label: &str) -> Result<usize> {
        self.classes
            .iter()
            .position(|c| c == label)
            .ok_or_else(|| StrategyError::UnknownLabel {
                vocabulary: self.name.clone(),
                label: label.to_string(),
            })
    }

    /// Only exact, in-range integer codes decode.
    pub fn decode(&self, code: f64) -> Result<&str> {
        let unknown = || StrategyError::UnknownCode {
            vocabulary: self.name.clone(),
            code,
        };
        if !code.is_finite() || code < 0.0 || code.fract() != 0.0 {
            return Err(unknown());
        }
        self.classes
            .get(code as usize)
            .map(String::as_str)
            .ok_or_else(unknown)
    }
}

/// Number of per-stint models shipped with a standard bundle.
pub const STINT_CAPACITY: usize = 4;

/// Everything the pipeline needs for one inference call.
pub struct ModelBundle {
    pub stint_count: Box<dyn Predictor>,
    pub stint_lengths: Vec<Box<dyn Predictor>>,
    pub stint_compounds: Vec<Box<dyn Predictor>>,
    pub events: LabelEncoder,
    pub compounds: LabelEncoder,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|source| StrategyError::Artifact {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| StrategyError::ArtifactFormat {
        path: path.to_path_buf(),
        source,
    })
}

fn read_model(dir: &Path, stem: &str) -> Result<Box<dyn Predictor>> {
    let artifact: ModelArtifact = read_json(&dir.join(format!("{stem}.json")))?;
    Ok(artifact.into_predictor(stem))
}

impl ModelBundle {
    pub fn new(
        stint_count: Box<dyn Predictor>,
        stint_lengths: Vec<Box<dyn Predictor>>,
        stint_compounds: Vec<Box<dyn Predictor>>,
        events: LabelEncoder,
        compounds: LabelEncoder,
    ) -> Result<Self> {
        if stint_lengths.len() != stint_compounds.len() {
            return Err(StrategyError::BundleMismatch {
                lengths: stint_lengths.len(),
                compounds: stint_compounds.len(),
            });
        }
        Ok(Self {
            stint_count,
            stint_lengths,
            stint_compounds,
            events,
            compounds,
        })
    }

    /// Loads `stint_count_model`, `stint_{n}_len_model`, `stint_{n}_compound_model`
    /// for n in 1..=4, plus the `le_event` and `le_compound` encoders.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let stint_count = read_model(dir, "stint_count_model")?;
        let stint_lengths = (1..=STINT_CAPACITY)
            .map(|n| read_model(dir, &format!("stint_{n}_len_model")))
            .collect::<Result<Vec<_>>>()?;
        let stint_compounds = (1..=STINT_CAPACITY)
            .map(|n| read_model(dir, &format!("stint_{n}_compound_model")))
            .collect::<Result<Vec<_>>>()?;

        let mut events: LabelEncoder = read_json(&dir.join("le_event.json"))?;
        if events.name.is_empty() {
            events.name = "event".into();
        }
        let mut compounds: LabelEncoder = read_json(&dir.join("le_compound.json"))?;
        if compounds.name.is_empty() {
            compounds.name = "compound".into();
        }

        info!(
            dir = %dir.display(),
            capacity = stint_lengths.len(),
            events = events.classes.len(),
            "loaded model bundle"
        );
        Self::new(stint_count, stint_lengths, stint_compounds, events, compounds)
    }

    /// Highest stint count this bundle can predict.
    pub fn capacity(&self) -> usize {
        self.stint_lengths.len()
    }
}
