use crate::dataset::StintRow;
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Dry-weather tire compounds the strategy models are trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compound {
    Soft,
    Medium,
    Hard,
}

impl Compound {
    pub const ALL: [Compound; 3] = [Compound::Soft, Compound::Medium, Compound::Hard];

    pub fn as_str(self) -> &'static str {
        match self {
            Compound::Soft => "SOFT",
            Compound::Medium => "MEDIUM",
            Compound::Hard => "HARD",
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compound {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SOFT" => Ok(Compound::Soft),
            "MEDIUM" => Ok(Compound::Medium),
            "HARD" => Ok(Compound::Hard),
            other => Err(other.to_string()),
        }
    }
}

/// Linear trend of lap time against lap index within one stint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationFit {
    pub slope: f64,
    pub intercept: f64,
}

impl DegradationFit {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }
}

/// Fits `time = slope * index + intercept` over the valid lap times of a stint.
///
/// Missing entries are dropped before indexing, so the index runs over the
/// remaining samples only. Fewer than two valid samples gives `None`.
pub fn estimate_degradation(lap_times: &[Option<Duration>]) -> Option<DegradationFit> {
    let secs: Vec<f64> = lap_times
        .iter()
        .flatten()
        .map(Duration::as_secs_f64)
        .collect();
    if secs.len() < 2 {
        return None;
    }

    let n = secs.len();
    let x = Array2::from_shape_vec((n, 1), (0..n).map(|i| i as f64).collect()).ok()?;
    let y = Array1::from_vec(secs);
    let ds = Dataset::new(x, y);

    let fitted = LinearRegression::new().fit(&ds).ok()?;
    Some(DegradationFit {
        slope: fitted.params()[0],
        intercept: fitted.intercept(),
    })
}

/// Per-compound degradation inputs for one race.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationTable {
    pub soft: DegradationFit,
    pub medium: DegradationFit,
    pub hard: DegradationFit,
}

impl Default for DegradationTable {
    fn default() -> Self {
        Self {
            soft: DegradationFit::new(-23.0, 94.2),
            medium: DegradationFit::new(-1.5, 95.0),
            hard: DegradationFit::new(-0.8, 83.0),
        }
    }
}

impl DegradationTable {
    pub fn get(&self, compound: Compound) -> DegradationFit {
        match compound {
            Compound::Soft => self.soft,
            Compound::Medium => self.medium,
            Compound::Hard => self.hard,
        }
    }

    pub fn get_mut(&mut self, compound: Compound) -> &mut DegradationFit {
        match compound {
            Compound::Soft => &mut self.soft,
            Compound::Medium => &mut self.medium,
            Compound::Hard => &mut self.hard,
        }
    }

    /// Averages the historical fits per compound, optionally for one event only.
    /// Compounds with no usable rows keep the values already in `self`.
    pub fn with_history(mut self, rows: &[StintRow], event: Option<&str>) -> Self {
        for compound in Compound::ALL {
            let fits: Vec<(f64, f64)> = rows
                .iter()
                .filter(|r| event.map_or(true, |e| r.event_name == e))
                .filter(|r| r.compound.parse::<Compound>().ok() == Some(compound))
                .filter_map(|r| Some((r.degradation_slope?, r.degradation_bias?)))
                .collect();
            if fits.is_empty() {
                continue;
            }
            let n = fits.len() as f64;
            let slope = fits.iter().map(|f| f.0).sum::<f64>() / n;
            let intercept = fits.iter().map(|f| f.1).sum::<f64>() / n;
            *self.get_mut(compound) = DegradationFit::new(slope, intercept);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laps(secs: &[Option<f64>]) -> Vec<Option<Duration>> {
        secs.iter().map(|s| s.map(Duration::from_secs_f64)).collect()
    }

    #[test]
    fn fewer_than_two_valid_laps_is_undefined() {
        assert_eq!(estimate_degradation(&[]), None);
        assert_eq!(estimate_degradation(&laps(&[Some(91.2)])), None);
        assert_eq!(estimate_degradation(&laps(&[None, Some(91.2), None])), None);
    }

    #[test]
    fn recovers_linear_trend() {
        let (a, b) = (0.125, 92.5);
        let times: Vec<Option<f64>> = (0..12).map(|i| Some(a * i as f64 + b)).collect();
        let fit = estimate_degradation(&laps(&times)).unwrap();
        assert!((fit.slope - a).abs() < 1e-6, "slope {}", fit.slope);
        assert!((fit.intercept - b).abs() < 1e-6, "intercept {}", fit.intercept);
    }

    #[test]
    fn missing_laps_are_skipped_before_indexing() {
        // valid samples become indices 0, 1, 2
        let fit = estimate_degradation(&laps(&[Some(90.0), None, Some(91.0), Some(92.0)])).unwrap();
        assert!((fit.slope - 1.0).abs() < 1e-6);
        assert!((fit.intercept - 90.0).abs() < 1e-6);
    }

    #[test]
    fn compound_labels_parse_case_insensitively() {
        assert_eq!("soft".parse::<Compound>(), Ok(Compound::Soft));
        assert_eq!(" HARD ".parse::<Compound>(), Ok(Compound::Hard));
        assert!("INTERMEDIATE".parse::<Compound>().is_err());
    }

    #[test]
    fn history_averages_per_compound() {
        let row = |compound: &str, slope: Option<f64>, bias: Option<f64>| StintRow {
            event_name: "Bahrain Grand Prix".into(),
            compound: compound.into(),
            degradation_slope: slope,
            degradation_bias: bias,
            ..StintRow::default()
        };
        let rows = vec![
            row("SOFT", Some(0.2), Some(95.0)),
            row("SOFT", Some(0.4), Some(97.0)),
            row("HARD", None, None),
            row("WET", Some(9.0), Some(9.0)),
        ];
        let table = DegradationTable::default().with_history(&rows, None);
        assert!((table.soft.slope - 0.3).abs() < 1e-12);
        assert!((table.soft.intercept - 96.0).abs() < 1e-12);
        assert_eq!(table.hard, DegradationTable::default().hard);

        let other_event = DegradationTable::default().with_history(&rows, Some("Monaco Grand Prix"));
        assert_eq!(other_event, DegradationTable::default());
    }
}
