use crate::error::{Result, StrategyError};
use crate::model::{Compound, DegradationTable};
use crate::predictor::{FeatureVector, ModelBundle};
use serde::Serialize;
use std::cmp::Reverse;
use tracing::{debug, warn};

/// Feature names the strategy models were trained with.
pub mod feature {
    pub const CIRCUIT_LENGTH: &str = "CircuitLength";
    pub const DESIGNED_LAPS: &str = "DesignedLaps";
    pub const TRACK_TEMP: &str = "TrackTemp";
    pub const AIR_TEMP: &str = "AirTemp";
    pub const HUMIDITY: &str = "Humidity";
    pub const RAINFALL: &str = "Rainfall";
    pub const SAFETY_CAR: &str = "SafetyCar";
    pub const EVENT_ENCODED: &str = "EventEncoded";
    pub const STINT_NUM: &str = "stint_num";
    pub const CUMULATIVE_LAPS: &str = "cumulative_laps";
    pub const PREV_STINT_LENGTH: &str = "prev_stint_length";
    pub const DEGRADATION_SLOPE: &str = "DegradationSlope";
    pub const DEGRADATION_BIAS: &str = "DegradationBias";
}

/// Longest stint a length model may predict; anything at or above is rejected.
const MAX_STINT_LENGTH: f64 = u32::MAX as f64;

/// Inputs describing the race to plan for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceConditions {
    pub event: String,
    /// meters
    pub circuit_length: f64,
    pub designed_laps: u32,
    pub track_temp: f64,
    pub air_temp: f64,
    pub humidity: f64,
    pub rainfall: f64,
    pub safety_car: bool,
    pub degradation: DegradationTable,
}

impl RaceConditions {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            circuit_length: 4309.0,
            designed_laps: 71,
            track_temp: 51.56,
            air_temp: 23.14,
            humidity: 60.1,
            rainfall: 0.0,
            safety_car: false,
            degradation: DegradationTable::default(),
        }
    }

    fn safety_car_flag(&self) -> f64 {
        if self.safety_car {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedStint {
    pub stint_number: usize,
    pub compound: Compound,
    /// Can be below 1 for the last stint once the total is reconciled.
    pub length: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyPlan {
    pub predicted_stint_count: usize,
    pub stints: Vec<PlannedStint>,
    pub designed_laps: u32,
    pub laps_covered: i64,
}

impl StrategyPlan {
    pub fn total_laps(&self) -> i64 {
        self.stints.iter().map(|s| s.length).sum()
    }
}

/// Running state carried from one stint prediction to the next.
#[derive(Debug, Default)]
struct StintAccumulator {
    cumulative_laps: i64,
    previous_stint_length: i64,
    stints: Vec<PlannedStint>,
}

/// Predicts a pit strategy with a borrowed set of models.
pub struct StrategyPredictor<'a> {
    models: &'a ModelBundle,
}

impl<'a> StrategyPredictor<'a> {
    pub fn new(models: &'a ModelBundle) -> Self {
        Self { models }
    }

    /// Stint count first, then compound and length for each stint in order.
    /// Any model failure aborts the whole prediction.
    pub fn predict(&self, conditions: &RaceConditions) -> Result<StrategyPlan> {
        let event_code = self.models.events.encode(&conditions.event)? as f64;

        let stint_count = self.predict_stint_count(conditions, event_code)?;
        let capacity = self.models.capacity();
        if stint_count > capacity {
            return Err(StrategyError::CapacityExceeded {
                requested: stint_count,
                capacity,
            });
        }
        if stint_count == 0 {
            warn!(event = %conditions.event, "stint count model predicted no stints");
        }

        let acc = (1..=stint_count).try_fold(StintAccumulator::default(), |acc, n| {
            self.predict_stint(conditions, event_code, n, acc)
        })?;

        let mut stints = acc.stints;
        let laps_covered =
            reconcile_laps(&mut stints, conditions.designed_laps, acc.cumulative_laps)?;
        enforce_compound_diversity(&mut stints);

        Ok(StrategyPlan {
            predicted_stint_count: stint_count,
            stints,
            designed_laps: conditions.designed_laps,
            laps_covered,
        })
    }

    fn predict_stint_count(&self, c: &RaceConditions, event_code: f64) -> Result<usize> {
        let x = FeatureVector::new()
            .with(feature::CIRCUIT_LENGTH, c.circuit_length)
            .with(feature::DESIGNED_LAPS, f64::from(c.designed_laps))
            .with(feature::TRACK_TEMP, c.track_temp)
            .with(feature::AIR_TEMP, c.air_temp)
            .with(feature::EVENT_ENCODED, event_code);
        let raw = self.models.stint_count.predict(&x)?;
        if !raw.is_finite() {
            return Err(StrategyError::invalid_prediction("stint count", raw));
        }
        let count = raw.trunc().max(0.0) as usize;
        debug!(raw, count, "predicted stint count");
        Ok(count)
    }

    fn predict_stint(
        &self,
        c: &RaceConditions,
        event_code: f64,
        stint_number: usize,
        mut acc: StintAccumulator,
    ) -> Result<StintAccumulator> {
        let slot = stint_number - 1;

        let compound_x = FeatureVector::new()
            .with(feature::CIRCUIT_LENGTH, c.circuit_length)
            .with(feature::CUMULATIVE_LAPS, acc.cumulative_laps as f64)
            .with(feature::TRACK_TEMP, c.track_temp)
            .with(feature::AIR_TEMP, c.air_temp)
            .with(feature::STINT_NUM, stint_number as f64)
            .with(feature::EVENT_ENCODED, event_code)
            .with(feature::HUMIDITY, c.humidity)
            .with(feature::RAINFALL, c.rainfall)
            .with(feature::SAFETY_CAR, c.safety_car_flag());
        let code = self.models.stint_compounds[slot].predict(&compound_x)?;
        let label = self.models.compounds.decode(code)?;
        let compound: Compound = label
            .parse()
            .map_err(|_| StrategyError::UnsupportedCompound(label.to_string()))?;
        let degradation = c.degradation.get(compound);

        let length_x = FeatureVector::new()
            .with(feature::CIRCUIT_LENGTH, c.circuit_length)
            .with(feature::TRACK_TEMP, c.track_temp)
            .with(feature::AIR_TEMP, c.air_temp)
            .with(feature::PREV_STINT_LENGTH, acc.previous_stint_length as f64)
            .with(feature::EVENT_ENCODED, event_code)
            .with(feature::DEGRADATION_SLOPE, degradation.slope)
            .with(feature::DEGRADATION_BIAS, degradation.intercept)
            .with(feature::DESIGNED_LAPS, f64::from(c.designed_laps))
            .with(feature::HUMIDITY, c.humidity)
            .with(feature::RAINFALL, c.rainfall)
            .with(feature::SAFETY_CAR, c.safety_car_flag());
        let raw = self.models.stint_lengths[slot].predict(&length_x)?;
        if !raw.is_finite() || raw >= MAX_STINT_LENGTH {
            return Err(StrategyError::invalid_prediction("stint length", raw));
        }
        // as-cast truncates toward zero
        let length = (raw as i64).max(1);
        debug!(stint = stint_number, %compound, raw, length, "predicted stint");

        acc.cumulative_laps = acc
            .cumulative_laps
            .checked_add(length)
            .ok_or_else(|| StrategyError::invalid_prediction("stint length", raw))?;
        acc.previous_stint_length = length;
        acc.stints.push(PlannedStint {
            stint_number,
            compound,
            length,
        });
        Ok(acc)
    }
}

/// Folds any shortfall or excess into the last stint. Returns the laps covered.
fn reconcile_laps(
    stints: &mut [PlannedStint],
    designed_laps: u32,
    cumulative_laps: i64,
) -> Result<i64> {
    let designed = i64::from(designed_laps);
    let overflow = || StrategyError::invalid_prediction("stint length", cumulative_laps as f64);
    let difference = designed.checked_sub(cumulative_laps).ok_or_else(overflow)?;
    match stints.last_mut() {
        Some(last) if difference != 0 => {
            last.length = last.length.checked_add(difference).ok_or_else(overflow)?;
            if last.length < 1 {
                warn!(
                    stint = last.stint_number,
                    length = last.length,
                    "final stint is non-positive after matching race distance"
                );
            }
            Ok(designed)
        }
        _ => Ok(cumulative_laps),
    }
}

/// A plan on a single compound gets one stint switched: the longest to HARD,
/// or if everything is already HARD, the shortest to SOFT.
fn enforce_compound_diversity(stints: &mut [PlannedStint]) {
    let Some(shared) = stints.first().map(|s| s.compound) else {
        return;
    };
    if stints.iter().any(|s| s.compound != shared) {
        return;
    }

    // min_by_key keeps the first of equal elements
    let (index, replacement) = if shared != Compound::Hard {
        let longest = stints.iter().enumerate().min_by_key(|(_, s)| Reverse(s.length));
        (longest.map(|(i, _)| i), Compound::Hard)
    } else {
        let shortest = stints.iter().enumerate().min_by_key(|(_, s)| s.length);
        (shortest.map(|(i, _)| i), Compound::Soft)
    };
    if let Some(i) = index {
        debug!(stint = stints[i].stint_number, from = %shared, to = %replacement, "forcing compound change");
        stints[i].compound = replacement;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stint(n: usize, compound: Compound, length: i64) -> PlannedStint {
        PlannedStint {
            stint_number: n,
            compound,
            length,
        }
    }

    #[test]
    fn shortfall_goes_to_last_stint() {
        let mut stints = vec![stint(1, Compound::Soft, 30), stint(2, Compound::Hard, 20)];
        assert_eq!(reconcile_laps(&mut stints, 56, 50).unwrap(), 56);
        assert_eq!(stints[0].length, 30);
        assert_eq!(stints[1].length, 26);
    }

    #[test]
    fn excess_can_leave_non_positive_final_stint() {
        let mut stints = vec![stint(1, Compound::Soft, 30), stint(2, Compound::Hard, 20)];
        assert_eq!(reconcile_laps(&mut stints, 10, 50).unwrap(), 10);
        assert_eq!(stints[1].length, -20);
    }

    #[test]
    fn unrepresentable_total_is_an_error() {
        let mut stints = vec![stint(1, Compound::Soft, 30)];
        assert!(matches!(
            reconcile_laps(&mut stints, 56, i64::MIN),
            Err(StrategyError::InvalidPrediction { .. })
        ));
        assert_eq!(stints[0].length, 30);
    }

    #[test]
    fn empty_plan_is_left_alone() {
        let mut stints: Vec<PlannedStint> = vec![];
        assert_eq!(reconcile_laps(&mut stints, 56, 0).unwrap(), 0);
        enforce_compound_diversity(&mut stints);
        assert!(stints.is_empty());
    }

    #[test]
    fn all_soft_switches_longest_to_hard() {
        let mut stints = vec![stint(1, Compound::Soft, 30), stint(2, Compound::Soft, 26)];
        enforce_compound_diversity(&mut stints);
        assert_eq!(stints[0].compound, Compound::Hard);
        assert_eq!(stints[1].compound, Compound::Soft);
        assert_eq!((stints[0].length, stints[1].length), (30, 26));
    }

    #[test]
    fn all_hard_switches_shortest_to_soft() {
        let mut stints = vec![
            stint(1, Compound::Hard, 20),
            stint(2, Compound::Hard, 15),
            stint(3, Compound::Hard, 15),
        ];
        enforce_compound_diversity(&mut stints);
        let compounds: Vec<Compound> = stints.iter().map(|s| s.compound).collect();
        assert_eq!(compounds, [Compound::Hard, Compound::Soft, Compound::Hard]);
    }

    #[test]
    fn longest_tie_takes_first() {
        let mut stints = vec![stint(1, Compound::Medium, 25), stint(2, Compound::Medium, 25)];
        enforce_compound_diversity(&mut stints);
        assert_eq!(stints[0].compound, Compound::Hard);
        assert_eq!(stints[1].compound, Compound::Medium);
    }

    #[test]
    fn mixed_plan_is_untouched() {
        let before = vec![stint(1, Compound::Medium, 25), stint(2, Compound::Hard, 30)];
        let mut after = before.clone();
        enforce_compound_diversity(&mut after);
        assert_eq!(before, after);
    }

    #[test]
    fn single_stint_is_still_switched() {
        let mut stints = vec![stint(1, Compound::Hard, 57)];
        enforce_compound_diversity(&mut stints);
        assert_eq!(stints[0].compound, Compound::Soft);
    }
}
