//! Historical stint table: one row per driver stint across many races.

use crate::data::{extract_stints, SessionSource, StintSummary};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{info, warn};

/// Column order of the persisted table.
pub const COLUMNS: [&str; 22] = [
    "EventName",
    "RoundNumber",
    "EventYear",
    "Team",
    "Driver",
    "GridPosition",
    "FinalPosition",
    "Compound",
    "StintLen",
    "CircuitLength",
    "DesignedLaps",
    "StintStartLap",
    "StintEndLap",
    "AvgLapTime",
    "TrackTemp",
    "AirTemp",
    "Humidity",
    "Rainfall",
    "DegradationSlope",
    "DegradationBias",
    "SafetyCar",
    "PositionsDelta",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StintRow {
    #[serde(rename = "EventName")]
    pub event_name: String,
    #[serde(rename = "RoundNumber")]
    pub round: u32,
    #[serde(rename = "EventYear")]
    pub year: i32,
    #[serde(rename = "Team")]
    pub team: String,
    #[serde(rename = "Driver")]
    pub driver: String,
    #[serde(rename = "GridPosition")]
    pub grid_position: u32,
    #[serde(rename = "FinalPosition")]
    pub final_position: u32,
    #[serde(rename = "Compound")]
    pub compound: String,
    #[serde(rename = "StintLen")]
    pub stint_len: u32,
    #[serde(rename = "CircuitLength")]
    pub circuit_length: f64,
    #[serde(rename = "DesignedLaps")]
    pub designed_laps: Option<u32>,
    #[serde(rename = "StintStartLap")]
    pub stint_start_lap: u32,
    #[serde(rename = "StintEndLap")]
    pub stint_end_lap: u32,
    #[serde(rename = "AvgLapTime")]
    pub avg_lap_time: Option<f64>,
    #[serde(rename = "TrackTemp")]
    pub track_temp: Option<f64>,
    #[serde(rename = "AirTemp")]
    pub air_temp: Option<f64>,
    #[serde(rename = "Humidity")]
    pub humidity: Option<f64>,
    #[serde(rename = "Rainfall")]
    pub rainfall: u8,
    #[serde(rename = "DegradationSlope")]
    pub degradation_slope: Option<f64>,
    #[serde(rename = "DegradationBias")]
    pub degradation_bias: Option<f64>,
    #[serde(rename = "SafetyCar")]
    pub safety_car: u8,
    #[serde(rename = "PositionsDelta")]
    pub positions_delta: i64,
}

impl StintRow {
    pub fn from_summary(year: i32, round: u32, stint: &StintSummary) -> Self {
        StintRow {
            event_name: stint.event.clone(),
            round,
            year,
            team: stint.team.clone(),
            driver: stint.driver.clone(),
            grid_position: stint.grid_position,
            final_position: stint.final_position,
            compound: stint.compound.clone().unwrap_or_default(),
            stint_len: stint.lap_count,
            circuit_length: stint.circuit_length,
            designed_laps: stint.designed_laps,
            stint_start_lap: stint.start_lap,
            stint_end_lap: stint.end_lap,
            avg_lap_time: stint.avg_lap_time,
            track_temp: stint.conditions.track_temp,
            air_temp: stint.conditions.air_temp,
            humidity: stint.conditions.humidity,
            rainfall: u8::from(stint.conditions.rainfall),
            degradation_slope: stint.degradation.map(|d| d.slope),
            degradation_bias: stint.degradation.map(|d| d.intercept),
            safety_car: u8::from(stint.conditions.safety_car),
            positions_delta: i64::from(stint.grid_position) - i64::from(stint.final_position),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub rows: Vec<StintRow>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the table as CSV. Missing values are written as empty fields.
    /// An empty table gets a header without the `PositionsDelta` column.
    pub fn write_to<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);
        if self.rows.is_empty() {
            writer.write_record(&COLUMNS[..COLUMNS.len() - 1])?;
        }
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> csv::Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_to(file)
    }

    pub fn read_from<R: Read>(reader: R) -> csv::Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let rows = reader.deserialize().collect::<csv::Result<Vec<StintRow>>>()?;
        Ok(Dataset { rows })
    }

    pub fn read_csv<P: AsRef<Path>>(path: P) -> csv::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::read_from(file)
    }
}

/// Walks seasons and rounds in order, collecting every stint it can extract.
pub struct DatasetBuilder<S> {
    source: S,
}

impl<S: SessionSource> DatasetBuilder<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// A race that fails to load or extract is logged and skipped.
    pub fn build(&self, years: &[i32], rounds: &[u32]) -> Dataset {
        let mut rows = Vec::new();
        for &year in years {
            for &round in rounds {
                info!(year, round, "loading race");
                let session = match self.source.load(year, round) {
                    Ok(session) => session,
                    Err(e) => {
                        warn!(year, round, error = %e, "failed to load session");
                        continue;
                    }
                };
                match extract_stints(&session) {
                    Ok(stints) => {
                        info!(year, round, event = %session.event.name, stints = stints.len(), "race extracted");
                        rows.extend(stints.iter().map(|s| StintRow::from_summary(year, round, s)));
                    }
                    Err(e) => warn!(year, round, error = %e, "skipping race"),
                }
            }
        }
        info!(total = rows.len(), "dataset built");
        Dataset { rows }
    }
}
