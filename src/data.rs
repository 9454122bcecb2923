use crate::error::DataError;
use crate::model::{estimate_degradation, DegradationFit};
use csv::ReaderBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Track status codes that mark a neutralised race: 4 is a safety car, 5 a red flag.
/// Virtual safety car periods (6 deployed, 7 ending) are not counted.
pub const SAFETY_CAR_CODES: [u32; 2] = [4, 5];
const GREEN_FLAG: u32 = 1;

pub const DEFAULT_CIRCUIT_LENGTH: f64 = 5000.0;

// Used when the event metadata carries no circuit length.
const CIRCUIT_LENGTHS: [(&str, f64); 20] = [
    ("Bahrain Grand Prix", 5412.0),
    ("Saudi Arabian Grand Prix", 6174.0),
    ("Australian Grand Prix", 5303.0),
    ("Emilia Romagna Grand Prix", 4909.0),
    ("Miami Grand Prix", 5412.0),
    ("Spanish Grand Prix", 4657.0),
    ("Monaco Grand Prix", 3337.0),
    ("Canadian Grand Prix", 4361.0),
    ("Austrian Grand Prix", 4318.0),
    ("British Grand Prix", 5891.0),
    ("Hungarian Grand Prix", 4381.0),
    ("Belgian Grand Prix", 7004.0),
    ("Dutch Grand Prix", 4259.0),
    ("Italian Grand Prix", 5793.0),
    ("Singapore Grand Prix", 5063.0),
    ("Japanese Grand Prix", 5807.0),
    ("United States Grand Prix", 5513.0),
    ("Mexico City Grand Prix", 4304.0),
    ("São Paulo Grand Prix", 4309.0),
    ("Abu Dhabi Grand Prix", 5281.0),
];

pub fn circuit_length_for(event: &str) -> f64 {
    CIRCUIT_LENGTHS
        .iter()
        .find(|(name, _)| *name == event)
        .map_or(DEFAULT_CIRCUIT_LENGTH, |(_, len)| *len)
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventInfo {
    #[serde(rename = "EventName")]
    pub name: String,
    #[serde(rename = "CircuitLength", default)]
    pub circuit_length: Option<f64>,
    #[serde(rename = "TotalLaps", default)]
    pub total_laps: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverResult {
    #[serde(rename = "Abbreviation")]
    pub abbreviation: String,
    #[serde(rename = "FullName")]
    pub full_name: String,
    #[serde(rename = "TeamName")]
    pub team: String,
    #[serde(rename = "GridPosition")]
    pub grid_position: u32,
    #[serde(rename = "Position")]
    pub position: u32,
}

#[derive(Debug, Deserialize)]
struct RawLap {
    #[serde(rename = "Driver")]
    driver: String,
    #[serde(rename = "LapNumber")]
    lap_number: u32,
    #[serde(rename = "Stint")]
    stint: Option<u32>,
    #[serde(rename = "Compound")]
    compound: Option<String>,
    #[serde(rename = "LapTimeSeconds")]
    lap_time_seconds: Option<f64>,
    #[serde(rename = "TrackStatus")]
    track_status: Option<u32>,
}

/// One timed lap as delivered by the data source.
#[derive(Debug, Clone, PartialEq)]
pub struct LapRecord {
    pub driver: String,
    pub lap_number: u32,
    pub stint: Option<u32>,
    pub compound: Option<String>,
    pub lap_time: Option<Duration>,
    pub track_status: Option<u32>,
}

impl From<RawLap> for LapRecord {
    fn from(raw: RawLap) -> Self {
        let lap_time = raw
            .lap_time_seconds
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64);
        LapRecord {
            driver: raw.driver,
            lap_number: raw.lap_number,
            stint: raw.stint,
            compound: raw.compound.filter(|c| !c.is_empty()),
            lap_time,
            track_status: raw.track_status,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeatherSample {
    #[serde(rename = "TrackTemp")]
    pub track_temp: Option<f64>,
    #[serde(rename = "AirTemp")]
    pub air_temp: Option<f64>,
    #[serde(rename = "Humidity")]
    pub humidity: Option<f64>,
    #[serde(rename = "Rainfall")]
    pub rainfall: Option<f64>,
}

/// Everything the extractor needs from one race session.
#[derive(Debug, Clone)]
pub struct SessionData {
    pub event: EventInfo,
    pub results: Vec<DriverResult>,
    pub laps: Vec<LapRecord>,
    pub weather: Vec<WeatherSample>,
}

/// A provider of race sessions, addressed by season and round.
pub trait SessionSource {
    fn load(&self, year: i32, round: u32) -> Result<SessionData, DataError>;
}

/// Reads sessions laid out as `<root>/<year>/<round:02>/{event.json,results.csv,laps.csv,weather.csv}`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn race_dir(&self, year: i32, round: u32) -> PathBuf {
        self.root.join(year.to_string()).join(format!("{round:02}"))
    }
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DataError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|source| DataError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| DataError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

impl SessionSource for DirectorySource {
    fn load(&self, year: i32, round: u32) -> Result<SessionData, DataError> {
        let dir = self.race_dir(year, round);
        if !dir.is_dir() {
            return Err(DataError::MissingEvent { year, round });
        }

        let event_path = dir.join("event.json");
        let file = File::open(&event_path).map_err(|source| DataError::Io {
            path: event_path.clone(),
            source,
        })?;
        let event: EventInfo =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| DataError::Json {
                path: event_path.clone(),
                source,
            })?;

        let results_path = dir.join("results.csv");
        let results = if results_path.exists() {
            read_table(&results_path)?
        } else {
            Vec::new()
        };

        let laps = read_table::<RawLap>(&dir.join("laps.csv"))?
            .into_iter()
            .map(LapRecord::from)
            .collect();

        let weather_path = dir.join("weather.csv");
        let weather = if weather_path.exists() {
            read_table(&weather_path)?
        } else {
            Vec::new()
        };

        Ok(SessionData {
            event,
            results,
            laps,
            weather,
        })
    }
}

/// Race-level conditions shared by every stint of a race.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceAggregates {
    pub track_temp: Option<f64>,
    pub air_temp: Option<f64>,
    pub humidity: Option<f64>,
    pub rainfall: bool,
    pub safety_car: bool,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

impl RaceAggregates {
    pub fn from_session(session: &SessionData) -> Self {
        let weather = &session.weather;
        RaceAggregates {
            track_temp: mean(weather.iter().filter_map(|w| w.track_temp)),
            air_temp: mean(weather.iter().filter_map(|w| w.air_temp)),
            humidity: mean(weather.iter().filter_map(|w| w.humidity)),
            rainfall: weather.iter().any(|w| w.rainfall.is_some_and(|r| r > 0.0)),
            safety_car: session
                .laps
                .iter()
                .map(|l| l.track_status.unwrap_or(GREEN_FLAG))
                .any(|code| SAFETY_CAR_CODES.contains(&code)),
        }
    }
}

/// One driver's stint, with the race context it was driven in.
#[derive(Debug, Clone, PartialEq)]
pub struct StintSummary {
    pub event: String,
    pub driver: String,
    pub team: String,
    pub grid_position: u32,
    pub final_position: u32,
    pub stint_index: u32,
    pub compound: Option<String>,
    pub lap_count: u32,
    pub start_lap: u32,
    pub end_lap: u32,
    pub avg_lap_time: Option<f64>,
    pub degradation: Option<DegradationFit>,
    pub circuit_length: f64,
    pub designed_laps: Option<u32>,
    pub conditions: RaceAggregates,
}

fn summarize_stint(stint_index: u32, laps: &[&LapRecord]) -> Option<StintSummaryParts> {
    let first = laps.first()?;
    let last = laps.last()?;

    let compound = first.compound.clone();
    if laps.iter().any(|l| l.compound.is_some() && l.compound != compound) {
        warn!(
            driver = %first.driver,
            stint = stint_index,
            "stint mixes compounds; keeping {:?}",
            compound
        );
    }

    let lap_times: Vec<Option<Duration>> = laps.iter().map(|l| l.lap_time).collect();
    let avg_lap_time = mean(lap_times.iter().flatten().map(Duration::as_secs_f64));

    Some(StintSummaryParts {
        stint_index,
        compound,
        lap_count: laps.len() as u32,
        start_lap: first.lap_number,
        end_lap: last.lap_number,
        avg_lap_time,
        degradation: estimate_degradation(&lap_times),
    })
}

struct StintSummaryParts {
    stint_index: u32,
    compound: Option<String>,
    lap_count: u32,
    start_lap: u32,
    end_lap: u32,
    avg_lap_time: Option<f64>,
    degradation: Option<DegradationFit>,
}

/// Produces one summary per (driver, stint) of a race.
///
/// A race without results is an error so the caller can log and skip it; a
/// driver without laps is skipped here.
pub fn extract_stints(session: &SessionData) -> Result<Vec<StintSummary>, DataError> {
    let event = &session.event.name;
    if session.results.is_empty() {
        return Err(DataError::MissingResults {
            event: event.clone(),
        });
    }

    let circuit_length = session
        .event
        .circuit_length
        .filter(|l| l.is_finite())
        .unwrap_or_else(|| circuit_length_for(event));
    let conditions = RaceAggregates::from_session(session);
    info!(
        event = %event,
        track_temp = ?conditions.track_temp,
        rainfall = conditions.rainfall,
        safety_car = conditions.safety_car,
        "extracting stints"
    );

    let mut summaries = Vec::new();
    for result in &session.results {
        let mut stints: BTreeMap<u32, Vec<&LapRecord>> = BTreeMap::new();
        let mut driver_laps = 0usize;
        for lap in session.laps.iter().filter(|l| l.driver == result.abbreviation) {
            driver_laps += 1;
            if let Some(stint) = lap.stint {
                stints.entry(stint).or_default().push(lap);
            }
        }
        if driver_laps == 0 {
            warn!(event = %event, driver = %result.abbreviation, "no laps for driver");
            continue;
        }

        for (stint_index, mut laps) in stints {
            laps.sort_by_key(|l| l.lap_number);
            let Some(parts) = summarize_stint(stint_index, &laps) else {
                continue;
            };
            summaries.push(StintSummary {
                event: event.clone(),
                driver: result.full_name.clone(),
                team: result.team.clone(),
                grid_position: result.grid_position,
                final_position: result.position,
                stint_index: parts.stint_index,
                compound: parts.compound,
                lap_count: parts.lap_count,
                start_lap: parts.start_lap,
                end_lap: parts.end_lap,
                avg_lap_time: parts.avg_lap_time,
                degradation: parts.degradation,
                circuit_length,
                designed_laps: session.event.total_laps,
                conditions: conditions.clone(),
            });
        }
    }
    Ok(summaries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    pub(crate) fn lap(driver: &str, n: u32, stint: u32, compound: &str, secs: Option<f64>) -> LapRecord {
        LapRecord {
            driver: driver.into(),
            lap_number: n,
            stint: Some(stint),
            compound: Some(compound.into()),
            lap_time: secs.map(Duration::from_secs_f64),
            track_status: None,
        }
    }

    pub(crate) fn result(abbr: &str, grid: u32, pos: u32) -> DriverResult {
        DriverResult {
            abbreviation: abbr.into(),
            full_name: format!("{abbr} Driver"),
            team: "Team".into(),
            grid_position: grid,
            position: pos,
        }
    }

    pub(crate) fn session(name: &str) -> SessionData {
        SessionData {
            event: EventInfo {
                name: name.into(),
                circuit_length: None,
                total_laps: Some(5),
            },
            results: vec![result("VER", 1, 2), result("HAM", 4, 1), result("NOR", 3, 3)],
            laps: vec![
                lap("VER", 1, 1, "MEDIUM", Some(95.0)),
                lap("VER", 3, 1, "MEDIUM", Some(95.4)),
                lap("VER", 2, 1, "MEDIUM", Some(95.2)),
                lap("VER", 4, 2, "HARD", Some(94.0)),
                lap("VER", 5, 2, "HARD", None),
                lap("HAM", 1, 1, "SOFT", Some(96.0)),
            ],
            weather: vec![
                WeatherSample {
                    track_temp: Some(40.0),
                    air_temp: Some(25.0),
                    humidity: Some(50.0),
                    rainfall: Some(0.0),
                },
                WeatherSample {
                    track_temp: Some(42.0),
                    air_temp: Some(27.0),
                    humidity: None,
                    rainfall: None,
                },
            ],
        }
    }

    #[test]
    fn aggregates_weather_and_track_status() {
        let mut s = session("Bahrain Grand Prix");
        let agg = RaceAggregates::from_session(&s);
        assert_eq!(agg.track_temp, Some(41.0));
        assert_eq!(agg.air_temp, Some(26.0));
        assert_eq!(agg.humidity, Some(50.0));
        assert!(!agg.rainfall);
        assert!(!agg.safety_car);

        s.weather[1].rainfall = Some(0.2);
        s.laps[2].track_status = Some(4);
        let agg = RaceAggregates::from_session(&s);
        assert!(agg.rainfall);
        assert!(agg.safety_car);

        s.laps[2].track_status = Some(6);
        assert!(!RaceAggregates::from_session(&s).safety_car);
    }

    #[test]
    fn no_weather_means_no_temperatures() {
        let mut s = session("Bahrain Grand Prix");
        s.weather.clear();
        let agg = RaceAggregates::from_session(&s);
        assert_eq!(agg.track_temp, None);
        assert!(!agg.rainfall);
    }

    #[test]
    fn groups_laps_by_driver_and_stint() {
        let stints = extract_stints(&session("Bahrain Grand Prix")).unwrap();
        // NOR has no laps and is skipped
        assert_eq!(stints.len(), 3);

        let first = &stints[0];
        assert_eq!(first.driver, "VER Driver");
        assert_eq!(first.stint_index, 1);
        assert_eq!(first.compound.as_deref(), Some("MEDIUM"));
        assert_eq!((first.lap_count, first.start_lap, first.end_lap), (3, 1, 3));
        assert!((first.avg_lap_time.unwrap() - 95.2).abs() < 1e-9);
        let fit = first.degradation.unwrap();
        assert!((fit.slope - 0.2).abs() < 1e-6);
        assert_eq!(first.circuit_length, 5412.0);

        let second = &stints[1];
        assert_eq!(second.lap_count, 2);
        assert_eq!(second.avg_lap_time, Some(94.0));
        assert_eq!(second.degradation, None);

        let ham = &stints[2];
        assert_eq!(ham.final_position, 1);
        assert_eq!(ham.degradation, None);
    }

    #[test]
    fn mixed_compound_stint_keeps_first_compound() {
        let mut s = session("Bahrain Grand Prix");
        s.results = vec![result("ALO", 9, 8)];
        let mut unlabelled = lap("ALO", 3, 1, "SOFT", Some(91.0));
        unlabelled.compound = None;
        s.laps = vec![
            lap("ALO", 1, 1, "SOFT", Some(90.0)),
            lap("ALO", 2, 1, "MEDIUM", Some(90.5)),
            unlabelled,
        ];

        let stints = extract_stints(&s).unwrap();
        assert_eq!(stints.len(), 1);
        let stint = &stints[0];
        assert_eq!(stint.compound.as_deref(), Some("SOFT"));
        assert_eq!((stint.lap_count, stint.start_lap, stint.end_lap), (3, 1, 3));
        let fit = stint.degradation.unwrap();
        assert!((fit.slope - 0.5).abs() < 1e-6);
        assert!((fit.intercept - 90.0).abs() < 1e-6);
        assert!((stint.avg_lap_time.unwrap() - 90.5).abs() < 1e-6);
    }

    #[test]
    fn safety_car_codes_exclude_virtual_safety_car() {
        let mut s = session("Bahrain Grand Prix");
        for code in [6, 7] {
            s.laps[0].track_status = Some(code);
            assert!(!RaceAggregates::from_session(&s).safety_car, "code {code}");
        }
        s.laps[0].track_status = Some(5);
        assert!(RaceAggregates::from_session(&s).safety_car);
    }

    #[test]
    fn race_without_results_is_rejected() {
        let mut s = session("Monaco Grand Prix");
        s.results.clear();
        assert!(matches!(
            extract_stints(&s),
            Err(DataError::MissingResults { .. })
        ));
    }

    #[test]
    fn unknown_event_uses_default_circuit_length() {
        assert_eq!(circuit_length_for("Monaco Grand Prix"), 3337.0);
        assert_eq!(circuit_length_for("Qatar Grand Prix"), DEFAULT_CIRCUIT_LENGTH);
    }

    #[test]
    fn directory_source_reads_race_files() {
        let root = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(root.path());
        let dir = source.race_dir(2023, 1);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("event.json"),
            r#"{"EventName": "Bahrain Grand Prix", "TotalLaps": 57}"#,
        )
        .unwrap();
        fs::write(
            dir.join("results.csv"),
            "Abbreviation,FullName,TeamName,GridPosition,Position\nVER,Max Verstappen,Red Bull Racing,1,1\n",
        )
        .unwrap();
        fs::write(
            dir.join("laps.csv"),
            "Driver,LapNumber,Stint,Compound,LapTimeSeconds,TrackStatus\n\
             VER,1,1,SOFT,99.1,1\n\
             VER,2,1,SOFT,,\n\
             VER,3,,,97.0,4\n",
        )
        .unwrap();

        let session = source.load(2023, 1).unwrap();
        assert_eq!(session.event.total_laps, Some(57));
        assert_eq!(session.results[0].team, "Red Bull Racing");
        assert_eq!(session.laps.len(), 3);
        assert_eq!(session.laps[1].lap_time, None);
        assert_eq!(session.laps[2].stint, None);
        assert!(session.weather.is_empty());

        assert!(matches!(
            source.load(2023, 2),
            Err(DataError::MissingEvent { year: 2023, round: 2 })
        ));
    }
}
