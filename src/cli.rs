//! Command line front end: one-shot and interactive strategy prediction, plus
//! the historical dataset build.

use crate::data::DirectorySource;
use crate::dataset::{Dataset, DatasetBuilder};
use crate::model::Compound;
use crate::predictor::ModelBundle;
use crate::strategy::{RaceConditions, StrategyPlan, StrategyPredictor};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pitstrategy", version, about = "Pit stop strategy prediction from race conditions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Predict a strategy once and print it
    Predict(PredictCommand),
    /// Edit race conditions and predict repeatedly
    Interactive(PredictArgs),
    /// List the events the models know about
    Events(ModelArgs),
    /// Extract per-stint statistics from stored race sessions
    BuildDataset(BuildDatasetArgs),
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Directory holding the model and encoder artifacts
    #[arg(long, env = "PITSTRATEGY_MODEL_DIR", default_value = "saved_models")]
    pub model_dir: PathBuf,
}

#[derive(Args, Debug, Default)]
pub struct ConditionArgs {
    /// Event name; defaults to the first known event
    #[arg(long)]
    pub event: Option<String>,
    /// Circuit length in meters
    #[arg(long)]
    pub circuit_length: Option<f64>,
    #[arg(long)]
    pub designed_laps: Option<u32>,
    #[arg(long, allow_negative_numbers = true)]
    pub track_temp: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub air_temp: Option<f64>,
    #[arg(long)]
    pub humidity: Option<f64>,
    /// Rainfall in mm
    #[arg(long)]
    pub rainfall: Option<f64>,
    #[arg(long)]
    pub safety_car: bool,
    #[arg(long, allow_negative_numbers = true)]
    pub soft_slope: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub soft_bias: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub medium_slope: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub medium_bias: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub hard_slope: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub hard_bias: Option<f64>,
    /// Historical stint table to take per-compound degradation defaults from
    #[arg(long)]
    pub history: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[command(flatten)]
    pub models: ModelArgs,
    #[command(flatten)]
    pub conditions: ConditionArgs,
}

#[derive(Args, Debug)]
pub struct PredictCommand {
    #[command(flatten)]
    pub predict: PredictArgs,
    /// Print the conditions and plan as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BuildDatasetArgs {
    /// Root of the stored sessions, laid out as <year>/<round>/
    #[arg(long, env = "PITSTRATEGY_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,
    /// Seasons to include (default 2020-2024)
    #[arg(long, value_delimiter = ',')]
    pub years: Vec<i32>,
    /// Rounds to include (default 1-24)
    #[arg(long, value_delimiter = ',')]
    pub rounds: Vec<u32>,
    #[arg(long, env = "PITSTRATEGY_OUTPUT", default_value = "f1_stint_data_2020_2024.csv")]
    pub output: PathBuf,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Predict(PredictCommand { predict: args, json }) => {
            let bundle = load_bundle(&args.models)?;
            let conditions = args.conditions.to_conditions(&bundle)?;
            let plan = StrategyPredictor::new(&bundle).predict(&conditions)?;
            if json {
                println!("{}", render_plan_json(&conditions, &plan)?);
            } else {
                println!("{}", render_plan(&plan));
            }
            Ok(())
        }
        Commands::Interactive(args) => {
            let bundle = load_bundle(&args.models)?;
            let conditions = args.conditions.to_conditions(&bundle)?;
            let stdin = io::stdin();
            run_session(&bundle, conditions, stdin.lock(), io::stdout().lock())?;
            Ok(())
        }
        Commands::Events(args) => {
            let bundle = load_bundle(&args)?;
            for event in &bundle.events.classes {
                println!("{event}");
            }
            Ok(())
        }
        Commands::BuildDataset(args) => build_dataset(args),
    }
}

fn load_bundle(args: &ModelArgs) -> anyhow::Result<ModelBundle> {
    ModelBundle::load(&args.model_dir)
        .with_context(|| format!("failed to load models from {}", args.model_dir.display()))
}

impl ConditionArgs {
    pub fn to_conditions(&self, bundle: &ModelBundle) -> anyhow::Result<RaceConditions> {
        let event = match &self.event {
            Some(e) => e.clone(),
            None => bundle
                .events
                .classes
                .first()
                .cloned()
                .context("event encoder has no classes")?,
        };
        let mut c = RaceConditions::new(event);

        if let Some(path) = &self.history {
            let history = Dataset::read_csv(path)
                .with_context(|| format!("failed to read history {}", path.display()))?;
            c.degradation = c.degradation.with_history(&history.rows, Some(&c.event));
        }

        let overrides = [
            (&mut c.circuit_length, self.circuit_length),
            (&mut c.track_temp, self.track_temp),
            (&mut c.air_temp, self.air_temp),
            (&mut c.humidity, self.humidity),
            (&mut c.rainfall, self.rainfall),
            (&mut c.degradation.soft.slope, self.soft_slope),
            (&mut c.degradation.soft.intercept, self.soft_bias),
            (&mut c.degradation.medium.slope, self.medium_slope),
            (&mut c.degradation.medium.intercept, self.medium_bias),
            (&mut c.degradation.hard.slope, self.hard_slope),
            (&mut c.degradation.hard.intercept, self.hard_bias),
        ];
        for (slot, value) in overrides {
            if let Some(v) = value {
                *slot = v;
            }
        }
        if let Some(laps) = self.designed_laps {
            c.designed_laps = laps;
        }
        c.safety_car = self.safety_car;
        validate(&c)?;
        Ok(c)
    }
}

fn validate(c: &RaceConditions) -> anyhow::Result<()> {
    if !(c.circuit_length.is_finite() && c.circuit_length > 0.0) {
        bail!("circuit length must be positive, got {}", c.circuit_length);
    }
    if c.designed_laps == 0 {
        bail!("designed laps must be positive");
    }
    Ok(())
}

fn parse_flag(value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Ok(true),
        "no" | "n" | "false" | "0" => Ok(false),
        other => bail!("expected yes or no, got {other:?}"),
    }
}

/// Sets one named field of `c` from user text.
pub fn set_field(c: &mut RaceConditions, field: &str, value: &str) -> anyhow::Result<()> {
    let number = || -> anyhow::Result<f64> {
        value
            .parse::<f64>()
            .with_context(|| format!("{field} expects a number, got {value:?}"))
    };
    let mut next = c.clone();
    match field {
        "event" => next.event = value.to_string(),
        "circuit_length" => next.circuit_length = number()?,
        "designed_laps" => {
            next.designed_laps = value
                .parse()
                .with_context(|| format!("designed_laps expects a whole number, got {value:?}"))?
        }
        "track_temp" => next.track_temp = number()?,
        "air_temp" => next.air_temp = number()?,
        "humidity" => next.humidity = number()?,
        "rainfall" => next.rainfall = number()?,
        "safety_car" => next.safety_car = parse_flag(value)?,
        _ => {
            let Some((compound, part)) = field.split_once('_') else {
                bail!("unknown field {field:?}");
            };
            let compound: Compound = compound
                .parse()
                .map_err(|_| anyhow::anyhow!("unknown field {field:?}"))?;
            let fit = next.degradation.get_mut(compound);
            match part {
                "slope" => fit.slope = number()?,
                "bias" => fit.intercept = number()?,
                _ => bail!("unknown field {field:?}"),
            }
        }
    }
    validate(&next)?;
    *c = next;
    Ok(())
}

pub fn render_conditions(c: &RaceConditions) -> String {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic);
    let flag = if c.safety_car { "yes" } else { "no" };
    table.add_row(vec!["event".to_string(), c.event.clone()]);
    table.add_row(vec!["circuit_length".to_string(), c.circuit_length.to_string()]);
    table.add_row(vec!["designed_laps".to_string(), c.designed_laps.to_string()]);
    table.add_row(vec!["track_temp".to_string(), c.track_temp.to_string()]);
    table.add_row(vec!["air_temp".to_string(), c.air_temp.to_string()]);
    table.add_row(vec!["humidity".to_string(), c.humidity.to_string()]);
    table.add_row(vec!["rainfall".to_string(), c.rainfall.to_string()]);
    table.add_row(vec!["safety_car".to_string(), flag.to_string()]);
    for compound in Compound::ALL {
        let fit = c.degradation.get(compound);
        let key = compound.as_str().to_lowercase();
        table.add_row(vec![format!("{key}_slope"), fit.slope.to_string()]);
        table.add_row(vec![format!("{key}_bias"), fit.intercept.to_string()]);
    }
    table.to_string()
}

pub fn render_plan(plan: &StrategyPlan) -> String {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Stint", "Compound", "Length (laps)"]);
    for stint in &plan.stints {
        table.add_row(vec![
            Cell::new(stint.stint_number).set_alignment(CellAlignment::Right),
            Cell::new(stint.compound),
            Cell::new(stint.length).set_alignment(CellAlignment::Right),
        ]);
    }
    format!(
        "Predicted Total Stints: {}\n{}\nTotal Laps Covered: {} / {}",
        plan.predicted_stint_count, table, plan.laps_covered, plan.designed_laps
    )
}

#[derive(Serialize)]
struct PredictionReport<'a> {
    conditions: &'a RaceConditions,
    plan: &'a StrategyPlan,
}

pub fn render_plan_json(conditions: &RaceConditions, plan: &StrategyPlan) -> anyhow::Result<String> {
    serde_json::to_string_pretty(&PredictionReport { conditions, plan })
        .context("failed to serialize prediction")
}

const SESSION_HELP: &str = "commands: show | set <field> <value> | events | predict | help | quit";

/// Line-oriented editing session. Errors are printed and the session goes on.
pub fn run_session<R: BufRead, W: Write>(
    bundle: &ModelBundle,
    mut conditions: RaceConditions,
    input: R,
    mut out: W,
) -> io::Result<()> {
    let predictor = StrategyPredictor::new(bundle);
    writeln!(out, "{SESSION_HELP}")?;
    for line in input.lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        match words.next() {
            None => continue,
            Some("quit" | "exit") => break,
            Some("help") => writeln!(out, "{SESSION_HELP}")?,
            Some("show") => writeln!(out, "{}", render_conditions(&conditions))?,
            Some("events") => {
                for event in &bundle.events.classes {
                    writeln!(out, "{event}")?;
                }
            }
            Some("predict") => match predictor.predict(&conditions) {
                Ok(plan) => writeln!(out, "{}", render_plan(&plan))?,
                Err(e) => writeln!(out, "error: {e}")?,
            },
            Some("set") => {
                let field = words.next().unwrap_or_default();
                let value = words.collect::<Vec<_>>().join(" ");
                if field.is_empty() || value.is_empty() {
                    writeln!(out, "usage: set <field> <value>")?;
                } else if let Err(e) = set_field(&mut conditions, field, &value) {
                    writeln!(out, "error: {e:#}")?;
                }
            }
            Some(other) => writeln!(out, "unknown command {other:?}; {SESSION_HELP}")?,
        }
    }
    Ok(())
}

fn build_dataset(args: BuildDatasetArgs) -> anyhow::Result<()> {
    let years = if args.years.is_empty() {
        (2020..=2024).collect()
    } else {
        args.years
    };
    let rounds = if args.rounds.is_empty() {
        (1..=24).collect()
    } else {
        args.rounds
    };

    let builder = DatasetBuilder::new(DirectorySource::new(&args.data_dir));
    let dataset = builder.build(&years, &rounds);
    dataset
        .write_csv(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(rows = dataset.len(), output = %args.output.display(), "wrote dataset");
    Ok(())
}
