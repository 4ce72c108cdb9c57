//! Experiment measurements: a named-series log and the timers that feed it.

use crate::math::{Point3d, Vector3d};
use crate::{LightSet, TrafficLightId, VehicleId, VehicleSet};
use anyhow::Context;
use cgmath::prelude::*;
use log::debug;
use serde_json::{json, Map, Value};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// A single logged value.
#[derive(Clone, Debug, PartialEq)]
pub enum LogValue {
    Text(String),
    Scalar(f64),
    Vector(Vector3d),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Scalar(value) => write!(f, "{value}"),
            Self::Vector(v) => write!(f, "({}:{}:{})", v.x, v.y, v.z),
        }
    }
}

impl From<&str> for LogValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for LogValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for LogValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vector3d> for LogValue {
    fn from(value: Vector3d) -> Self {
        Self::Vector(value)
    }
}

impl From<Point3d> for LogValue {
    fn from(value: Point3d) -> Self {
        Self::Vector(value.to_vec())
    }
}

/// An ordered collection of named value series.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExperimentLog {
    series: Vec<(String, Vec<LogValue>)>,
}

impl ExperimentLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value to a series, creating the series on first use.
    pub fn log(&mut self, name: &str, value: impl Into<LogValue>) {
        let value = value.into();
        match self.series.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value),
            None => self.series.push((name.to_owned(), vec![value])),
        }
    }

    pub fn log_text(&mut self, name: &str, value: &str) {
        self.log(name, value);
    }

    pub fn log_scalar(&mut self, name: &str, value: f64) {
        self.log(name, value);
    }

    pub fn log_vector(&mut self, name: &str, value: Vector3d) {
        self.log(name, value);
    }

    /// Writes the header records of a scenario.
    pub fn begin_scenario(&mut self, number: u32, controlled: bool) {
        self.log_scalar("Scenario Number", f64::from(number));
        self.log_text("Is Controlled", if controlled { "True" } else { "False" });
    }

    /// The values of a series, in logging order.
    pub fn series(&self, name: &str) -> &[LogValue] {
        self.series
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// The series names, in creation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }

    /// Writes the log as CSV: a title row, then one row per series with
    /// the series name followed by its values.
    pub fn write_csv<W: Write>(&self, writer: W, title: &str) -> anyhow::Result<()> {
        let mut csv = csv::WriterBuilder::new().flexible(true).from_writer(writer);
        csv.write_record([title])?;
        for (name, values) in &self.series {
            let record = std::iter::once(name.clone()).chain(values.iter().map(LogValue::to_string));
            csv.write_record(record)
                .with_context(|| format!("writing series {name:?}"))?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Appends the log to a CSV file, creating parent directories as needed.
    pub fn append_csv(&self, path: &Path, title: &str) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        self.write_csv(file, title)
            .with_context(|| format!("writing {}", path.display()))?;
        debug!("Appended {} series to {}", self.series.len(), path.display());
        Ok(())
    }

    /// The log as a JSON object of arrays.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .series
            .iter()
            .map(|(name, values)| {
                let values = values
                    .iter()
                    .map(|value| match value {
                        LogValue::Text(text) => json!(text),
                        LogValue::Scalar(value) => json!(value),
                        LogValue::Vector(v) => json!([v.x, v.y, v.z]),
                    })
                    .collect();
                (name.clone(), Value::Array(values))
            })
            .collect();
        Value::Object(map)
    }
}

/// Measures a single interval and logs it under a fixed name.
#[derive(Clone, Debug)]
pub struct Stopwatch {
    name: &'static str,
    started: Option<f64>,
}

impl Stopwatch {
    pub const fn new(name: &'static str) -> Self {
        Self { name, started: None }
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Starts, or restarts, the stopwatch.
    pub fn start(&mut self, now: f64) {
        self.started = Some(now);
    }

    /// Stops the stopwatch and logs the elapsed time.
    pub fn stop(&mut self, now: f64, log: &mut ExperimentLog) -> Option<f64> {
        let elapsed = now - self.started.take()?;
        log.log_scalar(self.name, elapsed);
        Some(elapsed)
    }
}

/// Measures how long a braking vehicle takes to come to a stop.
#[derive(Clone, Debug, Default)]
pub struct DecelerationTimer {
    vehicle: Option<VehicleId>,
    elapsed: f64,
}

impl DecelerationTimer {
    pub fn start(&mut self, vehicle: VehicleId) {
        self.vehicle = Some(vehicle);
        self.elapsed = 0.0;
    }

    pub fn is_running(&self) -> bool {
        self.vehicle.is_some()
    }

    /// Accumulates `dt` and logs once the vehicle is stationary. A vehicle
    /// that was retired or is gone stops the timer without logging.
    pub fn update(&mut self, dt: f64, vehicles: &VehicleSet, log: &mut ExperimentLog) {
        let Some(id) = self.vehicle else {
            return;
        };
        let Some(vehicle) = vehicles.get(id).filter(|v| v.is_active()) else {
            self.vehicle = None;
            return;
        };
        self.elapsed += dt;
        if vehicle.kinematics().speed() <= 0.0 {
            log.log_scalar("Deceleration Duration", self.elapsed);
            self.vehicle = None;
        }
    }
}

/// Measures the time from the pedestrian signal leaving the red man to the
/// pedestrian starting to cross.
#[derive(Clone, Debug, Default)]
pub struct ReactionTimer {
    light: Option<TrafficLightId>,
    started: Option<f64>,
}

impl ReactionTimer {
    /// Watches the pedestrian head of a light.
    pub fn watch(&mut self, light: TrafficLightId) {
        self.light = Some(light);
        self.started = None;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn update(&mut self, now: f64, lights: &LightSet) {
        if self.started.is_some() {
            return;
        }
        let green_man = self
            .light
            .and_then(|id| lights.get(id))
            .map_or(false, |light| light.green_man());
        if green_man {
            self.started = Some(now);
        }
    }

    /// Stops the timer and logs the reaction time.
    pub fn stop(&mut self, now: f64, log: &mut ExperimentLog) -> Option<f64> {
        let elapsed = now - self.started.take()?;
        self.light = None;
        log.log_scalar("Waiting & Reaction Duration", elapsed);
        Some(elapsed)
    }
}

/// Watches the vehicle spawned for the pedestrian and starts the crossing
/// measurements when it first brakes.
#[derive(Clone, Debug)]
pub(crate) struct BrakeWatch {
    pub vehicle: VehicleId,
    pub crossing: Point3d,
}

/// All experiment measurements of a simulation.
#[derive(Clone, Debug)]
pub(crate) struct Recorder {
    pub log: ExperimentLog,
    pub deceleration: DecelerationTimer,
    pub reaction: ReactionTimer,
    pub crossing: Stopwatch,
    pub scenario: Stopwatch,
    pub brake_watch: Option<BrakeWatch>,
    /// The next whole-second time stamp of a running scenario.
    next_stamp: Option<f64>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            log: ExperimentLog::new(),
            deceleration: DecelerationTimer::default(),
            reaction: ReactionTimer::default(),
            crossing: Stopwatch::new("Time To Cross Road"),
            scenario: Stopwatch::new("Scenario Duration"),
            brake_watch: None,
            next_stamp: None,
        }
    }
}

impl Recorder {
    pub fn begin_scenario(&mut self, now: f64, number: u32, controlled: bool) {
        self.log.begin_scenario(number, controlled);
        self.scenario.start(now);
        self.next_stamp = Some(now);
    }

    pub fn end_scenario(&mut self, now: f64) -> Option<f64> {
        self.next_stamp = None;
        self.scenario.stop(now, &mut self.log)
    }

    /// Advances every running measurement.
    pub fn update(&mut self, now: f64, dt: f64, vehicles: &VehicleSet, lights: &LightSet) {
        if let Some(start) = self.scenario.started {
            while let Some(stamp) = self.next_stamp.filter(|stamp| *stamp <= now) {
                self.log.log_scalar("Time", (stamp - start).round());
                self.next_stamp = Some(stamp + 1.0);
            }
        }

        if let Some(watch) = &self.brake_watch {
            if let Some(vehicle) = vehicles.get(watch.vehicle) {
                if vehicle.braking_state().is_braking() {
                    let distance = (watch.crossing - vehicle.kinematics().position).magnitude();
                    self.log.log_scalar("Braking Distance", distance);
                    self.crossing.start(now);
                    self.deceleration.start(watch.vehicle);
                    self.brake_watch = None;
                }
            }
        }

        self.deceleration.update(dt, vehicles, &mut self.log);
        self.reaction.update(now, lights);
    }
}
