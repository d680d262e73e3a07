//! JSON exporter for offline inspection of a run.
//!
//! Exports sampled metric frames plus the failure and chaos log. Infinite
//! utilizations (down components under load) serialize as `null`, so an
//! export is write-only: it is not meant to be loaded back.

use archsim_core::{FailureEvent, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    pub tick: u64,

    /// Demand injected at entry points
    pub total_demand_rps: f64,

    /// Per-component metrics, in id order
    pub components: Vec<ComponentFrame>,

    /// Failures active at this tick
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureFrame>,

    /// Events (chaos, fixes, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

impl SimFrame {
    /// Builds a frame from a snapshot and the failures active alongside it.
    pub fn capture(snapshot: &MetricsSnapshot, failures: &[FailureEvent]) -> Self {
        Self {
            time_sec: snapshot.time.as_secs_f64(),
            tick: snapshot.tick,
            total_demand_rps: snapshot.total_demand_rps,
            components: snapshot
                .components
                .iter()
                .map(|(id, m)| ComponentFrame {
                    id: id.to_string(),
                    rps: m.rps,
                    utilization: m.utilization,
                    latency_ms: m.latency_ms,
                    error_rate: m.error_rate,
                    down: m.down,
                })
                .collect(),
            failures: failures
                .iter()
                .map(|f| FailureFrame {
                    id: f.id.to_string(),
                    severity: f.severity,
                    message: f.message.clone(),
                })
                .collect(),
            events: Vec::new(),
        }
    }
}

/// Metrics of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentFrame {
    pub id: String,
    pub rps: f64,
    pub utilization: f64,
    pub latency_ms: f64,
    pub error_rate: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub down: bool,
}

/// Failure summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureFrame {
    pub id: String,
    pub severity: f64,
    pub message: String,
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Validator score of the final design, if the scenario computed one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<u8>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            final_score: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, final_score: Option<u8>) {
        self.passed = passed;
        self.final_score = final_score;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
