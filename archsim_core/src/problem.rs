//! Problem definitions: the capacity/latency/availability brief a user
//! designs against, plus the built-in catalogue.

use crate::model::ComponentKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Average requests a daily active user issues per day.
pub const REQUESTS_PER_USER_PER_DAY: f64 = 10.0;

/// Peak-to-average traffic ratio.
pub const PEAK_FACTOR: f64 = 3.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Reads per writes, e.g. `100:1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadWriteRatio {
    pub reads: f64,
    pub writes: f64,
}

impl ReadWriteRatio {
    pub fn new(reads: f64, writes: f64) -> Self {
        Self { reads, writes }
    }

    /// Share of requests that are reads, in `[0, 1]`.
    ///
    /// A degenerate ratio (both sides zero or negative) counts as 50/50.
    pub fn read_fraction(&self) -> f64 {
        let reads = self.reads.max(0.0);
        let writes = self.writes.max(0.0);
        let total = reads + writes;
        if total > 0.0 && total.is_finite() {
            reads / total
        } else {
            0.5
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    pub daily_active_users: u64,
    pub read_write_ratio: ReadWriteRatio,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Availability target in `[0, 1]` (0.999 = three nines)
    pub availability: f64,
    pub monthly_budget: f64,
    pub data_volume_gb: f64,
    #[serde(default)]
    pub regions: Vec<String>,
    /// Named free-form constraints shown alongside the brief
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

/// A kind-to-kind connection the reference design contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHint {
    pub from: ComponentKind,
    pub to: ComponentKind,
}

impl ConnectionHint {
    pub fn new(from: ComponentKind, to: ComponentKind) -> Self {
        Self { from, to }
    }
}

/// Immutable per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub scenario: String,
    pub difficulty: Difficulty,
    pub constraints: Constraints,
    pub optimal_components: Vec<ComponentKind>,
    #[serde(default)]
    pub optimal_connections: Vec<ConnectionHint>,
}

impl Problem {
    /// Peak requests per second at full traffic.
    pub fn peak_rps(&self) -> f64 {
        self.constraints.daily_active_users as f64 * REQUESTS_PER_USER_PER_DAY / SECONDS_PER_DAY
            * PEAK_FACTOR
    }

    pub fn read_fraction(&self) -> f64 {
        self.constraints.read_write_ratio.read_fraction()
    }

    /// Required kinds without duplicates, first occurrence wins.
    pub fn required_kinds(&self) -> Vec<ComponentKind> {
        let mut kinds = Vec::new();
        for kind in &self.optimal_components {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds
    }
}

// =============================================================================
// CATALOGUE
// =============================================================================

/// All built-in problems.
pub fn catalogue() -> Vec<Problem> {
    vec![url_shortener(), news_feed(), chat_service(), video_streaming()]
}

/// Looks up a built-in problem by id.
pub fn find(id: &str) -> Option<Problem> {
    catalogue().into_iter().find(|p| p.id == id)
}

fn regions(names: &[&str]) -> Vec<String> {
    names.iter().map(|r| r.to_string()).collect()
}

pub fn url_shortener() -> Problem {
    use ComponentKind::*;
    Problem {
        id: "url_shortener".to_string(),
        title: "URL Shortener".to_string(),
        scenario: "Design a service that turns long URLs into short links and redirects \
                   visitors. Redirects vastly outnumber new links."
            .to_string(),
        difficulty: Difficulty::Easy,
        constraints: Constraints {
            daily_active_users: 10_000_000,
            read_write_ratio: ReadWriteRatio::new(100.0, 1.0),
            p50_latency_ms: 50.0,
            p95_latency_ms: 200.0,
            availability: 0.999,
            monthly_budget: 5_000.0,
            data_volume_gb: 500.0,
            regions: regions(&["us-east"]),
            custom: BTreeMap::new(),
        },
        optimal_components: vec![LoadBalancer, AppServer, Cache, Database],
        optimal_connections: vec![
            ConnectionHint::new(LoadBalancer, AppServer),
            ConnectionHint::new(AppServer, Cache),
            ConnectionHint::new(AppServer, Database),
        ],
    }
}

pub fn news_feed() -> Problem {
    use ComponentKind::*;
    let mut custom = BTreeMap::new();
    custom.insert("fan_out".to_string(), "push to followers on write".to_string());
    Problem {
        id: "news_feed".to_string(),
        title: "News Feed".to_string(),
        scenario: "Serve a personalised feed of posts from followed accounts. \
                   Posting fans out to followers asynchronously."
            .to_string(),
        difficulty: Difficulty::Medium,
        constraints: Constraints {
            daily_active_users: 50_000_000,
            read_write_ratio: ReadWriteRatio::new(50.0, 1.0),
            p50_latency_ms: 100.0,
            p95_latency_ms: 300.0,
            availability: 0.999,
            monthly_budget: 25_000.0,
            data_volume_gb: 20_000.0,
            regions: regions(&["us-east"]),
            custom,
        },
        optimal_components: vec![Cdn, LoadBalancer, AppServer, Cache, Database, Queue, Worker],
        optimal_connections: vec![
            ConnectionHint::new(Cdn, LoadBalancer),
            ConnectionHint::new(LoadBalancer, AppServer),
            ConnectionHint::new(AppServer, Cache),
            ConnectionHint::new(AppServer, Database),
            ConnectionHint::new(AppServer, Queue),
            ConnectionHint::new(Queue, Worker),
        ],
    }
}

pub fn chat_service() -> Problem {
    use ComponentKind::*;
    Problem {
        id: "chat_service".to_string(),
        title: "Chat Service".to_string(),
        scenario: "One-to-one and group messaging with delivery to online members \
                   and durable history."
            .to_string(),
        difficulty: Difficulty::Medium,
        constraints: Constraints {
            daily_active_users: 20_000_000,
            read_write_ratio: ReadWriteRatio::new(1.0, 1.0),
            p50_latency_ms: 50.0,
            p95_latency_ms: 150.0,
            availability: 0.9999,
            monthly_budget: 20_000.0,
            data_volume_gb: 50_000.0,
            regions: regions(&["us-east", "eu-west"]),
            custom: BTreeMap::new(),
        },
        optimal_components: vec![LoadBalancer, AppServer, PubSub, Cache, WideColumnStore],
        optimal_connections: vec![
            ConnectionHint::new(LoadBalancer, AppServer),
            ConnectionHint::new(AppServer, PubSub),
            ConnectionHint::new(AppServer, Cache),
            ConnectionHint::new(AppServer, WideColumnStore),
        ],
    }
}

pub fn video_streaming() -> Problem {
    use ComponentKind::*;
    Problem {
        id: "video_streaming".to_string(),
        title: "Video Streaming".to_string(),
        scenario: "Upload, transcode and stream video worldwide with smooth playback."
            .to_string(),
        difficulty: Difficulty::Hard,
        constraints: Constraints {
            daily_active_users: 100_000_000,
            read_write_ratio: ReadWriteRatio::new(200.0, 1.0),
            p50_latency_ms: 100.0,
            p95_latency_ms: 500.0,
            availability: 0.9999,
            monthly_budget: 100_000.0,
            data_volume_gb: 5_000_000.0,
            regions: regions(&["us-east", "eu-west", "ap-south"]),
            custom: BTreeMap::new(),
        },
        optimal_components: vec![
            Dns, Cdn, LoadBalancer, ApiGateway, AppServer, Cache, Database, ObjectStore, Queue,
            Worker,
        ],
        optimal_connections: vec![
            ConnectionHint::new(Dns, Cdn),
            ConnectionHint::new(Cdn, LoadBalancer),
            ConnectionHint::new(LoadBalancer, ApiGateway),
            ConnectionHint::new(ApiGateway, AppServer),
            ConnectionHint::new(AppServer, Cache),
            ConnectionHint::new(AppServer, Database),
            ConnectionHint::new(AppServer, ObjectStore),
            ConnectionHint::new(AppServer, Queue),
            ConnectionHint::new(Queue, Worker),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_peak_rps_from_dau() {
        let problem = url_shortener();
        // 10M users * 10 req/day / 86400 s * 3
        assert_relative_eq!(problem.peak_rps(), 3472.222, epsilon = 0.01);
    }

    #[test]
    fn test_read_fraction() {
        assert_relative_eq!(ReadWriteRatio::new(100.0, 1.0).read_fraction(), 100.0 / 101.0);
        assert_eq!(ReadWriteRatio::new(0.0, 0.0).read_fraction(), 0.5);
    }

    #[test]
    fn test_catalogue_lookup() {
        assert!(find("news_feed").is_some());
        assert!(find("nope").is_none());
        for problem in catalogue() {
            assert!(!problem.required_kinds().is_empty(), "{}", problem.id);
        }
    }
}
