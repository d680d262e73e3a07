//! Capacity Model - component config + chaos modifiers → effective capacity.
//!
//! Pure functions only. The propagation step calls `capacity` once per
//! component per tick.

use crate::model::Component;
use serde::{Deserialize, Serialize};

/// Combined effect of all active chaos events on one component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChaosModifiers {
    /// Component is down (capacity 0)
    pub crashed: bool,
    /// Applied to the latency floor of backing stores
    pub latency_multiplier: f64,
    /// Subtracted from the effective cache hit rate
    pub hit_rate_drop: f64,
    /// Applied to entry-point demand
    pub traffic_multiplier: f64,
}

impl ChaosModifiers {
    /// No chaos.
    pub const NEUTRAL: ChaosModifiers = ChaosModifiers {
        crashed: false,
        latency_multiplier: 1.0,
        hit_rate_drop: 0.0,
        traffic_multiplier: 1.0,
    };

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

impl Default for ChaosModifiers {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Combined effect of all active chaos events on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionModifiers {
    /// Link severed: carries no flow
    pub partitioned: bool,
    pub added_latency_ms: f64,
}

/// What a component can do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    /// Requests per second; `INFINITY` for demand sources
    pub max_throughput: f64,
    pub latency_floor_ms: f64,
    pub base_error_rate: f64,
    /// Effective hit rate for caching kinds
    pub cache_hit_rate: Option<f64>,
}

impl Capacity {
    /// A component with zero throughput serves nothing and forwards nothing.
    pub fn is_down(&self) -> bool {
        self.max_throughput <= 0.0
    }
}

/// Effective capacity of `component` under `modifiers`.
///
/// - Crash sets throughput to 0.
/// - Backing-store slowdown multiplies the latency floor of backing stores.
/// - Cache-miss storm lowers the effective hit rate.
/// - Clients are demand sources with unbounded throughput.
pub fn capacity(component: &Component, modifiers: &ChaosModifiers) -> Capacity {
    let defaults = component.kind.defaults();

    let max_throughput = if modifiers.crashed {
        0.0
    } else if component.kind.is_entry_point() {
        f64::INFINITY
    } else {
        component.total_capacity_rps().max(0.0)
    };

    let mut latency_floor_ms = defaults.base_latency_ms;
    if component.kind.is_backing_store() {
        latency_floor_ms *= modifiers.latency_multiplier.max(0.0);
    }

    let cache_hit_rate = component
        .cache_hit_rate()
        .map(|h| (h - modifiers.hit_rate_drop).clamp(0.0, 1.0));

    Capacity {
        max_throughput,
        latency_floor_ms,
        base_error_rate: defaults.base_error_rate,
        cache_hit_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ComponentKind;
    use approx::assert_relative_eq;

    #[test]
    fn test_neutral_capacity() {
        let app = Component::new("app", ComponentKind::AppServer)
            .with_instances(2)
            .with_max_rps(500.0);
        let cap = capacity(&app, &ChaosModifiers::NEUTRAL);

        assert_eq!(cap.max_throughput, 1000.0);
        assert_eq!(cap.latency_floor_ms, 20.0);
        assert!(cap.cache_hit_rate.is_none());
        assert!(!cap.is_down());
    }

    #[test]
    fn test_crash_zeroes_throughput() {
        let app = Component::new("app", ComponentKind::AppServer);
        let modifiers = ChaosModifiers {
            crashed: true,
            ..ChaosModifiers::NEUTRAL
        };
        assert!(capacity(&app, &modifiers).is_down());
    }

    #[test]
    fn test_slowdown_only_hits_backing_stores() {
        let modifiers = ChaosModifiers {
            latency_multiplier: 4.0,
            ..ChaosModifiers::NEUTRAL
        };
        let db = Component::new("db", ComponentKind::Database);
        let app = Component::new("app", ComponentKind::AppServer);

        assert_eq!(capacity(&db, &modifiers).latency_floor_ms, 40.0);
        assert_eq!(capacity(&app, &modifiers).latency_floor_ms, 20.0);
    }

    #[test]
    fn test_miss_storm_lowers_hit_rate() {
        let cache = Component::new("cache", ComponentKind::Cache);
        let modifiers = ChaosModifiers {
            hit_rate_drop: 0.5,
            ..ChaosModifiers::NEUTRAL
        };
        let hit = capacity(&cache, &modifiers).cache_hit_rate.unwrap();
        assert_relative_eq!(hit, 0.3, epsilon = 1e-12);

        let storm = ChaosModifiers {
            hit_rate_drop: 2.0,
            ..ChaosModifiers::NEUTRAL
        };
        assert_eq!(capacity(&cache, &storm).cache_hit_rate, Some(0.0));
    }

    #[test]
    fn test_client_is_unbounded() {
        let client = Component::new("users", ComponentKind::Client);
        assert!(capacity(&client, &ChaosModifiers::NEUTRAL).max_throughput.is_infinite());
    }
}
