// Potential/Temperature model
//
// Pure functions only. Temperature is stored together with the instant it was
// last written; every read decays it to "now" and every write folds the decay
// in before applying a boost.

use crate::config::FieldConfig;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Weight of temperature in the effective potential
pub const TEMPERATURE_WEIGHT: f64 = 0.2;

/// Ranking key used by sense, always within [0, 1].
pub fn effective_potential(potential: f64, temperature: f64) -> f64 {
    let raw = potential + temperature * TEMPERATURE_WEIGHT;
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 1.0)
}

/// Exponential decay with the given half-life.
pub fn half_life_decay(value: f64, elapsed_ms: i64, half_life_ms: u64) -> f64 {
    if half_life_ms == 0 || elapsed_ms <= 0 {
        return value;
    }
    let lambda = std::f64::consts::LN_2 / half_life_ms as f64;
    value * (-lambda * elapsed_ms as f64).exp()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PotentialModel {
    pub release_boost: f64,
    pub half_life_ms: u64,
    pub temperature_cap: f64,
}

impl Default for PotentialModel {
    fn default() -> Self {
        Self::from_config(&FieldConfig::default())
    }
}

impl PotentialModel {
    pub fn from_config(config: &FieldConfig) -> Self {
        Self {
            release_boost: config.release_temperature_boost,
            half_life_ms: config.temperature_half_life_secs.saturating_mul(1_000),
            temperature_cap: config.temperature_cap.max(0.0),
        }
    }

    /// Temperature as of `now`, given what was stored at `stored_at`.
    pub fn temperature_at(&self, stored: f64, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - stored_at).num_milliseconds();
        half_life_decay(stored, elapsed, self.half_life_ms).max(0.0)
    }

    /// Decayed temperature plus `delta`, clamped to the cap.
    pub fn boosted(&self, stored: f64, stored_at: DateTime<Utc>, now: DateTime<Utc>, delta: f64) -> f64 {
        let current = self.temperature_at(stored, stored_at, now);
        (current + delta.max(0.0)).min(self.temperature_cap)
    }

    /// Temperature after a failed or reclaimed claim.
    pub fn after_release(&self, stored: f64, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        self.boosted(stored, stored_at, now, self.release_boost)
    }
}

/// Sense ordering: effective potential desc, then sequence order asc (unset
/// last), then creation time asc, then id for a total order.
pub fn rank_order(
    a: (f64, Option<i64>, DateTime<Utc>, &str),
    b: (f64, Option<i64>, DateTime<Utc>, &str),
) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| match (a.1, b.1) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.2.cmp(&b.2))
        .then_with(|| a.3.cmp(b.3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_effective_potential_formula() {
        assert!((effective_potential(0.5, 1.0) - 0.7).abs() < 1e-9);
        assert_eq!(effective_potential(0.9, 5.0), 1.0);
        assert_eq!(effective_potential(0.0, 0.0), 0.0);
        assert_eq!(effective_potential(f64::NAN, 0.0), 0.0);
    }

    #[test]
    fn test_half_life_decay() {
        let halved = half_life_decay(1.0, 600_000, 600_000);
        assert!((halved - 0.5).abs() < 1e-9);

        let quartered = half_life_decay(1.0, 1_200_000, 600_000);
        assert!((quartered - 0.25).abs() < 1e-9);

        // Zero half-life disables decay, negative elapsed is ignored
        assert_eq!(half_life_decay(2.0, 600_000, 0), 2.0);
        assert_eq!(half_life_decay(2.0, -5, 600_000), 2.0);
    }

    #[test]
    fn test_release_boost_is_clamped() {
        let model = PotentialModel {
            release_boost: 0.5,
            half_life_ms: 0,
            temperature_cap: 1.2,
        };
        let now = Utc::now();
        assert_eq!(model.after_release(0.0, now, now), 0.5);
        assert_eq!(model.after_release(1.0, now, now), 1.2);
    }

    #[test]
    fn test_boost_folds_in_decay() {
        let model = PotentialModel {
            release_boost: 0.5,
            half_life_ms: 60_000,
            temperature_cap: 5.0,
        };
        let then = Utc::now();
        let later = then + Duration::minutes(1);
        let boosted = model.boosted(2.0, then, later, 1.0);
        assert!((boosted - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rank_order() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);

        let mut rows = vec![
            (0.5, None, t0, "c"),
            (0.9, None, t1, "a"),
            (0.5, Some(2), t1, "d"),
            (0.5, Some(1), t1, "e"),
            (0.5, None, t1, "b"),
        ];
        rows.sort_by(|a, b| rank_order(*a, *b));
        let ids: Vec<&str> = rows.iter().map(|r| r.3).collect();
        assert_eq!(ids, vec!["a", "e", "d", "c", "b"]);
    }
}
