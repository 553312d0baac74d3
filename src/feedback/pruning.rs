//! Pruning evaluation over usage tallies

use serde::{Deserialize, Serialize};

use crate::config::FeedbackConfig;
use crate::feedback::types::{PruneAction, PruningRecommendation};
use crate::store::KeyUsage;

/// Ratio at or above which a key is prioritized or removed
pub const PRUNE_RATIO: f64 = 0.7;

/// When a completed operation triggers a pruning pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneTrigger {
    /// Fire with probability `p` per completion
    Probabilistic(f64),
    /// Fire on every n-th completion
    EveryN(u32),
}

impl PruneTrigger {
    pub fn from_config(config: &FeedbackConfig) -> Self {
        match config.prune_every {
            Some(n) => PruneTrigger::EveryN(n.max(1)),
            None => PruneTrigger::Probabilistic(config.prune_probability),
        }
    }

    /// Whether the `completed`-th completion (1-based) fires
    pub fn fires(&self, completed: u64) -> bool {
        match *self {
            PruneTrigger::Probabilistic(p) => rand::random::<f64>() < p,
            PruneTrigger::EveryN(n) => completed > 0 && completed % u64::from(n.max(1)) == 0,
        }
    }
}

/// Recommendations for every key with at least `min_observations`
pub fn evaluate(snapshot: &[(String, KeyUsage)], min_observations: u64) -> Vec<PruningRecommendation> {
    snapshot
        .iter()
        .filter(|(_, usage)| usage.observations() >= min_observations)
        .filter_map(|(key, usage)| {
            let action = if usage.useful_ratio() >= PRUNE_RATIO {
                PruneAction::Prioritize
            } else if usage.unused_ratio() >= PRUNE_RATIO {
                PruneAction::Remove
            } else {
                return None;
            };
            Some(PruningRecommendation {
                key: key.clone(),
                action,
                useful: usage.useful,
                unused: usage.unused,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn usage(useful: u64, unused: u64) -> KeyUsage {
        KeyUsage {
            useful,
            unused,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_evaluate_thresholds() {
        let snapshot = vec![
            ("vendor rules".to_string(), usage(8, 2)),
            ("gmail results".to_string(), usage(1, 9)),
            ("mixed".to_string(), usage(5, 5)),
            ("too new".to_string(), usage(3, 0)),
        ];
        let recs = evaluate(&snapshot, 10);

        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].key, "vendor rules");
        assert_eq!(recs[0].action, PruneAction::Prioritize);
        assert_eq!(recs[1].action, PruneAction::Remove);
    }

    #[test]
    fn test_every_n() {
        let trigger = PruneTrigger::EveryN(3);
        let fired: Vec<u64> = (1..=9).filter(|c| trigger.fires(*c)).collect();
        assert_eq!(fired, vec![3, 6, 9]);
        assert!(!trigger.fires(0));
    }

    #[test]
    fn test_probability_bounds() {
        assert!(!PruneTrigger::Probabilistic(0.0).fires(1));
        assert!(PruneTrigger::Probabilistic(1.0).fires(1));
    }

    #[test]
    fn test_from_config() {
        let mut config = FeedbackConfig::default();
        assert_eq!(PruneTrigger::from_config(&config), PruneTrigger::Probabilistic(0.1));
        config.prune_every = Some(25);
        assert_eq!(PruneTrigger::from_config(&config), PruneTrigger::EveryN(25));
    }
}
