// Train/test split assignment by source identity
//
// Real-video ids are shuffled with a seeded StdRng and cut at
// floor(fraction * n). Fakes inherit the split of the real id with the same
// stem; fakes without a real counterpart follow UnmatchedPolicy.

use std::collections::{BTreeSet, HashSet};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::Split;
use crate::error::{PrepError, Result};

/// What to do with a fake video whose id matches no real video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    #[default]
    Train,
    Test,
    Exclude,
}

impl std::str::FromStr for UnmatchedPolicy {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "train" => Ok(UnmatchedPolicy::Train),
            "test" => Ok(UnmatchedPolicy::Test),
            "exclude" => Ok(UnmatchedPolicy::Exclude),
            other => Err(PrepError::InvalidConfig(format!(
                "unknown unmatched policy '{}' (expected train, test or exclude)",
                other
            ))),
        }
    }
}

/// Disjoint partition of real-video ids plus the policy for orphan fakes.
#[derive(Debug, Clone)]
pub struct SplitAssignment {
    train: HashSet<String>,
    test: HashSet<String>,
    policy: UnmatchedPolicy,
    seed: u64,
}

impl SplitAssignment {
    /// Partition `real_ids` into train/test.
    ///
    /// Ids are deduplicated and sorted before shuffling so the result depends
    /// only on the id set and the seed, not on directory listing order.
    /// With `seed == None` a seed is drawn from entropy and logged.
    pub fn assign(
        real_ids: &[String],
        train_fraction: f64,
        seed: Option<u64>,
        policy: UnmatchedPolicy,
    ) -> Result<Self> {
        validate_fraction(train_fraction)?;

        let seed = seed.unwrap_or_else(|| {
            let drawn = rand::random::<u64>();
            log::info!("No split seed configured, drew seed {}", drawn);
            drawn
        });

        let mut ids: Vec<String> = real_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        ids.shuffle(&mut rng);

        let split_idx = split_index(ids.len(), train_fraction);
        let test: HashSet<String> = ids.split_off(split_idx).into_iter().collect();
        let train: HashSet<String> = ids.into_iter().collect();

        log::info!(
            "Split: {} train, {} test (fraction {}, seed {})",
            train.len(),
            test.len(),
            train_fraction,
            seed
        );

        Ok(Self { train, test, policy, seed })
    }

    /// Split of a real video. Every id passed to `assign` has one.
    pub fn split_of_real(&self, video_id: &str) -> Option<Split> {
        if self.train.contains(video_id) {
            Some(Split::Train)
        } else if self.test.contains(video_id) {
            Some(Split::Test)
        } else {
            None
        }
    }

    /// Split of a fake video; `None` means excluded by policy.
    pub fn split_for_fake(&self, video_id: &str) -> Option<Split> {
        self.split_of_real(video_id).or(match self.policy {
            UnmatchedPolicy::Train => Some(Split::Train),
            UnmatchedPolicy::Test => Some(Split::Test),
            UnmatchedPolicy::Exclude => None,
        })
    }

    pub fn has_real(&self, video_id: &str) -> bool {
        self.train.contains(video_id) || self.test.contains(video_id)
    }

    pub fn train_ids(&self) -> &HashSet<String> {
        &self.train
    }

    pub fn test_ids(&self) -> &HashSet<String> {
        &self.test
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

fn validate_fraction(fraction: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&fraction) || fraction.is_nan() {
        return Err(PrepError::InvalidConfig(format!(
            "train fraction must be within [0, 1], got {}",
            fraction
        )));
    }
    Ok(())
}

/// Number of ids that go to train: floor(fraction * n).
fn split_index(n: usize, fraction: f64) -> usize {
    ((fraction * n as f64).floor() as usize).min(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{:03}", i)).collect()
    }

    #[test]
    fn test_disjoint_and_fraction() {
        for &(n, f) in &[(10usize, 0.8f64), (7, 0.5), (1, 0.8), (0, 0.8), (100, 0.33)] {
            let a = SplitAssignment::assign(&ids(n), f, Some(7), UnmatchedPolicy::Train).unwrap();
            assert!(a.train_ids().is_disjoint(a.test_ids()));
            assert_eq!(a.train_ids().len() + a.test_ids().len(), n);
            assert_eq!(a.train_ids().len(), (f * n as f64).floor() as usize);
        }
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = SplitAssignment::assign(&ids(50), 0.8, Some(42), UnmatchedPolicy::Train).unwrap();
        let b = SplitAssignment::assign(&ids(50), 0.8, Some(42), UnmatchedPolicy::Train).unwrap();
        assert_eq!(a.train_ids(), b.train_ids());
        assert_eq!(a.test_ids(), b.test_ids());
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let mut reversed = ids(30);
        reversed.reverse();
        let a = SplitAssignment::assign(&ids(30), 0.8, Some(3), UnmatchedPolicy::Train).unwrap();
        let b = SplitAssignment::assign(&reversed, 0.8, Some(3), UnmatchedPolicy::Train).unwrap();
        assert_eq!(a.train_ids(), b.train_ids());
    }

    #[test]
    fn test_duplicate_ids_counted_once() {
        let dup = vec!["a".to_string(), "a".to_string(), "b".to_string()];
        let a = SplitAssignment::assign(&dup, 1.0, Some(1), UnmatchedPolicy::Train).unwrap();
        assert_eq!(a.train_ids().len(), 2);
        assert!(a.test_ids().is_empty());
    }

    #[test]
    fn test_fake_follows_real() {
        let a = SplitAssignment::assign(&ids(20), 0.5, Some(9), UnmatchedPolicy::Exclude).unwrap();
        for id in ids(20) {
            assert_eq!(a.split_for_fake(&id), a.split_of_real(&id));
            assert!(a.split_of_real(&id).is_some());
        }
    }

    #[test]
    fn test_unmatched_policy() {
        let real = vec!["a".to_string()];
        let train = SplitAssignment::assign(&real, 0.0, Some(1), UnmatchedPolicy::Train).unwrap();
        assert_eq!(train.split_of_real("a"), Some(Split::Test));
        assert_eq!(train.split_for_fake("zzz"), Some(Split::Train));

        let test = SplitAssignment::assign(&real, 1.0, Some(1), UnmatchedPolicy::Test).unwrap();
        assert_eq!(test.split_for_fake("zzz"), Some(Split::Test));

        let excl = SplitAssignment::assign(&real, 1.0, Some(1), UnmatchedPolicy::Exclude).unwrap();
        assert_eq!(excl.split_for_fake("zzz"), None);
        assert_eq!(excl.split_for_fake("a"), Some(Split::Train));
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        assert!(SplitAssignment::assign(&ids(3), 1.5, Some(1), UnmatchedPolicy::Train).is_err());
        assert!(SplitAssignment::assign(&ids(3), -0.1, Some(1), UnmatchedPolicy::Train).is_err());
        assert!(SplitAssignment::assign(&ids(3), f64::NAN, Some(1), UnmatchedPolicy::Train).is_err());
    }

    #[test]
    fn test_unseeded_records_drawn_seed() {
        let a = SplitAssignment::assign(&ids(10), 0.8, None, UnmatchedPolicy::Train).unwrap();
        let b = SplitAssignment::assign(&ids(10), 0.8, Some(a.seed()), UnmatchedPolicy::Train).unwrap();
        assert_eq!(a.train_ids(), b.train_ids());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("TRAIN".parse::<UnmatchedPolicy>().unwrap(), UnmatchedPolicy::Train);
        assert_eq!("exclude".parse::<UnmatchedPolicy>().unwrap(), UnmatchedPolicy::Exclude);
        assert!("maybe".parse::<UnmatchedPolicy>().is_err());
    }
}
