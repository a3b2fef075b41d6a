//! Bounded replay buffer
//!
//! Oldest experiences are evicted first once capacity is reached.

use crate::features::FeatureVector;
use crate::types::Action;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use uuid::Uuid;

/// One (feature vector, target action, reward) tuple
#[derive(Debug, Clone)]
pub struct Experience {
    /// Stored feedback row this came from
    pub feedback_id: Uuid,
    pub features: FeatureVector,
    pub decided: Action,
    pub target: Action,
    pub reward: f32,
    /// The decided action was flipped by exploration
    pub explored: bool,
}

#[derive(Debug)]
pub struct ReplayBuffer {
    items: VecDeque<Experience>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, experience: Experience) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(experience);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, feedback_id: Uuid) -> bool {
        self.items.iter().any(|e| e.feedback_id == feedback_id)
    }

    /// Up to `amount` distinct experiences, skipping the `skip_newest` most recent
    pub fn sample(&self, rng: &mut StdRng, amount: usize, skip_newest: usize) -> Vec<&Experience> {
        let eligible = self.items.len().saturating_sub(skip_newest);
        let amount = amount.min(eligible);
        if amount == 0 {
            return Vec::new();
        }
        rand::seq::index::sample(rng, eligible, amount)
            .into_iter()
            .filter_map(|i| self.items.get(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureLayout;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn experience() -> Experience {
        Experience {
            feedback_id: Uuid::new_v4(),
            features: FeatureVector::zeros(Arc::new(FeatureLayout::new("enc", 2))),
            decided: Action::Allow,
            target: Action::Block,
            reward: -1.0,
            explored: false,
        }
    }

    #[test]
    fn test_evicts_oldest() {
        let mut buffer = ReplayBuffer::new(2);
        let first = experience();
        let first_id = first.feedback_id;
        buffer.push(first);
        buffer.push(experience());
        buffer.push(experience());

        assert_eq!(buffer.len(), 2);
        assert!(!buffer.contains(first_id));
    }

    #[test]
    fn test_sample_is_distinct_and_skips_newest() {
        let mut buffer = ReplayBuffer::new(10);
        for _ in 0..5 {
            buffer.push(experience());
        }
        let newest = buffer.items.back().unwrap().feedback_id;

        let mut rng = StdRng::seed_from_u64(7);
        let sample = buffer.sample(&mut rng, 10, 1);
        assert_eq!(sample.len(), 4);
        let ids: HashSet<_> = sample.iter().map(|e| e.feedback_id).collect();
        assert_eq!(ids.len(), 4);
        assert!(!ids.contains(&newest));

        assert!(buffer.sample(&mut rng, 3, 5).is_empty());
    }
}
