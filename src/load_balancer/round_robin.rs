//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::LoadBalancer;

/// Round-robin selector.
/// Stores an internal counter to rotate through slots.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        // the stored cursor stays below len, so it never overflows
        let prev = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c % len + 1) % len))
            .unwrap_or_else(|c| c);
        Some(prev % len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let picks: Vec<_> = (0..7).map(|_| lb.next_index(3).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn cycle_survives_a_huge_cursor() {
        let lb = RoundRobin {
            counter: AtomicUsize::new(usize::MAX - 1),
        };
        let picks: Vec<_> = (0..7).map(|_| lb.next_index(3).unwrap()).collect();
        for pair in picks.windows(2) {
            assert_eq!(pair[1], (pair[0] + 1) % 3);
        }
    }

    #[test]
    fn shrinking_set_stays_in_range() {
        let lb = RoundRobin::new();
        for _ in 0..4 {
            lb.next_index(5);
        }
        assert_eq!(lb.next_index(2), Some(0));
        assert_eq!(lb.next_index(2), Some(1));
    }

    #[test]
    fn empty_set_has_no_pick() {
        let lb = RoundRobin::new();
        assert_eq!(lb.next_index(0), None);
    }

    #[test]
    fn single_slot_always_wins() {
        let lb = RoundRobin::new();
        assert!((0..5).all(|_| lb.next_index(1) == Some(0)));
    }
}
