//! Dining philosophers with ordered fork acquisition.
//!
//! Philosophers sit in a ring with one fork between each pair of neighbours.
//! Taking "left then right" lets every philosopher hold one fork while
//! waiting on the other, which deadlocks the whole table. Here every
//! philosopher always locks the lower-indexed of their two forks first, so
//! there is a global acquisition order and no cycle of waiters can form.

use crate::error::{Error, Result};
use core::time::Duration;
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinSet, time::sleep};

/// Parameters of a dinner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiningConfig {
    pub philosophers: usize,
    /// Meals each philosopher eats before leaving the table.
    pub rounds: usize,
    pub think: Duration,
    pub eat: Duration,
}

impl Default for DiningConfig {
    fn default() -> Self {
        Self {
            philosophers: 5,
            rounds: 3,
            think: Duration::from_millis(20),
            eat: Duration::from_millis(10),
        }
    }
}

/// Per-fork usage, guarded by the fork's mutex.
#[derive(Debug, Default)]
struct Fork {
    uses: u64,
}

/// What happened at the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DinnerReport {
    /// Meals eaten, indexed by seat.
    pub meals: Vec<usize>,
    /// Times each fork was picked up, indexed by fork.
    pub fork_uses: Vec<u64>,
}

/// Returns the forks used by `seat` in acquisition order (lower index first).
///
/// Seat `i` sits between fork `i` (left) and fork `(i + 1) % n` (right).
pub const fn fork_order(seat: usize, philosophers: usize) -> (usize, usize) {
    let left = seat;
    let right = (seat + 1) % philosophers;
    if left < right {
        (left, right)
    } else {
        (right, left)
    }
}

/// Runs a dinner to completion.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] when fewer than two philosophers are
/// seated, since a single philosopher would need the same fork twice.
pub async fn dine(config: DiningConfig) -> Result<DinnerReport> {
    if config.philosophers < 2 {
        return Err(Error::InvalidConfig {
            reason: format!(
                "a dinner needs at least 2 philosophers, got {}",
                config.philosophers
            ),
        });
    }

    let forks: Arc<Vec<Mutex<Fork>>> = Arc::new(
        (0..config.philosophers)
            .map(|_| Mutex::new(Fork::default()))
            .collect(),
    );

    let mut seats = JoinSet::new();
    for seat in 0..config.philosophers {
        let forks = Arc::clone(&forks);
        let config = config.clone();
        seats.spawn(async move { (seat, philosopher(seat, &forks, &config).await) });
    }

    let mut meals = vec![0; config.philosophers];
    while let Some(joined) = seats.join_next().await {
        match joined {
            Ok((seat, eaten)) => meals[seat] = eaten,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => return Err(Error::Cancelled),
        }
    }

    let mut fork_uses = Vec::with_capacity(forks.len());
    for fork in forks.iter() {
        fork_uses.push(fork.lock().await.uses);
    }

    Ok(DinnerReport { meals, fork_uses })
}

async fn philosopher(seat: usize, forks: &[Mutex<Fork>], config: &DiningConfig) -> usize {
    let (first, second) = fork_order(seat, forks.len());

    for round in 0..config.rounds {
        tracing::trace!("Philosopher {seat} is thinking");
        sleep(config.think).await;

        let mut a = forks[first].lock().await;
        tracing::trace!("Philosopher {seat} has taken fork {first}");
        let mut b = forks[second].lock().await;
        tracing::trace!("Philosopher {seat} has taken fork {second}");

        a.uses += 1;
        b.uses += 1;
        tracing::debug!("Philosopher {seat} is eating (meal {})", round + 1);
        sleep(config.eat).await;

        drop(b);
        drop(a);
        tracing::trace!("Philosopher {seat} put down forks {first} and {second}");
    }

    config.rounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn last_seat_takes_fork_zero_first() {
        assert_eq!(fork_order(0, 5), (0, 1));
        assert_eq!(fork_order(3, 5), (3, 4));
        assert_eq!(fork_order(4, 5), (0, 4));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn everyone_eats_without_deadlock() {
        let config = DiningConfig {
            philosophers: 5,
            rounds: 20,
            think: Duration::ZERO,
            eat: Duration::from_micros(50),
        };
        let report = timeout(Duration::from_secs(10), dine(config))
            .await
            .expect("dinner deadlocked")
            .unwrap();

        assert_eq!(report.meals, vec![20; 5]);
        // Every fork is shared by exactly two philosophers.
        assert_eq!(report.fork_uses, vec![40; 5]);
    }

    #[tokio::test]
    async fn two_philosophers_share_both_forks() {
        let config = DiningConfig {
            philosophers: 2,
            rounds: 3,
            think: Duration::ZERO,
            eat: Duration::ZERO,
        };
        let report = dine(config).await.unwrap();
        assert_eq!(report.fork_uses, vec![6, 6]);
    }

    #[tokio::test]
    async fn lone_philosopher_is_rejected() {
        let config = DiningConfig {
            philosophers: 1,
            ..DiningConfig::default()
        };
        assert!(matches!(
            dine(config).await,
            Err(Error::InvalidConfig { .. })
        ));
    }
}
