use std::time::Duration;

use tokio::time::Instant;

/// Reading of a [`Countdown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Idle,
    Running { remaining: Duration },
    Elapsed,
}

/// Cancellable dwell timer owned by one session.
///
/// Each `start` begins a new run with its own generation. A tick carrying
/// an older generation reads as `Idle`, so late ticks from a cancelled run
/// never complete the current one.
#[derive(Debug)]
pub struct Countdown {
    duration: Duration,
    deadline: Option<Instant>,
    generation: u64,
}

impl Countdown {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
            generation: 0,
        }
    }

    /// Restarts from the full duration and returns the run's generation.
    pub fn start(&mut self) -> u64 {
        self.generation += 1;
        self.deadline = Some(Instant::now() + self.duration);
        self.generation
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reads the current run without changing it.
    pub fn tick(&self, generation: u64) -> Tick {
        match self.deadline {
            Some(deadline) if generation == self.generation => {
                let now = Instant::now();
                if now >= deadline {
                    Tick::Elapsed
                } else {
                    Tick::Running {
                        remaining: deadline - now,
                    }
                }
            },
            _ => Tick::Idle,
        }
    }

    /// Seconds left, rounded up. Zero when elapsed or idle.
    pub fn remaining_secs(&self) -> u64 {
        match self.tick(self.generation) {
            Tick::Running { remaining } => {
                remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
            },
            Tick::Idle | Tick::Elapsed => 0,
        }
    }

    /// Resolves once the current run elapses. Pending forever when idle.
    pub async fn elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
