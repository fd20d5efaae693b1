//! Per-worker randomized pacing between page fetches.
//!
//! Each worker pauses for a random delay after a random number of fetches, both
//! drawn uniformly from the configured bounds and re-rolled after every pause.
//! Workers do not coordinate, so the aggregate rate is only bounded statistically.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::config::PacingConfig;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Continue,
    Paused(Duration),
    /// The stop flag was raised during the pause.
    Interrupted,
}

pub struct Pacer {
    config: PacingConfig,
    rng: StdRng,
    pages_since_pause: u32,
    pages_until_pause: u32,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: PacingConfig, mut rng: StdRng) -> Self {
        let pages_until_pause = draw_pages(&config, &mut rng);
        Self {
            config,
            rng,
            pages_since_pause: 0,
            pages_until_pause,
        }
    }

    pub fn pages_until_pause(&self) -> u32 {
        self.pages_until_pause.saturating_sub(self.pages_since_pause)
    }

    /// Call once after every page fetch.
    pub async fn after_page(&mut self, signal: &mut ShutdownSignal) -> Pace {
        self.pages_since_pause += 1;
        if self.pages_since_pause < self.pages_until_pause {
            return Pace::Continue;
        }

        let delay = self.draw_delay();
        self.pages_since_pause = 0;
        self.pages_until_pause = draw_pages(&self.config, &mut self.rng);

        tracing::debug!(delay_ms = delay.as_millis() as u64, "Pausing between page fetches");
        if signal.sleep(delay, self.config.tick).await {
            Pace::Paused(delay)
        } else {
            Pace::Interrupted
        }
    }

    fn draw_delay(&mut self) -> Duration {
        let min = self.config.pause.min.as_millis() as u64;
        let max = self.config.pause.max.as_millis() as u64;
        Duration::from_millis(self.rng.gen_range(min..=max))
    }
}

fn draw_pages(config: &PacingConfig, rng: &mut StdRng) -> u32 {
    let bounds = config.pages_between_pauses;
    rng.gen_range(bounds.min.max(1)..=bounds.max.max(1))
}
