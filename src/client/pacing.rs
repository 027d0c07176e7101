//! Random delay between records.

use crate::models::PacingConfig;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Sleeps a uniform random duration from the stage's pacing window.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    window: PacingConfig,
}

impl Pacer {
    pub fn new(window: PacingConfig) -> Self {
        Self { window }
    }

    pub fn window(&self) -> PacingConfig {
        self.window
    }

    /// Draw a delay in `[min_secs, max_secs]`.
    pub fn draw(&self) -> Duration {
        let PacingConfig {
            min_secs, max_secs, ..
        } = self.window;
        if max_secs <= 0.0 {
            return Duration::ZERO;
        }
        let secs = if min_secs >= max_secs {
            max_secs
        } else {
            rand::thread_rng().gen_range(min_secs..=max_secs)
        };
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Sleep once after a processed record. Returns the delay slept.
    pub async fn pause(&self) -> Duration {
        let delay = self.draw();
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Pacing");
            tokio::time::sleep(delay).await;
        }
        delay
    }
}
