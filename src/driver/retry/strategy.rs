use rand::random;
use std::time::Duration;

/// Logic used to determine how long to wait between reconnection attempts.
///
/// The gateway session and the voice driver both pace their retries with a
/// strategy; a full session reconnect retries indefinitely regardless of the
/// wait chosen here.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum Strategy {
    /// Wait the same amount of time between each attempt.
    Every(Duration),
    /// Exponential backoff, approximately doubling the wait each attempt.
    Backoff(ExponentialBackoff),
}

impl Strategy {
    pub(crate) fn retry_in(&self, last_wait: Option<Duration>) -> Duration {
        match self {
            Self::Every(t) => *t,
            Self::Backoff(exp) => exp.retry_in(last_wait),
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Backoff(ExponentialBackoff::default())
    }
}

/// Exponential backoff waiting strategy.
///
/// Each attempt waits for twice the last delay plus/minus a random jitter,
/// clamped between a min and max value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    /// Minimum amount of time to wait between retries.
    ///
    /// *Defaults to 0.25s.*
    pub min: Duration,
    /// Maximum amount of time to wait between retries.
    ///
    /// This will be clamped to `>=` min.
    ///
    /// *Defaults to 10s.*
    pub max: Duration,
    /// Amount of uniform random jitter to apply to generated wait times,
    /// i.e., 0.1 adds +/-10% to generated intervals.
    ///
    /// This is restricted to within +/-100%.
    ///
    /// *Defaults to `0.1`.*
    pub jitter: f32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(250),
            max: Duration::from_secs(10),
            jitter: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub(crate) fn retry_in(&self, last_wait: Option<Duration>) -> Duration {
        let attempt = last_wait.map_or(self.min, |t| 2 * t);
        let perturb = (1.0 + self.jitter * (random::<f32>() * 2.0 - 1.0)).clamp(0.0, 2.0);

        let safe_max = if self.max < self.min {
            self.min
        } else {
            self.max
        };

        attempt.mul_f32(perturb).clamp(self.min, safe_max)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn waits_stay_within_configured_bounds() {
        let backoff = ExponentialBackoff::default();
        let mut last = None;

        for _ in 0..16 {
            let wait = backoff.retry_in(last);
            assert!(wait >= backoff.min);
            assert!(wait <= backoff.max);
            last = Some(wait);
        }
    }

    #[test]
    fn fixed_strategy_never_grows() {
        let strategy = Strategy::Every(Duration::from_secs(1));

        assert_eq!(
            strategy.retry_in(Some(Duration::from_secs(30))),
            Duration::from_secs(1)
        );
    }
}
