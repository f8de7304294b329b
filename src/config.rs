use crate::{driver::retry::Strategy, intents::Intents, model::Presence};
use std::time::Duration;

/// User-settable knobs for the session, cache, and voice driver.
#[derive(Clone, Debug)]
pub struct Config {
    /// Event groups requested during IDENTIFY.
    pub intents: Intents,
    /// Presence advertised during IDENTIFY, and kept for later updates.
    pub presence: Option<Presence>,
    /// Capacity of the bounded message FIFO.
    ///
    /// *Defaults to 1000.*
    pub messages_limit: usize,
    /// Capacity of the heartbeat latency history ring.
    ///
    /// *Defaults to 100.*
    pub latency_history_limit: usize,
    /// Wait strategy between gateway reconnection attempts.
    ///
    /// Reconnection itself retries indefinitely; this only paces it.
    pub gateway_retry: Strategy,
    /// Time allowed for a voice connection handshake before it is aborted.
    ///
    /// *Defaults to 10s.*
    pub driver_timeout: Option<Duration>,
    /// Time allowed for the gateway to answer a voice join request.
    ///
    /// *Defaults to 10s.*
    pub join_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            intents: Intents::default(),
            presence: None,
            messages_limit: 1000,
            latency_history_limit: 100,
            gateway_retry: Strategy::default(),
            driver_timeout: Some(Duration::from_secs(10)),
            join_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl Config {
    /// Sets this `Config`'s intent bitmask.
    #[must_use]
    pub fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Sets the presence advertised on identify.
    #[must_use]
    pub fn presence(mut self, presence: Presence) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Sets this `Config`'s message cache capacity.
    #[must_use]
    pub fn messages_limit(mut self, limit: usize) -> Self {
        self.messages_limit = limit;
        self
    }

    /// Sets this `Config`'s latency history capacity.
    #[must_use]
    pub fn latency_history_limit(mut self, limit: usize) -> Self {
        self.latency_history_limit = limit;
        self
    }

    /// Sets the wait strategy between gateway reconnection attempts.
    #[must_use]
    pub fn gateway_retry(mut self, strategy: Strategy) -> Self {
        self.gateway_retry = strategy;
        self
    }

    /// Sets the voice handshake timeout.
    #[must_use]
    pub fn driver_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.driver_timeout = timeout;
        self
    }

    /// Sets the voice join-request timeout.
    #[must_use]
    pub fn join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }
}
