//! Translate loaded configuration into session-layer types.

use std::time::Duration;

use nebula_config::{BackoffStrategy, Config, ReconnectConfig};
use nebula_net::{
    Backoff, BackoffConfig, ConnectTarget, ExponentialBackoff, FrameConfig, Immediate,
    ReconnectBudget, SessionManager,
};
use tracing::{info, warn};

/// Structured endpoint built from the network section.
pub fn connect_target(config: &Config) -> ConnectTarget {
    ConnectTarget::endpoint(
        config.network.server_address.clone(),
        config.network.server_port,
        config.network.protocol.clone(),
    )
}

/// Reconnect budget from the network section.
pub fn reconnect_budget(config: &Config) -> ReconnectBudget {
    ReconnectBudget::from(config.network.reconnect_budget)
}

/// Backoff strategy from the reconnect section.
pub fn backoff(reconnect: &ReconnectConfig) -> Box<dyn Backoff> {
    match reconnect.strategy {
        BackoffStrategy::Immediate => Box::new(Immediate),
        BackoffStrategy::Exponential => Box::new(ExponentialBackoff::new(BackoffConfig {
            initial_delay: Duration::from_millis(reconnect.initial_delay_ms),
            multiplier: reconnect.multiplier,
            max_delay: Duration::from_millis(reconnect.max_delay_ms),
            jitter: reconnect.jitter,
        })),
    }
}

/// Framing limits from the network section.
pub fn frame_config(config: &Config) -> FrameConfig {
    FrameConfig {
        max_frame_size: config.network.max_frame_size,
    }
}

/// Effect of a reloaded config on a running session.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// The reconnect strategy was swapped in place.
    pub backoff_replaced: bool,
    /// Settings changed that only apply on the next start.
    pub restart_needed: bool,
}

/// Apply what a live session can take from a reloaded config.
///
/// Only the reconnect delay strategy is swapped in place. Endpoint, budget,
/// framing and log level are fixed for the life of the process.
pub fn apply_reload(
    session: &mut SessionManager,
    current: &Config,
    fresh: &Config,
) -> ReloadOutcome {
    let mut outcome = ReloadOutcome::default();
    if fresh.reconnect != current.reconnect {
        session.set_backoff(backoff(&fresh.reconnect));
        info!("Reconnect strategy is now {:?}", fresh.reconnect.strategy);
        outcome.backoff_replaced = true;
    }
    if fresh.network != current.network || fresh.debug != current.debug {
        warn!("Network or debug settings changed; restart the client to apply them");
        outcome.restart_needed = true;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebula_net::{EventSink, Message, Transport, TransportError, TransportEvent};

    /// Transport that accepts everything and reports nothing.
    struct Idle;

    impl Transport for Idle {
        fn bind(&mut self, _sink: EventSink) {}

        fn connect(&mut self, _target: &ConnectTarget) {}

        fn send(&mut self, _message: &Message) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&mut self) -> bool {
            false
        }
    }

    fn exponential() -> ReconnectConfig {
        ReconnectConfig {
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn test_target_uses_network_section() {
        let mut config = Config::default();
        config.network.server_address = "play.example".to_string();
        config.network.server_port = 9100;

        let target = connect_target(&config);
        assert_eq!(target.to_string(), "tcp://play.example:9100");
        assert_eq!(target.authority(), "play.example:9100");
    }

    #[test]
    fn test_budget_keeps_sign() {
        let mut config = Config::default();
        config.network.reconnect_budget = -1;
        assert!(reconnect_budget(&config).is_unlimited());

        config.network.reconnect_budget = 0;
        assert!(reconnect_budget(&config).is_exhausted());
    }

    #[test]
    fn test_immediate_strategy_has_no_delay() {
        let mut backoff = backoff(&ReconnectConfig::default());
        assert_eq!(backoff.delay(5), Duration::ZERO);
    }

    #[test]
    fn test_exponential_strategy_honours_settings() {
        let reconnect = ReconnectConfig {
            strategy: BackoffStrategy::Exponential,
            initial_delay_ms: 100,
            multiplier: 3.0,
            max_delay_ms: 500,
            jitter: 0.0,
        };
        let mut backoff = backoff(&reconnect);
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(300));
        assert_eq!(backoff.delay(3), Duration::from_millis(500));
    }

    #[test]
    fn test_reload_swaps_backoff_on_live_session() {
        let current = Config::default();
        let mut fresh = current.clone();
        fresh.reconnect = exponential();

        let mut session = SessionManager::new();
        session.init(Idle, connect_target(&current), -1);
        session.connect();

        let outcome = apply_reload(&mut session, &current, &fresh);
        assert_eq!(
            outcome,
            ReloadOutcome {
                backoff_replaced: true,
                restart_needed: false
            }
        );

        // The new strategy delays the next attempt instead of retrying at once.
        session.handle_event(TransportEvent::Closed {
            reason: "test".into(),
        });
        assert!(session.pending_reconnect().is_some());
    }

    #[test]
    fn test_reload_flags_endpoint_change_for_restart() {
        let current = Config::default();
        let mut fresh = current.clone();
        fresh.network.server_port = 9100;

        let mut session = SessionManager::new();
        let outcome = apply_reload(&mut session, &current, &fresh);
        assert!(!outcome.backoff_replaced);
        assert!(outcome.restart_needed);
    }

    #[test]
    fn test_reload_without_changes_does_nothing() {
        let config = Config::default();
        let mut session = SessionManager::new();
        assert_eq!(apply_reload(&mut session, &config, &config), ReloadOutcome::default());
    }
}
