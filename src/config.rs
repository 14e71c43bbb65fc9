//! Relay configuration.
//!
//! Defaults follow the reference protocol; every field can be overridden by
//! an environment variable at [`RelayConfig::load`] time, following the
//! precedence `defaults < ZAX_RELAY_* env vars`.

use std::time::Duration;

/// Durations and namespace constants governing a relay session.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    /// Width, in bytes, of the client token generated in `start_session`.
    pub relay_token_len: usize,
    /// Deadline after step 1 of the handshake, before the guard band.
    pub relay_token_timeout_ms: u64,
    /// Deadline after step 3 of the handshake, before the guard band.
    pub relay_session_timeout_ms: u64,
    /// Per-HTTP-call timeout.
    pub relay_ajax_timeout_ms: u64,
    /// Fraction of each deadline shaved off as a guard band, e.g. `0.10`.
    pub guard_band: f64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            relay_token_len: 32,
            relay_token_timeout_ms: 5 * 60 * 1000,
            relay_session_timeout_ms: 20 * 60 * 1000,
            relay_ajax_timeout_ms: 5 * 1000,
            guard_band: 0.10,
        }
    }
}

impl RelayConfig {
    /// Apply `ZAX_RELAY_*` environment variable overrides on top of the
    /// defaults. A variable that is set but fails to parse is ignored; the
    /// default for that field is kept.
    pub fn load() -> Self {
        let mut config = RelayConfig::default();

        if let Some(v) = env_usize("ZAX_RELAY_TOKEN_LEN") {
            config.relay_token_len = v;
        }
        if let Some(v) = env_u64("ZAX_RELAY_TOKEN_TIMEOUT_MS") {
            config.relay_token_timeout_ms = v;
        }
        if let Some(v) = env_u64("ZAX_RELAY_SESSION_TIMEOUT_MS") {
            config.relay_session_timeout_ms = v;
        }
        if let Some(v) = env_u64("ZAX_RELAY_AJAX_TIMEOUT_MS") {
            config.relay_ajax_timeout_ms = v;
        }
        if let Some(v) = env_f64("ZAX_RELAY_GUARD_BAND") {
            config.guard_band = v;
        }

        tracing::debug!(?config, "relay config loaded");
        config
    }

    /// Token-expiry deadline, reduced by the guard band.
    pub fn token_timeout(&self) -> Duration {
        scaled(self.relay_token_timeout_ms, self.guard_band)
    }

    /// Session-expiry deadline, reduced by the guard band.
    pub fn session_timeout(&self) -> Duration {
        scaled(self.relay_session_timeout_ms, self.guard_band)
    }

    pub fn ajax_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_ajax_timeout_ms)
    }
}

fn scaled(ms: u64, guard_band: f64) -> Duration {
    let factor = (1.0 - guard_band).clamp(0.0, 1.0);
    Duration::from_millis((ms as f64 * factor) as u64)
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch
    // them the way the teacher's config tests do.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_the_reference_protocol() {
        let _guard = ENV_GUARD.lock().unwrap();
        let config = RelayConfig::default();
        assert_eq!(config.relay_token_len, 32);
        assert_eq!(config.relay_token_timeout_ms, 5 * 60 * 1000);
        assert_eq!(config.relay_session_timeout_ms, 20 * 60 * 1000);
    }

    #[test]
    fn env_override_is_applied_and_malformed_values_fall_back() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::set_var("ZAX_RELAY_TOKEN_TIMEOUT_MS", "1000");
        std::env::set_var("ZAX_RELAY_SESSION_TIMEOUT_MS", "not-a-number");

        let config = RelayConfig::load();
        assert_eq!(config.relay_token_timeout_ms, 1000);
        assert_eq!(config.relay_session_timeout_ms, 20 * 60 * 1000);

        std::env::remove_var("ZAX_RELAY_TOKEN_TIMEOUT_MS");
        std::env::remove_var("ZAX_RELAY_SESSION_TIMEOUT_MS");
    }

    #[test]
    fn guard_band_shrinks_the_deadline() {
        let _guard = ENV_GUARD.lock().unwrap();
        let config = RelayConfig {
            guard_band: 0.10,
            ..RelayConfig::default()
        };
        assert_eq!(config.token_timeout(), Duration::from_millis((300_000.0 * 0.9) as u64));
    }
}
