//! Relay configuration.
//!
//! The environment is the only config source. Every variable is optional and
//! falls back to the default listed on its field; empty values count as
//! unset.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Upstream MQTT broker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// `MQTT_BROKER_HOST`, default `mqtt-broker`.
    pub host: String,
    /// `MQTT_BROKER_PORT`, default `1883`.
    pub port: u16,
    /// `MQTT_TOPIC`, default `dronedata/#`.
    pub topic: String,
    /// `MQTT_CLIENT_ID`, default `backend_ws`.
    pub client_id: String,
    /// `MQTT_RETRY_SECS`, default 5s. Fixed delay between reconnect attempts.
    pub retry_delay: Duration,
    /// `MQTT_KEEP_ALIVE_SECS`, default 60s.
    pub keep_alive: Duration,
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub broker: BrokerConfig,
    /// `BIND_ADDR`, default `0.0.0.0:8000`.
    pub bind_addr: String,
    /// `WS_PATH`, default `/ws`.
    pub ws_path: String,
    /// `CLIENT_QUEUE_DEPTH`, default 256. Messages a client may fall behind
    /// before it is evicted.
    pub client_queue_depth: usize,
    /// `CLIENT_SEND_TIMEOUT_MS`, default 2000.
    pub client_send_timeout: Duration,
    /// `INGEST_CAPACITY`, default 1024. Messages buffered between the feed
    /// thread and the broadcaster.
    pub ingest_capacity: usize,
    /// `FRONTEND_DIR`, default `/app/frontend_dist`. Served only if present.
    pub frontend_dir: PathBuf,
    /// `LOG_LEVEL`, default `info`.
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
    #[error("{var} must start with '/', got {value:?}")]
    RelativePath { var: &'static str, value: String },
    #[error("{var}={value:?} {reason}")]
    UnusableRoute {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let broker = BrokerConfig {
            host: env.string("MQTT_BROKER_HOST", "mqtt-broker"),
            port: env.parse("MQTT_BROKER_PORT", 1883u16, "port number")?,
            topic: env.string("MQTT_TOPIC", "dronedata/#"),
            client_id: env.string("MQTT_CLIENT_ID", "backend_ws"),
            retry_delay: Duration::from_secs(env.positive("MQTT_RETRY_SECS", 5u64)?),
            keep_alive: Duration::from_secs(env.positive("MQTT_KEEP_ALIVE_SECS", 60u64)?),
        };

        let ws_path = check_ws_path(env.string("WS_PATH", "/ws"))?;

        Ok(RelayConfig {
            broker,
            bind_addr: env.string("BIND_ADDR", "0.0.0.0:8000"),
            ws_path,
            client_queue_depth: env.positive("CLIENT_QUEUE_DEPTH", 256usize)?,
            client_send_timeout: Duration::from_millis(
                env.positive("CLIENT_SEND_TIMEOUT_MS", 2000u64)?,
            ),
            ingest_capacity: env.positive("INGEST_CAPACITY", 1024usize)?,
            frontend_dir: PathBuf::from(env.string("FRONTEND_DIR", "/app/frontend_dist")),
            log_level: env.string("LOG_LEVEL", "info"),
        })
    }
}

/// Paths the router already serves besides the websocket endpoint.
const RESERVED_PATHS: &[&str] = &["/", "/health"];

/// The websocket path must be a literal route that does not collide with the
/// other routes.
fn check_ws_path(value: String) -> Result<String, ConfigError> {
    const VAR: &str = "WS_PATH";
    if !value.starts_with('/') {
        return Err(ConfigError::RelativePath { var: VAR, value });
    }
    let reason = if RESERVED_PATHS.contains(&value.as_str()) {
        "is already served by the relay"
    } else if value.contains(['{', '}', '*']) || value.split('/').any(|seg| seg.starts_with(':')) {
        "must be a literal path without parameters or wildcards"
    } else {
        return Ok(value);
    };
    Err(ConfigError::UnusableRoute {
        var: VAR,
        value,
        reason,
    })
}

// ---------------------------------------------------------------------------
// Private: variable access
// ---------------------------------------------------------------------------

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_owned())
    }

    fn parse<T: FromStr>(
        &self,
        var: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var,
                value,
                expected,
            }),
        }
    }

    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
    {
        let value = self.parse(var, default, "positive integer")?;
        if value == T::default() {
            return Err(ConfigError::Zero { var });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        RelayConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.broker.host, "mqtt-broker");
        assert_eq!(cfg.broker.port, 1883);
        assert_eq!(cfg.broker.topic, "dronedata/#");
        assert_eq!(cfg.broker.client_id, "backend_ws");
        assert_eq!(cfg.broker.retry_delay, Duration::from_secs(5));
        assert_eq!(cfg.broker.keep_alive, Duration::from_secs(60));
        assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
        assert_eq!(cfg.ws_path, "/ws");
        assert_eq!(cfg.client_queue_depth, 256);
        assert_eq!(cfg.client_send_timeout, Duration::from_millis(2000));
        assert_eq!(cfg.ingest_capacity, 1024);
        assert_eq!(cfg.frontend_dir, PathBuf::from("/app/frontend_dist"));
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn broker_host_and_port_are_overridable() {
        let cfg = load(&[("MQTT_BROKER_HOST", "10.0.0.5"), ("MQTT_BROKER_PORT", "18830")]).unwrap();
        assert_eq!(cfg.broker.host, "10.0.0.5");
        assert_eq!(cfg.broker.port, 18830);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = load(&[("MQTT_BROKER_HOST", "  "), ("MQTT_BROKER_PORT", "")]).unwrap();
        assert_eq!(cfg.broker.host, "mqtt-broker");
        assert_eq!(cfg.broker.port, 1883);
    }

    #[test]
    fn invalid_port_names_the_variable() {
        let err = load(&[("MQTT_BROKER_PORT", "70000")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "MQTT_BROKER_PORT",
                value: "70000".to_owned(),
                expected: "port number",
            }
        );
        assert!(err.to_string().contains("MQTT_BROKER_PORT"));
    }

    #[test]
    fn zero_bounds_are_rejected() {
        assert_eq!(
            load(&[("CLIENT_QUEUE_DEPTH", "0")]).unwrap_err(),
            ConfigError::Zero {
                var: "CLIENT_QUEUE_DEPTH"
            }
        );
        assert_eq!(
            load(&[("MQTT_RETRY_SECS", "0")]).unwrap_err(),
            ConfigError::Zero {
                var: "MQTT_RETRY_SECS"
            }
        );
    }

    #[test]
    fn ws_path_must_be_absolute() {
        assert!(matches!(
            load(&[("WS_PATH", "ws")]),
            Err(ConfigError::RelativePath { var: "WS_PATH", .. })
        ));
        assert_eq!(load(&[("WS_PATH", "/live")]).unwrap().ws_path, "/live");
        assert_eq!(load(&[("WS_PATH", "/api/ws")]).unwrap().ws_path, "/api/ws");
    }

    #[test]
    fn ws_path_cannot_shadow_other_routes() {
        for value in ["/", "/health"] {
            let err = load(&[("WS_PATH", value)]).unwrap_err();
            assert!(
                matches!(&err, ConfigError::UnusableRoute { var: "WS_PATH", value: v, .. } if v == value),
                "{value}: {err:?}"
            );
        }
    }

    #[test]
    fn ws_path_must_be_a_literal_route() {
        for value in ["/ws/{", "/ws/{id}", "/ws/}", "/ws/*rest", "/ws/:id"] {
            let err = load(&[("WS_PATH", value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::UnusableRoute { var: "WS_PATH", .. }),
                "{value}: {err:?}"
            );
            assert!(err.to_string().contains("WS_PATH"));
        }
    }

    #[test]
    fn zero_bound_parse_error_asks_for_positive_integer() {
        assert_eq!(
            load(&[("INGEST_CAPACITY", "-3")]).unwrap_err(),
            ConfigError::Invalid {
                var: "INGEST_CAPACITY",
                value: "-3".to_owned(),
                expected: "positive integer",
            }
        );
    }

    #[test]
    fn blank_log_level_falls_back_to_info() {
        assert_eq!(load(&[("LOG_LEVEL", " ")]).unwrap().log_level, "info");
        assert_eq!(load(&[("LOG_LEVEL", "relay=debug")]).unwrap().log_level, "relay=debug");
    }
}
