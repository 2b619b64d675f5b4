//! Server configuration

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, UnknownPolicyError};

/// Port used when `PORT` is not set
pub const DEFAULT_PORT: u16 = 3001;

/// What happens when a connection claims an occupied role slot
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RolePolicy {
    /// Evict the current holder
    #[default]
    Replace,
    /// Refuse the newcomer
    Reject,
}

impl FromStr for RolePolicy {
    type Err = UnknownPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(RolePolicy::Replace),
            "reject" => Ok(RolePolicy::Reject),
            _ => Err(UnknownPolicyError(s.to_string())),
        }
    }
}

impl fmt::Display for RolePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolePolicy::Replace => f.write_str("replace"),
            RolePolicy::Reject => f.write_str("reject"),
        }
    }
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Policy for occupied role slots
    pub role_policy: RolePolicy,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Per-connection outbound queue length
    pub outbound_buffer: usize,

    /// Send a ping this often (None = never)
    pub ping_interval: Option<Duration>,

    /// Close connections silent for this long (None = never)
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            role_policy: RolePolicy::Replace,
            max_connections: 0, // Unlimited
            outbound_buffer: 64,
            ping_interval: None,
            idle_timeout: None,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Load from the process environment
    ///
    /// Reads `HOST`, `PORT`, `RELAY_ROLE_POLICY`, `RELAY_MAX_CONNECTIONS`,
    /// `RELAY_OUTBOUND_BUFFER`, `RELAY_PING_INTERVAL_SECS` and
    /// `RELAY_IDLE_TIMEOUT_SECS`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let host = match lookup("HOST") {
            Some(value) => parse_value("HOST", value)?,
            None => config.bind_addr.ip(),
        };
        let port = match lookup("PORT") {
            Some(value) => parse_value("PORT", value)?,
            None => DEFAULT_PORT,
        };
        config.bind_addr = SocketAddr::new(host, port);

        if let Some(value) = lookup("RELAY_ROLE_POLICY") {
            config.role_policy = parse_value("RELAY_ROLE_POLICY", value)?;
        }
        if let Some(value) = lookup("RELAY_MAX_CONNECTIONS") {
            config.max_connections = parse_value("RELAY_MAX_CONNECTIONS", value)?;
        }
        if let Some(value) = lookup("RELAY_OUTBOUND_BUFFER") {
            let size: usize = parse_value("RELAY_OUTBOUND_BUFFER", value)?;
            config = config.outbound_buffer(size);
        }
        if let Some(value) = lookup("RELAY_PING_INTERVAL_SECS") {
            let secs: u64 = parse_value("RELAY_PING_INTERVAL_SECS", value)?;
            config.ping_interval = Some(Duration::from_secs(secs)).filter(|d| !d.is_zero());
        }
        if let Some(value) = lookup("RELAY_IDLE_TIMEOUT_SECS") {
            let secs: u64 = parse_value("RELAY_IDLE_TIMEOUT_SECS", value)?;
            config.idle_timeout = Some(Duration::from_secs(secs)).filter(|d| !d.is_zero());
        }

        Ok(config)
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the role slot policy
    pub fn role_policy(mut self, policy: RolePolicy) -> Self {
        self.role_policy = policy;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the outbound queue length (at least 1)
    pub fn outbound_buffer(mut self, size: usize) -> Self {
        self.outbound_buffer = size.max(1);
        self
    }

    /// Enable server pings
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    /// Enable the idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.role_policy, RolePolicy::Replace);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.outbound_buffer, 64);
        assert!(config.ping_interval.is_none());
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_from_empty_lookup_is_default() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.bind_addr, ServerConfig::default().bind_addr);
        assert_eq!(config.role_policy, RolePolicy::Replace);
    }

    #[test]
    fn test_from_lookup() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("RELAY_ROLE_POLICY", "Reject"),
            ("RELAY_MAX_CONNECTIONS", "10"),
            ("RELAY_OUTBOUND_BUFFER", "0"),
            ("RELAY_PING_INTERVAL_SECS", "15"),
            ("RELAY_IDLE_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.role_policy, RolePolicy::Reject);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.outbound_buffer, 1);
        assert_eq!(config.ping_interval, Some(Duration::from_secs(15)));
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn test_invalid_port() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "abc")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "PORT",
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_policy() {
        let result = ServerConfig::from_lookup(lookup(&[("RELAY_ROLE_POLICY", "evict")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                key: "RELAY_ROLE_POLICY",
                ..
            })
        ));
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = ServerConfig::with_addr(addr)
            .role_policy(RolePolicy::Reject)
            .max_connections(50)
            .outbound_buffer(8)
            .ping_interval(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(30));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.role_policy, RolePolicy::Reject);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.outbound_buffer, 8);
        assert_eq!(config.ping_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_policy_round_trip_through_display() {
        for policy in [RolePolicy::Replace, RolePolicy::Reject] {
            assert_eq!(policy.to_string().parse::<RolePolicy>(), Ok(policy));
        }
    }

    #[test]
    fn test_unknown_policy_error() {
        assert_eq!(
            "evict".parse::<RolePolicy>(),
            Err(UnknownPolicyError("evict".to_string()))
        );
    }
}
