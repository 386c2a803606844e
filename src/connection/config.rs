use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Address and credentials of one database endpoint (a primary or a replica).
///
/// Deserialized from the topology description; the remaining knobs fall back
/// to the defaults below when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Database host
    pub host: String,

    /// Database port
    pub port: u16,

    /// Username for authentication
    pub user: String,

    /// Password for authentication
    #[serde(default)]
    pub password: String,

    /// Database name
    pub database: String,

    /// Bound on open + liveness probe during topology construction
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Maximum number of pooled connections behind this endpoint's handle
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

impl EndpointConfig {
    /// Create an endpoint on `localhost:5432` with the given credentials
    pub fn new(user: &str, password: &str) -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432, // Default PostgreSQL port
            user: user.to_string(),
            password: password.to_string(),
            database: "postgres".to_string(),
            connect_timeout: default_connect_timeout(),
            max_connections: default_max_connections(),
        }
    }

    /// Set the database name
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the host
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set maximum pooled connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Stable identity of the endpoint: `host:port/database`
    pub fn address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    /// Connection string safe for logs
    pub fn to_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user,
            "***", // Don't expose password
            self.host,
            self.port,
            self.database
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host cannot be empty".to_string());
        }

        if self.port == 0 {
            return Err("port must be > 0".to_string());
        }

        if self.user.trim().is_empty() {
            return Err("user cannot be empty".to_string());
        }

        if self.database.trim().is_empty() {
            return Err("database cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }

        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0".to_string());
        }

        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pattern() {
        let config = EndpointConfig::new("user", "pass")
            .host("example.com")
            .port(5441)
            .database("shard0")
            .max_connections(20);

        assert_eq!(config.host, "example.com");
        assert_eq!(config.port, 5441);
        assert_eq!(config.database, "shard0");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.address(), "example.com:5441/shard0");
    }

    #[test]
    fn test_validate() {
        assert!(EndpointConfig::new("user", "pass").validate().is_ok());
        assert!(EndpointConfig::new("", "pass").validate().is_err());
        assert!(
            EndpointConfig::new("user", "pass")
                .max_connections(0)
                .validate()
                .is_err()
        );
        assert!(EndpointConfig::new("user", "pass").port(0).validate().is_err());
    }

    #[test]
    fn test_to_url_hides_password() {
        let config = EndpointConfig::new("alice", "secret123").database("shard0");

        let url = config.to_url();
        assert!(!url.contains("secret123"));
        assert!(url.contains("***"));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: EndpointConfig = serde_json::from_str(
            r#"{"host":"localhost","port":5440,"user":"postgres","password":"postgres","database":"shard0"}"#,
        )
        .unwrap();

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }
}
