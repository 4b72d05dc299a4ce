use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::error::ConfigError;

/// Process configuration, read once from the environment and then passed
/// around by reference. Nothing re-reads the environment after startup.
#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: IpAddr,

    #[envconfig(from = "BIND_PORT", default = "8000")]
    pub port: u16,

    /// When unset, the RPC port is derived from `port` (see [`Config::grpc_port`]).
    #[envconfig(from = "GRPC_PORT")]
    pub grpc_port: Option<u16>,

    #[envconfig(default = "false")]
    pub release_mode: bool,

    #[envconfig(default = "false")]
    pub observe_is_active: bool,

    #[envconfig(default = "http://localhost:4317")]
    pub observe_otlp_endpoint: String,

    #[envconfig(default = "1.0")]
    pub observe_sampling_rate: f64,

    #[envconfig(default = "3")]
    pub observe_export_timeout_secs: u64,

    #[envconfig(default = "false")]
    pub export_prometheus: bool,

    #[envconfig(default = "5000")]
    pub shutdown_timeout_ms: EnvMsDuration,

    pub database_url: Option<String>,

    #[envconfig(default = "100")]
    pub max_pg_connections: u32,

    pub redis_url: Option<String>,

    pub kafka_hosts: Option<String>,

    #[envconfig(nested = true)]
    pub storage: StorageConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct StorageConfig {
    #[envconfig(from = "STORAGE_ENDPOINT")]
    pub endpoint: Option<String>,

    #[envconfig(from = "STORAGE_ACCESS_KEY")]
    pub access_key: Option<String>,

    #[envconfig(from = "STORAGE_SECRET_KEY")]
    pub secret_key: Option<String>,

    #[envconfig(from = "STORAGE_REGION", default = "us-east-1")]
    pub region: String,
}

impl Config {
    /// Address of the primary API listener.
    pub fn api_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Port of the RPC listener. An unset `GRPC_PORT` becomes `"1"` followed by
    /// the API port, so 8000 serves RPC on 18000.
    pub fn grpc_port(&self) -> Result<u16, ConfigError> {
        match self.grpc_port {
            Some(port) => Ok(port),
            None => format!("1{}", self.port)
                .parse()
                .map_err(|_| ConfigError::DerivedGrpcPort(self.port)),
        }
    }

    pub fn rpc_address(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.host, self.grpc_port()?))
    }

    pub fn shutdown_timeout(&self) -> time::Duration {
        self.shutdown_timeout_ms.0
    }
}

impl Default for Config {
    /// Same values `init_from_env` produces on an empty environment.
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8000,
            grpc_port: None,
            release_mode: false,
            observe_is_active: false,
            observe_otlp_endpoint: "http://localhost:4317".to_owned(),
            observe_sampling_rate: 1.0,
            observe_export_timeout_secs: 3,
            export_prometheus: false,
            shutdown_timeout_ms: EnvMsDuration(time::Duration::from_millis(5000)),
            database_url: None,
            max_pg_connections: 100,
            redis_url: None,
            kafka_hosts: None,
            storage: StorageConfig {
                endpoint: None,
                access_key: None,
                secret_key: None,
                region: "us-east-1".to_owned(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl std::fmt::Display for ParseEnvMsDurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("expected a duration in milliseconds")
    }
}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_from_empty_env() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.api_address(), "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.grpc_port(), Ok(18000));
        assert_eq!(config.shutdown_timeout(), time::Duration::from_secs(5));
        assert!(config.database_url.is_none());
        assert!(config.storage.endpoint.is_none());
        assert_eq!(config.storage.region, "us-east-1");
    }

    #[test]
    fn explicit_grpc_port_wins() {
        let env = HashMap::from([
            ("BIND_PORT".to_owned(), "9000".to_owned()),
            ("GRPC_PORT".to_owned(), "50051".to_owned()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.rpc_address().unwrap().port(), 50051);
    }

    #[test]
    fn derived_grpc_port_must_fit() {
        let config = Config {
            port: 60000,
            ..Config::default()
        };

        assert_eq!(config.grpc_port(), Err(ConfigError::DerivedGrpcPort(60000)));
    }

    #[test]
    fn presence_follows_env() {
        let env = HashMap::from([
            ("DATABASE_URL".to_owned(), "postgres://localhost/app".to_owned()),
            ("REDIS_URL".to_owned(), "redis://localhost:6379".to_owned()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert!(config.database_url.is_some());
        assert!(config.redis_url.is_some());
        assert!(config.kafka_hosts.is_none());
    }
}
