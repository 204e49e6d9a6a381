use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `CLASHD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a rewrite.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "clashd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparseable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_or(lookup("CLASHD_PORT"), defaults.port),
            bind: lookup("CLASHD_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("CLASHD_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: lookup("CLASHD_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_or(lookup("CLASHD_MAX_CONNECTIONS"), defaults.max_connections),
            compact_threshold: parse_or(lookup("CLASHD_COMPACT_THRESHOLD"), defaults.compact_threshold),
            metrics_port: lookup("CLASHD_METRICS_PORT").and_then(|s| s.parse().ok()),
            tls_cert: lookup("CLASHD_TLS_CERT"),
            tls_key: lookup("CLASHD_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("clashd.wal")
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data/clashd.wal"));
    }

    #[test]
    fn reads_every_variable() {
        let config = config_from(&[
            ("CLASHD_PORT", "6000"),
            ("CLASHD_BIND", "127.0.0.1"),
            ("CLASHD_DATA_DIR", "/var/lib/clashd"),
            ("CLASHD_PASSWORD", "s3cret"),
            ("CLASHD_MAX_CONNECTIONS", "8"),
            ("CLASHD_COMPACT_THRESHOLD", "50"),
            ("CLASHD_METRICS_PORT", "9100"),
            ("CLASHD_TLS_CERT", "cert.pem"),
            ("CLASHD_TLS_KEY", "key.pem"),
        ]);
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/clashd/clashd.wal"));
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.tls_cert.as_deref(), Some("cert.pem"));
        assert_eq!(config.tls_key.as_deref(), Some("key.pem"));
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let config = config_from(&[
            ("CLASHD_MAX_CONNECTIONS", "lots"),
            ("CLASHD_METRICS_PORT", "-1"),
        ]);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.metrics_port, None);
    }
}
