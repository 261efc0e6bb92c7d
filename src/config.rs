use std::path::PathBuf;

/// Where calendar events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarMode {
    /// One `{facility}.calendar.jsonl` file per facility in the data directory.
    File,
    Off,
}

/// Server settings, read from `INNKEEP_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub facility_label: String,
    pub calendar: CalendarMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "innkeep".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
            facility_label: "Guest House".into(),
            calendar: CalendarMode::File,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| -> Option<String> {
            lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };

        Self {
            port: number(&parsed, "INNKEEP_PORT").unwrap_or(defaults.port),
            bind: parsed("INNKEEP_BIND").unwrap_or(defaults.bind),
            data_dir: parsed("INNKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("INNKEEP_PASSWORD").unwrap_or(defaults.password),
            max_connections: number(&parsed, "INNKEEP_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: number(&parsed, "INNKEEP_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            tls_cert: parsed("INNKEEP_TLS_CERT"),
            tls_key: parsed("INNKEEP_TLS_KEY"),
            metrics_port: number(&parsed, "INNKEEP_METRICS_PORT"),
            facility_label: parsed("INNKEEP_FACILITY_LABEL").unwrap_or(defaults.facility_label),
            calendar: match parsed("INNKEEP_CALENDAR").map(|v| v.to_ascii_lowercase()) {
                None => defaults.calendar,
                Some(v) if v == "file" => CalendarMode::File,
                Some(v) if v == "off" || v == "none" || v == "disabled" => CalendarMode::Off,
                Some(v) => {
                    tracing::warn!("INNKEEP_CALENDAR={v:?} not recognised, using file");
                    CalendarMode::File
                }
            },
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn number<T: std::str::FromStr>(parsed: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = parsed(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("{key}={raw:?} is not a valid number, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]);
        assert_eq!(config.port, 5433);
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.facility_label, "Guest House");
        assert_eq!(config.calendar, CalendarMode::File);
    }

    #[test]
    fn overrides_are_applied() {
        let config = from_pairs(&[
            ("INNKEEP_PORT", "6543"),
            ("INNKEEP_BIND", "127.0.0.1"),
            ("INNKEEP_DATA_DIR", "/var/lib/innkeep"),
            ("INNKEEP_METRICS_PORT", "9100"),
            ("INNKEEP_FACILITY_LABEL", "Harbour Lodge"),
            ("INNKEEP_CALENDAR", "off"),
        ]);
        assert_eq!(config.listen_addr(), "127.0.0.1:6543");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/innkeep"));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.facility_label, "Harbour Lodge");
        assert_eq!(config.calendar, CalendarMode::Off);
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config = from_pairs(&[
            ("INNKEEP_PORT", "not-a-port"),
            ("INNKEEP_MAX_CONNECTIONS", "-1"),
        ]);
        assert_eq!(config.port, 5433);
        assert_eq!(config.max_connections, 256);
    }
}
