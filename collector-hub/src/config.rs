use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_DEVICES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// FIFO écrite par le bridge wearable.
    pub wearable_pipe: PathBuf,
    /// FIFO vers le rule engine (lignes SENSOR).
    pub rule_in_pipe: PathBuf,
    /// FIFO depuis le rule engine (lignes RESULT).
    pub rule_out_pipe: PathBuf,
    pub bus: BusConf,
    /// 0 : valeur par défaut.
    pub publish_interval_secs: u64,
    /// 0 : valeur par défaut.
    pub max_devices: usize,
    pub log: LogToggles,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BusConf {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub response_timeout_ms: u64,
    pub noise_retry_delay_ms: u64,
    pub plausibility: PlausibilityWindow,
}

/// Plage physique hors de laquelle une mesure n'est pas fiable.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PlausibilityWindow {
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
}

/// Verbosité par agent. Désactivée, les lignes par événement restent en debug.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct LogToggles {
    pub sensor: bool,
    pub wearable: bool,
    pub rule_in: bool,
    pub rule_out: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            wearable_pipe: PathBuf::from("/tmp/th_fifo"),
            rule_in_pipe: PathBuf::from("/tmp/rulebase_in.fifo"),
            rule_out_pipe: PathBuf::from("/tmp/rulebase_out.fifo"),
            bus: BusConf::default(),
            publish_interval_secs: DEFAULT_PUBLISH_INTERVAL_SECS,
            max_devices: DEFAULT_MAX_DEVICES,
            log: LogToggles::default(),
        }
    }
}

impl Default for BusConf {
    fn default() -> Self {
        Self {
            host: "192.168.0.20".into(),
            port: 8887,
            unit_id: 1,
            response_timeout_ms: 1000,
            noise_retry_delay_ms: 50,
            plausibility: PlausibilityWindow::default(),
        }
    }
}

impl Default for PlausibilityWindow {
    fn default() -> Self {
        Self {
            temperature_min: -40.0,
            temperature_max: 85.0,
            humidity_min: 0.0,
            humidity_max: 100.0,
        }
    }
}

impl PlausibilityWindow {
    pub fn contains(&self, temperature: f64, humidity: f64) -> bool {
        (self.temperature_min..=self.temperature_max).contains(&temperature)
            && (self.humidity_min..=self.humidity_max).contains(&humidity)
    }
}

impl BusConf {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn noise_retry_delay(&self) -> Duration {
        Duration::from_millis(self.noise_retry_delay_ms)
    }
}

impl HubConfig {
    /// Copie où les champs non renseignés (zéro / vide) prennent leur défaut.
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        let mut cfg = self.clone();
        if cfg.wearable_pipe.as_os_str().is_empty() {
            cfg.wearable_pipe = defaults.wearable_pipe;
        }
        if cfg.rule_in_pipe.as_os_str().is_empty() {
            cfg.rule_in_pipe = defaults.rule_in_pipe;
        }
        if cfg.rule_out_pipe.as_os_str().is_empty() {
            cfg.rule_out_pipe = defaults.rule_out_pipe;
        }
        if cfg.bus.host.trim().is_empty() {
            cfg.bus.host = defaults.bus.host;
        }
        if cfg.bus.port == 0 {
            cfg.bus.port = defaults.bus.port;
        }
        if cfg.bus.response_timeout_ms == 0 {
            cfg.bus.response_timeout_ms = defaults.bus.response_timeout_ms;
        }
        if cfg.publish_interval_secs == 0 {
            cfg.publish_interval_secs = DEFAULT_PUBLISH_INTERVAL_SECS;
        }
        if cfg.max_devices == 0 {
            cfg.max_devices = DEFAULT_MAX_DEVICES;
        }
        cfg
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }
}

/// Chemin de la config YAML : `COLLECTOR_HUB_CONFIG` ou `collector-hub.yaml`.
pub fn config_path() -> PathBuf {
    std::env::var("COLLECTOR_HUB_CONFIG")
        .unwrap_or_else(|_| "collector-hub.yaml".into())
        .into()
}

/// Charge une config YAML. Fichier absent ou vide : valeurs par défaut.
pub fn load_config(path: &Path) -> Result<HubConfig, ConfigError> {
    if !path.exists() {
        tracing::warn!("no config at {}, using defaults", path.display());
        return Ok(HubConfig::default());
    }
    let txt = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if txt.trim().is_empty() {
        return Ok(HubConfig::default());
    }
    let cfg: HubConfig = serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cfg.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fields_fall_back_to_defaults() {
        let cfg = HubConfig {
            publish_interval_secs: 0,
            max_devices: 0,
            rule_in_pipe: PathBuf::new(),
            ..HubConfig::default()
        }
        .normalized();
        assert_eq!(cfg.publish_interval_secs, 5);
        assert_eq!(cfg.max_devices, 64);
        assert_eq!(cfg.rule_in_pipe, PathBuf::from("/tmp/rulebase_in.fifo"));
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.yaml");
        std::fs::write(
            &path,
            "publish_interval_secs: 2\nbus:\n  host: 10.0.0.7\nlog:\n  rule_out: true\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.publish_interval_secs, 2);
        assert_eq!(cfg.bus.host, "10.0.0.7");
        assert_eq!(cfg.bus.port, 8887);
        assert_eq!(cfg.max_devices, 64);
        assert!(cfg.log.rule_out);
        assert!(!cfg.log.sensor);
    }

    #[test]
    fn missing_file_is_default_and_garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            load_config(&dir.path().join("absent.yaml")).unwrap(),
            HubConfig::default()
        );

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "max_devices: [not, a, number]").unwrap();
        assert!(matches!(load_config(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn plausibility_bounds_are_inclusive() {
        let w = PlausibilityWindow::default();
        assert!(w.contains(-40.0, 0.0));
        assert!(w.contains(85.0, 100.0));
        assert!(!w.contains(200.0, 50.0));
        assert!(!w.contains(20.0, 100.1));
    }
}
