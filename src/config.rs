use crate::prelude::*;

use chrono_tz::Tz;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub pmu: Pmu,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Pmu {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Pmu {
    pub host: String,

    #[serde(default = "Config::default_port")]
    pub port: u16,

    /// Per-exchange timeout, seconds
    #[serde(default = "Config::default_timeout")]
    pub timeout: u64,

    /// Seconds between polls in monitor mode
    #[serde(default = "Config::default_scan_interval")]
    pub scan_interval: u64,

    /// IANA timezone the device clock is set from
    #[serde(default = "Config::default_timezone")]
    pub timezone: Tz,

    pub strict_crc: Option<bool>,
    pub auto_time_sync: Option<bool>,
    pub pv_voltage_threshold: Option<f64>,
}

impl Pmu {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn strict_crc(&self) -> bool {
        self.strict_crc == Some(true)
    }

    pub fn auto_time_sync(&self) -> bool {
        self.auto_time_sync.unwrap_or(true)
    }

    pub fn pv_voltage_threshold(&self) -> f64 {
        self.pv_voltage_threshold.unwrap_or(50.0)
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn pmu(&self) -> &Pmu {
        &self.pmu
    }

    pub fn loglevel(&self) -> String {
        self.loglevel.clone()
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_timeout() -> u64 {
        5
    }

    fn default_scan_interval() -> u64 {
        60
    }

    fn default_timezone() -> Tz {
        chrono_tz::Australia::Brisbane
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pmu_section_defaults() {
        let config: Config = serde_yaml::from_str("pmu:\n  host: 10.0.0.9\n").unwrap();

        assert_eq!(config.pmu().host(), "10.0.0.9");
        assert_eq!(config.pmu().port(), 8080);
        assert_eq!(config.pmu().timeout(), Duration::from_secs(5));
        assert_eq!(config.pmu().scan_interval(), Duration::from_secs(60));
        assert_eq!(config.pmu().timezone(), chrono_tz::Australia::Brisbane);
        assert!(!config.pmu().strict_crc());
        assert!(config.pmu().auto_time_sync());
        assert_eq!(config.pmu().pv_voltage_threshold(), 50.0);
        assert_eq!(config.loglevel(), "info");
    }

    #[test]
    fn pmu_section_overrides() {
        let yaml = "\
loglevel: debug
pmu:
  host: 10.0.0.9
  port: 18080
  timeout: 2
  scan_interval: 30
  timezone: Europe/Amsterdam
  strict_crc: true
  auto_time_sync: false
  pv_voltage_threshold: 35
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.pmu().port(), 18080);
        assert_eq!(config.pmu().timezone(), chrono_tz::Europe::Amsterdam);
        assert!(config.pmu().strict_crc());
        assert!(!config.pmu().auto_time_sync());
        assert_eq!(config.pmu().pv_voltage_threshold(), 35.0);
        assert_eq!(config.loglevel(), "debug");
    }

    #[test]
    fn loads_from_a_file() -> Result<()> {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "pmu:\n  host: 192.168.1.50\n  port: 8081")?;

        let config = Config::new(file.path().to_string_lossy().into_owned())?;
        assert_eq!(config.pmu().host(), "192.168.1.50");
        assert_eq!(config.pmu().port(), 8081);

        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::new("/nonexistent/config.yaml".to_string()).is_err());
    }
}
