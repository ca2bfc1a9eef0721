use anyhow::{bail, Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use shelly_fronius_lib::{
    protocol::FieldEncoding,
    register_map::{Identity, MeterModel, RegisterMap},
    shelly::ShellyClient,
};
use std::{
    collections::BTreeMap,
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellyConfig {
    pub url: String,
    /// Empty disables authentication.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub em_id: u32,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_url() -> String {
    String::from("http://192.168.1.100")
}

fn default_timeout() -> Duration {
    Duration::from_secs(2)
}

impl Default for ShellyConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: String::new(),
            password: String::new(),
            em_id: 0,
            timeout: default_timeout(),
        }
    }
}

impl ShellyConfig {
    pub fn client(&self) -> Result<ShellyClient> {
        let client = ShellyClient::new(&self.url, self.em_id, self.timeout)
            .with_context(|| format!("Cannot create HTTP client for {}", self.url))?;
        Ok(client.with_credentials(&self.username, &self.password))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusConfig {
    #[serde(default = "default_listen_ip")]
    pub listen_ip: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Protocol address of the `SunS` marker.
    #[serde(default = "default_sunspec_base")]
    pub sunspec_base: u16,
}

fn default_listen_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    502
}

fn default_sunspec_base() -> u16 {
    40000
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            port: default_port(),
            sunspec_base: default_sunspec_base(),
        }
    }
}

impl ModbusConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u32,
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_alert_threshold() -> u32 {
    10
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            alert_threshold: default_alert_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeterConfig {
    #[serde(default)]
    pub model: MeterModel,
    /// Encoding of every energy counter, `None` keeps the model's default.
    #[serde(default)]
    pub energy_encoding: Option<FieldEncoding>,
    /// Per point encoding, applied after `energy_encoding`.
    #[serde(default)]
    pub overrides: BTreeMap<String, FieldEncoding>,
}

impl MeterConfig {
    pub fn register_map(&self) -> shelly_fronius_lib::Result<RegisterMap> {
        let mut map = self.model.register_map();
        if let Some(encoding) = self.energy_encoding {
            map.set_energy_encoding(encoding)?;
        }
        for (point, encoding) in &self.overrides {
            map.set_encoding(point, *encoding)?;
        }
        Ok(map)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub shelly: ShellyConfig,
    #[serde(default)]
    pub modbus: ModbusConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub meter: MeterConfig,
    #[serde(default)]
    pub identity: Identity,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    String::from("info")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shelly: ShellyConfig::default(),
            modbus: ModbusConfig::default(),
            poll: PollConfig::default(),
            meter: MeterConfig::default(),
            identity: Identity::default(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.shelly.url.trim().is_empty() {
            bail!("shelly.url must not be empty");
        }
        if self.poll.interval.is_zero() {
            bail!("poll.interval must be greater than zero");
        }
        if self.poll.alert_threshold == 0 {
            bail!("poll.alert_threshold must be greater than zero");
        }
        LevelFilter::from_str(&self.log_level)
            .with_context(|| format!("Invalid log_level '{}'", self.log_level))?;
        let map = self
            .meter
            .register_map()
            .context("Invalid meter configuration")?;
        map.check_base(self.modbus.sunspec_base)
            .context("modbus.sunspec_base leaves no room for the register map")?;
        Ok(())
    }
}

/// Loads and validates the configuration at `path`.
///
/// When the file does not exist a default one is written and `None` is
/// returned, so the caller can stop and let the operator edit it.
pub fn load_or_create(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        write_default(path)?;
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Cannot read config file {path:?}"))?;
    let config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("Cannot parse config file {path:?}"))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {path:?}"))?;
    Ok(Some(config))
}

fn write_default(path: &Path) -> Result<()> {
    let content =
        serde_yaml::to_string(&Config::default()).context("Cannot serialize default config")?;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Cannot create directory {dir:?}"))?;
    }
    fs::write(path, content).with_context(|| format!("Cannot write config file {path:?}"))
}
