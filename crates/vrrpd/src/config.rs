//! YAML configuration loading and validation.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found in search paths")]
    FileNotFound,

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("instance '{0}' references unknown sync group '{1}'")]
    UnknownSyncGroup(String, String),

    #[error("duplicate vrid {0} on interface '{1}'")]
    DuplicateVrid(u8, String),

    #[error("instance '{0}' has a tracked entity weight {1} outside [-253, 253]")]
    WeightOutOfRange(String, i16),
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub nftables: NftablesSettings,

    #[validate(length(min = 1, message = "at least one instance must be configured"))]
    #[validate]
    pub instances: Vec<InstanceSettings>,

    #[serde(default)]
    pub sync_groups: Vec<SyncGroupSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NftablesSettings {
    pub enabled: bool,
}

impl Default for NftablesSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncGroupSettings {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InstanceSettings {
    #[validate(length(min = 1))]
    pub name: String,

    pub vrid: u8,

    #[serde(default = "default_version")]
    pub version: u8,

    #[validate(length(min = 1))]
    pub interface: String,

    #[validate(range(min = 0, max = 255))]
    pub priority: u8,

    #[serde(default = "default_advert_interval", with = "humantime_serde")]
    pub advertisement_interval: Duration,

    #[serde(default)]
    pub preempt: bool,

    #[serde(default, with = "humantime_serde")]
    pub preempt_delay: Duration,

    #[serde(default)]
    pub accept_mode: bool,

    pub primary_ip: IpAddr,

    #[serde(default)]
    pub unicast_peers: Vec<IpAddr>,

    #[validate(length(min = 1, message = "at least one VIP must be configured"))]
    pub vips: Vec<VipSettings>,

    #[serde(default)]
    pub auth: AuthSettings,

    pub sync_group: Option<String>,

    pub notify_script: Option<String>,

    #[serde(default)]
    pub track: Vec<TrackSettings>,
}

fn default_version() -> u8 {
    3
}

fn default_advert_interval() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VipSettings {
    pub address: IpAddr,
    pub prefix_len: u8,
    #[serde(default)]
    pub dont_track: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthSettings {
    #[default]
    None,
    SimplePassword {
        password: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackSettings {
    Interface {
        interface: String,
        weight: i16,
    },
    Script {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(with = "humantime_serde")]
        interval: Duration,
        #[serde(with = "humantime_serde")]
        timeout: Duration,
        weight: i16,
        #[serde(default = "default_rise_fall")]
        rise: u32,
        #[serde(default = "default_rise_fall")]
        fall: u32,
    },
    File {
        path: PathBuf,
        #[serde(with = "humantime_serde")]
        poll_interval: Duration,
        weight: i16,
    },
    Process {
        pattern: String,
        #[serde(with = "humantime_serde")]
        poll_interval: Duration,
        weight: i16,
        #[serde(default = "default_rise_fall")]
        rise: u32,
        #[serde(default = "default_rise_fall")]
        fall: u32,
    },
}

impl TrackSettings {
    fn weight(&self) -> i16 {
        match self {
            TrackSettings::Interface { weight, .. }
            | TrackSettings::Script { weight, .. }
            | TrackSettings::File { weight, .. }
            | TrackSettings::Process { weight, .. } => *weight,
        }
    }
}

fn default_rise_fall() -> u32 {
    1
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading configuration");
                Self::load_from_file(&path)
            }
            None => Err(ConfigError::FileNotFound),
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        config.validate_cross_references()?;
        Ok(config)
    }

    fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("/etc/vrrpd/vrrpd.yaml"),
            PathBuf::from("./vrrpd.yaml"),
        ];
        candidates.into_iter().find(|p| p.is_file())
    }

    /// Checks that can't be expressed as per-field `validator` rules:
    /// sync group references resolve, and no two instances on the same
    /// interface share a VRID (RFC 3768 section 1 requires VRID to be
    /// unique per interface, not globally).
    fn validate_cross_references(&self) -> Result<(), ConfigError> {
        let group_names: std::collections::HashSet<&str> = self.sync_groups.iter().map(|g| g.name.as_str()).collect();
        for instance in &self.instances {
            if let Some(group) = &instance.sync_group {
                if !group_names.contains(group.as_str()) {
                    return Err(ConfigError::UnknownSyncGroup(instance.name.clone(), group.clone()));
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        for instance in &self.instances {
            if !seen.insert((instance.vrid, instance.interface.clone())) {
                return Err(ConfigError::DuplicateVrid(instance.vrid, instance.interface.clone()));
            }
        }

        for instance in &self.instances {
            for track in &instance.track {
                let weight = track.weight();
                if !(-253..=253).contains(&weight) {
                    return Err(ConfigError::WeightOutOfRange(instance.name.clone(), weight));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
instances:
  - name: web-vip
    vrid: 51
    interface: eth0
    priority: 100
    primary_ip: 10.0.0.2
    vips:
      - address: 10.0.0.100
        prefix_len: 24
"#
    }

    #[test]
    fn minimal_config_parses_and_validates() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.instances[0].version, 3);
        assert_eq!(config.instances[0].advertisement_interval, Duration::from_secs(1));
    }

    #[test]
    fn unknown_sync_group_is_rejected() {
        let yaml = format!("{}    sync_group: missing\n", minimal_yaml());
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(config.validate_cross_references(), Err(ConfigError::UnknownSyncGroup(_, _))));
    }

    #[test]
    fn duplicate_vrid_on_same_interface_is_rejected() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        let mut second = config.instances[0].clone();
        second.name = "web-vip-2".into();
        config.instances.push(second);
        assert!(matches!(config.validate_cross_references(), Err(ConfigError::DuplicateVrid(51, _))));
    }

    #[test]
    fn empty_instance_list_fails_validation() {
        let config: Config = serde_yaml::from_str("instances: []\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn weight_out_of_range_fails_validation() {
        let yaml = r#"
instances:
  - name: web-vip
    vrid: 51
    interface: eth0
    priority: 100
    primary_ip: 10.0.0.2
    vips:
      - address: 10.0.0.100
        prefix_len: 24
    track:
      - kind: interface
        interface: eth1
        weight: 300
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate_cross_references(), Err(ConfigError::WeightOutOfRange(_, 300))));
    }
}
