// G5K-LAUNCH: Provisioning and Deployment of Peer-to-Peer Experiments on Grid'5000
// Copyright (C) 2024-2025 The G5K-LAUNCH Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Description of a single experiment run, loaded once at startup.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use g5k_utils::clock::format_clock;

use crate::netem::NetemConfig;

/// Longest reservation accepted, one year.
pub const MAX_WALLTIME_SECS: u64 = 365 * 24 * 3600;

/// Kind of network the machines are attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Shared production network of the site.
    Prod,
    /// Isolated, site-local VLAN. Requires a deployment job.
    Kavlan,
}

/// Where and as whom to book the machines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    /// Grid'5000 login.
    pub login: String,
    /// Access machine used as SSH jump host.
    pub access_host: String,
    /// Site, see <https://www.grid5000.fr/w/Status>.
    pub site: String,
    /// Cluster on the site, see <https://www.grid5000.fr/w/Hardware>.
    pub cluster: String,
    pub job_name: String,
    pub network: NetworkKind,
    /// Kadeploy environment installed on the machines of a kavlan job.
    pub environment: String,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            login: "mapigaglio".to_string(),
            access_host: "access.grid5000.fr".to_string(),
            site: "nancy".to_string(),
            cluster: "gros".to_string(),
            job_name: "PANDAS_libp2p".to_string(),
            network: NetworkKind::Kavlan,
            environment: "debian11-nfs".to_string(),
        }
    }
}

/// How many experiment nodes of each role to run. The regular nodes make up the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleCounts {
    pub nodes: usize,
    pub builders: usize,
    pub validators: usize,
}

impl Default for RoleCounts {
    fn default() -> Self {
        Self {
            nodes: 20,
            builders: 1,
            validators: 10,
        }
    }
}

impl RoleCounts {
    pub fn regulars(&self) -> usize {
        self.nodes
            .saturating_sub(self.builders.saturating_add(self.validators))
    }
}

/// Full description of an experiment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub grid: GridSettings,
    pub roles: RoleCounts,
    /// Number of physical machines booked on the cluster.
    pub num_machines: usize,
    pub parcel_size: usize,
    pub duration_secs: u64,
    /// Extra reservation time on top of the experiment duration.
    pub walltime_buffer_secs: u64,
    pub netem: NetemConfig,
    /// Node launch script. Relative paths are resolved against the remote home directory.
    pub launch_script: String,
    /// Directory receiving the per-node output files. Relative to the remote home directory.
    pub remote_log_dir: String,
    /// Result folder below the site directory on the access machine.
    pub results_dir: String,
    /// Pause between two launch commands.
    pub dispatch_delay_ms: u64,
    /// Download new results into the output directory once the walltime is over.
    pub collect_results: bool,
    /// Remove the emulation and release the job once the walltime is over.
    pub release_on_exit: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            grid: GridSettings::default(),
            roles: RoleCounts::default(),
            num_machines: 2,
            parcel_size: 512,
            duration_secs: 80,
            walltime_buffer_secs: 300,
            netem: NetemConfig::default(),
            launch_script: "libp2p-das-datahop/run.sh".to_string(),
            remote_log_dir: ".".to_string(),
            results_dir: "results".to_string(),
            dispatch_delay_ms: 1000,
            collect_results: false,
            release_on_exit: false,
        }
    }
}

impl ExperimentConfig {
    /// Read a (partial) configuration from a JSON file. Missing fields take their default.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        log::debug!("Loaded configuration from {path:?}");
        Ok(config)
    }

    /// Reservation time: experiment duration plus buffer. Saturates, [`validate`](Self::validate)
    /// rejects such values.
    pub fn walltime_secs(&self) -> u64 {
        self.duration_secs.saturating_add(self.walltime_buffer_secs)
    }

    /// Reservation time in OAR notation.
    pub fn walltime(&self) -> String {
        format_clock(self.walltime_secs())
    }

    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    /// Check the configuration for consistency before touching the grid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("grid.login", &self.grid.login),
            ("grid.access_host", &self.grid.access_host),
            ("grid.site", &self.grid.site),
            ("grid.cluster", &self.grid.cluster),
            ("grid.job_name", &self.grid.job_name),
            ("launch_script", &self.launch_script),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(field));
            }
        }
        if self.grid.network == NetworkKind::Kavlan && self.grid.environment.trim().is_empty() {
            return Err(ConfigError::Empty("grid.environment"));
        }
        // these end up unquoted in remote command lines
        for (field, value) in [
            ("grid.login", &self.grid.login),
            ("grid.access_host", &self.grid.access_host),
            ("grid.site", &self.grid.site),
            ("grid.cluster", &self.grid.cluster),
            ("grid.job_name", &self.grid.job_name),
            ("grid.environment", &self.grid.environment),
            ("launch_script", &self.launch_script),
            ("remote_log_dir", &self.remote_log_dir),
            ("results_dir", &self.results_dir),
        ] {
            if !is_shell_safe(value) {
                return Err(ConfigError::UnsafeValue(field, value.clone()));
            }
        }
        if self.num_machines == 0 {
            return Err(ConfigError::NoMachines);
        }
        if self.roles.builders == 0 {
            return Err(ConfigError::NoBuilder);
        }
        match self.roles.builders.checked_add(self.roles.validators) {
            Some(n) if n <= self.roles.nodes => {}
            _ => return Err(ConfigError::TooManyRoles(self.roles)),
        }
        match self.duration_secs.checked_add(self.walltime_buffer_secs) {
            Some(0) => return Err(ConfigError::NoWalltime),
            Some(w) if w <= MAX_WALLTIME_SECS => {}
            _ => return Err(ConfigError::WalltimeTooLong(MAX_WALLTIME_SECS)),
        }
        Ok(())
    }

    /// Remote path of the launch script.
    pub fn launch_script_path(&self) -> String {
        remote_path(&self.grid.login, &self.launch_script)
    }

    /// Remote directory of the per-node log files.
    pub fn remote_log_path(&self) -> String {
        remote_path(&self.grid.login, &self.remote_log_dir)
    }
}

/// Only characters without meaning to a POSIX shell.
fn is_shell_safe(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./+@:,=~%".contains(c))
}

fn remote_path(login: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.trim_end_matches('/').to_string()
    } else if path == "." {
        format!("/home/{login}")
    } else {
        format!("/home/{login}/{}", path.trim_end_matches('/'))
    }
}

/// Errors of loading or validating an [`ExperimentConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read the configuration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cannot parse the configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("The field `{0}` must not be empty.")]
    Empty(&'static str),
    #[error("At least one machine must be booked.")]
    NoMachines,
    #[error("At least one builder is required.")]
    NoBuilder,
    #[error("Builders and validators exceed the number of nodes: {0:?}")]
    TooManyRoles(RoleCounts),
    #[error("The walltime must not be zero.")]
    NoWalltime,
    #[error("The walltime must not exceed {0} seconds.")]
    WalltimeTooLong(u64),
    #[error("The field `{0}` contains whitespace or shell metacharacters: {1:?}")]
    UnsafeValue(&'static str, String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExperimentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.roles.regulars(), 9);
        assert_eq!(config.walltime_secs(), 380);
        assert_eq!(config.walltime(), "00:06:20");
        assert_eq!(config.dispatch_delay(), Duration::from_secs(1));
        assert_eq!(
            config.launch_script_path(),
            "/home/mapigaglio/libp2p-das-datahop/run.sh"
        );
        assert_eq!(config.remote_log_path(), "/home/mapigaglio");
    }

    #[test]
    fn test_partial_json() {
        let json = r#"
        {
            "grid": { "login": "jdoe", "network": "prod" },
            "roles": { "nodes": 50, "validators": 20 },
            "num_machines": 5,
            "netem": { "delay": "50ms", "loss": null, "symmetric": false }
        }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.grid.login, "jdoe");
        assert_eq!(config.grid.site, "nancy");
        assert_eq!(config.grid.network, NetworkKind::Prod);
        assert_eq!(config.roles.builders, 1);
        assert_eq!(config.roles.regulars(), 29);
        assert_eq!(config.num_machines, 5);
        assert_eq!(config.netem.delay.as_deref(), Some("50ms"));
        assert_eq!(config.netem.rate.as_deref(), Some("1gbit"));
        assert_eq!(config.netem.loss, None);
        assert!(!config.netem.symmetric);
        assert_eq!(config.parcel_size, 512);
    }

    #[test]
    fn test_validate() {
        let mut config = ExperimentConfig::default();
        config.num_machines = 0;
        assert!(matches!(config.validate(), Err(ConfigError::NoMachines)));

        let mut config = ExperimentConfig::default();
        config.roles.validators = 20;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyRoles(_))
        ));

        let mut config = ExperimentConfig::default();
        config.roles.builders = 0;
        assert!(matches!(config.validate(), Err(ConfigError::NoBuilder)));

        let mut config = ExperimentConfig::default();
        config.grid.site = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Empty("grid.site"))
        ));

        let mut config = ExperimentConfig::default();
        config.duration_secs = 0;
        config.walltime_buffer_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::NoWalltime)));
    }

    #[test]
    fn test_validate_overflow() {
        let json = r#"{ "duration_secs": 18446744073709551615, "walltime_buffer_secs": 300 }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WalltimeTooLong(_))
        ));
        assert_eq!(config.walltime_secs(), u64::MAX);

        let mut config = ExperimentConfig::default();
        config.duration_secs = 1_000_000_000_000_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WalltimeTooLong(_))
        ));

        let mut config = ExperimentConfig::default();
        config.duration_secs = MAX_WALLTIME_SECS - config.walltime_buffer_secs;
        config.validate().unwrap();

        let mut config = ExperimentConfig::default();
        config.roles.validators = usize::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyRoles(_))
        ));
        assert_eq!(config.roles.regulars(), 0);
    }

    #[test]
    fn test_validate_shell_safe() {
        let mut config = ExperimentConfig::default();
        config.grid.job_name = "my job".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsafeValue("grid.job_name", _))
        ));

        let mut config = ExperimentConfig::default();
        config.launch_script = "run.sh; rm -rf ~".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsafeValue("launch_script", _))
        ));

        let mut config = ExperimentConfig::default();
        config.remote_log_dir = "$(whoami)".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsafeValue("remote_log_dir", _))
        ));

        let mut config = ExperimentConfig::default();
        config.grid.login = "j'doe".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsafeValue("grid.login", _))
        ));

        let mut config = ExperimentConfig::default();
        config.launch_script = "/opt/das-2.0/run.sh".to_string();
        config.remote_log_dir = "logs/run-1".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_remote_path() {
        assert_eq!(remote_path("u", "/opt/run.sh"), "/opt/run.sh");
        assert_eq!(remote_path("u", "logs/"), "/home/u/logs");
        assert_eq!(remote_path("u", "."), "/home/u");
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("g5k_launch_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "parcel_size": 256 }"#).unwrap();
        let config = ExperimentConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.parcel_size, 256);
        assert!(matches!(
            ExperimentConfig::from_file(&path),
            Err(ConfigError::Io { .. })
        ));
    }
}
