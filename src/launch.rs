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
//! Naming of an experiment run and the command line starting it on a machine.

use std::net::IpAddr;

use time::OffsetDateTime;

use g5k_utils::other::{get_datetime_string, get_timestamp};

use crate::{config::ExperimentConfig, partition::PartitionEntry};

/// Unique name of an experiment run, e.g., `PANDAS_libp2p_1b_10v_9r_512p_2024-03-05-07:08:09`.
pub fn experiment_name(config: &ExperimentConfig, start: OffsetDateTime) -> String {
    format!(
        "{}_{}b_{}v_{}r_{}p_{}",
        config.grid.job_name,
        config.roles.builders,
        config.roles.validators,
        config.roles.regulars(),
        config.parcel_size,
        get_datetime_string(start)
    )
}

/// Everything the launch script on one machine needs to know.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchCommand {
    pub script: String,
    pub experiment_name: String,
    pub roles: PartitionEntry,
    pub login: String,
    pub builder_ip: IpAddr,
    pub parcel_size: usize,
    pub duration_secs: u64,
    pub own_ip: IpAddr,
    /// File on the machine that receives stdout and stderr of the script.
    pub log_file: String,
}

impl LaunchCommand {
    /// Launch command for the `index`-th machine of the run started at `start`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &ExperimentConfig,
        experiment_name: &str,
        start: OffsetDateTime,
        index: usize,
        roles: PartitionEntry,
        builder_ip: IpAddr,
        own_ip: IpAddr,
    ) -> Self {
        Self {
            script: config.launch_script_path(),
            experiment_name: experiment_name.to_string(),
            roles,
            login: config.grid.login.clone(),
            builder_ip,
            parcel_size: config.parcel_size,
            duration_secs: config.duration_secs,
            own_ip,
            log_file: format!(
                "{}/run_sh_output_{}_{index}.txt",
                config.remote_log_path(),
                get_timestamp(start)
            ),
        }
    }

    /// Shell command line, with the output appended to the log file.
    pub fn command_line(&self) -> String {
        format!(
            "{} {} {} {} {} {} {} {} {} {} >> {} 2>&1",
            self.script,
            self.experiment_name,
            self.roles.builders,
            self.roles.validators,
            self.roles.regulars,
            self.login,
            self.builder_ip,
            self.parcel_size,
            self.duration_secs,
            self.own_ip,
            self.log_file,
        )
    }
}
