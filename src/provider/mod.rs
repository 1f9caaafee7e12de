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
//! Interface to the service that books machines and runs commands on them.

use std::{
    fmt,
    net::IpAddr,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use thiserror::Error;

use crate::{config::NetworkKind, executor::CommandOutcome, netem::NetemConfig};

pub mod oar;

pub use oar::OarProvider;

/// Resources to book for an experiment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRequest {
    pub job_name: String,
    pub site: String,
    pub cluster: String,
    pub num_machines: usize,
    /// Reservation time in `HH:MM:SS`.
    pub walltime: String,
    pub network: NetworkKind,
}

/// A physical machine granted by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Machine {
    /// Position in allocation order.
    pub index: usize,
    /// Fully qualified host name.
    pub host: String,
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.host, self.index)
    }
}

/// Address of a machine on the experiment network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAddress {
    pub interface: String,
    pub ip: IpAddr,
}

impl NodeAddress {
    /// Parse a line of the form `<interface> <ip>[/<prefix length>]`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let interface = words.next()?.trim_end_matches(':').to_string();
        let ip = words.next()?.split('/').next()?.parse().ok()?;
        Some(Self { interface, ip })
    }
}

/// How to run a remote command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemoteOptions {
    /// Do not wait for the command to finish on the machine.
    pub background: bool,
    /// Report a failing command as an outcome instead of an error.
    pub on_error_continue: bool,
}

/// Errors reported by a [`Provider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Command `{command}` failed with {outcome}")]
    CommandFailed {
        command: String,
        outcome: CommandOutcome,
    },
    #[error("Cannot parse the output of `{command}`: {output:?}")]
    UnexpectedOutput { command: String, output: String },
    #[error("The job {0} was not granted (state {1}).")]
    NotGranted(u64, String),
    #[error("Expected {expected} machines but {granted} were granted.")]
    WrongMachineCount { expected: usize, granted: usize },
    #[error("No job has been allocated yet.")]
    NoJob,
    #[error("The network emulation on {0} does not match the configuration.")]
    EmulationMismatch(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Provisioning service booking machines and running commands on them.
#[async_trait]
pub trait Provider: Send {
    /// Book the requested machines and block until they are available.
    async fn allocate(&mut self, request: &ResourceRequest) -> Result<Vec<Machine>, ProviderError>;

    /// Install the network emulation on all machines and check that it is in place.
    async fn configure_emulation(
        &mut self,
        machines: &[Machine],
        netem: &NetemConfig,
    ) -> Result<(), ProviderError>;

    /// Address of the machine on the experiment network.
    async fn resolve_address(&mut self, machine: &Machine) -> Result<NodeAddress, ProviderError>;

    /// Run a shell command on a machine.
    async fn run_remote(
        &mut self,
        machine: &Machine,
        command: &str,
        options: RemoteOptions,
    ) -> Result<CommandOutcome, ProviderError>;

    /// Download result folders not yet present in `output_dir` and delete them remotely.
    /// Returns the local paths of the downloaded folders.
    async fn collect_results(&mut self, output_dir: &Path) -> Result<Vec<PathBuf>, ProviderError>;

    /// Remove the network emulation from all machines.
    async fn remove_emulation(&mut self, machines: &[Machine]) -> Result<(), ProviderError>;

    /// Give back all booked resources.
    async fn release(&mut self) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(
            NodeAddress::parse("eno1 172.16.64.12/20"),
            Some(NodeAddress {
                interface: "eno1".to_string(),
                ip: "172.16.64.12".parse().unwrap()
            })
        );
        assert_eq!(
            NodeAddress::parse("eth0 10.0.0.1").map(|a| a.ip),
            Some("10.0.0.1".parse().unwrap())
        );
        assert_eq!(NodeAddress::parse("eno1"), None);
        assert_eq!(NodeAddress::parse("eno1 not-an-ip/20"), None);
        assert_eq!(NodeAddress::parse(""), None);
    }
}
