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
//! Tests of the orchestrator against an in-memory provider.
//!
//! Use the following command to see the log output:
//!
//! ```shell
//! RUST_LOG=debug cargo test -- --nocapture --test-threads 1
//! ```

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use crate::{
    executor::CommandOutcome,
    netem::NetemConfig,
    provider::{Machine, NodeAddress, Provider, ProviderError, RemoteOptions, ResourceRequest},
    util::PathBufExt,
};

/// Provider recording every call, with switches to inject failures.
#[derive(Debug, Default)]
pub struct MockProvider {
    pub fail_allocation: bool,
    pub fail_emulation: bool,
    /// Hosts whose launch command exits with a non-zero code.
    pub failing_hosts: HashSet<String>,
    /// Hosts that cannot be reached at all.
    pub unreachable_hosts: HashSet<String>,
    /// Result folders available remotely.
    pub remote_results: Vec<String>,
    pub calls: Vec<String>,
    pub commands: Vec<(String, String, RemoteOptions)>,
}

impl MockProvider {
    pub fn host(index: usize) -> String {
        format!("node-{index}.test")
    }

    pub fn ip(index: usize) -> String {
        format!("10.0.0.{}", index + 1)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn allocate(&mut self, request: &ResourceRequest) -> Result<Vec<Machine>, ProviderError> {
        self.calls.push(format!(
            "allocate {} {}",
            request.num_machines, request.walltime
        ));
        if self.fail_allocation {
            return Err(ProviderError::NotGranted(1, "Error".to_string()));
        }
        Ok((0..request.num_machines)
            .map(|index| Machine {
                index,
                host: Self::host(index),
            })
            .collect())
    }

    async fn configure_emulation(
        &mut self,
        machines: &[Machine],
        netem: &NetemConfig,
    ) -> Result<(), ProviderError> {
        self.calls.push(format!(
            "configure_emulation {} {}",
            machines.len(),
            netem.netem_params()
        ));
        if self.fail_emulation {
            return Err(ProviderError::EmulationMismatch(machines[0].host.clone()));
        }
        Ok(())
    }

    async fn resolve_address(&mut self, machine: &Machine) -> Result<NodeAddress, ProviderError> {
        self.calls.push(format!("resolve_address {}", machine.host));
        Ok(NodeAddress {
            interface: "eth0".to_string(),
            ip: Self::ip(machine.index).parse().unwrap(),
        })
    }

    async fn run_remote(
        &mut self,
        machine: &Machine,
        command: &str,
        options: RemoteOptions,
    ) -> Result<CommandOutcome, ProviderError> {
        self.calls.push(format!("run_remote {}", machine.host));
        self.commands
            .push((machine.host.clone(), command.to_string(), options));
        if self.unreachable_hosts.contains(&machine.host) {
            return Err(ProviderError::CommandFailed {
                command: command.to_string(),
                outcome: CommandOutcome::new(255, "", "ssh: connect to host: Connection refused"),
            });
        }
        if self.failing_hosts.contains(&machine.host) {
            return Ok(CommandOutcome::new(1, "", "run.sh: No such file or directory"));
        }
        Ok(CommandOutcome::new(0, "", ""))
    }

    async fn collect_results(&mut self, output_dir: &Path) -> Result<Vec<PathBuf>, ProviderError> {
        self.calls.push("collect_results".to_string());
        let mut copied = Vec::new();
        for folder in &self.remote_results {
            let path = output_dir.then(folder);
            if !path.exists() {
                std::fs::create_dir_all(&path)?;
                copied.push(path);
            }
        }
        Ok(copied)
    }

    async fn remove_emulation(&mut self, machines: &[Machine]) -> Result<(), ProviderError> {
        self.calls
            .push(format!("remove_emulation {}", machines.len()));
        Ok(())
    }

    async fn release(&mut self) -> Result<(), ProviderError> {
        self.calls.push("release".to_string());
        Ok(())
    }
}
