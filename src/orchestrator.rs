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
//! End-to-end sequence of an experiment: book, emulate, launch, wait, and optionally collect
//! and release.
//!
//! Launch commands are detached on the machines. The orchestrator never waits for them; it only
//! waits until the walltime is over. A failing launch on one machine is recorded and logged, but
//! the remaining machines are still launched.

use std::{
    net::IpAddr,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use time::OffsetDateTime;

use g5k_utils::{
    clock::add_duration,
    other::{format_time_of_day, now},
};

use crate::{
    config::ExperimentConfig,
    error::LaunchError,
    executor::CommandOutcome,
    launch::{experiment_name, LaunchCommand},
    partition::{node_partition, Partition, PartitionEntry},
    provider::{Machine, NodeAddress, Provider, ProviderError, RemoteOptions, ResourceRequest},
    util::{print_highlight, print_warning},
};

/// Result of launching the experiment on a single machine.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub machine: Machine,
    pub roles: PartitionEntry,
    pub command: String,
    /// Outcome of the (detaching) launch command, or the reason why it could not be issued.
    pub result: Result<CommandOutcome, String>,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(outcome) if outcome.success())
    }
}

/// Summary of a completed run.
#[derive(Debug)]
pub struct RunReport {
    pub experiment_name: String,
    pub partition: Partition,
    pub machines: Vec<(Machine, NodeAddress)>,
    pub builder_ip: IpAddr,
    pub dispatches: Vec<DispatchOutcome>,
    pub start: OffsetDateTime,
    /// `None` if the walltime does not fit into a timestamp.
    pub expected_end: Option<OffsetDateTime>,
    /// Seconds spent waiting for the walltime to finish.
    pub waited_secs: u64,
    /// Downloaded result folders, if result collection ran successfully.
    pub collected: Option<Vec<PathBuf>>,
    /// Whether the resources were released.
    pub released: bool,
}

impl RunReport {
    pub fn failed_dispatches(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.dispatches.iter().filter(|d| !d.succeeded())
    }
}

pub struct Orchestrator<P> {
    config: ExperimentConfig,
    provider: P,
    created: Instant,
    progress: Option<MultiProgress>,
}

impl<P: Provider> Orchestrator<P> {
    /// Validate the configuration and prepare a run. The walltime starts counting now.
    pub fn new(config: ExperimentConfig, provider: P) -> Result<Self, LaunchError> {
        config.validate()?;
        Ok(Self {
            config,
            provider,
            created: Instant::now(),
            progress: None,
        })
    }

    /// Draw the countdown inside the given `MultiProgress`.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn into_provider(self) -> P {
        self.provider
    }

    /// Roles per machine for this configuration.
    pub fn partition(&self) -> Result<Partition, LaunchError> {
        let roles = &self.config.roles;
        Ok(node_partition(
            self.config.num_machines,
            roles.builders,
            roles.validators,
            roles.regulars(),
        )?)
    }

    pub fn resource_request(&self) -> ResourceRequest {
        ResourceRequest {
            job_name: self.config.grid.job_name.clone(),
            site: self.config.grid.site.clone(),
            cluster: self.config.grid.cluster.clone(),
            num_machines: self.config.num_machines,
            walltime: self.config.walltime(),
            network: self.config.grid.network,
        }
    }

    /// Perform the whole experiment. Results are only collected if enabled in the configuration
    /// and an output directory is given.
    pub async fn run(&mut self, output_dir: Option<&Path>) -> Result<RunReport, LaunchError> {
        let launched_at = now();
        let name = experiment_name(&self.config, launched_at);
        log::info!("Experiment {name}");

        let partition = self.partition()?;
        log::info!("Node partition: {partition}");

        let machines = self
            .provider
            .allocate(&self.resource_request())
            .await
            .map_err(LaunchError::Allocation)?;
        if machines.len() != partition.len() {
            return Err(LaunchError::Allocation(ProviderError::WrongMachineCount {
                expected: partition.len(),
                granted: machines.len(),
            }));
        }

        self.provider
            .configure_emulation(&machines, &self.config.netem)
            .await
            .map_err(LaunchError::Emulation)?;

        let mut addresses = Vec::with_capacity(machines.len());
        for machine in &machines {
            let address = self
                .provider
                .resolve_address(machine)
                .await
                .map_err(|source| LaunchError::AddressResolution {
                    machine: machine.clone(),
                    source,
                })?;
            addresses.push(address);
        }
        // machine 0 hosts the builder
        let builder_ip = addresses[0].ip;
        log::info!("Builder address: {builder_ip}");

        let dispatches = self
            .dispatch(&name, launched_at, &partition, &machines, &addresses, builder_ip)
            .await;
        let failed = dispatches.iter().filter(|d| !d.succeeded()).count();
        if failed > 0 {
            log::warn!("{failed} of {} launch commands failed", dispatches.len());
        }

        let start = now();
        let expected_end = i64::try_from(self.config.walltime_secs())
            .ok()
            .and_then(|secs| add_duration(start, 0, 0, secs));
        print_highlight("Start: ", format_time_of_day(start));
        match expected_end {
            Some(end) => print_highlight("Expected End: ", format_time_of_day(end)),
            None => print_warning("Expected end is out of range"),
        }

        let waited_secs = self.wait().await;

        let collected = match (self.config.collect_results, output_dir) {
            (true, Some(dir)) => match collect_results(&mut self.provider, dir).await {
                Ok(folders) => Some(folders),
                Err(e) => {
                    log::error!("{e}");
                    None
                }
            },
            (true, None) => {
                log::info!("No output directory given, skipping result collection.");
                None
            }
            (false, _) => None,
        };

        let released = if self.config.release_on_exit {
            match release(&mut self.provider, &machines).await {
                Ok(()) => true,
                Err(e) => {
                    log::error!("{e}");
                    false
                }
            }
        } else {
            false
        };

        Ok(RunReport {
            experiment_name: name,
            partition,
            machines: machines.into_iter().zip(addresses).collect(),
            builder_ip,
            dispatches,
            start,
            expected_end,
            waited_secs,
            collected,
            released,
        })
    }

    /// Launch the experiment on every machine, pausing between two machines. Never fails.
    async fn dispatch(
        &mut self,
        name: &str,
        launched_at: OffsetDateTime,
        partition: &Partition,
        machines: &[Machine],
        addresses: &[NodeAddress],
        builder_ip: IpAddr,
    ) -> Vec<DispatchOutcome> {
        let options = RemoteOptions {
            background: true,
            on_error_continue: true,
        };
        let mut dispatches = Vec::with_capacity(machines.len());
        for (i, (machine, address)) in machines.iter().zip(addresses).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.dispatch_delay()).await;
            }
            let roles = partition[i];
            let command = LaunchCommand::new(
                &self.config,
                name,
                launched_at,
                i,
                roles,
                builder_ip,
                address.ip,
            )
            .command_line();
            log::info!("Launching {roles} on {machine}");
            log::debug!("{command}");

            let result = match self.provider.run_remote(machine, &command, options).await {
                Ok(outcome) => {
                    if !outcome.success() {
                        log::warn!("Launch on {machine} failed with {outcome}");
                    }
                    Ok(outcome)
                }
                Err(e) => {
                    log::warn!("Launch on {machine} failed: {e}");
                    Err(e.to_string())
                }
            };
            dispatches.push(DispatchOutcome {
                machine: machine.clone(),
                roles,
                command,
                result,
            });
        }
        dispatches
    }

    /// Sleep until the walltime is over, counted from the creation of the orchestrator. Returns
    /// the number of seconds waited.
    async fn wait(&self) -> u64 {
        let remaining = self
            .config
            .walltime_secs()
            .saturating_sub(self.created.elapsed().as_secs());
        if remaining == 0 {
            return 0;
        }

        let bar = ProgressBar::new(remaining);
        let bar = match &self.progress {
            Some(multi) => multi.add(bar),
            None => bar,
        };
        if let Ok(style) = ProgressStyle::with_template("{msg} [{wide_bar}] {pos}/{len}s, eta: {eta}")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        bar.set_message(format!(
            "Waiting for walltime to finish ({remaining} secs left)..."
        ));

        for _ in 0..remaining {
            tokio::time::sleep(Duration::from_secs(1)).await;
            bar.inc(1);
        }
        bar.finish_and_clear();
        if let Some(multi) = &self.progress {
            multi.remove(&bar);
        }
        log::info!("Walltime is over.");
        remaining
    }
}

/// Download the results of previous runs into `output_dir`.
pub async fn collect_results<P: Provider>(
    provider: &mut P,
    output_dir: &Path,
) -> Result<Vec<PathBuf>, LaunchError> {
    let folders = provider
        .collect_results(output_dir)
        .await
        .map_err(LaunchError::Collection)?;
    log::info!(
        "Collected {} result folders into {}",
        folders.len(),
        output_dir.display()
    );
    Ok(folders)
}

/// Remove the network emulation and give back all resources.
pub async fn release<P: Provider>(
    provider: &mut P,
    machines: &[Machine],
) -> Result<(), LaunchError> {
    if let Err(e) = provider.remove_emulation(machines).await {
        log::warn!("Cannot remove the network emulation: {e}");
    }
    provider.release().await.map_err(LaunchError::Release)
}
