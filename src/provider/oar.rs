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
//! Grid'5000 provider driving the OAR batch scheduler through SSH.
//!
//! All commands are issued from the local machine. The site frontend and the booked machines are
//! reached through the access machine used as jump host. Production jobs are booked with
//! `allow_classic_ssh` and use `sudo-g5k` for privileged commands, kavlan jobs are deployment
//! jobs whose machines are reinstalled with kadeploy and reached as `root`.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use itertools::Itertools;
use serde_json::Value;

use super::{Machine, NodeAddress, Provider, ProviderError, RemoteOptions, ResourceRequest};
use crate::{
    config::{ExperimentConfig, GridSettings, NetworkKind},
    executor::{self, detach, shell_quote, CommandOutcome},
    netem::{self, NetemConfig},
    util::PathBufExt,
};

/// Lists the IPv4 addresses of all interfaces except the loopback.
const ADDRESS_COMMAND: &str =
    "ip -o -4 addr show scope global | awk '!/^[0-9]+: lo:/ {print $2, $4}'";

/// OAR job states after which the job will never run.
const FINAL_STATES: [&str; 4] = ["Error", "toError", "Terminated", "Finishing"];

pub struct OarProvider {
    settings: GridSettings,
    results_dir: String,
    poll_interval: Duration,
    job_id: Option<u64>,
    addresses: HashMap<String, NodeAddress>,
}

impl OarProvider {
    pub fn new(settings: GridSettings, results_dir: impl Into<String>) -> Self {
        Self {
            settings,
            results_dir: results_dir.into(),
            poll_interval: Duration::from_secs(5),
            job_id: None,
            addresses: HashMap::new(),
        }
    }

    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self::new(config.grid.clone(), config.results_dir.clone())
    }

    /// ID of the booked OAR job, if any.
    pub fn job_id(&self) -> Option<u64> {
        self.job_id
    }

    fn access(&self) -> String {
        format!("{}@{}", self.settings.login, self.settings.access_host)
    }

    fn frontend(&self) -> String {
        format!("{}@{}", self.settings.login, self.settings.site)
    }

    fn node_login(&self) -> &str {
        match self.settings.network {
            NetworkKind::Prod => &self.settings.login,
            NetworkKind::Kavlan => "root",
        }
    }

    fn sudo(&self) -> &'static str {
        match self.settings.network {
            NetworkKind::Prod => "sudo-g5k ",
            NetworkKind::Kavlan => "",
        }
    }

    fn remote_results_dir(&self) -> String {
        format!("{}/{}", self.settings.site, self.results_dir)
    }

    /// Run a command on the site frontend, failing on a non-zero exit code.
    async fn on_frontend(&self, command: &str) -> Result<CommandOutcome, ProviderError> {
        let outcome =
            executor::execute_ssh(Some(&self.access()), &self.frontend(), command).await;
        check(command, outcome)
    }

    /// Run a command on the access machine, failing on a non-zero exit code.
    async fn on_access(&self, command: &str) -> Result<CommandOutcome, ProviderError> {
        let outcome = executor::execute_ssh(None, &self.access(), command).await;
        check(command, outcome)
    }

    async fn on_node(&self, machine: &Machine, command: &str) -> CommandOutcome {
        let target = format!("{}@{}", self.node_login(), machine.host);
        executor::execute_ssh(Some(&self.access()), &target, command).await
    }

    async fn wait_until_running(&self, job_id: u64) -> Result<Vec<String>, ProviderError> {
        let command = format!("oarstat -f -J -j {job_id}");
        loop {
            let outcome = self.on_frontend(&command).await?;
            let (state, hosts) = parse_job_status(&outcome.stdout, job_id).ok_or_else(|| {
                ProviderError::UnexpectedOutput {
                    command: command.clone(),
                    output: outcome.stdout.clone(),
                }
            })?;
            if state == "Running" {
                return Ok(hosts);
            }
            if FINAL_STATES.contains(&state.as_str()) {
                return Err(ProviderError::NotGranted(job_id, state));
            }
            log::debug!("Job {job_id} is {state}, waiting...");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn deploy_kavlan(&self, job_id: u64, hosts: &[String]) -> Result<u32, ProviderError> {
        let command = format!("kavlan -V -j {job_id}");
        let outcome = self.on_frontend(&command).await?;
        let vlan: u32 = outcome
            .first_line()
            .and_then(|l| l.parse().ok())
            .ok_or_else(|| ProviderError::UnexpectedOutput {
                command,
                output: outcome.stdout.clone(),
            })?;

        log::info!(
            "Deploying {} on {} machines in VLAN {vlan}...",
            self.settings.environment,
            hosts.len()
        );
        let command = format!(
            "kadeploy3 -e {} -k --vlan {vlan} {}",
            shell_quote(&self.settings.environment),
            hosts.iter().map(|h| format!("-m {h}")).join(" ")
        );
        self.on_frontend(&command).await?;
        Ok(vlan)
    }
}

fn check(command: &str, outcome: CommandOutcome) -> Result<CommandOutcome, ProviderError> {
    if outcome.success() {
        Ok(outcome)
    } else {
        Err(ProviderError::CommandFailed {
            command: command.to_string(),
            outcome,
        })
    }
}

/// OAR resource description of a request.
fn resource_string(request: &ResourceRequest) -> String {
    let nodes = format!(
        "{{cluster='{}'}}/nodes={},walltime={}",
        request.cluster, request.num_machines, request.walltime
    );
    match request.network {
        NetworkKind::Prod => nodes,
        NetworkKind::Kavlan => format!("{{type='kavlan-local'}}/vlan=1+{nodes}"),
    }
}

/// `oarsub` command line booking the requested resources.
fn oarsub_command(request: &ResourceRequest) -> String {
    let job_type = match request.network {
        NetworkKind::Prod => "allow_classic_ssh",
        NetworkKind::Kavlan => "deploy",
    };
    format!(
        "oarsub -t {job_type} -n {} -l {} {}",
        shell_quote(&request.job_name),
        shell_quote(&resource_string(request)),
        shell_quote("sleep infinity"),
    )
}

/// Extract the job ID from the output of `oarsub`.
fn parse_job_id(stdout: &str) -> Option<u64> {
    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("OAR_JOB_ID="))
        .and_then(|id| id.trim().parse().ok())
}

/// Extract the state and the assigned hosts from the output of `oarstat -f -J -j <job_id>`.
fn parse_job_status(stdout: &str, job_id: u64) -> Option<(String, Vec<String>)> {
    let value: Value = serde_json::from_str(stdout).ok()?;
    let job = value.get(job_id.to_string()).unwrap_or(&value);
    let state = job.get("state")?.as_str()?.to_string();
    let hosts = job
        .get("assigned_network_address")
        .and_then(Value::as_array)
        .map(|hosts| {
            hosts
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .unique()
                .collect()
        })
        .unwrap_or_default();
    Some((state, hosts))
}

/// Host name of a machine inside the given kavlan, e.g. `gros-1-kavlan-4.nancy.grid5000.fr`.
fn kavlan_host(host: &str, vlan: u32) -> String {
    match host.split_once('.') {
        Some((name, domain)) => format!("{name}-kavlan-{vlan}.{domain}"),
        None => format!("{host}-kavlan-{vlan}"),
    }
}

/// Remote folders that do not exist locally, in remote order.
fn folders_to_download(remote: &[String], local: &HashSet<String>) -> Vec<String> {
    remote
        .iter()
        .filter(|f| !local.contains(*f))
        .cloned()
        .collect()
}

fn local_folders(output_dir: &Path) -> Result<HashSet<String>, ProviderError> {
    let mut folders = HashSet::new();
    for entry in std::fs::read_dir(output_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            folders.insert(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(folders)
}

#[async_trait]
impl Provider for OarProvider {
    async fn allocate(&mut self, request: &ResourceRequest) -> Result<Vec<Machine>, ProviderError> {
        let command = oarsub_command(request);
        log::info!(
            "Booking {} machines of {} at {} for {}...",
            request.num_machines,
            request.cluster,
            request.site,
            request.walltime
        );
        let outcome = self.on_frontend(&command).await?;
        let job_id =
            parse_job_id(&outcome.stdout).ok_or_else(|| ProviderError::UnexpectedOutput {
                command,
                output: outcome.stdout.clone(),
            })?;
        self.job_id = Some(job_id);
        log::info!("Submitted job {job_id}");

        let mut hosts = self.wait_until_running(job_id).await?;
        if hosts.len() != request.num_machines {
            return Err(ProviderError::WrongMachineCount {
                expected: request.num_machines,
                granted: hosts.len(),
            });
        }
        if request.network == NetworkKind::Kavlan {
            let vlan = self.deploy_kavlan(job_id, &hosts).await?;
            hosts = hosts.iter().map(|h| kavlan_host(h, vlan)).collect();
        }
        log::info!("Job {job_id} is running on {}", hosts.iter().join(", "));

        Ok(hosts
            .into_iter()
            .enumerate()
            .map(|(index, host)| Machine { index, host })
            .collect())
    }

    async fn configure_emulation(
        &mut self,
        machines: &[Machine],
        netem: &NetemConfig,
    ) -> Result<(), ProviderError> {
        if netem.is_empty() {
            log::info!("No network constraints configured.");
            return Ok(());
        }
        for machine in machines {
            let address = self.resolve_address(machine).await?;
            let command = netem::deploy_script(&address.interface, netem, self.sudo());
            check(&command, self.on_node(machine, &command).await)?;

            let command = netem::show_script(&address.interface, netem);
            let outcome = check(&command, self.on_node(machine, &command).await)?;
            if !netem::validate_qdisc_output(&outcome.stdout, netem) {
                log::debug!("qdiscs on {machine}:\n{}", outcome.stdout);
                return Err(ProviderError::EmulationMismatch(machine.host.clone()));
            }
            log::debug!("Network emulation in place on {machine}");
        }
        log::info!(
            "Network emulation `{}` deployed on {} machines",
            netem.netem_params(),
            machines.len()
        );
        Ok(())
    }

    async fn resolve_address(&mut self, machine: &Machine) -> Result<NodeAddress, ProviderError> {
        if let Some(address) = self.addresses.get(&machine.host) {
            return Ok(address.clone());
        }
        let outcome = check(ADDRESS_COMMAND, self.on_node(machine, ADDRESS_COMMAND).await)?;
        let address = outcome
            .stdout
            .lines()
            .find_map(NodeAddress::parse)
            .ok_or_else(|| ProviderError::UnexpectedOutput {
                command: ADDRESS_COMMAND.to_string(),
                output: outcome.stdout.clone(),
            })?;
        log::debug!("{machine} has address {} on {}", address.ip, address.interface);
        self.addresses.insert(machine.host.clone(), address.clone());
        Ok(address)
    }

    async fn run_remote(
        &mut self,
        machine: &Machine,
        command: &str,
        options: RemoteOptions,
    ) -> Result<CommandOutcome, ProviderError> {
        let remote = if options.background {
            detach(command)
        } else {
            command.to_string()
        };
        let outcome = self.on_node(machine, &remote).await;
        if options.on_error_continue {
            Ok(outcome)
        } else {
            check(command, outcome)
        }
    }

    async fn collect_results(&mut self, output_dir: &Path) -> Result<Vec<PathBuf>, ProviderError> {
        let remote_dir = self.remote_results_dir();
        let outcome = self.on_access(&format!("ls -1 {remote_dir}")).await?;
        let remote: Vec<String> = outcome
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        let missing = folders_to_download(&remote, &local_folders(output_dir)?);
        log::info!(
            "{} result folders remotely, {} to download",
            remote.len(),
            missing.len()
        );

        let mut copied = Vec::new();
        for folder in missing {
            let local_path = output_dir.then(&folder);
            let source = format!("{}:{remote_dir}/{folder}", self.access());
            let outcome = executor::execute(
                "scp",
                ["-rC".to_string(), source, local_path.display().to_string()],
            )
            .await;
            if !outcome.success() {
                log::warn!("Cannot download {folder}: {outcome}");
                continue;
            }
            log::info!("Downloaded {folder}");

            // only delete what actually arrived
            let command = format!("rm -rf {}", shell_quote(&format!("{remote_dir}/{folder}")));
            if let Err(e) = self.on_access(&command).await {
                log::warn!("Cannot remove remote folder {folder}: {e}");
            }
            copied.push(local_path);
        }
        Ok(copied)
    }

    async fn remove_emulation(&mut self, machines: &[Machine]) -> Result<(), ProviderError> {
        for machine in machines {
            let address = self.resolve_address(machine).await?;
            let command = netem::remove_script(&address.interface, self.sudo());
            let outcome = self.on_node(machine, &command).await;
            if !outcome.success() {
                log::warn!("Cannot remove the network emulation on {machine}: {outcome}");
            }
        }
        Ok(())
    }

    async fn release(&mut self) -> Result<(), ProviderError> {
        let job_id = self.job_id.ok_or(ProviderError::NoJob)?;
        self.on_frontend(&format!("oardel {job_id}")).await?;
        log::info!("Released job {job_id}");
        self.job_id = None;
        self.addresses.clear();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(network: NetworkKind) -> ResourceRequest {
        ResourceRequest {
            job_name: "PANDAS_libp2p".to_string(),
            site: "nancy".to_string(),
            cluster: "gros".to_string(),
            num_machines: 2,
            walltime: "00:06:20".to_string(),
            network,
        }
    }

    #[test]
    fn test_oarsub_command() {
        assert_eq!(
            oarsub_command(&request(NetworkKind::Prod)),
            "oarsub -t allow_classic_ssh -n 'PANDAS_libp2p' \
             -l '{cluster='\\''gros'\\''}/nodes=2,walltime=00:06:20' 'sleep infinity'"
        );
        assert_eq!(
            resource_string(&request(NetworkKind::Kavlan)),
            "{type='kavlan-local'}/vlan=1+{cluster='gros'}/nodes=2,walltime=00:06:20"
        );
        assert!(oarsub_command(&request(NetworkKind::Kavlan)).starts_with("oarsub -t deploy "));
    }

    #[test]
    fn test_parse_job_id() {
        let stdout = "[ADMISSION RULE] Modify resource description with type constraints\n\
                      OAR_JOB_ID=4242421\n";
        assert_eq!(parse_job_id(stdout), Some(4242421));
        assert_eq!(parse_job_id("Generate a job key...\n"), None);
    }

    #[test]
    fn test_parse_job_status() {
        let stdout = r#"{
            "4242421": {
                "state": "Running",
                "assigned_network_address": ["gros-1.nancy.grid5000.fr", "gros-7.nancy.grid5000.fr"]
            }
        }"#;
        assert_eq!(
            parse_job_status(stdout, 4242421),
            Some((
                "Running".to_string(),
                vec![
                    "gros-1.nancy.grid5000.fr".to_string(),
                    "gros-7.nancy.grid5000.fr".to_string()
                ]
            ))
        );
        let waiting = r#"{ "state": "Waiting", "assigned_network_address": [] }"#;
        assert_eq!(
            parse_job_status(waiting, 1),
            Some(("Waiting".to_string(), vec![]))
        );
        assert_eq!(parse_job_status("not json", 1), None);
    }

    #[test]
    fn test_kavlan_host() {
        assert_eq!(
            kavlan_host("gros-1.nancy.grid5000.fr", 4),
            "gros-1-kavlan-4.nancy.grid5000.fr"
        );
        assert_eq!(kavlan_host("gros-1", 4), "gros-1-kavlan-4");
    }

    #[test]
    fn test_folders_to_download() {
        let remote = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let local = HashSet::from(["b".to_string(), "z".to_string()]);
        assert_eq!(folders_to_download(&remote, &local), vec!["a", "c"]);
        assert!(folders_to_download(&[], &local).is_empty());
    }

    #[test]
    fn test_local_folders() {
        let root = std::env::temp_dir().then(format!("g5k_launch_local_{}", std::process::id()));
        std::fs::create_dir_all(root.clone().then("exp_1")).unwrap();
        std::fs::write(root.clone().then("notes.txt"), "x").unwrap();
        let folders = local_folders(&root).unwrap();
        std::fs::remove_dir_all(&root).unwrap();
        assert_eq!(folders, HashSet::from(["exp_1".to_string()]));
    }

    #[test]
    fn test_hosts() {
        let provider = OarProvider::from_config(&ExperimentConfig::default());
        assert_eq!(provider.access(), "mapigaglio@access.grid5000.fr");
        assert_eq!(provider.frontend(), "mapigaglio@nancy");
        assert_eq!(provider.node_login(), "root");
        assert_eq!(provider.sudo(), "");
        assert_eq!(provider.remote_results_dir(), "nancy/results");
        assert_eq!(provider.job_id(), None);
    }

    #[tokio::test]
    async fn test_release_without_job() {
        let mut provider = OarProvider::from_config(&ExperimentConfig::default());
        assert!(matches!(
            provider.release().await,
            Err(ProviderError::NoJob)
        ));
    }
}
