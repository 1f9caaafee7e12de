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
use std::path::PathBuf;

use clap::Parser;

use g5k_launch::{
    config::ExperimentConfig, orchestrator::Orchestrator, provider::OarProvider, util,
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Local directory receiving the experiment results. Results are not collected if omitted.
    output_dir: Option<PathBuf>,
    /// JSON file overwriting the default experiment configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = util::init_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ExperimentConfig::from_file(path)?,
        None => ExperimentConfig::default(),
    };
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let output_dir = util::resolve_output_dir(args.output_dir);
    if output_dir.is_some() && !config.collect_results {
        log::info!("Result collection is disabled in the configuration.");
    }

    let provider = OarProvider::from_config(&config);
    let mut orchestrator = Orchestrator::new(config, provider)?.with_progress(multi);
    let report = orchestrator.run(output_dir.as_deref()).await?;

    for dispatch in report.failed_dispatches() {
        log::warn!(
            "{} ({}) did not start: {}",
            dispatch.machine,
            dispatch.roles,
            match &dispatch.result {
                Ok(outcome) => outcome.to_string(),
                Err(e) => e.clone(),
            }
        );
    }
    if let Some(folders) = &report.collected {
        for folder in folders {
            println!("{}", folder.display());
        }
    }
    if let Some(job_id) = orchestrator.provider().job_id() {
        log::info!("Job {job_id} of {} is still running.", report.experiment_name);
    }

    Ok(())
}
