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
//! Download the results of previous experiments without booking any machine.
use std::path::PathBuf;

use clap::Parser;

use g5k_launch::{
    config::ExperimentConfig, orchestrator::collect_results, provider::OarProvider, util,
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Local directory receiving the experiment results.
    output_dir: PathBuf,
    /// JSON file overwriting the default experiment configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ExperimentConfig::from_file(path)?,
        None => ExperimentConfig::default(),
    };
    config.validate()?;

    let Some(output_dir) = util::resolve_output_dir(Some(args.output_dir)) else {
        return Err("No valid output directory given!".into());
    };

    let mut provider = OarProvider::from_config(&config);
    for folder in collect_results(&mut provider, &output_dir).await? {
        println!("{}", folder.display());
    }

    Ok(())
}
