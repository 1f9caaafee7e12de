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
//! Library for launching peer-to-peer experiments on Grid'5000.
//!
//! An experiment books a number of machines, emulates the network between them, and starts a
//! launch script on every machine. The experiment nodes are split into one builder, validators
//! and regular nodes, which are distributed over the machines by [`partition::node_partition`].

pub mod config;
pub mod error;
pub mod executor;
pub mod launch;
pub mod netem;
pub mod orchestrator;
pub mod partition;
pub mod provider;
pub mod util;

#[cfg(test)]
mod test;

pub mod prelude {
    pub use super::{
        config::{ExperimentConfig, NetworkKind},
        error::LaunchError,
        orchestrator::{Orchestrator, RunReport},
        partition::{node_partition, Partition, PartitionEntry},
        provider::{OarProvider, Provider},
    };
}
