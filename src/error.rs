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
//! Errors aborting an experiment run.

use thiserror::Error;

use crate::{
    config::ConfigError,
    partition::PartitionError,
    provider::{Machine, ProviderError},
};

/// Error thrown by the [`Orchestrator`](crate::orchestrator::Orchestrator).
///
/// Failures of individual launch commands are not part of this enum. They are recorded in the
/// [`RunReport`](crate::orchestrator::RunReport) and never abort a run.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The roles cannot be distributed over the machines.
    #[error("Cannot partition the experiment nodes: {0}")]
    Partition(#[from] PartitionError),
    /// The machines were not granted.
    #[error("Resource allocation failed: {0}")]
    Allocation(ProviderError),
    /// The network emulation could not be deployed or validated.
    #[error("Network emulation failed: {0}")]
    Emulation(ProviderError),
    /// A machine has no usable address on the experiment network.
    #[error("Cannot resolve the address of {machine}: {source}")]
    AddressResolution {
        machine: Machine,
        source: ProviderError,
    },
    /// Downloading the results failed.
    #[error("Result collection failed: {0}")]
    Collection(ProviderError),
    /// Giving back the resources failed.
    #[error("Releasing the resources failed: {0}")]
    Release(ProviderError),
}
