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
//! Distribution of the experiment roles over the booked cluster machines.
//!
//! Machine 0 always hosts exactly one builder. Validators are handed out first, then regular
//! nodes, by walking the remaining machines round-robin starting at index 1.

use std::{fmt, ops::Index};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of experiment nodes of each role that a single machine hosts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub builders: usize,
    pub validators: usize,
    pub regulars: usize,
}

impl PartitionEntry {
    pub fn new(builders: usize, validators: usize, regulars: usize) -> Self {
        Self {
            builders,
            validators,
            regulars,
        }
    }

    /// Total number of experiment nodes on this machine.
    pub fn num_nodes(&self) -> usize {
        self.builders + self.validators + self.regulars
    }
}

impl fmt::Display for PartitionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}b, {}v, {}r)",
            self.builders, self.validators, self.regulars
        )
    }
}

/// Ordered role assignment, one entry per machine in allocation order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition(Vec<PartitionEntry>);

impl Partition {
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.0.iter()
    }

    /// Column sums over all machines.
    pub fn totals(&self) -> PartitionEntry {
        self.0
            .iter()
            .fold(PartitionEntry::default(), |acc, e| PartitionEntry {
                builders: acc.builders + e.builders,
                validators: acc.validators + e.validators,
                regulars: acc.regulars + e.regulars,
            })
    }
}

impl Index<usize> for Partition {
    type Output = PartitionEntry;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "m{i}: {entry}")?;
        }
        Ok(())
    }
}

/// Error thrown when the roles cannot be distributed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    /// There is no machine to place the builder on.
    #[error("Cannot partition experiment nodes over zero machines.")]
    NoMachines,
}

/// Distribute `validators` and `regulars` over `num_machines` machines.
///
/// Machine 0 receives a single builder and nothing else, regardless of `builders`. If only one
/// machine is available, every validator and regular node is placed on it next to the builder.
pub fn node_partition(
    num_machines: usize,
    builders: usize,
    mut validators: usize,
    mut regulars: usize,
) -> Result<Partition, PartitionError> {
    if num_machines == 0 {
        return Err(PartitionError::NoMachines);
    }
    if builders != 1 {
        log::warn!(
            "{builders} builders requested, but only a single builder on machine 0 is deployed."
        );
    }

    let mut partition = vec![PartitionEntry::default(); num_machines];
    partition[0].builders += 1;

    if num_machines == 1 {
        partition[0].validators += validators;
        partition[0].regulars += regulars;
        return Ok(Partition(partition));
    }

    let mut index = 1;
    while validators > 0 || regulars > 0 {
        if index == num_machines {
            index = 1;
        }
        if validators > 0 {
            partition[index].validators += 1;
            validators -= 1;
        } else {
            partition[index].regulars += 1;
            regulars -= 1;
        }
        index += 1;
    }

    Ok(Partition(partition))
}
