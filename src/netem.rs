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
//! Network emulation between the booked machines using `tc netem`.
//!
//! Constraints are always installed on the egress of the experiment interface. Symmetric
//! constraints are additionally mirrored onto the ingress traffic through an `ifb` device, such
//! that both directions of every link see the configured delay, rate and loss.

use serde::{Deserialize, Serialize};

/// Name of the intermediate functional block device used for ingress shaping.
pub const IFB_DEVICE: &str = "ifb0";

/// Network emulation parameters. Every value is passed verbatim to `tc netem`, so it must carry
/// its unit (e.g., `200ms`, `1gbit`, `0%`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetemConfig {
    pub delay: Option<String>,
    pub rate: Option<String>,
    pub loss: Option<String>,
    pub symmetric: bool,
}

impl Default for NetemConfig {
    fn default() -> Self {
        Self {
            delay: Some("200ms".to_string()),
            rate: Some("1gbit".to_string()),
            loss: Some("0%".to_string()),
            symmetric: true,
        }
    }
}

impl NetemConfig {
    /// Whether no constraint at all is configured.
    pub fn is_empty(&self) -> bool {
        self.delay.is_none() && self.rate.is_none() && self.loss.is_none()
    }

    /// Netem parameter list, e.g. `delay 200ms rate 1gbit loss 0%`.
    pub fn netem_params(&self) -> String {
        let mut args: Vec<&str> = Vec::new();
        if let Some(delay) = &self.delay {
            args.push("delay");
            args.push(delay);
        }
        if let Some(rate) = &self.rate {
            args.push("rate");
            args.push(rate);
        }
        if let Some(loss) = &self.loss {
            args.push("loss");
            args.push(loss);
        }
        args.join(" ")
    }
}

/// Shell script installing the constraints on `interface`. Each `tc` call is prefixed by `sudo`,
/// which is empty when already running as root.
pub fn deploy_script(interface: &str, netem: &NetemConfig, sudo: &str) -> String {
    let params = netem.netem_params();
    let mut cmds = vec![format!(
        "{sudo}tc qdisc replace dev {interface} root netem {params}"
    )];
    if netem.symmetric {
        cmds.extend([
            format!("{sudo}modprobe ifb numifbs=1"),
            format!("({sudo}ip link add {IFB_DEVICE} type ifb || true)"),
            format!("{sudo}ip link set dev {IFB_DEVICE} up"),
            format!("({sudo}tc qdisc del dev {interface} ingress || true)"),
            format!("{sudo}tc qdisc add dev {interface} handle ffff: ingress"),
            format!(
                "{sudo}tc filter add dev {interface} parent ffff: protocol ip u32 match u32 0 0 \
                 action mirred egress redirect dev {IFB_DEVICE}"
            ),
            format!("{sudo}tc qdisc replace dev {IFB_DEVICE} root netem {params}"),
        ]);
    }
    cmds.join(" && ")
}

/// Shell script removing all constraints from `interface`. Errors are ignored.
pub fn remove_script(interface: &str, sudo: &str) -> String {
    [
        format!("{sudo}tc qdisc del dev {interface} root"),
        format!("{sudo}tc qdisc del dev {interface} ingress"),
        format!("{sudo}tc qdisc del dev {IFB_DEVICE} root"),
    ]
    .iter()
    .map(|c| format!("({c} 2>/dev/null || true)"))
    .collect::<Vec<_>>()
    .join("; ")
}

/// Shell command listing the installed qdiscs, to be checked with [`validate_qdisc_output`].
pub fn show_script(interface: &str, netem: &NetemConfig) -> String {
    if netem.symmetric {
        format!("tc qdisc show dev {interface}; tc qdisc show dev {IFB_DEVICE}")
    } else {
        format!("tc qdisc show dev {interface}")
    }
}

/// Check the output of `tc qdisc show` against the configuration. Requires one netem qdisc per
/// shaped device (two when symmetric), each of which carries the configured delay.
pub fn validate_qdisc_output(output: &str, netem: &NetemConfig) -> bool {
    let netem_lines: Vec<&str> = output
        .lines()
        .filter(|l| l.trim_start().starts_with("qdisc netem"))
        .collect();
    let expected = if netem.symmetric { 2 } else { 1 };
    if netem_lines.len() < expected {
        return false;
    }
    match &netem.delay {
        Some(delay) => match normalize_delay(delay) {
            Some(delay) => netem_lines.iter().all(|l| {
                l.split_whitespace()
                    .any(|w| normalize_delay(w) == Some(delay))
            }),
            None => netem_lines.iter().all(|l| l.contains(delay.as_str())),
        },
        None => true,
    }
}

/// `tc` prints `200ms` as `200ms` but `1s` as `1s` and `1000ms` as `1s`. Compare in microseconds.
fn normalize_delay(s: &str) -> Option<u64> {
    let s = s.trim();
    let (num, factor) = if let Some(n) = s.strip_suffix("us") {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix("ms") {
        (n, 1_000.0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000_000.0)
    } else {
        return None;
    };
    num.parse::<f64>().ok().map(|x| (x * factor).round() as u64)
}
