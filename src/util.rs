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
//! Utility module collection of functions

use std::{
    env,
    fmt::Display,
    path::{Path, PathBuf},
};

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use termion::{color, style};

/// Initialize `pretty_env_logger` (defaulting to `info`) behind a progress bar bridge. Progress
/// bars must be added to the returned `MultiProgress` to not interfere with log lines.
pub fn init_logging() -> MultiProgress {
    let mut builder = pretty_env_logger::formatted_builder();
    builder.parse_filters(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));
    let multi = MultiProgress::new();
    if let Err(e) = LogWrapper::new(multi.clone(), builder.build()).try_init() {
        eprintln!("Cannot initialize logging: {e}");
    }
    multi
}

/// Print a bold green status line to stdout.
pub fn print_highlight(label: &str, value: impl Display) {
    println!(
        "{}{}{label}{value}{}",
        style::Bold,
        color::Fg(color::Green),
        style::Reset
    );
}

/// Print a bold red warning to stderr.
pub fn print_warning(message: impl Display) {
    eprintln!(
        "{}{}{message}{}",
        style::Bold,
        color::Fg(color::Red),
        style::Reset
    );
}

pub fn invalid_directory_message(path: &Path) -> String {
    format!("{} is an invalid directory path", path.display())
}

/// Check the output directory given on the command line. An invalid path is reported and
/// dropped, such that the run continues without result collection.
pub fn resolve_output_dir(arg: Option<PathBuf>) -> Option<PathBuf> {
    let path = arg?;
    if path.is_dir() {
        Some(path)
    } else {
        let message = invalid_directory_message(&path);
        print_warning(&message);
        log::warn!("{message}, results will not be collected");
        None
    }
}

pub trait PathBufExt: Sized {
    fn then(self, p: impl AsRef<Path>) -> PathBuf;
}

impl PathBufExt for PathBuf {
    fn then(mut self, p: impl AsRef<Path>) -> PathBuf {
        self.push(p);
        self
    }
}

impl PathBufExt for &Path {
    fn then(self, p: impl AsRef<Path>) -> PathBuf {
        let mut path = self.to_path_buf();
        path.push(p);
        path
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_resolve_output_dir() {
        assert_eq!(resolve_output_dir(None), None);
        let tmp = env::temp_dir();
        assert_eq!(resolve_output_dir(Some(tmp.clone())), Some(tmp.clone()));
        let bogus = tmp.then("g5k_launch_does_not_exist").then("really");
        assert_eq!(resolve_output_dir(Some(bogus.clone())), None);
    }

    #[test]
    fn test_invalid_directory_message() {
        let path = PathBuf::from("/no/such/dir");
        let message = invalid_directory_message(&path);
        assert!(message.contains("/no/such/dir"));
        assert_eq!(message, "/no/such/dir is an invalid directory path");
    }

    #[test]
    fn test_then() {
        assert_eq!(
            Path::new("/a").then("b").then("c"),
            PathBuf::from("/a/b/c")
        );
    }
}
