//! Utility library for the G5K-LAUNCH project

pub mod clock;
pub mod other;
