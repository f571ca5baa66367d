//! Utility helpers shared by the binaries

pub mod logging;
