// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access.
//!
//! The variable name constants are generated by `build.rs` and live in the
//! [`vars`] submodule.

use std::path::PathBuf;

/// Generated environment variable name constants.
pub mod vars {
    include!(concat!(env!("OUT_DIR"), "/env_vars.rs"));
}

/// Returns the value of `PNR_LIVE_URL` if set and non-empty.
pub fn live_url() -> Option<String> {
    std::env::var(vars::PNR_LIVE_URL).ok().filter(|v| !v.trim().is_empty())
}

/// Returns the value of `PNR_LIVE_CONFIG` if set.
pub fn config_path() -> Option<PathBuf> {
    std::env::var(vars::PNR_LIVE_CONFIG).ok().map(PathBuf::from)
}
