// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for pnr-live.

use thiserror::Error;

/// Errors raised while setting up a live session.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] pnr_core::Error),

    #[error("live session has shut down")]
    Shutdown,
}

/// A specialized Result type for pnr-live operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an optimistic update did not stick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    /// No confirmation arrived within the update timeout.
    #[error("Timeout: Server did not respond")]
    Timeout,

    /// The server answered with `success: false`.
    #[error("{0}")]
    Rejected(String),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
