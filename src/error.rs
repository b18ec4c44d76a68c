// busprobe - Error types
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io;
use std::path::PathBuf;

/// Errors surfaced by the listener engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config value for {key}: {value}")]
    ConfigValue { key: String, value: String },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write archive '{path}': {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn config_value(key: &str, value: impl Into<String>) -> Self {
        Error::ConfigValue {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
