// busprobe - Command statistics archive
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::stats::Statistics;

/// Render the per-protocol command counts.
///
/// ```text
/// DNP3 commands:
///   Read Binary Inputs: 3
///
/// Modbus commands:
///   Read Holding Registers: 1
///   Unknown: 1
/// ```
pub fn render(stats: &Statistics) -> String {
    let blocks: Vec<String> = stats
        .iter()
        .map(|(protocol, counts)| {
            let mut block = format!("{} commands:\n", protocol);
            for (name, count) in &counts.commands {
                let _ = writeln!(block, "  {}: {}", name, count);
            }
            block
        })
        .collect();
    blocks.join("\n")
}

/// Rewrites the archive file in full on every call.
#[derive(Debug, Clone)]
pub struct ArchivePersister {
    path: PathBuf,
}

impl ArchivePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ArchivePersister { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write to a sibling temp file, then rename over the archive so a
    /// reader never sees a half-written file.
    pub fn persist(&self, stats: &Statistics) -> Result<()> {
        let temp = self.temp_path();
        self.write_file(&temp, &render(stats))
            .and_then(|_| fs::rename(&temp, &self.path))
            .map_err(|source| {
                let _ = fs::remove_file(&temp);
                Error::Archive {
                    path: self.path.clone(),
                    source,
                }
            })
    }

    fn write_file(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    }
}
