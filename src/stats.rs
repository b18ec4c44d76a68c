// busprobe - Recognition statistics
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::archive::ArchivePersister;
use crate::command::UNKNOWN_COMMAND;
use crate::error::Result;
use crate::protocol::Protocol;

/// Counters for a single protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolStats {
    pub total: u64,
    pub unknown: u64,
    /// Includes an "Unknown" entry once an unrecognized frame was seen.
    pub commands: BTreeMap<String, u64>,
}

impl ProtocolStats {
    /// Sum of counts for every command other than "Unknown".
    pub fn named_total(&self) -> u64 {
        self.commands
            .iter()
            .filter(|(name, _)| name.as_str() != UNKNOWN_COMMAND)
            .map(|(_, count)| count)
            .sum()
    }

    fn bump(&mut self, command: &str) {
        self.total += 1;
        if command == UNKNOWN_COMMAND {
            self.unknown += 1;
        }
        *self.commands.entry(command.to_string()).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    protocols: BTreeMap<Protocol, ProtocolStats>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an empty block for each protocol so the archive lists
    /// every configured listener from the first write.
    pub fn with_protocols<I: IntoIterator<Item = Protocol>>(protocols: I) -> Self {
        let mut stats = Statistics::new();
        for protocol in protocols {
            stats.protocols.entry(protocol).or_default();
        }
        stats
    }

    pub fn get(&self, protocol: Protocol) -> Option<&ProtocolStats> {
        self.protocols.get(&protocol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Protocol, &ProtocolStats)> {
        self.protocols.iter().map(|(p, s)| (*p, s))
    }

    fn record(&mut self, protocol: Protocol, command: &str) -> &ProtocolStats {
        let entry = self.protocols.entry(protocol).or_default();
        entry.bump(command);
        entry
    }
}

/// Owns the statistics and the archive; the only mutation is `record`.
pub struct StatsAggregator {
    state: Mutex<Statistics>,
    archive: Option<ArchivePersister>,
}

impl StatsAggregator {
    pub fn new(initial: Statistics, archive: Option<ArchivePersister>) -> Self {
        StatsAggregator {
            state: Mutex::new(initial),
            archive,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Statistics> {
        // Counters are only ever advanced as a unit, so a poisoned guard
        // still holds consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one classified frame and rewrite the archive.
    ///
    /// The archive is written while the lock is held, so the file always
    /// matches a complete in-memory state. An archive failure is returned
    /// after the counters have already advanced.
    pub fn record(&self, protocol: Protocol, command: &str) -> Result<ProtocolStats> {
        let mut state = self.lock();
        let updated = state.record(protocol, command).clone();
        trace!(
            protocol = %protocol,
            command,
            total = updated.total,
            unknown = updated.unknown,
            "statistics updated"
        );
        if let Some(ref archive) = self.archive {
            archive.persist(&state)?;
        }
        Ok(updated)
    }

    pub fn snapshot(&self) -> Statistics {
        self.lock().clone()
    }
}
