// busprobe - Field-bus frame listener
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of busprobe.
//
// busprobe is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// busprobe is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with busprobe.  If not, see <https://www.gnu.org/licenses/>.

//! Passive listener for frames forwarded by Modbus/DNP3 field-bus
//! converters.
//!
//! Each configured port gets its own accept loop. A connection carries one
//! frame, read until the converter closes the socket. The frame is classified
//! by the port's protocol tag (stripping the `0x05 .. 0x16` envelope on DNP3
//! ports), matched against known command signatures, counted, and the counts
//! are rewritten to a plain-text archive. Display adapters consume the
//! resulting events from an [`EventBus`].

pub mod acceptor;
pub mod archive;
pub mod bus;
pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod frame;
pub mod logging;
pub mod protocol;
pub mod stats;

pub use acceptor::{Classified, ConnectionAcceptor, PipelineContext};
pub use archive::ArchivePersister;
pub use bus::{Event, EventBus, Publisher, Subscriber};
pub use config::{CliArgs, Config, ListenerConfig};
pub use error::{Error, Result};
pub use frame::Frame;
pub use protocol::Protocol;
pub use stats::{ProtocolStats, Statistics, StatsAggregator};
