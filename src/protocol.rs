// busprobe - Protocol classification
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// The converters wrap Modbus requests in a minimal DNP3-style envelope:
// a single start byte, the inner payload, and a single end byte. Only the two
// marker bytes are checked. There is no length field and no CRC.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub const ENVELOPE_START: u8 = 0x05;
pub const ENVELOPE_END: u8 = 0x16;

/// Protocol tag bound to a listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    /// Envelope-wrapped frames (reported as DNP3).
    Dnp3,
    /// Raw frames (reported as Modbus).
    Modbus,
    Unknown,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Dnp3 => "DNP3",
            Protocol::Modbus => "Modbus",
            Protocol::Unknown => "Unknown",
        }
    }

    pub fn is_enveloped(&self) -> bool {
        matches!(self, Protocol::Dnp3)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dnp3" | "dnp" | "envelope" | "wrapped" => Ok(Protocol::Dnp3),
            "modbus" | "raw" => Ok(Protocol::Modbus),
            "unknown" | "any" => Ok(Protocol::Unknown),
            _ => Err(Error::config_value("protocol", s)),
        }
    }
}

/// Result of running a frame through the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification<'a> {
    pub protocol: Protocol,
    pub payload: &'a [u8],
    /// True when the envelope markers were found and stripped.
    pub enveloped: bool,
}

pub fn has_envelope(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == ENVELOPE_START && data[data.len() - 1] == ENVELOPE_END
}

/// Derive the payload from a frame received on a port tagged `tag`.
///
/// A frame on an enveloped port that fails the marker check is still
/// reported under that port's protocol, just without stripping.
pub fn classify(data: &[u8], tag: Protocol) -> Classification<'_> {
    if tag.is_enveloped() && has_envelope(data) {
        Classification {
            protocol: tag,
            payload: &data[1..data.len() - 1],
            enveloped: true,
        }
    } else {
        Classification {
            protocol: tag,
            payload: data,
            enveloped: false,
        }
    }
}
