// busprobe - Command identification
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::protocol::Protocol;

pub const UNKNOWN_COMMAND: &str = "Unknown";

type SignatureTable = &'static [(&'static [u8], &'static str)];

/// Example requests sent by the converter firmware, full frame including CRC.
pub const MODBUS_SIGNATURES: SignatureTable = &[
    (&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B], "Read Holding Registers"),
    (&[0x01, 0x03, 0x00, 0x0A, 0x00, 0x02, 0xE4, 0x09], "Read Holding Registers"),
    (&[0x01, 0x04, 0x00, 0x01, 0x00, 0x01, 0x31, 0xCA], "Read Input Registers"),
    (&[0x01, 0x01, 0x00, 0x00, 0x00, 0x08, 0x3D, 0xCC], "Read Coils"),
    (&[0x01, 0x05, 0x00, 0x00, 0xFF, 0x00, 0x8C, 0x3A], "Write Single Coil"),
];

/// Application-layer request fragments seen inside the envelope.
pub const DNP3_SIGNATURES: SignatureTable = &[
    (&[0xC0, 0x01, 0x01, 0x02, 0x00, 0x00], "Read Binary Inputs"),
    (&[0xC0, 0x01, 0x1E, 0x01, 0x00, 0x00], "Read Analog Inputs"),
    (&[0xC0, 0x01, 0x0A, 0x02, 0x00, 0x00], "Read Binary Outputs"),
    (&[0xC0, 0x01, 0x3C, 0x01, 0x06], "Integrity Poll"),
];

/// Fallback keyed by the payload's second byte, shared by all protocols.
pub const FUNCTION_CODES: &[(u8, &str)] = &[
    (0x01, "Read Coils"),
    (0x02, "Read Discrete Inputs"),
    (0x03, "Read Holding Registers"),
    (0x04, "Read Input Registers"),
    (0x05, "Write Single Coil"),
    (0x06, "Write Single Register"),
    (0x0F, "Write Multiple Coils"),
    (0x10, "Write Multiple Registers"),
];

pub fn signatures(protocol: Protocol) -> SignatureTable {
    match protocol {
        Protocol::Dnp3 => DNP3_SIGNATURES,
        Protocol::Modbus => MODBUS_SIGNATURES,
        Protocol::Unknown => &[],
    }
}

pub fn function_code_name(code: u8) -> Option<&'static str> {
    FUNCTION_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Resolve a payload to a command name: exact signature, then function
/// code, then "Unknown".
pub fn identify(payload: &[u8], protocol: Protocol) -> &'static str {
    if let Some((_, name)) = signatures(protocol).iter().find(|(sig, _)| *sig == payload) {
        return *name;
    }
    if payload.len() >= 2 {
        if let Some(name) = function_code_name(payload[1]) {
            return name;
        }
    }
    UNKNOWN_COMMAND
}
