// busprobe - Frame capture and rendering
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt::Write as _;
use std::io::{self, Read};
use std::net::SocketAddr;

use chrono::{DateTime, Local};

const READ_CHUNK: usize = 1024;

/// Bytes captured from one connection, read until the peer closed.
#[derive(Debug, Clone)]
pub struct Frame {
    bytes: Vec<u8>,
    peer: SocketAddr,
    port: u16,
    captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, peer: SocketAddr, port: u16) -> Self {
        Frame {
            bytes,
            peer,
            port,
            captured_at: Local::now(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Read until EOF. There is no length framing and no timeout.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut frame = Vec::new();
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(frame),
            Ok(n) => frame.extend_from_slice(&buffer[..n]),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn bits_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:08b}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// xxd-style dump: offset, 16 hex bytes split in two groups, ASCII column.
pub fn hex_dump(data: &[u8], title: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {} ({} bytes) ===", title, data.len());
    for (i, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}: ", i * 16);
        for (j, byte) in chunk.iter().enumerate() {
            let _ = write!(out, "{:02x} ", byte);
            if j == 7 {
                out.push(' ');
            }
        }
        for j in chunk.len()..16 {
            if j == 8 {
                out.push(' ');
            }
            out.push_str("   ");
        }
        out.push(' ');
        for &byte in chunk {
            out.push(if (0x20..=0x7e).contains(&byte) { byte as char } else { '.' });
        }
        out.push('\n');
    }
    out
}
