// busprobe - Per-port connection acceptor
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// One thread per configured port. Connections are served strictly one at a
// time: accept, read until the peer closes, optionally ACK, close, classify,
// count, publish. Only then is the next connection accepted.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::bus::{Event, Publisher};
use crate::command::identify;
use crate::config::ListenerConfig;
use crate::error::{Error, Result};
use crate::frame::{bits_string, hex_dump, hex_string, read_frame, Frame};
use crate::protocol::{classify, Classification, Protocol};
use crate::stats::StatsAggregator;

pub const ACK: &[u8] = b"ACK";

/// Connections the kernel may hold pending while a frame is being served.
const BACKLOG: i32 = 1;

/// Shared by every acceptor.
#[derive(Clone)]
pub struct PipelineContext {
    pub stats: Arc<StatsAggregator>,
    pub events: Publisher,
    pub send_ack: bool,
    pub dump_frames: bool,
}

/// Per-connection lifecycle, terminal at `Dispatched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Accepted,
    Reading,
    Closed,
    Classified,
    Dispatched,
}

/// What the pipeline derived from one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub protocol: Protocol,
    pub command: &'static str,
    pub enveloped: bool,
    pub summary: String,
}

pub struct ConnectionAcceptor {
    listener: TcpListener,
    protocol: Protocol,
    port: u16,
    ctx: PipelineContext,
}

impl ConnectionAcceptor {
    /// Bind the listening socket. Failure here is fatal for this port.
    pub fn bind(address: &str, config: ListenerConfig, ctx: PipelineContext) -> Result<Self> {
        let bind_address = format!("{}:{}", address, config.port);
        let listener = listen(&bind_address).map_err(|source| Error::Bind {
            address: bind_address.clone(),
            source,
        })?;
        let port = listener.local_addr()?.port();
        info!("{} listener bound on {}", config.protocol, bind_address);
        Ok(ConnectionAcceptor {
            listener,
            protocol: config.protocol,
            port,
            ctx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.protocol().name().to_lowercase(), self.port))
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Accept loop. A failed connection is logged and the loop moves on.
    pub fn run(self) {
        self.ctx.events.info(format!(
            "{} listener started on port {} at {}",
            self.protocol,
            self.port,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.trace_phase(Phase::Accepted, peer);
                    match self.serve(stream, peer) {
                        Ok(frame) => {
                            self.process(&frame);
                            self.trace_phase(Phase::Dispatched, peer);
                        }
                        Err(e) => {
                            warn!(port = self.port, "connection from {} dropped: {}", peer, e);
                        }
                    }
                }
                Err(e) => {
                    error!(port = self.port, "accept error: {}", e);
                    thread::sleep(Duration::from_secs(1));
                }
            }
        }
    }

    fn trace_phase(&self, phase: Phase, peer: SocketAddr) {
        debug!(port = self.port, %peer, ?phase, "connection");
    }

    /// Read the whole frame, acknowledge, close.
    fn serve(&self, mut stream: TcpStream, peer: SocketAddr) -> io::Result<Frame> {
        info!(port = self.port, "connection from {}", peer);
        self.trace_phase(Phase::Reading, peer);
        let bytes = read_frame(&mut stream)?;
        if self.ctx.send_ack {
            // The frame is already complete; a peer that stopped listening
            // does not invalidate it.
            if let Err(e) = stream.write_all(ACK) {
                debug!(port = self.port, "ACK to {} failed: {}", peer, e);
            }
        }
        let _ = stream.shutdown(Shutdown::Both);
        drop(stream);
        self.trace_phase(Phase::Closed, peer);
        Ok(Frame::new(bytes, peer, self.port))
    }

    /// Classify, identify, count, and publish one frame.
    pub fn process(&self, frame: &Frame) -> Classified {
        let classification = classify(frame.bytes(), self.protocol);
        let command = identify(classification.payload, classification.protocol);
        self.trace_phase(Phase::Classified, frame.peer());

        match self.ctx.stats.record(classification.protocol, command) {
            Ok(counts) => info!(
                port = self.port,
                "{} {} ({} bytes) total={} unknown={}",
                classification.protocol,
                command,
                frame.len(),
                counts.total,
                counts.unknown
            ),
            Err(e) => error!(port = self.port, "{}", e),
        }

        let summary = render_summary(frame, &classification, command, self.ctx.dump_frames);
        self.ctx.events.publish(Event::Frame {
            protocol: classification.protocol,
            summary: summary.clone(),
        });
        self.ctx.events.publish(Event::Stats);

        Classified {
            protocol: classification.protocol,
            command,
            enveloped: classification.enveloped,
            summary,
        }
    }
}

fn listen(address: &str) -> io::Result<TcpListener> {
    let addr = address.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("no address for {}", address))
    })?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    Ok(socket.into())
}

/// Human-readable block for display adapters.
pub fn render_summary(
    frame: &Frame,
    classification: &Classification<'_>,
    command: &str,
    dump: bool,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Time: {} From {} (port {})",
        frame.captured_at().format("%H:%M:%S"),
        frame.peer().ip(),
        frame.port()
    );
    let _ = writeln!(out, "Bytes: {}", hex_string(frame.bytes()));
    let _ = writeln!(out, "Bits: {}", bits_string(frame.bytes()));
    if classification.protocol.is_enveloped() {
        if classification.enveloped {
            out.push_str("Frame appears to be DNP3\n");
        } else {
            out.push_str("Frame is not valid DNP3\n");
        }
    }
    let _ = writeln!(out, "Command: {}", command);
    if dump && !frame.is_empty() {
        out.push_str(&hex_dump(
            frame.bytes(),
            &format!("{} frame", classification.protocol),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchivePersister;
    use crate::bus::{EventBus, Subscriber};
    use crate::stats::Statistics;
    use std::fs;
    use std::io::Read;
    use std::time::Instant;

    fn context(bus: &EventBus, archive: Option<ArchivePersister>) -> PipelineContext {
        PipelineContext {
            stats: Arc::new(StatsAggregator::new(Statistics::new(), archive)),
            events: bus.publisher(),
            send_ack: true,
            dump_frames: false,
        }
    }

    fn acceptor(protocol: Protocol, ctx: PipelineContext) -> ConnectionAcceptor {
        ConnectionAcceptor::bind("127.0.0.1", ListenerConfig::new(0, protocol), ctx).unwrap()
    }

    fn frame(bytes: &[u8]) -> Frame {
        Frame::new(bytes.to_vec(), "127.0.0.1:40000".parse().unwrap(), 1502)
    }

    fn wait_for(sub: &Subscriber, count: usize) -> Vec<Event> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.len() < count && Instant::now() < deadline {
            match sub.poll() {
                Some(event) => events.push(event),
                None => thread::sleep(Duration::from_millis(10)),
            }
        }
        events
    }

    fn send(addr: SocketAddr, bytes: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(bytes).unwrap();
        stream.shutdown(Shutdown::Write).unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).unwrap();
        reply
    }

    #[test]
    fn test_raw_port_read_holding_registers() {
        let bus = EventBus::new();
        let ctx = context(&bus, None);
        let acc = acceptor(Protocol::Modbus, ctx.clone());
        assert_eq!(acc.protocol(), Protocol::Modbus);
        let result = acc.process(&frame(&[0x01, 0x03, 0x00, 0x0A, 0x00, 0x02, 0xE4, 0x09]));
        assert_eq!(result.protocol, Protocol::Modbus);
        assert_eq!(result.command, "Read Holding Registers");
        assert!(result.summary.contains("Bytes: 01 03 00 0a 00 02 e4 09\n"));
        assert!(!result.summary.contains("DNP3"));

        let stats = ctx.stats.snapshot();
        let modbus = stats.get(Protocol::Modbus).unwrap();
        assert_eq!(modbus.total, 1);
        assert_eq!(modbus.unknown, 0);
    }

    #[test]
    fn test_enveloped_port_strips_markers() {
        let bus = EventBus::new();
        let acc = acceptor(Protocol::Dnp3, context(&bus, None));
        let result = acc.process(&frame(&[0x05, 0xC0, 0x01, 0x01, 0x02, 0x00, 0x00, 0x16]));
        assert!(result.enveloped);
        assert_eq!(result.command, "Read Binary Inputs");
        assert!(result.summary.contains("Frame appears to be DNP3\n"));

        let result = acc.process(&frame(&[0xC0, 0x01, 0x01, 0x02, 0x00, 0x00]));
        assert!(!result.enveloped);
        assert_eq!(result.protocol, Protocol::Dnp3);
        assert!(result.summary.contains("Frame is not valid DNP3\n"));
    }

    #[test]
    fn test_unknown_payload_counts_as_unknown() {
        let bus = EventBus::new();
        let ctx = context(&bus, None);
        let acc = acceptor(Protocol::Modbus, ctx.clone());
        assert_eq!(acc.process(&frame(&[0x99, 0x99])).command, "Unknown");
        assert_eq!(acc.process(&frame(&[])).command, "Unknown");
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.get(Protocol::Modbus).unwrap().unknown, 2);
    }

    #[test]
    fn test_archive_after_two_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("command_stats.txt");
        let bus = EventBus::new();
        let acc = acceptor(Protocol::Modbus, context(&bus, Some(ArchivePersister::new(&path))));
        acc.process(&frame(&[0x01, 0x03, 0x00, 0x0A, 0x00, 0x02, 0xE4, 0x09]));
        acc.process(&frame(&[0x99, 0x99]));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Modbus commands:\n  Read Holding Registers: 1\n  Unknown: 1\n"
        );
    }

    #[test]
    fn test_archive_failure_keeps_counts_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("command_stats.txt");
        let bus = EventBus::new();
        let ctx = context(&bus, Some(ArchivePersister::new(&path)));
        let acc = acceptor(Protocol::Modbus, ctx.clone());

        let result = acc.process(&frame(&[0x01, 0x03, 0x00, 0x0A, 0x00, 0x02, 0xE4, 0x09]));
        assert_eq!(result.command, "Read Holding Registers");
        assert!(!path.exists());

        let modbus = ctx.stats.snapshot().get(Protocol::Modbus).cloned().unwrap();
        assert_eq!(modbus.total, 1);
        assert_eq!(modbus.commands["Read Holding Registers"], 1);

        let events = bus.subscriber().drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "Modbus");
        assert_eq!(events[1], Event::Stats);
    }

    #[test]
    fn test_process_publishes_frame_then_stats() {
        let bus = EventBus::new();
        let acc = acceptor(Protocol::Dnp3, context(&bus, None));
        acc.process(&frame(&[0x05, 0xC0, 0x01, 0x3C, 0x01, 0x06, 0x16]));
        let events = bus.subscriber().drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "DNP3");
        assert!(events[0].text().unwrap().contains("Command: Integrity Poll\n"));
        assert_eq!(events[1], Event::Stats);
    }

    #[test]
    fn test_dump_appends_hex_dump() {
        let bus = EventBus::new();
        let mut ctx = context(&bus, None);
        ctx.dump_frames = true;
        let acc = acceptor(Protocol::Modbus, ctx);
        let result = acc.process(&frame(&[0x01, 0x03]));
        assert!(result.summary.contains("=== Modbus frame (2 bytes) ==="));
    }

    #[test]
    fn test_serves_connections_over_tcp() {
        let bus = EventBus::new();
        let sub = bus.subscriber();
        let ctx = context(&bus, None);
        let acc = acceptor(Protocol::Modbus, ctx.clone());
        let addr = acc.local_addr().unwrap();
        acc.spawn().unwrap();

        assert_eq!(send(addr, &[0x01, 0x04, 0x00, 0x01, 0x00, 0x01, 0x31, 0xCA]), ACK);
        // Zero-byte connection still yields a frame.
        assert_eq!(send(addr, &[]), ACK);

        let events = wait_for(&sub, 5);
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].kind(), "info");
        assert!(events[0].text().unwrap().starts_with("Modbus listener started on port "));
        assert!(events[1].text().unwrap().contains("Command: Read Input Registers"));
        assert_eq!(events[2], Event::Stats);
        assert!(events[3].text().unwrap().contains("Command: Unknown"));
        assert_eq!(events[4], Event::Stats);

        let stats = ctx.stats.snapshot();
        let modbus = stats.get(Protocol::Modbus).unwrap();
        assert_eq!(modbus.total, 2);
        assert_eq!(modbus.unknown, 1);
    }

    #[test]
    fn test_ports_are_counted_independently() {
        let bus = EventBus::new();
        let sub = bus.subscriber();
        let ctx = context(&bus, None);
        let dnp3 = acceptor(Protocol::Dnp3, ctx.clone());
        let modbus = acceptor(Protocol::Modbus, ctx.clone());
        let dnp3_addr = dnp3.local_addr().unwrap();
        let modbus_addr = modbus.local_addr().unwrap();
        dnp3.spawn().unwrap();
        modbus.spawn().unwrap();

        let senders: Vec<_> = (0..3)
            .map(|_| {
                thread::spawn(move || {
                    send(dnp3_addr, &[0x05, 0xC0, 0x01, 0x1E, 0x01, 0x00, 0x00, 0x16]);
                    send(modbus_addr, &[0x01, 0x01, 0x00, 0x00, 0x00, 0x08, 0x3D, 0xCC]);
                    send(modbus_addr, &[0x42]);
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }
        assert_eq!(wait_for(&sub, 20).len(), 20);

        let stats = ctx.stats.snapshot();
        let d = stats.get(Protocol::Dnp3).unwrap();
        let m = stats.get(Protocol::Modbus).unwrap();
        assert_eq!((d.total, d.unknown), (3, 0));
        assert_eq!(d.commands["Read Analog Inputs"], 3);
        assert_eq!((m.total, m.unknown), (6, 3));
        assert_eq!(m.commands["Read Coils"], 3);
    }

    #[test]
    fn test_reset_connection_does_not_stop_loop() {
        let bus = EventBus::new();
        let sub = bus.subscriber();
        let ctx = context(&bus, None);
        let acc = acceptor(Protocol::Modbus, ctx.clone());
        let addr = acc.local_addr().unwrap();
        acc.spawn().unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(&[0x01, 0x03]).unwrap();
        // Zero linger turns the close into an RST.
        socket2::SockRef::from(&stream).set_linger(Some(Duration::ZERO)).unwrap();
        drop(stream);

        assert_eq!(send(addr, &[0x01, 0x03, 0x00, 0x0A, 0x00, 0x02, 0xE4, 0x09]), ACK);
        let mut events = wait_for(&sub, 3);
        thread::sleep(Duration::from_millis(100));
        events.extend(sub.drain());

        let frames: Vec<_> = events.iter().filter(|e| e.kind() == "Modbus").collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].text().unwrap().contains("Command: Read Holding Registers"));
        let modbus = ctx.stats.snapshot().get(Protocol::Modbus).cloned().unwrap();
        assert_eq!(modbus.total, 1);
    }

    #[test]
    fn test_pending_connections_are_limited() {
        let bus = EventBus::new();
        // Bound but never accepting, so every connect stays pending.
        let acc = acceptor(Protocol::Modbus, context(&bus, None));
        let addr = acc.local_addr().unwrap();

        let mut pending = Vec::new();
        for _ in 0..10 {
            if let Ok(stream) = TcpStream::connect_timeout(&addr, Duration::from_millis(300)) {
                pending.push(stream);
            }
        }
        assert!(!pending.is_empty());
        assert!(pending.len() < 10, "{} connections queued", pending.len());
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let bus = EventBus::new();
        let first = acceptor(Protocol::Modbus, context(&bus, None));
        let port = first.port();
        let err = ConnectionAcceptor::bind(
            "127.0.0.1",
            ListenerConfig::new(port, Protocol::Modbus),
            context(&bus, None),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Bind { .. }));
    }
}
