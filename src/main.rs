// busprobe - Field-bus frame listener
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// busprobe main source
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
//
// The ESP32 converters open a TCP connection per request, write one frame and
// close. DNP3 ports receive Modbus requests wrapped in a 0x05 .. 0x16
// envelope; Modbus ports receive the request bytes as-is. This program only
// listens: it never answers beyond an optional ACK.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use busprobe::console::ConsoleDisplay;
use busprobe::{
    logging, ArchivePersister, CliArgs, Config, ConnectionAcceptor, EventBus, PipelineContext,
    Statistics, StatsAggregator,
};

fn write_pidfile(pidfile: &Path) -> io::Result<()> {
    let mut file = File::create(pidfile)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

fn print_banner(config: &Config, config_source: &str) {
    println!("busprobe - Modbus/DNP3 Frame Listener");
    println!("=====================================");
    println!("Configuration from: {}", config_source);
    for listener in &config.listeners {
        println!("  Listen: {}:{} ({})", config.bind_address, listener.port, listener.protocol);
    }
    println!("  ACK: {}", if config.send_ack { "ON" } else { "OFF" });
    println!("  Hex dump: {}", if config.dump_frames { "ON" } else { "OFF" });
    match config.archive {
        Some(ref path) => println!("  Archive: {}", path.display()),
        None => println!("  Archive: disabled"),
    }
    println!("  Log level: {}", config.log_level);
    if let Some(ref lf) = config.logfile {
        println!("  Log file: {}", lf.display());
    }
    if let Some(ref pf) = config.pidfile {
        println!("  PID file: {}", pf.display());
    }
    println!();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut config = Config::load(args.config.as_deref())?;
    config.apply_cli_overrides(&args)?;

    logging::init(config.log_level, config.logfile.as_deref())?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\nReceived SIGINT, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    if !config.quiet_startup {
        let source = args
            .config
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("{} (or built-in defaults)", busprobe::config::DEFAULT_CONFIG_FILE));
        print_banner(&config, &source);
    }

    if let Some(ref pidfile) = config.pidfile {
        write_pidfile(pidfile)?;
        info!("PID {} written to {}", std::process::id(), pidfile.display());
    }

    let archive = config.archive.as_ref().map(ArchivePersister::new);
    if let Some(ref archive) = archive {
        info!("Statistics archive: {}", archive.path().display());
    }
    let stats = Arc::new(StatsAggregator::new(
        Statistics::with_protocols(config.protocols()),
        archive,
    ));
    let bus = EventBus::new();
    let ctx = PipelineContext {
        stats: Arc::clone(&stats),
        events: bus.publisher(),
        send_ack: config.send_ack,
        dump_frames: config.dump_frames,
    };

    // Bind everything before serving anything: a port that cannot be bound
    // stops startup.
    let mut acceptors = Vec::with_capacity(config.listeners.len());
    for listener in &config.listeners {
        match ConnectionAcceptor::bind(&config.bind_address, *listener, ctx.clone()) {
            Ok(acceptor) => acceptors.push(acceptor),
            Err(e) => {
                error!("{}", e);
                return Err(e.into());
            }
        }
    }
    for acceptor in acceptors {
        acceptor.spawn()?;
    }
    info!("busprobe running with {} listener(s)", config.listeners.len());

    let mut display = ConsoleDisplay::new(io::stdout(), bus.subscriber(), stats);
    display.run(&running);

    if let Some(ref pidfile) = config.pidfile {
        let _ = fs::remove_file(pidfile);
    }
    info!("busprobe stopped");
    Ok(())
}
