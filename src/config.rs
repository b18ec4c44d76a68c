// busprobe - Configuration
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Settings come from a key=value file (default busprobe.cfg) and are then
// overridden by command-line flags.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::error::{Error, Result};
use crate::protocol::Protocol;

pub const DEFAULT_CONFIG_FILE: &str = "busprobe.cfg";
pub const DEFAULT_ARCHIVE_FILE: &str = "command_stats.txt";

/// One accept loop: a port and the protocol its traffic is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConfig {
    pub port: u16,
    pub protocol: Protocol,
}

impl ListenerConfig {
    pub fn new(port: u16, protocol: Protocol) -> Self {
        ListenerConfig { port, protocol }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub listeners: Vec<ListenerConfig>,
    pub bind_address: String,
    pub send_ack: bool,
    /// `None` disables the archive.
    pub archive: Option<PathBuf>,
    pub dump_frames: bool,
    pub log_level: u8,
    pub logfile: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,
    pub quiet_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listeners: vec![
                ListenerConfig::new(20000, Protocol::Dnp3),
                ListenerConfig::new(1502, Protocol::Modbus),
            ],
            bind_address: "0.0.0.0".to_string(),
            send_ack: true,
            archive: Some(PathBuf::from(DEFAULT_ARCHIVE_FILE)),
            dump_frames: false,
            log_level: 5,
            logfile: None,
            pidfile: None,
            quiet_startup: false,
        }
    }
}

/// Command-line flags. Anything given here wins over the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "busprobe", version, about = "Passive Modbus/DNP3 frame listener")]
pub struct CliArgs {
    /// Config file (default: busprobe.cfg, optional)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Listener as PORT:PROTOCOL (dnp3, modbus, unknown); repeatable
    #[arg(short = 'l', long = "listen", value_name = "PORT:PROTOCOL")]
    pub listen: Vec<String>,

    /// Address to bind every listener on
    #[arg(short = 'I', long = "address", value_name = "ADDR")]
    pub address: Option<String>,

    /// Do not send ACK before closing connections
    #[arg(long = "no-ack")]
    pub no_ack: bool,

    /// Archive file ("none" disables it)
    #[arg(short = 'A', long = "archive", value_name = "FILE")]
    pub archive: Option<String>,

    /// Append an xxd-style dump to every frame summary
    #[arg(short = 'd', long = "dump")]
    pub dump: bool,

    /// Log level 0-9 (3=ERROR 4=WARN 5=NOTICE 6=INFO 7=DEBUG 8=TRACE)
    #[arg(short = 'L', long = "log-level", value_parser = clap::value_parser!(u8).range(0..=9))]
    pub log_level: Option<u8>,

    /// Write logs to this file instead of the console
    #[arg(long = "logfile", value_name = "FILE")]
    pub logfile: Option<PathBuf>,

    /// PID file path
    #[arg(short = 'P', long = "pidfile", value_name = "FILE")]
    pub pidfile: Option<PathBuf>,

    /// Quiet startup
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl Config {
    /// Load `path`, or the default file if present, or built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Config::from_file(path),
            None => match fs::read_to_string(DEFAULT_CONFIG_FILE) {
                Ok(contents) => Config::parse(&contents),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
                Err(source) => Err(Error::ConfigRead {
                    path: PathBuf::from(DEFAULT_CONFIG_FILE),
                    source,
                }),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Config::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut config_map = HashMap::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let mut value = value.trim();
                if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
                    value = &value[1..value.len() - 1];
                }
                config_map.insert(key.to_string(), value.to_string());
            }
        }

        let mut config = Config::default();

        if let Some(v) = config_map.get("listen") {
            config.listeners = parse_listeners(v.split(|c: char| c == ',' || c == ' '))?;
        }
        if let Some(v) = config_map.get("bind_address") {
            config.bind_address = v.clone();
        }
        if let Some(v) = config_map.get("ack") {
            config.send_ack = parse_bool("ack", v)?;
        }
        if let Some(v) = config_map.get("archive") {
            config.archive = parse_archive(v);
        }
        if let Some(v) = config_map.get("dump") {
            config.dump_frames = parse_bool("dump", v)?;
        }
        if let Some(v) = config_map.get("log_level") {
            config.log_level = parse_log_level(v)?;
        }
        if let Some(v) = config_map.get("quiet") {
            config.quiet_startup = parse_bool("quiet", v)?;
        }
        config.logfile = config_map.get("logfile").map(PathBuf::from);
        config.pidfile = config_map.get("pidfile").map(PathBuf::from);

        Ok(config)
    }

    pub fn apply_cli_overrides(&mut self, args: &CliArgs) -> Result<()> {
        if !args.listen.is_empty() {
            self.listeners =
                parse_listeners(args.listen.iter().flat_map(|s| s.split(|c: char| c == ',' || c == ' ')))?;
        }
        if let Some(ref address) = args.address {
            self.bind_address = address.clone();
        }
        if args.no_ack {
            self.send_ack = false;
        }
        if let Some(ref archive) = args.archive {
            self.archive = parse_archive(archive);
        }
        if args.dump {
            self.dump_frames = true;
        }
        if let Some(level) = args.log_level {
            self.log_level = level;
        }
        if args.logfile.is_some() {
            self.logfile = args.logfile.clone();
        }
        if args.pidfile.is_some() {
            self.pidfile = args.pidfile.clone();
        }
        if args.quiet {
            self.quiet_startup = true;
        }
        Ok(())
    }

    /// Protocols in listener order, without repeats.
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut seen = Vec::new();
        for listener in &self.listeners {
            if !seen.contains(&listener.protocol) {
                seen.push(listener.protocol);
            }
        }
        seen
    }
}

fn parse_listener(spec: &str) -> Result<ListenerConfig> {
    let (port, protocol) = spec
        .split_once(':')
        .ok_or_else(|| Error::config_value("listen", spec))?;
    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|_| Error::config_value("listen", spec))?;
    Ok(ListenerConfig::new(port, protocol.parse()?))
}

fn parse_listeners<'a, I: Iterator<Item = &'a str>>(specs: I) -> Result<Vec<ListenerConfig>> {
    let mut listeners = Vec::new();
    let mut ports = HashSet::new();
    for spec in specs.map(str::trim).filter(|s| !s.is_empty()) {
        let listener = parse_listener(spec)?;
        if !ports.insert(listener.port) {
            return Err(Error::config_value("listen", format!("duplicate port {}", listener.port)));
        }
        listeners.push(listener);
    }
    if listeners.is_empty() {
        return Err(Error::config_value("listen", "no listeners"));
    }
    Ok(listeners)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config_value(key, value)),
    }
}

fn parse_log_level(value: &str) -> Result<u8> {
    match value.parse::<u8>() {
        Ok(level) if level <= 9 => Ok(level),
        _ => Err(Error::config_value("log_level", value)),
    }
}

fn parse_archive(value: &str) -> Option<PathBuf> {
    match value.trim() {
        "" => None,
        v if v.eq_ignore_ascii_case("none") => None,
        v => Some(PathBuf::from(v)),
    }
}
