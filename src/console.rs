// busprobe - Console display adapter
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::bus::{Event, Subscriber};
use crate::stats::{Statistics, StatsAggregator};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn render_stats(stats: &Statistics) -> String {
    stats
        .iter()
        .map(|(protocol, counts)| {
            format!("{}: total={} unknown={}\n", protocol, counts.total, counts.unknown)
        })
        .collect()
}

/// Prints bus events to a writer, normally stdout.
pub struct ConsoleDisplay<W: Write> {
    out: W,
    events: Subscriber,
    stats: Arc<StatsAggregator>,
}

impl<W: Write> ConsoleDisplay<W> {
    pub fn new(out: W, events: Subscriber, stats: Arc<StatsAggregator>) -> Self {
        ConsoleDisplay { out, events, stats }
    }

    /// Drain whatever is queued without blocking. Returns the number of
    /// events handled.
    pub fn poll_once(&mut self) -> io::Result<usize> {
        let mut handled = 0;
        while let Some(event) = self.events.poll() {
            match event {
                Event::Info(text) => writeln!(self.out, "{}", text.trim_end())?,
                Event::Frame { protocol, summary } => {
                    writeln!(self.out, "[{}]", protocol)?;
                    writeln!(self.out, "{}", summary)?;
                }
                Event::Stats => {
                    write!(self.out, "{}", render_stats(&self.stats.snapshot()))?;
                    writeln!(self.out)?;
                }
            }
            handled += 1;
        }
        self.out.flush()?;
        Ok(handled)
    }

    /// Poll on a fixed cadence until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            if let Err(e) = self.poll_once() {
                warn!("console output failed: {}", e);
            }
            thread::sleep(POLL_INTERVAL);
        }
        let _ = self.poll_once();
    }
}
