// busprobe - Event hand-off to display adapters
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crossbeam::channel::{self, Receiver, Sender};

use crate::protocol::Protocol;

pub const INFO_KIND: &str = "info";
pub const STATS_KIND: &str = "stats";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Startup and status text.
    Info(String),
    /// Rendered summary of one classified frame.
    Frame { protocol: Protocol, summary: String },
    /// Statistics changed and should be re-read.
    Stats,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Info(_) => INFO_KIND,
            Event::Frame { protocol, .. } => protocol.name(),
            Event::Stats => STATS_KIND,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Event::Info(text) => Some(text.as_str()),
            Event::Frame { summary, .. } => Some(summary.as_str()),
            Event::Stats => None,
        }
    }
}

/// Unbounded FIFO between acceptor threads and display consumers.
pub struct EventBus {
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        EventBus { tx, rx }
    }

    pub fn publisher(&self) -> Publisher {
        Publisher { tx: self.tx.clone() }
    }

    /// Subscribers share one queue: each event goes to exactly one of them.
    pub fn subscriber(&self) -> Subscriber {
        Subscriber { rx: self.rx.clone() }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Publisher {
    tx: Sender<Event>,
}

impl Publisher {
    pub fn publish(&self, event: Event) {
        // The bus keeps its own receiver, so the channel stays open.
        let _ = self.tx.send(event);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.publish(Event::Info(text.into()));
    }
}

#[derive(Debug, Clone)]
pub struct Subscriber {
    rx: Receiver<Event>,
}

impl Subscriber {
    /// Non-blocking; `None` just means nothing is queued.
    pub fn poll(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn drain(&self) -> Vec<Event> {
        self.rx.try_iter().collect()
    }
}
