//! Dumping the chip's register file over the command sub-protocol.
//!
//! One `read reg NN` goes out every ~10ms so the chip's command parser is
//! never overrun; responses arrive asynchronously and are collected in
//! arrival order. After a settle period the collected responses are
//! paired positionally with the request order (best effort; the protocol
//! carries no per-response identifier) and appended to a durable log.

use crate::command::DeviceCommand;
use crate::link_driver::LinkEvent;

use log::{info, warn};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

/// Registers `00..=63` are dumped.
pub const NUM_REGISTERS: u8 = 64;

/// Rate limit between `read reg` sends.
const SEND_INTERVAL: Duration = Duration::from_millis(10);

/// How long to keep collecting responses after the last request.
const SETTLE: Duration = Duration::from_millis(500);

/// Dumps all registers, appending `(register, response)` lines to
/// `log_path`. The link must be in command mode.
pub fn dump_registers(
    commands: &Sender<String>,
    events: &Receiver<LinkEvent>,
    log_path: &Path,
) -> io::Result<()> {
    dump_registers_with(commands, events, log_path, SEND_INTERVAL, SETTLE)
}

/// [`dump_registers`] with explicit pacing, so tests do not have to sit
/// through the full rate limit.
pub fn dump_registers_with(
    commands: &Sender<String>,
    events: &Receiver<LinkEvent>,
    log_path: &Path,
    send_interval: Duration,
    settle: Duration,
) -> io::Result<()> {
    let mut responses: Vec<String> = Vec::new();

    for reg in 0..NUM_REGISTERS {
        commands
            .send(DeviceCommand::ReadReg(reg).to_string())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        collect_responses(events, &mut responses);
        spin_sleep::sleep(send_interval);
    }

    spin_sleep::sleep(settle);
    collect_responses(events, &mut responses);

    if responses.len() != NUM_REGISTERS as usize {
        warn!(
            "register dump collected {} responses for {} requests",
            responses.len(),
            NUM_REGISTERS
        );
    }

    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    for reg in 0..NUM_REGISTERS {
        let response = responses
            .get(reg as usize)
            .map(String::as_str)
            .unwrap_or("<no response>");
        writeln!(log, "reg {:02}: {}", reg, response)?;
    }
    info!("register dump appended to {}", log_path.display());
    Ok(())
}

fn collect_responses(events: &Receiver<LinkEvent>, responses: &mut Vec<String>) {
    while let Ok(event) = events.try_recv() {
        match event {
            LinkEvent::Response(hex) => responses.push(hex),
            other => info!("during register dump: {}", other),
        }
    }
}
