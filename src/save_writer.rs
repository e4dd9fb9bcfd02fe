//! The save-queue consumer: drains decoded packets and appends them to a
//! session CSV file.
//!
//! The queue is unbounded and drained best-effort; while the running flag
//! is clear, records are pulled off and discarded so a stalled operator
//! does not accumulate a session's worth of stale packets. Each start of
//! a session rotates to a fresh `<basename>-<n>.csv`.

use crate::channel_store::ChannelSample;

use log::{error, info};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the writer looks for new records when the queue runs dry.
const WRITE_TICK: Duration = Duration::from_millis(5);

/// One fully-decoded packet, queued for persistence: the packet id plus
/// every channel's fields in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRecord {
    /// The frame's 1-byte sequence number.
    pub packet_id: u8,
    /// Per-channel decoded fields, channel 0 first.
    pub channels: Vec<ChannelSample>,
}

impl SaveRecord {
    /// Renders one CSV data row: `packet_id,ch0_eeg,ch0_i,ch0_q,...`.
    pub fn csv_row(&self) -> String {
        let mut row = self.packet_id.to_string();
        for ch in &self.channels {
            let _ = write!(row, ",{},{},{}", ch.eeg, ch.i, ch.q);
        }
        row
    }
}

/// The CSV header row matching [`SaveRecord::csv_row`] for a given
/// channel count.
pub fn csv_header(num_channels: usize) -> String {
    let mut header = String::from("packet_id");
    for ch in 0..num_channels {
        let _ = write!(header, ",ch{0}_eeg,ch{0}_i,ch{0}_q", ch);
    }
    header
}

/// Picks `<basename>-<n>.csv` in `dir` for the smallest non-negative `n`
/// that does not already exist.
pub fn unique_csv_path(dir: &Path, basename: &str) -> PathBuf {
    let mut idx = 0;
    loop {
        let candidate = dir.join(format!("{}-{}.csv", basename, idx));
        if !candidate.exists() {
            return candidate;
        }
        idx += 1;
    }
}

/// The writer worker. Consumes the save queue on its own thread; gated by
/// the shared running flag.
pub struct SaveWriter {
    records: Receiver<SaveRecord>,
    running: Arc<AtomicBool>,
    dir: PathBuf,
    basename: String,
    num_channels: usize,
}

impl SaveWriter {
    /// Builds a writer that will place session files under `dir`.
    pub fn new(
        records: Receiver<SaveRecord>,
        running: Arc<AtomicBool>,
        dir: PathBuf,
        basename: String,
        num_channels: usize,
    ) -> Self {
        Self {
            records,
            running,
            dir,
            basename,
            num_channels,
        }
    }

    /// The writer loop. Returns when the record channel closes. A file
    /// write failure is logged and the record dropped; persistence errors
    /// do not escalate.
    pub fn run(self) {
        let mut session: Option<BufWriter<File>> = None;

        loop {
            let running = self.running.load(Ordering::Relaxed);
            match self.records.try_recv() {
                Ok(record) if running => {
                    let out = match &mut session {
                        Some(out) => out,
                        None => match self.open_session() {
                            Some(out) => session.insert(out),
                            None => continue,
                        },
                    };
                    if let Err(err) = writeln!(out, "{}", record.csv_row()).and_then(|_| out.flush())
                    {
                        error!("failed to write save record: {}", err);
                    }
                }
                // Stopped: empty the queue so stale packets never land in
                // the next session's file.
                Ok(_) => session = None,
                Err(TryRecvError::Empty) => {
                    if !running {
                        session = None;
                    }
                    spin_sleep::sleep(WRITE_TICK);
                }
                Err(TryRecvError::Disconnected) => return,
            }
        }
    }

    /// Opens a fresh rotated file and writes the header row.
    fn open_session(&self) -> Option<BufWriter<File>> {
        let path = unique_csv_path(&self.dir, &self.basename);
        info!("saving session data to {}", path.display());
        let file = match File::create(&path) {
            Ok(file) => file,
            Err(err) => {
                error!("could not create {}: {}", path.display(), err);
                return None;
            }
        };
        let mut out = BufWriter::new(file);
        if let Err(err) = writeln!(out, "{}", csv_header(self.num_channels)) {
            error!("could not write header to {}: {}", path.display(), err);
            return None;
        }
        Some(out)
    }

    /// Moves the writer onto its own thread.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }
}
