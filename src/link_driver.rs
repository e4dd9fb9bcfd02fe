//! The worker that owns the serial connection to the chip.
//!
//! The driver is the only writer to the [`ChannelStateStore`] and the only
//! producer on the save queue. It runs on its own thread, interprets
//! incoming bytes according to the current [`LinkMode`], forwards
//! validated operator commands, and surfaces every connection-level
//! outcome as a [`LinkEvent`] so nothing above it has to handle an error
//! type.

use crate::channel_store::ChannelStateStore;
use crate::command::{CommandFormatError, DeviceCommand};
use crate::frame_codec::{decode_frame, frame_len};
use crate::save_writer::SaveRecord;

use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Polling interval while waiting for the physical connection to open.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Tick between reads in command mode; full speed is not needed.
const COMMAND_TICK: Duration = Duration::from_millis(10);

/// How long to let a response finish landing before reading it. Reading
/// mid-transmission truncates responses.
const RESPONSE_SETTLE: Duration = Duration::from_millis(100);

/// Tick between buffer checks in streaming mode when no data is waiting.
const STREAM_IDLE_TICK: Duration = Duration::from_millis(1);

/// Fewer waiting bytes than this in streaming mode is treated as noise
/// and flushed rather than decoded.
const MIN_STREAM_BYTES: usize = 6;

/// The stop/reset sequence is sent this many times on connect; the chip
/// has historically dropped the first send.
const STOP_RESET_SENDS: usize = 3;

/// Attempts the reconnect procedure makes before declaring the device
/// non-responsive. Not retried indefinitely to avoid busy-looping against
/// a truly absent device.
const RECONNECT_ATTEMPTS: usize = 2;

/// How long the reconnect probe waits for any response bytes.
const PROBE_WAIT: Duration = Duration::from_millis(200);

/// How incoming bytes on the link are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Buffered bytes are a textual/hex command response.
    Command,
    /// Bytes are fixed-length binary frames.
    Streaming,
}

/// The operations the driver needs from a serial connection. `serial2`
/// provides the real one; tests and the emulator provide scripted ones.
pub trait LinkPort: Send {
    /// Reads up to `buf.len()` bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// How many received bytes are buffered and ready to read.
    fn bytes_waiting(&mut self) -> io::Result<usize>;

    /// Throws away everything currently buffered on the input side.
    fn discard_input(&mut self) -> io::Result<()>;

    /// Reads exactly `buf.len()` bytes, retrying through timeouts. An
    /// under-read blocks until the rest of the frame arrives; it is never
    /// decoded partially.
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// A [`LinkPort`] backed by a real serial device.
pub struct SerialLinkPort {
    port: serial2::SerialPort,
}

impl SerialLinkPort {
    /// Opens the device at 115200 baud with a short read timeout so a
    /// stalled read cannot wedge the driver.
    pub fn open(path: &std::path::Path) -> io::Result<Self> {
        let mut port = serial2::SerialPort::open(path, 115200)?;
        port.set_read_timeout(Duration::from_millis(500))?;
        Ok(Self { port })
    }
}

impl LinkPort for SerialLinkPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    #[cfg(unix)]
    fn bytes_waiting(&mut self) -> io::Result<usize> {
        use std::os::fd::AsRawFd;
        let mut waiting: libc::c_int = 0;
        // SAFETY: FIONREAD writes one c_int through the pointer we hand it.
        let rc = unsafe { libc::ioctl(self.port.as_raw_fd(), libc::FIONREAD, &mut waiting) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(waiting as usize)
        }
    }

    #[cfg(not(unix))]
    fn bytes_waiting(&mut self) -> io::Result<usize> {
        Ok(0)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port.discard_input_buffer()
    }
}

/// A connection-level outcome, delivered to the operator-facing layer as
/// a discrete textual event. No error type crosses the core boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The physical connection opened and the reset sequence went out.
    Connected,
    /// One command response, rendered as hex (decoding responses as UTF-8
    /// is not reliable).
    Response(String),
    /// A command failed the local grammar check and was not transmitted.
    Rejected(CommandFormatError),
    /// An I/O error was hit; the reconnect procedure is starting.
    Disconnected,
    /// The reconnect procedure brought the device back.
    Reconnected,
    /// The reconnect probe got no response after bounded retries; the
    /// driver stays disconnected until the operator issues `reset`.
    ReconnectFailed,
    /// A command arrived while disconnected and was dropped.
    Offline(String),
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinkEvent::Connected => write!(f, "Connection Success"),
            LinkEvent::Response(hex) => write!(f, "Chip: {}", hex),
            LinkEvent::Rejected(err) => write!(f, "Rejected: {}", err),
            LinkEvent::Disconnected => write!(f, "Connection Lost, Attempting Reset"),
            LinkEvent::Reconnected => write!(f, "Connection Reset Successful"),
            LinkEvent::ReconnectFailed => {
                write!(f, "Device Not Responding, Type 'reset' To Retry")
            }
            LinkEvent::Offline(cmd) => write!(f, "Not Connected, Dropped: {}", cmd),
        }
    }
}

enum Step {
    Continue,
    Shutdown,
}

/// The link driver state machine. Generic over the port type so tests can
/// script the device side.
pub struct LinkDriver<P: LinkPort> {
    connect_fn: Box<dyn FnMut() -> io::Result<P> + Send>,
    mode: LinkMode,
    num_channels: usize,
    store: Arc<ChannelStateStore>,
    save_tx: Sender<SaveRecord>,
    command_rx: Receiver<String>,
    event_tx: Sender<LinkEvent>,
}

impl<P: LinkPort> LinkDriver<P> {
    /// Builds a driver in command mode. `connect_fn` opens (or reopens)
    /// the underlying connection; it is called again by the reconnect
    /// procedure.
    pub fn new(
        connect_fn: Box<dyn FnMut() -> io::Result<P> + Send>,
        num_channels: usize,
        store: Arc<ChannelStateStore>,
        save_tx: Sender<SaveRecord>,
        command_rx: Receiver<String>,
        event_tx: Sender<LinkEvent>,
    ) -> Self {
        Self {
            connect_fn,
            mode: LinkMode::Command,
            num_channels,
            store,
            save_tx,
            command_rx,
            event_tx,
        }
    }

    /// Current parse mode.
    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    /// Blocks until the physical connection opens, retrying at a fixed
    /// interval, then sends the stop/reset sequence so the remote side
    /// starts in a known non-streaming state.
    pub fn connect(&mut self) -> P {
        let mut port = loop {
            match (self.connect_fn)() {
                Ok(port) => break port,
                Err(err) => {
                    debug!("connect attempt failed: {}", err);
                    spin_sleep::sleep(CONNECT_RETRY_INTERVAL);
                }
            }
        };

        info!("writing stop to chip");
        for _ in 0..STOP_RESET_SENDS {
            if let Err(err) = port.write_all(DeviceCommand::Stop.wire_line().as_bytes()) {
                warn!("failed to write reset sequence: {}", err);
            }
        }

        self.mode = LinkMode::Command;
        let _ = self.event_tx.send(LinkEvent::Connected);
        port
    }

    /// One iteration of the driver loop: forward any pending commands,
    /// then read the link according to the current mode.
    pub fn poll(&mut self, port: &mut P) -> io::Result<bool> {
        if let Step::Shutdown = self.forward_commands(port)? {
            return Ok(false);
        }
        match self.mode {
            LinkMode::Command => self.read_response(port)?,
            LinkMode::Streaming => self.read_frame(port)?,
        }
        Ok(true)
    }

    /// The driver loop. Returns when the command channel closes; an I/O
    /// error triggers the reconnect procedure instead of propagating.
    pub fn run(mut self) {
        let mut port = self.connect();
        loop {
            match self.poll(&mut port) {
                Ok(true) => {}
                Ok(false) => {
                    info!("command channel closed, link driver exiting");
                    return;
                }
                Err(err) => {
                    warn!("link i/o error: {}", err);
                    let _ = self.event_tx.send(LinkEvent::Disconnected);
                    drop(port);
                    match self.reconnect() {
                        Some(fresh) => port = fresh,
                        None => {
                            let _ = self.event_tx.send(LinkEvent::ReconnectFailed);
                            match self.wait_for_reset() {
                                Some(fresh) => port = fresh,
                                None => return,
                            }
                        }
                    }
                }
            }
        }
    }

    /// Drains the command channel, validating and forwarding each
    /// command. `start`/`stop` also flip the parse mode; `reset` runs the
    /// reconnect procedure instead of going to the device.
    fn forward_commands(&mut self, port: &mut P) -> io::Result<Step> {
        loop {
            let text = match self.command_rx.try_recv() {
                Ok(text) => text,
                Err(TryRecvError::Empty) => return Ok(Step::Continue),
                Err(TryRecvError::Disconnected) => return Ok(Step::Shutdown),
            };

            if text.trim() == "reset" {
                match self.reconnect() {
                    Some(fresh) => *port = fresh,
                    None => {
                        let _ = self.event_tx.send(LinkEvent::ReconnectFailed);
                    }
                }
                continue;
            }

            match text.parse::<DeviceCommand>() {
                Err(err) => {
                    warn!("rejecting command: {}", err);
                    let _ = self.event_tx.send(LinkEvent::Rejected(err));
                }
                Ok(cmd) => {
                    info!("writing {} to chip", cmd);
                    port.write_all(cmd.wire_line().as_bytes())?;
                    match cmd {
                        DeviceCommand::Start => self.mode = LinkMode::Streaming,
                        DeviceCommand::Stop => {
                            self.mode = LinkMode::Command;
                            // Stale streaming bytes must not be parsed as
                            // command responses.
                            port.discard_input()?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Command mode: once any bytes arrive, give the rest of the response
    /// time to land, then emit everything buffered as one event.
    fn read_response(&mut self, port: &mut P) -> io::Result<()> {
        spin_sleep::sleep(COMMAND_TICK);
        if port.bytes_waiting()? == 0 {
            return Ok(());
        }
        spin_sleep::sleep(RESPONSE_SETTLE);

        let waiting = port.bytes_waiting()?;
        let mut buf = vec![0u8; waiting];
        port.read_exact(&mut buf)?;

        let hex: String = buf.iter().map(|b| format!("{:02x}", b)).collect();
        let _ = self.event_tx.send(LinkEvent::Response(hex));
        Ok(())
    }

    /// Streaming mode: read exactly one frame when enough bytes are
    /// waiting, decode it, publish one atomic slot update per channel,
    /// and queue a save record. A sub-sane byte count is flushed.
    fn read_frame(&mut self, port: &mut P) -> io::Result<()> {
        let waiting = port.bytes_waiting()?;
        if waiting == 0 {
            spin_sleep::sleep(STREAM_IDLE_TICK);
            return Ok(());
        }
        if waiting < MIN_STREAM_BYTES {
            debug!("{} stray bytes waiting, flushing input", waiting);
            port.discard_input()?;
            return Ok(());
        }

        let mut buf = vec![0u8; frame_len(self.num_channels)];
        port.read_exact(&mut buf)?;

        match decode_frame(&buf, self.num_channels) {
            Ok((packet_id, samples)) => {
                for (channel, sample) in samples.iter().enumerate() {
                    self.store.write(channel, *sample);
                }
                let _ = self.save_tx.send(SaveRecord {
                    packet_id,
                    channels: samples,
                });
            }
            Err(err) => {
                // Data loss for this frame only; flush and resync.
                warn!("{}, flushing input", err);
                port.discard_input()?;
            }
        }
        Ok(())
    }

    /// The reconnect procedure: reopen the connection, clear buffers,
    /// probe, and wait briefly for any response. Bounded retries; `None`
    /// means the device is non-responsive.
    fn reconnect(&mut self) -> Option<P> {
        for attempt in 1..=RECONNECT_ATTEMPTS {
            info!("reconnect attempt {}/{}", attempt, RECONNECT_ATTEMPTS);
            let mut port = match (self.connect_fn)() {
                Ok(port) => port,
                Err(err) => {
                    warn!("reopen failed: {}", err);
                    continue;
                }
            };

            if port.discard_input().is_err() {
                continue;
            }
            let probe = DeviceCommand::ReadReg(0);
            if port.write_all(probe.wire_line().as_bytes()).is_err() {
                continue;
            }
            spin_sleep::sleep(PROBE_WAIT);
            if matches!(port.bytes_waiting(), Ok(n) if n > 0) {
                let _ = port.discard_input();
                self.mode = LinkMode::Command;
                let _ = self.event_tx.send(LinkEvent::Reconnected);
                return Some(port);
            }
        }
        None
    }

    /// Parked in the disconnected state. Only an operator `reset` command
    /// retries the reconnect procedure; everything else is dropped.
    /// Returns `None` when the command channel closes.
    fn wait_for_reset(&mut self) -> Option<P> {
        loop {
            let text = self.command_rx.recv().ok()?;
            if text.trim() == "reset" {
                match self.reconnect() {
                    Some(port) => return Some(port),
                    None => {
                        let _ = self.event_tx.send(LinkEvent::ReconnectFailed);
                    }
                }
            } else {
                let _ = self.event_tx.send(LinkEvent::Offline(text));
            }
        }
    }
}

/// The channel endpoints the rest of the program uses to talk to a
/// spawned driver.
pub struct LinkHandle {
    /// Operator commands in; one line of text per command.
    pub commands: Sender<String>,
    /// Connection-level outcomes and command responses out.
    pub events: Receiver<LinkEvent>,
    /// Decoded frames for the save writer.
    pub records: Receiver<SaveRecord>,
}

/// Spawns a link driver on its own thread and returns the channel
/// endpoints plus the join handle.
pub fn spawn<P: LinkPort + 'static>(
    connect_fn: Box<dyn FnMut() -> io::Result<P> + Send>,
    num_channels: usize,
    store: Arc<ChannelStateStore>,
) -> (LinkHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = channel();
    let (event_tx, event_rx) = channel();
    let (save_tx, save_rx) = channel();

    let driver = LinkDriver::new(
        connect_fn,
        num_channels,
        store,
        save_tx,
        command_rx,
        event_tx,
    );
    let handle = thread::spawn(move || driver.run());

    (
        LinkHandle {
            commands: command_tx,
            events: event_rx,
            records: save_rx,
        },
        handle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_store::ChannelSample;
    use crate::frame_codec::{encode_frame, FRAME_LEN};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// A port whose device side is scripted by the test.
    #[derive(Default)]
    struct ScriptedPort {
        input: VecDeque<u8>,
        written: Vec<u8>,
        discards: usize,
        /// When set, any write is answered with one buffered byte, the
        /// way a live chip acks a probe.
        answers_writes: bool,
    }

    impl ScriptedPort {
        fn with_input(bytes: &[u8]) -> Self {
            Self {
                input: bytes.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl LinkPort for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.input.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.input.pop_front().expect("checked length");
            }
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.written.extend_from_slice(buf);
            if self.answers_writes {
                self.input.push_back(0x42);
            }
            Ok(())
        }

        fn bytes_waiting(&mut self) -> io::Result<usize> {
            Ok(self.input.len())
        }

        fn discard_input(&mut self) -> io::Result<()> {
            self.input.clear();
            self.discards += 1;
            Ok(())
        }
    }

    struct Harness {
        driver: LinkDriver<ScriptedPort>,
        commands: Sender<String>,
        events: Receiver<LinkEvent>,
        records: Receiver<SaveRecord>,
        store: Arc<ChannelStateStore>,
    }

    fn harness(num_channels: usize) -> Harness {
        let store = Arc::new(ChannelStateStore::new(num_channels));
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let (save_tx, save_rx) = mpsc::channel();
        let driver = LinkDriver::new(
            Box::new(|| Ok(ScriptedPort::default())),
            num_channels,
            Arc::clone(&store),
            save_tx,
            command_rx,
            event_tx,
        );
        Harness {
            driver,
            commands: command_tx,
            events: event_rx,
            records: save_rx,
            store,
        }
    }

    #[test]
    fn cold_connect_succeeds_on_third_attempt_and_sends_three_stops() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let store = Arc::new(ChannelStateStore::new(8));
        let (_command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let (save_tx, _save_rx) = mpsc::channel();

        let mut driver: LinkDriver<ScriptedPort> = LinkDriver::new(
            Box::new(move || {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(io::ErrorKind::NotFound.into())
                } else {
                    Ok(ScriptedPort::default())
                }
            }),
            8,
            store,
            save_tx,
            command_rx,
            event_tx,
        );

        let port = driver.connect();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(port.written, b"stop \nstop \nstop \n".to_vec());
        assert_eq!(driver.mode(), LinkMode::Command);
        assert_eq!(event_rx.try_recv(), Ok(LinkEvent::Connected));
    }

    #[test]
    fn start_flips_to_streaming_and_stop_flips_back() {
        let mut h = harness(8);
        let mut port = ScriptedPort::default();

        h.commands.send("start".into()).unwrap();
        h.driver.poll(&mut port).unwrap();
        assert_eq!(h.driver.mode(), LinkMode::Streaming);
        assert!(port.written.ends_with(b"start \n"));

        h.commands.send("stop".into()).unwrap();
        h.driver.poll(&mut port).unwrap();
        assert_eq!(h.driver.mode(), LinkMode::Command);
        assert!(port.written.ends_with(b"stop \n"));
        // Stale streaming bytes are flushed on the way back to command mode.
        assert_eq!(port.discards, 1);
    }

    #[test]
    fn malformed_command_is_rejected_and_never_transmitted() {
        let mut h = harness(8);
        let mut port = ScriptedPort::default();

        h.commands.send("read reg 5".into()).unwrap();
        h.driver.poll(&mut port).unwrap();

        assert!(port.written.is_empty());
        assert!(matches!(h.events.try_recv(), Ok(LinkEvent::Rejected(_))));
    }

    #[test]
    fn streaming_frame_updates_store_and_queues_record() {
        let mut h = harness(8);
        let samples: Vec<ChannelSample> = (0..8)
            .map(|c| ChannelSample {
                packet_id: 77,
                eeg: 1000 + c as i32,
                i: c as i16,
                q: -(c as i16),
            })
            .collect();
        let mut port = ScriptedPort::with_input(&encode_frame(77, &samples));

        h.commands.send("start".into()).unwrap();
        h.driver.poll(&mut port).unwrap();

        for (c, expected) in samples.iter().enumerate() {
            assert_eq!(h.store.read(c), *expected);
        }
        let record = h.records.try_recv().unwrap();
        assert_eq!(record.packet_id, 77);
        assert_eq!(record.channels, samples);
    }

    #[test]
    fn corrupt_short_read_flushes_and_emits_no_record() {
        assert_eq!(FRAME_LEN, 65);
        let mut h = harness(8);
        // Only 4 garbage bytes waiting, far short of a 65-byte frame.
        let mut port = ScriptedPort::with_input(&[0xde, 0xad, 0xbe, 0xef]);

        h.commands.send("start".into()).unwrap();
        h.driver.poll(&mut port).unwrap();

        assert_eq!(port.discards, 1);
        assert!(port.input.is_empty());
        assert!(h.records.try_recv().is_err());
    }

    #[test]
    fn command_response_is_emitted_as_hex() {
        let mut h = harness(8);
        let mut port = ScriptedPort::with_input(&[0x01, 0xab, 0xff]);

        h.driver.poll(&mut port).unwrap();

        assert_eq!(
            h.events.try_recv(),
            Ok(LinkEvent::Response("01abff".into()))
        );
    }

    #[test]
    fn raw_command_is_forwarded_verbatim() {
        let mut h = harness(8);
        let mut port = ScriptedPort::default();

        h.commands.send("stream".into()).unwrap();
        h.driver.poll(&mut port).unwrap();

        assert_eq!(port.written, b"stream \n".to_vec());
        // This protocol version does not treat `stream` as a mode toggle.
        assert_eq!(h.driver.mode(), LinkMode::Command);
    }

    #[test]
    fn reconnect_gives_up_after_bounded_silent_attempts() {
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        let store = Arc::new(ChannelStateStore::new(8));
        let (_command_tx, command_rx) = mpsc::channel();
        let (event_tx, _event_rx) = mpsc::channel();
        let (save_tx, _save_rx) = mpsc::channel();

        let mut driver: LinkDriver<ScriptedPort> = LinkDriver::new(
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                // Reopens fine but never answers the probe.
                Ok(ScriptedPort::default())
            }),
            8,
            store,
            save_tx,
            command_rx,
            event_tx,
        );

        assert!(driver.reconnect().is_none());
        assert_eq!(opens.load(Ordering::SeqCst), RECONNECT_ATTEMPTS);
    }

    #[test]
    fn reconnect_succeeds_when_probe_answers() {
        let store = Arc::new(ChannelStateStore::new(8));
        let (_command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let (save_tx, _save_rx) = mpsc::channel();

        let mut driver: LinkDriver<ScriptedPort> = LinkDriver::new(
            Box::new(|| {
                Ok(ScriptedPort {
                    answers_writes: true,
                    ..Default::default()
                })
            }),
            8,
            store,
            save_tx,
            command_rx,
            event_tx,
        );

        let port = driver.reconnect().expect("device answered the probe");
        // The probe went out on the reopened port.
        assert!(port.written.starts_with(b"read reg 00 \n"));
        assert_eq!(driver.mode(), LinkMode::Command);
        assert_eq!(event_rx.try_recv(), Ok(LinkEvent::Reconnected));
    }
}
