//! An in-memory stand-in for the chip, for development away from real
//! hardware and for exercising the driver end to end.
//!
//! The emulated device understands the same command grammar as the real
//! one: `start` begins producing format-C frames of sine-wave EEG with an
//! incrementing (wrapping) packet id, `stop` goes quiet, and `read reg`
//! answers with a couple of bytes. Everything else is acknowledged with a
//! fixed marker so unknown commands are visibly tolerated.

use crate::channel_store::ChannelSample;
use crate::command::DeviceCommand;
use crate::frame_codec::encode_frame;
use crate::link_driver::LinkPort;

use rand::prelude::*;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::io;

/// Amplitude of the synthetic EEG sine wave.
const EEG_AMPLITUDE: f64 = 10_000.0;

/// Samples per full sine period, matching the emulator's 0.01 step.
const SAMPLES_PER_PERIOD: u64 = 100;

/// A scripted [`LinkPort`] that behaves like a well-behaved chip.
pub struct DummyLinkPort {
    num_channels: usize,
    streaming: bool,
    packet_id: u8,
    tick: u64,
    input: VecDeque<u8>,
}

impl DummyLinkPort {
    /// Creates a quiet device with the given channel count.
    pub fn new(num_channels: usize) -> Self {
        Self {
            num_channels,
            streaming: false,
            packet_id: 0,
            tick: 0,
            input: VecDeque::new(),
        }
    }

    /// Synthesizes one frame of channel data and buffers it.
    fn produce_frame(&mut self) {
        let mut rng = thread_rng();
        let phase = 4.0 * PI * (self.tick % SAMPLES_PER_PERIOD) as f64
            / SAMPLES_PER_PERIOD as f64;

        self.packet_id = self.packet_id.wrapping_add(1);
        let samples: Vec<ChannelSample> = (0..self.num_channels)
            .map(|c| {
                let offset = c as f64 * PI / 8.0;
                ChannelSample {
                    packet_id: self.packet_id,
                    eeg: ((phase + offset).sin() * EEG_AMPLITUDE
                        + rng.gen_range(-50.0..50.0)) as i32,
                    i: ((phase + offset).cos() * 1000.0) as i16,
                    q: ((phase + offset).sin() * 1000.0) as i16,
                }
            })
            .collect();

        self.input.extend(encode_frame(self.packet_id, &samples));
        self.tick += 1;
    }

    fn handle_command(&mut self, line: &str) {
        match line.trim().parse::<DeviceCommand>() {
            Ok(DeviceCommand::Start) => self.streaming = true,
            Ok(DeviceCommand::Stop) => self.streaming = false,
            Ok(DeviceCommand::ReadReg(reg)) => {
                self.input.extend([reg, 0x42]);
            }
            Ok(DeviceCommand::WriteReg(..)) => {
                self.input.extend([0x4f, 0x4b]); // "OK"
            }
            // The real chip tolerates unknown commands; answer with a
            // recognizable marker.
            _ => self.input.extend([0x3f]),
        }
    }
}

impl LinkPort for DummyLinkPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.input.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.input.pop_front().expect("checked length");
        }
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(buf);
        for line in text.lines() {
            if !line.trim().is_empty() {
                self.handle_command(line);
            }
        }
        Ok(())
    }

    fn bytes_waiting(&mut self) -> io::Result<usize> {
        if self.streaming {
            self.produce_frame();
        }
        Ok(self.input.len())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.input.clear();
        Ok(())
    }
}
