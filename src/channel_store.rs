//! The thread-safe store holding each channel's most recent decoded sample.
//!
//! The link driver is the only writer; every post-processing pipeline
//! reads the slot for its channel at its own cadence. Each slot is guarded
//! by its own lock so a reader can never observe `eeg` from one packet and
//! `i` from another.

use std::sync::Mutex;

/// One channel's most recent decoded values, tagged with the packet id
/// they arrived with. Pipelines use the id to detect new data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSample {
    /// 1-byte sequence number of the frame this sample came from.
    pub packet_id: u8,
    /// Raw EEG value, sign-extended from the 4-byte wire field.
    pub eeg: i32,
    /// In-phase component.
    pub i: i16,
    /// Quadrature component.
    pub q: i16,
}

/// Fixed-size arena of per-channel sample slots, created once at startup
/// and zero-initialized. A single allocation holds every slot; workers
/// share it through an `Arc`.
#[derive(Debug)]
pub struct ChannelStateStore {
    slots: Vec<Mutex<ChannelSample>>,
}

impl ChannelStateStore {
    /// Creates a store with `num_channels` zeroed slots.
    pub fn new(num_channels: usize) -> Self {
        Self {
            slots: (0..num_channels)
                .map(|_| Mutex::new(ChannelSample::default()))
                .collect(),
        }
    }

    /// Number of channel slots.
    pub fn num_channels(&self) -> usize {
        self.slots.len()
    }

    /// Atomically replaces every field of one channel's slot.
    pub fn write(&self, channel: usize, sample: ChannelSample) {
        *self.slots[channel].lock().unwrap() = sample;
    }

    /// Copies out one channel's slot as a self-consistent whole.
    pub fn read(&self, channel: usize) -> ChannelSample {
        *self.slots[channel].lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_zeroed() {
        let store = ChannelStateStore::new(8);
        assert_eq!(store.num_channels(), 8);
        for ch in 0..8 {
            assert_eq!(store.read(ch), ChannelSample::default());
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let store = ChannelStateStore::new(2);
        let sample = ChannelSample {
            packet_id: 9,
            eeg: -12345,
            i: 17,
            q: -8,
        };
        store.write(1, sample);
        assert_eq!(store.read(1), sample);
        // Slots are independent.
        assert_eq!(store.read(0), ChannelSample::default());
    }

    /// A reader racing a writer must always see a sample whose fields all
    /// came from the same packet.
    #[test]
    fn reads_are_never_torn() {
        let store = Arc::new(ChannelStateStore::new(1));

        let writer_store = Arc::clone(&store);
        let writer = thread::spawn(move || {
            for n in 0..10_000u32 {
                let id = (n % 256) as u8;
                writer_store.write(
                    0,
                    ChannelSample {
                        packet_id: id,
                        eeg: id as i32,
                        i: id as i16,
                        q: id as i16,
                    },
                );
            }
        });

        for _ in 0..10_000 {
            let s = store.read(0);
            assert_eq!(s.eeg, s.packet_id as i32);
            assert_eq!(s.i, s.packet_id as i16);
            assert_eq!(s.q, s.packet_id as i16);
        }

        writer.join().unwrap();
    }
}
