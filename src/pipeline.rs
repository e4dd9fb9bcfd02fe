//! Post-processing workers: one per (channel, derived signal) pair.
//!
//! Each worker polls its channel's slot in the store on a fixed tick,
//! detects new packets by id change, computes one derived scalar, and
//! appends it to its own sliding window. Workers run on dedicated OS
//! threads so decode and post-processing make progress in parallel with
//! whatever is rendering.

use crate::channel_store::{ChannelSample, ChannelStateStore};
use crate::sliding_window::SlidingWindow;

use log::info;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a pipeline sleeps between polls of its channel slot.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The closed set of scalar signals derived from a channel sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedSignal {
    /// The raw EEG field.
    Eeg,
    /// `sqrt(i^2 + q^2)`.
    IqMagnitude,
    /// `atan(q / i)`, defined as `0` when `i == 0` so a zeroed slot at
    /// startup cannot fault the worker.
    IqPhase,
}

impl DerivedSignal {
    /// Every derived signal, in the order plots are numbered.
    pub const ALL: [DerivedSignal; 3] = [
        DerivedSignal::Eeg,
        DerivedSignal::IqMagnitude,
        DerivedSignal::IqPhase,
    ];

    /// Computes this signal's value from one channel sample.
    pub fn compute(&self, sample: &ChannelSample) -> f64 {
        match self {
            DerivedSignal::Eeg => sample.eeg as f64,
            DerivedSignal::IqMagnitude => {
                ((sample.i as f64).powi(2) + (sample.q as f64).powi(2)).sqrt()
            }
            DerivedSignal::IqPhase => {
                if sample.i == 0 {
                    0.0
                } else {
                    (sample.q as f64 / sample.i as f64).atan()
                }
            }
        }
    }
}

impl fmt::Display for DerivedSignal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DerivedSignal::Eeg => write!(f, "EEG"),
            DerivedSignal::IqMagnitude => write!(f, "mag(I&Q)"),
            DerivedSignal::IqPhase => write!(f, "phase(I&Q)"),
        }
    }
}

/// One post-processing worker. Owns handles to the store it reads, the
/// window it feeds, and the shared running flag that gates it; all three
/// are injected at construction.
pub struct Pipeline {
    channel: usize,
    signal: DerivedSignal,
    store: Arc<ChannelStateStore>,
    window: Arc<Mutex<SlidingWindow>>,
    running: Arc<AtomicBool>,
}

impl Pipeline {
    /// Builds a pipeline with a freshly pre-filled window of the given
    /// capacity.
    pub fn new(
        channel: usize,
        signal: DerivedSignal,
        store: Arc<ChannelStateStore>,
        running: Arc<AtomicBool>,
        window_capacity: usize,
    ) -> Self {
        Self {
            channel,
            signal,
            store,
            window: Arc::new(Mutex::new(SlidingWindow::new(window_capacity))),
            running,
        }
    }

    /// A handle to this pipeline's window, for the renderer and for live
    /// resizes.
    pub fn window(&self) -> Arc<Mutex<SlidingWindow>> {
        Arc::clone(&self.window)
    }

    /// One poll of the channel slot: reads the current `(packet id,
    /// sample)` pair and lets the window decide whether it is new.
    /// Returns whether a sample was appended.
    pub fn poll_once(&self) -> bool {
        let sample = self.store.read(self.channel);
        let value = self.signal.compute(&sample);
        self.window.lock().unwrap().observe(sample.packet_id, value)
    }

    /// The worker loop: poll while the running flag is set, park cheaply
    /// while it is not. Never returns; the process exit tears it down.
    pub fn run(&self) {
        info!("pipeline ch {} {} started", self.channel, self.signal);
        loop {
            if self.running.load(Ordering::Relaxed) {
                self.poll_once();
            }
            // Caps the poll rate; there is no need to spin at full speed.
            spin_sleep::sleep(POLL_INTERVAL);
        }
    }

    /// Moves the pipeline onto its own thread.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }
}

/// A spawned pipeline, as seen by the rendering side: its display name
/// and a handle to its window.
pub struct PipelineHandle {
    /// Display name, e.g. `Ch 0 mag(I&Q)`.
    pub name: String,
    /// Shared window fed by the worker.
    pub window: Arc<Mutex<SlidingWindow>>,
}

/// Spawns the full (channel x signal) grid of workers and returns their
/// handles in plot-index order: all three signals for channel 0, then
/// channel 1, and so on.
pub fn spawn_all(
    store: &Arc<ChannelStateStore>,
    running: &Arc<AtomicBool>,
    window_capacity: usize,
) -> Vec<PipelineHandle> {
    let mut handles = Vec::new();
    for channel in 0..store.num_channels() {
        for signal in DerivedSignal::ALL {
            let pipeline = Pipeline::new(
                channel,
                signal,
                Arc::clone(store),
                Arc::clone(running),
                window_capacity,
            );
            handles.push(PipelineHandle {
                name: format!("Ch {} {}", channel, signal),
                window: pipeline.window(),
            });
            pipeline.spawn();
        }
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(sample: ChannelSample) -> Arc<ChannelStateStore> {
        let store = Arc::new(ChannelStateStore::new(1));
        store.write(0, sample);
        store
    }

    fn test_pipeline(signal: DerivedSignal, store: &Arc<ChannelStateStore>) -> Pipeline {
        Pipeline::new(
            0,
            signal,
            Arc::clone(store),
            Arc::new(AtomicBool::new(true)),
            8,
        )
    }

    #[test]
    fn eeg_signal_is_the_raw_field() {
        let sample = ChannelSample {
            packet_id: 1,
            eeg: -420,
            i: 3,
            q: 4,
        };
        assert_eq!(DerivedSignal::Eeg.compute(&sample), -420.0);
    }

    #[test]
    fn magnitude_is_euclidean() {
        let sample = ChannelSample {
            packet_id: 1,
            eeg: 0,
            i: 3,
            q: 4,
        };
        assert_eq!(DerivedSignal::IqMagnitude.compute(&sample), 5.0);
    }

    #[test]
    fn phase_with_zero_i_is_zero_for_any_q() {
        for q in [i16::MIN, -1, 0, 1, i16::MAX] {
            let sample = ChannelSample {
                packet_id: 1,
                eeg: 0,
                i: 0,
                q,
            };
            assert_eq!(DerivedSignal::IqPhase.compute(&sample), 0.0);
        }
    }

    #[test]
    fn phase_is_atan_of_q_over_i() {
        let sample = ChannelSample {
            packet_id: 1,
            eeg: 0,
            i: 2,
            q: 2,
        };
        assert!((DerivedSignal::IqPhase.compute(&sample) - (1.0f64).atan()).abs() < 1e-12);
    }

    #[test]
    fn wraparound_advances_counter_by_one_each_packet() {
        let store = Arc::new(ChannelStateStore::new(1));
        let pipeline = test_pipeline(DerivedSignal::Eeg, &store);

        for id in [254u8, 255, 0, 1] {
            store.write(
                0,
                ChannelSample {
                    packet_id: id,
                    eeg: id as i32,
                    i: 0,
                    q: 0,
                },
            );
            assert!(pipeline.poll_once());
        }

        let window = pipeline.window();
        let window = window.lock().unwrap();
        assert_eq!(window.sample_counter(), 3);
        assert_eq!(window.last_seen_packet_id(), Some(1));
    }

    #[test]
    fn duplicate_packet_is_suppressed() {
        let store = store_with(ChannelSample {
            packet_id: 17,
            eeg: 5,
            i: 0,
            q: 0,
        });
        let pipeline = test_pipeline(DerivedSignal::Eeg, &store);

        assert!(pipeline.poll_once());
        let len_before = pipeline.window().lock().unwrap().len();
        assert!(!pipeline.poll_once());
        assert_eq!(pipeline.window().lock().unwrap().len(), len_before);
        assert_eq!(pipeline.window().lock().unwrap().sample_counter(), 0);
    }

    #[test]
    fn spawn_all_builds_the_channel_signal_grid() {
        let store = Arc::new(ChannelStateStore::new(2));
        let running = Arc::new(AtomicBool::new(false));
        let handles = spawn_all(&store, &running, 4);

        assert_eq!(handles.len(), 6);
        assert_eq!(handles[0].name, "Ch 0 EEG");
        assert_eq!(handles[1].name, "Ch 0 mag(I&Q)");
        assert_eq!(handles[2].name, "Ch 0 phase(I&Q)");
        assert_eq!(handles[3].name, "Ch 1 EEG");
        // Parked workers leave their windows pre-filled.
        assert_eq!(handles[5].window.lock().unwrap().len(), 4);
    }
}
