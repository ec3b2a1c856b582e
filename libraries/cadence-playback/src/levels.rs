//! Output level monitoring
//!
//! The render path stores one peak per channel per rendered buffer into a
//! single `AtomicU64` (two `f32` bit patterns), so readers never lock and never
//! see a left value from one buffer paired with a right value from another.
//!
//! [`VuMeter`] applies VU-style smoothing on the consumer side and
//! [`VuMeterThread`] polls the monitor at a fixed interval on its own thread.

use crate::types::LevelSample;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender, Receiver};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Poll interval of the VU meter thread
pub const VU_POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Fraction of the gap closed per tick on a rising level
pub const VU_RISE_FACTOR: f32 = 0.2;

/// Default fall per tick on a dropping level
pub const DEFAULT_VU_DECAY: f32 = 0.02;

/// Lock-free snapshot of the latest output peaks
#[derive(Debug, Default)]
pub struct LevelMonitor {
    packed: AtomicU64,
}

#[inline]
fn pack(left: f32, right: f32) -> u64 {
    (u64::from(left.to_bits()) << 32) | u64::from(right.to_bits())
}

#[inline]
fn unpack(bits: u64) -> (f32, f32) {
    (f32::from_bits((bits >> 32) as u32), f32::from_bits(bits as u32))
}

impl LevelMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the peaks of an interleaved stereo buffer
    pub fn update(&self, buffer: &[f32]) {
        let (mut left, mut right) = (0.0_f32, 0.0_f32);
        for frame in buffer.chunks_exact(2) {
            left = left.max(frame[0].abs());
            right = right.max(frame[1].abs());
        }
        self.store(LevelSample::new(left, right));
    }

    pub fn store(&self, sample: LevelSample) {
        self.packed
            .store(pack(sample.left, sample.right), Ordering::Release);
    }

    /// Zero both channels (e.g. when output stops)
    pub fn reset(&self) {
        self.packed.store(0, Ordering::Release);
    }

    pub fn levels(&self) -> LevelSample {
        let (left, right) = unpack(self.packed.load(Ordering::Acquire));
        LevelSample { left, right }
    }
}

/// Consumer-side VU ballistics
#[derive(Debug, Clone)]
pub struct VuMeter {
    decay: f32,
    stereo: bool,
    display: LevelSample,
}

impl VuMeter {
    pub fn new(decay: f32, stereo: bool) -> Self {
        Self {
            decay: decay.max(0.0),
            stereo,
            display: LevelSample::default(),
        }
    }

    /// Current displayed level
    pub fn display(&self) -> LevelSample {
        self.display
    }

    /// Advance one tick towards `output`. Returns `true` if the display changed.
    pub fn tick(&mut self, output: LevelSample) -> bool {
        let mut output = LevelSample::new(output.left, output.right);
        if !self.stereo {
            let mono = output.mono();
            output = LevelSample::new(mono, mono);
        }

        let left = smooth(self.display.left, output.left, self.decay);
        let right = smooth(self.display.right, output.right, self.decay);

        let changed = left != self.display.left || right != self.display.right;
        if changed {
            self.display = LevelSample { left, right };
        }
        changed
    }

    pub fn reset(&mut self) {
        self.display = LevelSample::default();
    }
}

#[inline]
fn smooth(display: f32, output: f32, decay: f32) -> f32 {
    if display < output {
        display + (output - display) * VU_RISE_FACTOR
    } else {
        (display - decay).max(output)
    }
}

/// Fixed-interval VU polling thread
///
/// Reads the shared [`LevelMonitor`] every [`VU_POLL_INTERVAL`] and hands
/// changed display levels to a callback. Must be stopped before whatever the
/// callback draws into goes away.
pub struct VuMeterThread {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl VuMeterThread {
    pub fn spawn<F>(monitor: Arc<LevelMonitor>, mut meter: VuMeter, mut on_update: F) -> std::io::Result<Self>
    where
        F: FnMut(LevelSample) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("cadence-vu".into())
            .spawn(move || {
                loop {
                    if meter.tick(monitor.levels()) {
                        on_update(meter.display());
                    }
                    match stop_rx.recv_timeout(VU_POLL_INTERVAL) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            stop_tx,
            done_rx,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait up to `timeout` for it to finish
    ///
    /// Returns `false` if the thread did not exit in time (it is detached).
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let _ = self.stop_tx.try_send(());
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) => {
                let _ = handle.join();
                debug!("VU meter thread stopped");
                true
            }
            Err(_) => {
                warn!("VU meter thread did not stop within {:?}", timeout);
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for VuMeterThread {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(1));
    }
}
