//! Audio input: capture seam, cpal adapter, per-chunk statistics.
//! Capture runs on cpal's callback thread and fills a PCM ring; the listen loop
//! awaits fixed-size chunks from it.

pub mod ring_buffer;
pub mod vad;
pub mod wake;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::config::HotwordConfig;
use crate::error::{HotwordError, Result};
use ring_buffer::PcmRing;

/// Source of fixed-size mono i16 chunks. Lazy, effectively infinite, not restartable.
#[async_trait]
pub trait AudioSource: Send {
    /// Wait for the next chunk. Device and stream problems are `HotwordError::Capture`.
    async fn next_chunk(&mut self) -> Result<Vec<i16>>;
}

/// Mean absolute amplitude of a chunk, the statistic fed to the noise tracker.
#[inline]
pub fn mean_abs_amplitude(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s).abs()).sum();
    (sum / samples.len() as f64) as f32
}

/// State shared between the cpal callback and the reader.
struct SharedCapture {
    ring: Mutex<PcmRing>,
    ready: Notify,
    failure: Mutex<Option<String>>,
}

/// Microphone capture through cpal's default input device.
pub struct CpalSource {
    shared: Arc<SharedCapture>,
    chunk_size: usize,
    stall_timeout: Duration,
    stop_flag: Arc<AtomicBool>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalSource {
    /// Open the default input device and start streaming.
    /// The ring holds `max_capture_ms` plus one chunk of audio.
    pub fn start(cfg: &HotwordConfig) -> Result<Self> {
        let ring_secs = (cfg.max_capture_ms + cfg.chunk_ms()) as f32 / 1000.0;
        let shared = Arc::new(SharedCapture {
            ring: Mutex::new(PcmRing::new(cfg.sample_rate, ring_secs)),
            ready: Notify::new(),
            failure: Mutex::new(None),
        });
        let stop_flag = Arc::new(AtomicBool::new(false));

        // cpal::Stream is !Send: it lives and dies on its own thread.
        let (started_tx, started_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
        let shared_capture = Arc::clone(&shared);
        let stop_capture = Arc::clone(&stop_flag);
        let sample_rate = cfg.sample_rate;
        let capture_thread = std::thread::Builder::new()
            .name("hotword-capture".into())
            .spawn(move || {
                let stream = match start_capture_stream(sample_rate, Arc::clone(&shared_capture)) {
                    Ok(stream) => {
                        let _ = started_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = started_tx.send(Err(e));
                        return;
                    }
                };
                while !stop_capture.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                info!("audio capture stream stopped");
            })
            .map_err(|e| HotwordError::capture(format!("failed to spawn capture thread: {e}")))?;

        started_rx
            .recv()
            .map_err(|_| HotwordError::capture("capture thread exited before starting"))??;

        Ok(Self {
            shared,
            chunk_size: cfg.chunk_size,
            // A healthy stream delivers a chunk every chunk_ms; allow generous slack.
            stall_timeout: Duration::from_millis(cfg.chunk_ms() * 8 + 500),
            stop_flag,
            capture_thread: Some(capture_thread),
        })
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
    }
}

#[async_trait]
impl AudioSource for CpalSource {
    async fn next_chunk(&mut self) -> Result<Vec<i16>> {
        loop {
            if let Some(message) = self.shared.failure.lock().take() {
                return Err(HotwordError::capture(message));
            }
            if let Some(chunk) = self.shared.ring.lock().read_chunk(self.chunk_size) {
                return Ok(chunk);
            }
            // Notify keeps one permit, so a write between the check and the await is not lost.
            if tokio::time::timeout(self.stall_timeout, self.shared.ready.notified())
                .await
                .is_err()
            {
                return Err(HotwordError::capture(format!(
                    "no audio received for {}ms",
                    self.stall_timeout.as_millis()
                )));
            }
        }
    }
}

/// Build and play a cpal input stream that writes into the shared ring.
fn start_capture_stream(sample_rate: u32, shared: Arc<SharedCapture>) -> Result<cpal::Stream> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| HotwordError::capture("no audio input device available"))?;

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let shared_err = Arc::clone(&shared);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Callback: write and wake the reader. No allocation, no blocking beyond the ring lock.
                let mut ring = shared.ring.lock();
                let before = ring.overrun();
                ring.write(data);
                if ring.overrun() > before {
                    warn!(dropped = ring.overrun() - before, "capture_ring_overrun");
                }
                drop(ring);
                shared.ready.notify_one();
            },
            move |err| {
                error!(error = %err, "audio capture error");
                *shared_err.failure.lock() = Some(err.to_string());
                shared_err.ready.notify_one();
            },
            None,
        )
        .map_err(|e| HotwordError::capture(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| HotwordError::capture(format!("failed to start audio stream: {e}")))?;
    info!(sample_rate, "audio capture stream started");

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amplitude_is_mean_absolute_value() {
        assert_eq!(mean_abs_amplitude(&[]), 0.0);
        assert_eq!(mean_abs_amplitude(&[0; 16]), 0.0);
        assert_eq!(mean_abs_amplitude(&[100, -100, 300, -300]), 200.0);
        assert_eq!(mean_abs_amplitude(&[i16::MIN]), 32768.0);
    }
}
