//! Live capture sessions.
//!
//! An [`AudioInput`] pushes fragments from its own thread into an unbounded
//! queue owned by the [`CaptureSession`]. The session lends the consuming end
//! out as a stream of coalesced chunks, and releasing the session queues a
//! sentinel that ends that stream. A stream dropped before the sentinel hands
//! the queue back to the session.

#[cfg(feature = "microphone")]
pub mod imp_cpal;

use crate::error::Result;
use crate::task::{parse_stream_task, StreamTask};
use futures_util::Stream;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

#[cfg(feature = "microphone")]
pub use imp_cpal::{list_input_devices, AudioDeviceInfo, CpalInput};

/// Bytes per captured sample (mono f32)
pub const BYTES_PER_SAMPLE: usize = 4;

#[derive(Debug)]
enum CaptureEvent {
    Audio(Vec<u8>),
    /// Queued on release; nothing after it is delivered
    Closed,
}

/// Capture parameters for one session.
///
/// Fragments are always mono; inputs downmix or pick a channel themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    /// Frames per fragment handed to the session
    pub frames_per_buffer: u32,
}

impl CaptureConfig {
    pub fn for_task(task: StreamTask) -> Self {
        Self {
            sample_rate: task.sample_rate(),
            frames_per_buffer: task.frames_per_buffer(),
        }
    }
}

/// Where an [`AudioInput`] delivers captured audio
#[derive(Debug, Clone)]
pub struct FragmentSink {
    tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl FragmentSink {
    /// Queue one buffer of little-endian f32 samples.
    ///
    /// Returns false once the consuming side is gone.
    pub fn push(&self, fragment: Vec<u8>) -> bool {
        if fragment.is_empty() {
            return true;
        }
        self.tx.send(CaptureEvent::Audio(fragment)).is_ok()
    }
}

/// A device (or anything else) that can feed a capture session
pub trait AudioInput: Send {
    /// Open the device and start delivering fragments to `sink`
    fn start(&mut self, config: &CaptureConfig, sink: FragmentSink) -> Result<()>;

    /// Stop delivering fragments and release the device
    fn stop(&mut self) -> Result<()>;
}

/// Scoped live capture for one stream task.
///
/// Dropping the session stops the input and ends its chunk stream.
pub struct CaptureSession {
    task: StreamTask,
    config: CaptureConfig,
    input: Box<dyn AudioInput>,
    tx: mpsc::UnboundedSender<CaptureEvent>,
    rx: ReceiverSlot,
    closed: bool,
}

type ReceiverSlot = Arc<Mutex<Option<mpsc::UnboundedReceiver<CaptureEvent>>>>;

/// The queue's consuming end while a chunk stream holds it
struct ReceiverLease {
    rx: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    slot: ReceiverSlot,
    /// Set once the sentinel is seen; the queue is never handed back after
    finished: bool,
}

impl ReceiverLease {
    fn take(slot: &ReceiverSlot) -> Self {
        let rx = slot.lock().ok().and_then(|mut rx| rx.take());
        Self {
            rx,
            slot: slot.clone(),
            finished: false,
        }
    }
}

impl Drop for ReceiverLease {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(rx) = self.rx.take() {
            if let Ok(mut slot) = self.slot.lock() {
                *slot = Some(rx);
            }
        }
    }
}

impl CaptureSession {
    /// Open a session for `task` fed by `input`.
    ///
    /// Fails with `InvalidTask` unless `task` is a stream task.
    pub fn open(task: &str, input: impl AudioInput + 'static) -> Result<Self> {
        let task = parse_stream_task(task)?;
        Self::start(task, CaptureConfig::for_task(task), Box::new(input))
    }

    /// Open a session on the default (or named) input device
    #[cfg(feature = "microphone")]
    pub fn open_microphone(task: &str, device_name: Option<String>) -> Result<Self> {
        Self::open(task, CpalInput::new(device_name))
    }

    fn start(
        task: StreamTask,
        config: CaptureConfig,
        mut input: Box<dyn AudioInput>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        input.start(&config, FragmentSink { tx: tx.clone() })?;

        info!(
            "🎤 Capture session open for {} ({}Hz, {} frames per buffer)",
            task, config.sample_rate, config.frames_per_buffer
        );

        Ok(Self {
            task,
            config,
            input,
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            closed: false,
        })
    }

    pub fn task(&self) -> StreamTask {
        self.task
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Captured audio as a lazy stream of coalesced chunks.
    ///
    /// Each pull waits for one fragment, then folds in whatever else is
    /// already queued. The stream ends at the release sentinel.
    ///
    /// Only one stream holds the audio at a time; while it is alive, or once
    /// it has seen the sentinel, further calls return a finished stream.
    /// Dropping a stream early (say, because the call it fed failed to open)
    /// returns the audio to the session for the next call.
    pub fn audio_chunks(&mut self) -> impl Stream<Item = Vec<u8>> + Send + 'static {
        let lease = ReceiverLease::take(&self.rx);
        if lease.rx.is_none() {
            warn!("🎤 Audio chunks for {} are already taken", self.task);
        }
        coalesced_chunks(lease)
    }

    /// Release the session now instead of at drop
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.input.stop() {
            warn!("🎤 Failed to stop audio input: {}", e);
        }
        // The receiver may already be gone; nothing is waiting then
        let _ = self.tx.send(CaptureEvent::Closed);
        info!("🎤 Capture session for {} released", self.task);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn coalesced_chunks(mut lease: ReceiverLease) -> impl Stream<Item = Vec<u8>> + Send + 'static {
    async_stream::stream! {
        let Some(rx) = lease.rx.as_mut() else {
            return;
        };

        loop {
            let mut data = match rx.recv().await {
                Some(CaptureEvent::Audio(fragment)) => fragment,
                Some(CaptureEvent::Closed) | None => {
                    lease.finished = true;
                    break;
                }
            };

            let mut fragments = 1;
            loop {
                match rx.try_recv() {
                    Ok(CaptureEvent::Audio(fragment)) => {
                        data.extend_from_slice(&fragment);
                        fragments += 1;
                    }
                    Ok(CaptureEvent::Closed) | Err(TryRecvError::Disconnected) => {
                        lease.finished = true;
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            debug!("🎤 Coalesced {} fragments into {} bytes", fragments, data.len());
            yield data;

            if lease.finished {
                break;
            }
        }

        debug!("🎤 Capture stream finished");
    }
}
