//! Outbound request streams.
//!
//! Every chunk of audio sent to the service travels in its own `Input`
//! message that repeats the request metadata. Uploaded files are tagged with
//! their container format, live capture with its sample rate.

use futures_util::{future, stream, Stream, StreamExt};
use log::{debug, warn};
use sense_protos::Input;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Bytes read from a file per outbound message
pub const FILE_CHUNK_SIZE: usize = 1024 * 1024;

/// How the audio in a message is described to the server
#[derive(Debug, Clone, PartialEq, Eq)]
enum AudioTag {
    /// Container of an uploaded file, e.g. `wav` or `mp3`
    Format(String),
    /// Rate of raw f32 samples from live capture
    SampleRate(u32),
}

/// Metadata attached to every message of one request
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    api_key: String,
    subtask: Option<String>,
    tag: AudioTag,
}

impl RequestMetadata {
    pub fn for_file(api_key: &str, format: &str, subtask: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            subtask: subtask.map(str::to_string),
            tag: AudioTag::Format(format.to_string()),
        }
    }

    pub fn for_live(api_key: &str, sample_rate: u32, subtask: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            subtask: subtask.map(str::to_string),
            tag: AudioTag::SampleRate(sample_rate),
        }
    }

    /// Wrap one payload in a protocol message
    pub fn message(&self, payload: Vec<u8>) -> Input {
        let (format, sr) = match &self.tag {
            AudioTag::Format(format) => (Some(format.clone()), None),
            AudioTag::SampleRate(rate) => (None, Some(*rate as i32)),
        };
        Input {
            data: payload,
            apikey: self.api_key.clone(),
            format,
            subtask: self.subtask.clone(),
            sr,
        }
    }
}

/// Lazily split `reader` into messages of `chunk_size` bytes.
///
/// Each chunk is filled completely before it is emitted, so only the last
/// message can be shorter. The sequence ends at end of input and never
/// contains an empty payload. A `chunk_size` of zero yields a single
/// `InvalidInput` error.
pub fn file_chunks<R>(
    reader: R,
    chunk_size: usize,
    metadata: RequestMetadata,
) -> impl Stream<Item = io::Result<Input>> + Send + 'static
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::try_unfold(
        (reader, metadata, 0usize),
        move |(mut reader, metadata, sent)| async move {
            if chunk_size == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "chunk size must be greater than zero",
                ));
            }
            let payload = read_chunk(&mut reader, chunk_size).await?;
            if payload.is_empty() {
                debug!("📁 End of input after {} chunks", sent);
                return Ok::<_, io::Error>(None);
            }
            debug!("📤 Chunk {}: {} bytes", sent + 1, payload.len());
            let message = metadata.message(payload);
            Ok::<_, io::Error>(Some((message, (reader, metadata, sent + 1))))
        },
    )
}

async fn read_chunk<R>(reader: &mut R, chunk_size: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

/// Turn coalesced live audio into messages
pub fn live_requests<S>(chunks: S, metadata: RequestMetadata) -> impl Stream<Item = Input>
where
    S: Stream<Item = Vec<u8>>,
{
    chunks.map(move |payload| metadata.message(payload))
}

/// Holds the read error that cut an upload short
#[derive(Debug, Clone, Default)]
pub struct ReadErrorSlot(Arc<Mutex<Option<io::Error>>>);

impl ReadErrorSlot {
    fn set(&self, error: io::Error) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(error);
        }
    }

    pub fn take(&self) -> Option<io::Error> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Ends the message sequence at the first read failure.
///
/// The transport only accepts plain messages, so the error is parked in
/// `slot` for the caller to report once the call returns.
pub fn until_read_error<S>(chunks: S, slot: ReadErrorSlot) -> impl Stream<Item = Input>
where
    S: Stream<Item = io::Result<Input>>,
{
    chunks.scan(slot, |slot, item| {
        future::ready(match item {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("📁 Read failed, ending upload: {}", e);
                slot.set(e);
                None
            }
        })
    })
}
