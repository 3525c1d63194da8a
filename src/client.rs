use crate::capture::CaptureSession;
use crate::config::SenseConfig;
use crate::error::{Result, SenseError};
use crate::outbound::{
    file_chunks, live_requests, until_read_error, ReadErrorSlot, RequestMetadata,
    FILE_CHUNK_SIZE,
};
use crate::task::{parse_stream_task, validate_file, validate_stream, FileTask, StreamTask};
use futures_util::{Stream, StreamExt};
use log::{debug, info};
use secrecy::{ExposeSecret, SecretBox};
use sense_protos::cochlear_sense_client::CochlearSenseClient;
use sense_protos::{Input, Output};
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tonic::transport::{Channel, Endpoint};

/// Predictions from a live call, in the order the server emits them
pub type PredictionStream = Pin<Box<dyn Stream<Item = Result<Prediction>> + Send + 'static>>;

/// One prediction from the service, kept exactly as it was received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    raw: String,
}

impl Prediction {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_raw(self) -> String {
        self.raw
    }

    /// Parse the prediction as JSON
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.raw)?)
    }
}

impl From<Output> for Prediction {
    fn from(output: Output) -> Self {
        Self { raw: output.pred }
    }
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Client for the Sense classification service
pub struct SenseClient {
    client: CochlearSenseClient<Channel>,
    api_key: SecretBox<String>,
}

impl SenseClient {
    /// Connect to the host named in `config`
    pub async fn connect(config: SenseConfig) -> Result<Self> {
        let uri = config.endpoint_uri()?;
        info!("🔌 Connecting to Sense service at {}", uri);

        let channel = Endpoint::from_shared(uri)?.connect().await?;
        info!("✅ Connected to Sense service");

        Ok(Self::with_channel(channel, config.api_key()))
    }

    /// Use an already established channel
    pub fn with_channel(channel: Channel, api_key: &str) -> Self {
        Self {
            client: CochlearSenseClient::new(channel),
            api_key: SecretBox::new(Box::new(api_key.to_string())),
        }
    }

    fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Classify a whole audio file.
    ///
    /// The task and subtask are checked before the file is opened.
    pub async fn classify_file(
        &mut self,
        path: impl AsRef<Path>,
        format: &str,
        task: &str,
        subtask: Option<&str>,
    ) -> Result<Prediction> {
        let task = validate_file(task, subtask)?;
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        info!("📁 Uploading {} for {}", path.display(), task);
        self.upload(file, format, task, subtask).await
    }

    /// Classify audio read from any async source
    pub async fn classify_reader<R>(
        &mut self,
        reader: R,
        format: &str,
        task: &str,
        subtask: Option<&str>,
    ) -> Result<Prediction>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let task = validate_file(task, subtask)?;
        self.upload(reader, format, task, subtask).await
    }

    async fn upload<R>(
        &mut self,
        reader: R,
        format: &str,
        task: FileTask,
        subtask: Option<&str>,
    ) -> Result<Prediction>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let metadata = RequestMetadata::for_file(self.api_key(), format, subtask);
        let read_error = ReadErrorSlot::default();
        let outbound = until_read_error(
            file_chunks(reader, FILE_CHUNK_SIZE, metadata),
            read_error.clone(),
        );

        let result = self.call_file(task, outbound).await;

        // A truncated upload must not pass for a real answer
        if let Some(e) = read_error.take() {
            return Err(SenseError::Io(e));
        }
        result
    }

    /// Messages for a live call fed by `session`.
    ///
    /// The returned stream holds the session's audio until it ends or is
    /// dropped; see [`CaptureSession::audio_chunks`].
    pub fn live_requests(
        &self,
        session: &mut CaptureSession,
        subtask: Option<&str>,
    ) -> Result<impl Stream<Item = Input> + Send + 'static> {
        let task = session.task();
        validate_stream(task.as_str(), subtask)?;
        let metadata =
            RequestMetadata::for_live(self.api_key(), session.config().sample_rate, subtask);
        Ok(live_requests(session.audio_chunks(), metadata))
    }

    /// Start a live call for an arbitrary message stream
    pub async fn dispatch_stream<S>(&mut self, task: &str, outbound: S) -> Result<PredictionStream>
    where
        S: Stream<Item = Input> + Send + 'static,
    {
        let task = parse_stream_task(task)?;
        self.call_stream(task, outbound).await
    }

    /// Classify live audio from `session` until it is released.
    ///
    /// If the call cannot be opened the session keeps its audio, so the same
    /// session can be passed to another attempt.
    pub async fn sense_stream(
        &mut self,
        session: &mut CaptureSession,
        subtask: Option<&str>,
    ) -> Result<PredictionStream> {
        let outbound = self.live_requests(session, subtask)?;
        self.call_stream(session.task(), outbound).await
    }

    /// Send `outbound` to the RPC serving `task` and wait for its one answer
    pub async fn call_file<S>(&mut self, task: FileTask, outbound: S) -> Result<Prediction>
    where
        S: Stream<Item = Input> + Send + 'static,
    {
        debug!("📡 Dispatching file call: {}", task);
        let client = &mut self.client;
        let response = match task {
            FileTask::SpeechDetector => client.speech_detector(outbound).await,
            FileTask::MusicDetector => client.music_detector(outbound).await,
            FileTask::AgeGender => client.age_gender(outbound).await,
            FileTask::MusicGenre => client.music_genre(outbound).await,
            FileTask::MusicMood => client.music_mood(outbound).await,
            FileTask::MusicTempo => client.music_tempo(outbound).await,
            FileTask::MusicKey => client.music_key(outbound).await,
            FileTask::Event => client.event(outbound).await,
        }?;

        let prediction = Prediction::from(response.into_inner());
        info!("📊 {} prediction received", task);
        Ok(prediction)
    }

    /// Open the bidirectional RPC serving `task`
    pub async fn call_stream<S>(&mut self, task: StreamTask, outbound: S) -> Result<PredictionStream>
    where
        S: Stream<Item = Input> + Send + 'static,
    {
        debug!("📡 Dispatching stream call: {}", task);
        let client = &mut self.client;
        let response = match task {
            StreamTask::SpeechDetectorStream => client.speech_detector_stream(outbound).await,
            StreamTask::MusicDetectorStream => client.music_detector_stream(outbound).await,
            StreamTask::AgeGenderStream => client.age_gender_stream(outbound).await,
            StreamTask::MusicGenreStream => client.music_genre_stream(outbound).await,
            StreamTask::MusicMoodStream => client.music_mood_stream(outbound).await,
            StreamTask::EventStream => client.event_stream(outbound).await,
        }?;

        info!("📡 {} stream open", task);
        let predictions = response
            .into_inner()
            .map(|item| item.map(Prediction::from).map_err(SenseError::from));
        Ok(Box::pin(predictions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_passes_through_verbatim() {
        let raw = r#"{"result":[{"tag":"babycry","probability":0.91}]}"#;
        let prediction = Prediction::from(Output {
            pred: raw.to_string(),
        });
        assert_eq!(prediction.raw(), raw);
        assert_eq!(prediction.to_string(), raw);

        let json = prediction.json().unwrap();
        assert_eq!(json["result"][0]["tag"], "babycry");
    }

    #[test]
    fn test_prediction_json_error() {
        let prediction = Prediction::from(Output {
            pred: "not json".to_string(),
        });
        assert!(matches!(prediction.json(), Err(SenseError::Prediction(_))));
        assert_eq!(prediction.into_raw(), "not json");
    }

    #[tokio::test]
    async fn test_invalid_file_task_fails_before_io() {
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        let mut client = SenseClient::with_channel(channel, "key");

        let result = client
            .classify_file("/definitely/not/here.wav", "wav", "event_stream", None)
            .await;
        assert!(matches!(result, Err(SenseError::InvalidTask { .. })));

        let result = client
            .classify_file("/definitely/not/here.wav", "wav", "event", Some("airplane"))
            .await;
        assert!(matches!(result, Err(SenseError::InvalidSubtask { .. })));

        // A valid task gets as far as opening the file
        let result = client
            .classify_file("/definitely/not/here.wav", "wav", "event", Some("babycry"))
            .await;
        assert!(matches!(result, Err(SenseError::Io(_))));
    }

    #[tokio::test]
    async fn test_dispatch_stream_rejects_file_task() {
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        let mut client = SenseClient::with_channel(channel, "key");

        let result = client
            .dispatch_stream("music_key", futures_util::stream::empty())
            .await;
        assert!(matches!(result, Err(SenseError::InvalidTask { .. })));
    }
}
