//! Task registry.
//!
//! The Sense service exposes one RPC per task. Whole-file tasks and live
//! stream tasks are separate, disjoint families; only the event family takes a
//! subtask (the sound-event category to detect).

use crate::error::{Result, SenseError};
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Subtask value a live event stream may send before a category is chosen
pub const INIT_SUBTASK: &str = "init";

/// Which family of tasks a caller is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    File,
    Stream,
}

/// Tasks run over a complete audio file, answered with one prediction
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum FileTask {
    SpeechDetector,
    MusicDetector,
    AgeGender,
    MusicGenre,
    MusicMood,
    MusicTempo,
    MusicKey,
    Event,
}

/// Tasks run over live audio, answered with a prediction per window
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum StreamTask {
    SpeechDetectorStream,
    MusicDetectorStream,
    AgeGenderStream,
    MusicGenreStream,
    MusicMoodStream,
    EventStream,
}

/// Sound-event categories accepted by the event tasks
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Subtask {
    Babycry,
    Carhorn,
    Cough,
    Dogbark,
    Glassbreak,
    Siren,
    Snoring,
}

/// A validated task of either family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    File(FileTask),
    Stream(StreamTask),
}

impl FileTask {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn takes_subtask(&self) -> bool {
        matches!(self, FileTask::Event)
    }
}

impl StreamTask {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn takes_subtask(&self) -> bool {
        matches!(self, StreamTask::EventStream)
    }

    /// Capture rate the server's model expects for this task
    pub fn sample_rate(&self) -> u32 {
        match self {
            StreamTask::SpeechDetectorStream
            | StreamTask::MusicDetectorStream
            | StreamTask::AgeGenderStream => 16_000,
            StreamTask::MusicGenreStream | StreamTask::MusicMoodStream | StreamTask::EventStream => {
                22_050
            }
        }
    }

    /// Frames delivered per capture callback: half a second of audio
    pub fn frames_per_buffer(&self) -> u32 {
        self.sample_rate() / 2
    }
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::File(task) => task.as_str(),
            Task::Stream(task) => task.as_str(),
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a task/subtask pair against the registry for the given mode.
///
/// The task must belong to the family selected by `mode`. Event tasks need a
/// subtask from [`Subtask`], or the [`INIT_SUBTASK`] marker; every other task
/// accepts whatever subtask it is given, including none.
pub fn validate(task: &str, subtask: Option<&str>, mode: Mode) -> Result<Task> {
    match mode {
        Mode::File => validate_file(task, subtask).map(Task::File),
        Mode::Stream => validate_stream(task, subtask).map(Task::Stream),
    }
}

pub fn validate_file(task: &str, subtask: Option<&str>) -> Result<FileTask> {
    let parsed = FileTask::from_str(task).map_err(|_| invalid_task(task, Mode::File))?;
    check_subtask(task, parsed.takes_subtask(), subtask)?;
    Ok(parsed)
}

pub fn validate_stream(task: &str, subtask: Option<&str>) -> Result<StreamTask> {
    let parsed = parse_stream_task(task)?;
    check_subtask(task, parsed.takes_subtask(), subtask)?;
    Ok(parsed)
}

/// Parse a stream task identifier without looking at any subtask
pub fn parse_stream_task(task: &str) -> Result<StreamTask> {
    StreamTask::from_str(task).map_err(|_| invalid_task(task, Mode::Stream))
}

fn invalid_task(task: &str, mode: Mode) -> SenseError {
    SenseError::InvalidTask {
        task: task.to_string(),
        mode,
    }
}

fn check_subtask(task: &str, takes_subtask: bool, subtask: Option<&str>) -> Result<()> {
    if takes_subtask && !is_event_subtask(subtask) {
        return Err(SenseError::InvalidSubtask {
            task: task.to_string(),
            subtask: subtask.map(str::to_string),
        });
    }
    Ok(())
}

fn is_event_subtask(subtask: Option<&str>) -> bool {
    match subtask {
        Some(INIT_SUBTASK) => true,
        Some(name) => Subtask::from_str(name).is_ok(),
        None => false,
    }
}

pub fn file_task_names() -> Vec<&'static str> {
    FileTask::iter().map(|t| t.as_str()).collect()
}

pub fn stream_task_names() -> Vec<&'static str> {
    StreamTask::iter().map(|t| t.as_str()).collect()
}

pub fn subtask_names() -> Vec<&'static str> {
    Subtask::iter().map(|s| s.into()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANY_SUBTASKS: [Option<&str>; 5] =
        [None, Some(""), Some("init"), Some("babycry"), Some("airplane")];

    #[test]
    fn test_identifiers_match_rpc_names() {
        assert_eq!(
            file_task_names(),
            vec![
                "speech_detector",
                "music_detector",
                "age_gender",
                "music_genre",
                "music_mood",
                "music_tempo",
                "music_key",
                "event"
            ]
        );
        assert_eq!(
            stream_task_names(),
            vec![
                "speech_detector_stream",
                "music_detector_stream",
                "age_gender_stream",
                "music_genre_stream",
                "music_mood_stream",
                "event_stream"
            ]
        );
    }

    #[test]
    fn test_families_are_disjoint() {
        for name in file_task_names() {
            assert!(StreamTask::from_str(name).is_err(), "{} in both", name);
        }
        for name in stream_task_names() {
            assert!(FileTask::from_str(name).is_err(), "{} in both", name);
        }
    }

    #[test]
    fn test_non_event_file_tasks_accept_any_subtask() {
        for task in FileTask::iter().filter(|t| !t.takes_subtask()) {
            for subtask in ANY_SUBTASKS {
                assert_eq!(
                    validate_file(task.as_str(), subtask).unwrap(),
                    task,
                    "{} with {:?}",
                    task,
                    subtask
                );
            }
        }
    }

    #[test]
    fn test_event_subtasks() {
        assert_eq!(validate_file("event", Some("babycry")).unwrap(), FileTask::Event);
        for subtask in subtask_names() {
            assert!(validate_file("event", Some(subtask)).is_ok());
        }

        assert!(matches!(
            validate_file("event", Some("airplane")),
            Err(SenseError::InvalidSubtask { .. })
        ));
        assert!(matches!(
            validate_file("event", None),
            Err(SenseError::InvalidSubtask { subtask: None, .. })
        ));
        assert!(matches!(
            validate_file("event", Some("")),
            Err(SenseError::InvalidSubtask { .. })
        ));
    }

    #[test]
    fn test_init_marker_is_always_accepted_for_events() {
        assert_eq!(
            validate("event_stream", Some("init"), Mode::Stream).unwrap(),
            Task::Stream(StreamTask::EventStream)
        );
        assert_eq!(
            validate("event", Some("init"), Mode::File).unwrap(),
            Task::File(FileTask::Event)
        );
    }

    #[test]
    fn test_wrong_family_is_invalid_task() {
        for name in stream_task_names() {
            assert!(matches!(
                validate(name, Some("babycry"), Mode::File),
                Err(SenseError::InvalidTask {
                    mode: Mode::File,
                    ..
                })
            ));
        }
        for name in file_task_names() {
            assert!(matches!(
                validate(name, Some("babycry"), Mode::Stream),
                Err(SenseError::InvalidTask {
                    mode: Mode::Stream,
                    ..
                })
            ));
        }
        for name in ["", "EVENT", "event ", "speech", "music_key_stream"] {
            assert!(matches!(
                validate(name, None, Mode::File),
                Err(SenseError::InvalidTask { .. })
            ));
        }
    }

    #[test]
    fn test_task_error_takes_precedence_over_subtask() {
        assert!(matches!(
            validate("event_stream", Some("airplane"), Mode::File),
            Err(SenseError::InvalidTask { .. })
        ));
    }

    #[test]
    fn test_stream_rates() {
        assert_eq!(StreamTask::SpeechDetectorStream.sample_rate(), 16_000);
        assert_eq!(StreamTask::AgeGenderStream.sample_rate(), 16_000);
        assert_eq!(StreamTask::MusicMoodStream.sample_rate(), 22_050);
        assert_eq!(StreamTask::EventStream.sample_rate(), 22_050);
        assert_eq!(StreamTask::EventStream.frames_per_buffer(), 11_025);
        assert_eq!(StreamTask::MusicDetectorStream.frames_per_buffer(), 8_000);
    }

    #[test]
    fn test_parse_stream_task_ignores_subtask_rules() {
        assert_eq!(
            parse_stream_task("event_stream").unwrap(),
            StreamTask::EventStream
        );
        assert!(parse_stream_task("event").is_err());
    }
}
