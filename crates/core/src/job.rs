//! Tracked remote jobs and their reconciliation rules.
//!
//! A [`Job`] is created locally when the service accepts a task and is
//! afterwards only moved forward by server observations: a cheap
//! [`PhaseObservation`] on every poll, then one [`FinalStatus`] once the
//! server reports a terminal outcome. Every mutator refuses to touch a
//! job that is already terminal, which is what makes late or duplicate
//! responses harmless.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{TaskId, Timestamp};

/// Error text recorded when a status poll itself fails.
pub const TRANSPORT_FAILURE_MESSAGE: &str = "status update failed";

/// Error text recorded when the server reports failure without a reason.
pub const UNSPECIFIED_FAILURE_MESSAGE: &str = "task failed";

/// Upper bound for the synthesized progress estimate while a job runs.
pub const ESTIMATE_CAP: f64 = 95.0;

/// Progress value forced on completion.
pub const ESTIMATE_COMPLETE: f64 = 100.0;

// ---------------------------------------------------------------------------
// Phase / Outcome
// ---------------------------------------------------------------------------

/// Fine-grained, display-oriented progress label for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initializing,
    Downloading,
    Processing,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Downloading => "downloading",
            Phase::Processing => "processing",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Phase::Initializing),
            "downloading" => Ok(Phase::Downloading),
            "processing" => Ok(Phase::Processing),
            "completed" => Ok(Phase::Completed),
            "failed" => Ok(Phase::Failed),
            other => Err(CoreError::UnknownVariant {
                kind: "phase",
                value: other.to_string(),
            }),
        }
    }
}

/// The server's coarse status for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Processing,
    Completed,
    Failed,
}

impl Outcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Outcome::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Processing => "processing",
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job request
// ---------------------------------------------------------------------------

/// Container / codec the service should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    #[default]
    Mp4,
    Webm,
    Mkv,
    Mp3,
    M4a,
    Opus,
    Flac,
    Ogg,
    Wav,
    Jpeg,
    Png,
}

impl MediaFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Webm => "webm",
            MediaFormat::Mkv => "mkv",
            MediaFormat::Mp3 => "mp3",
            MediaFormat::M4a => "m4a",
            MediaFormat::Opus => "opus",
            MediaFormat::Flac => "flac",
            MediaFormat::Ogg => "ogg",
            MediaFormat::Wav => "wav",
            MediaFormat::Jpeg => "jpeg",
            MediaFormat::Png => "png",
        }
    }

    /// Audio-only containers.
    pub fn is_audio(self) -> bool {
        matches!(
            self,
            MediaFormat::Mp3
                | MediaFormat::M4a
                | MediaFormat::Opus
                | MediaFormat::Flac
                | MediaFormat::Ogg
                | MediaFormat::Wav
        )
    }
}

impl FromStr for MediaFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => MediaFormat::Mp4,
            "webm" => MediaFormat::Webm,
            "mkv" => MediaFormat::Mkv,
            "mp3" => MediaFormat::Mp3,
            "m4a" => MediaFormat::M4a,
            "opus" => MediaFormat::Opus,
            "flac" => MediaFormat::Flac,
            "ogg" => MediaFormat::Ogg,
            "wav" => MediaFormat::Wav,
            "jpeg" | "jpg" => MediaFormat::Jpeg,
            "png" => MediaFormat::Png,
            other => {
                return Err(CoreError::UnknownVariant {
                    kind: "media format",
                    value: other.to_string(),
                })
            }
        };
        Ok(format)
    }
}

/// Which streams the service should keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    #[default]
    Default,
    VideoOnly,
    AudioOnly,
}

/// Everything the caller supplies when enqueuing a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub url: String,
    pub format: MediaFormat,
    pub video_quality: Option<String>,
    pub audio_quality: Option<String>,
    pub download_mode: DownloadMode,
    /// Title shown to the user; falls back to the URL.
    pub display_name: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl JobRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: MediaFormat::default(),
            video_quality: None,
            audio_quality: None,
            download_mode: DownloadMode::default(),
            display_name: None,
            thumbnail_url: None,
        }
    }

    pub fn with_format(mut self, format: MediaFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_qualities(mut self, video: Option<String>, audio: Option<String>) -> Self {
        self.video_quality = video;
        self.audio_quality = audio;
        self
    }

    pub fn with_download_mode(mut self, mode: DownloadMode) -> Self {
        self.download_mode = mode;
        self
    }

    pub fn with_display(mut self, name: impl Into<String>, thumbnail_url: Option<String>) -> Self {
        self.display_name = Some(name.into());
        self.thumbnail_url = thumbnail_url;
        self
    }

    /// Reject requests the service would refuse outright.
    pub fn validate(&self) -> Result<(), CoreError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(CoreError::Validation("url must not be empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CoreError::Validation(format!(
                "url must be http(s): {url}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server observations
// ---------------------------------------------------------------------------

/// Result of the cheap per-tick phase poll.
///
/// `phase` is `None` when the server has no phase to report yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseObservation {
    pub phase: Option<Phase>,
    pub outcome: Outcome,
}

/// Result of the one-off full status fetch after a terminal outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalStatus {
    pub outcome: Outcome,
    pub artifact_ref: Option<String>,
    pub error: Option<String>,
    pub file_size_mb: Option<f64>,
}

/// What applying a [`PhaseObservation`] did to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseUpdate {
    /// The locally held phase was overwritten.
    pub changed: bool,
    /// The server reported a terminal outcome; fetch the full status next.
    pub needs_final_status: bool,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One tracked remote task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: TaskId,
    pub phase: Phase,
    pub outcome: Outcome,
    /// Advisory only, 0..=100.
    pub progress_estimate: f64,
    pub display_name: String,
    pub source_url: String,
    pub format: MediaFormat,
    pub video_quality: Option<String>,
    pub audio_quality: Option<String>,
    pub download_mode: DownloadMode,
    pub thumbnail_url: Option<String>,
    pub artifact_ref: Option<String>,
    pub file_size_mb: Option<f64>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

impl Job {
    /// A freshly accepted job: `initializing` / `processing`, no progress.
    pub fn new(id: impl Into<TaskId>, request: JobRequest, now: Timestamp) -> Self {
        let display_name = request
            .display_name
            .clone()
            .unwrap_or_else(|| request.url.clone());
        Self {
            id: id.into(),
            phase: Phase::Initializing,
            outcome: Outcome::Processing,
            progress_estimate: 0.0,
            display_name,
            source_url: request.url,
            format: request.format,
            video_quality: request.video_quality,
            audio_quality: request.audio_quality,
            download_mode: request.download_mode,
            thumbnail_url: request.thumbnail_url,
            artifact_ref: None,
            file_size_mb: None,
            error: None,
            created_at: now,
            finished_at: None,
        }
    }

    /// Still waiting on the server; the only state that accepts updates.
    pub fn is_active(&self) -> bool {
        self.outcome == Outcome::Processing
    }

    /// Merge a phase poll result.
    ///
    /// Terminal phases are not taken from the poll: they are only set
    /// together with the outcome by [`apply_final_status`](Self::apply_final_status).
    pub fn apply_phase(&mut self, observation: PhaseObservation) -> PhaseUpdate {
        if !self.is_active() {
            return PhaseUpdate::default();
        }

        let mut update = PhaseUpdate::default();
        if let Some(phase) = observation.phase {
            if phase != self.phase && !phase.is_terminal() {
                self.phase = phase;
                update.changed = true;
            }
        }
        update.needs_final_status = observation.outcome.is_terminal();
        update
    }

    /// Merge the full status fetched after a terminal outcome.
    ///
    /// Returns `false` if the job was already terminal or the server still
    /// reports `processing`.
    pub fn apply_final_status(&mut self, status: FinalStatus, now: Timestamp) -> bool {
        if !self.is_active() {
            return false;
        }

        match status.outcome {
            Outcome::Processing => false,
            Outcome::Completed => {
                self.outcome = Outcome::Completed;
                self.phase = Phase::Completed;
                self.progress_estimate = ESTIMATE_COMPLETE;
                self.artifact_ref = status.artifact_ref;
                self.file_size_mb = status.file_size_mb;
                self.error = None;
                self.finished_at = Some(now);
                true
            }
            Outcome::Failed => {
                let message = status
                    .error
                    .unwrap_or_else(|| UNSPECIFIED_FAILURE_MESSAGE.to_string());
                self.fail(message, now)
            }
        }
    }

    /// Terminal-fail the job, freezing its progress estimate.
    pub fn fail(&mut self, message: impl Into<String>, now: Timestamp) -> bool {
        if !self.is_active() {
            return false;
        }
        self.outcome = Outcome::Failed;
        self.phase = Phase::Failed;
        self.error = Some(message.into());
        self.finished_at = Some(now);
        true
    }

    /// Nudge the advisory estimate forward, never past [`ESTIMATE_CAP`].
    pub fn advance_estimate(&mut self, increment: f64) -> bool {
        if !self.is_active() || increment <= 0.0 {
            return false;
        }
        let next = (self.progress_estimate + increment).min(ESTIMATE_CAP);
        if next <= self.progress_estimate {
            return false;
        }
        self.progress_estimate = next;
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
