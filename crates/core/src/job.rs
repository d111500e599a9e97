//! Job kinds, input parameters, and the lifecycle state machine.
//!
//! `JobState` ids match the 1-based seed data in the `job_states`
//! lookup table. State transitions are validated here so that every
//! caller (coordinator, poller, repositories) shares one definition of
//! what is legal.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// State ID type matching SMALLINT in the database.
pub type StateId = i16;

// ---------------------------------------------------------------------------
// Job kind
// ---------------------------------------------------------------------------

/// The kind of generation work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ImageToVideo,
    TextToVideo,
    Storyboard,
    Suggestion,
}

impl JobKind {
    /// Stable string code used in the database and API payloads.
    pub fn code(self) -> &'static str {
        match self {
            Self::ImageToVideo => "image_to_video",
            Self::TextToVideo => "text_to_video",
            Self::Storyboard => "storyboard",
            Self::Suggestion => "suggestion",
        }
    }

    /// Parse a string code back into a kind.
    pub fn from_code(code: &str) -> Result<Self, CoreError> {
        match code {
            "image_to_video" => Ok(Self::ImageToVideo),
            "text_to_video" => Ok(Self::TextToVideo),
            "storyboard" => Ok(Self::Storyboard),
            "suggestion" => Ok(Self::Suggestion),
            other => Err(CoreError::Validation(format!("Unknown job kind: {other}"))),
        }
    }

    /// All kinds, in seed-data order. Used by pricing tests and usage
    /// reporting.
    pub const ALL: [JobKind; 4] = [
        Self::ImageToVideo,
        Self::TextToVideo,
        Self::Storyboard,
        Self::Suggestion,
    ];
}

// ---------------------------------------------------------------------------
// Job state machine
// ---------------------------------------------------------------------------

/// Job lifecycle state.
///
/// `Queued → Dispatched → Processing → Completed | Failed`.
/// `Completed` and `Failed` are terminal: no transition leaves them.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued = 1,
    Dispatched = 2,
    Processing = 3,
    Completed = 4,
    Failed = 5,
}

impl JobState {
    /// Return the database state ID.
    pub fn id(self) -> StateId {
        self as StateId
    }

    pub fn from_id(id: StateId) -> Result<Self, CoreError> {
        match id {
            1 => Ok(Self::Queued),
            2 => Ok(Self::Dispatched),
            3 => Ok(Self::Processing),
            4 => Ok(Self::Completed),
            5 => Ok(Self::Failed),
            other => Err(CoreError::Internal(format!("Unknown job state id: {other}"))),
        }
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine permits `self → next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            // Dispatch is only legal straight out of the queue.
            Self::Dispatched => self == Self::Queued,
            // Progress reports keep a job in (or move it to) Processing.
            Self::Processing => matches!(self, Self::Dispatched | Self::Processing),
            // Any non-terminal state may finalize.
            Self::Completed | Self::Failed => true,
            Self::Queued => false,
        }
    }
}

impl From<JobState> for StateId {
    fn from(value: JobState) -> Self {
        value as StateId
    }
}

// ---------------------------------------------------------------------------
// Generation parameters
// ---------------------------------------------------------------------------

/// Output resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Sd480,
    Hd720,
    Hd1080,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Self::Sd480, Self::Hd720, Self::Hd1080];
}

/// User-supplied input parameters for a generation request.
///
/// Validated once at submission; stored verbatim on the job row as
/// JSONB so the provider payload can be rebuilt for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Prompt text driving the generation.
    pub prompt: String,
    /// Reference to a previously uploaded source image (required for
    /// image-to-video).
    pub source_image: Option<String>,
    /// Requested clip duration in seconds.
    pub duration_secs: i64,
    /// Output resolution tier.
    pub resolution: Resolution,
    /// Optional style preset names, passed through to the provider.
    #[serde(default)]
    pub style_flags: Vec<String>,
}

/// Longest clip a single job may produce.
pub const MAX_DURATION_SECS: i64 = 60;

/// Upper bound on prompt length, matching the submission form.
pub const MAX_PROMPT_CHARS: usize = 2000;

impl GenerationParams {
    /// Validate the parameters for a given job kind.
    ///
    /// Rejected requests never touch the ledger or the provider.
    pub fn validate(&self, kind: JobKind) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::Validation("Prompt must not be empty".into()));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(CoreError::Validation(format!(
                "Prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        if kind == JobKind::ImageToVideo && self.source_image.is_none() {
            return Err(CoreError::Validation(
                "image_to_video requires a source image".into(),
            ));
        }
        if self.duration_secs < 1 || self.duration_secs > MAX_DURATION_SECS {
            return Err(CoreError::Validation(format!(
                "Duration must be between 1 and {MAX_DURATION_SECS} seconds"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
