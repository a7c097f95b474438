use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::channel::ChannelId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for Confidence {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(DomainError::InvariantViolation(format!("unknown confidence `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Up,
    Down,
}

impl FeedbackKind {
    /// Maps a Slack reaction name or emoji. Surrounding colons, case and
    /// skin-tone suffixes are ignored.
    pub fn from_reaction(reaction: &str) -> Option<Self> {
        let normalized = reaction.trim().trim_matches(':').to_lowercase();
        let base = normalized.split("::").next().unwrap_or_default();
        match base {
            "+1" | "thumbsup" | "👍" => Some(Self::Up),
            "-1" | "thumbsdown" | "👎" => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackTally {
    pub up: u32,
    pub down: u32,
}

impl FeedbackTally {
    pub fn net(&self) -> i64 {
        i64::from(self.up) - i64::from(self.down)
    }

    pub fn record(&mut self, kind: FeedbackKind) {
        match kind {
            FeedbackKind::Up => self.up = self.up.saturating_add(1),
            FeedbackKind::Down => self.down = self.down.saturating_add(1),
        }
    }
}

/// One question and the bot's answer. `thread_ts` is the ts of the reply message,
/// which is what reactions point at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub channel_id: ChannelId,
    pub thread_ts: String,
    pub question_ts: String,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: Confidence,
    pub feedback: FeedbackTally,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_id: ChannelId,
        thread_ts: impl Into<String>,
        question_ts: impl Into<String>,
        user_id: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        sources: Vec<String>,
        confidence: Confidence,
    ) -> Self {
        Self {
            id: TurnId(Uuid::new_v4().to_string()),
            channel_id,
            thread_ts: thread_ts.into(),
            question_ts: question_ts.into(),
            user_id: user_id.into(),
            question: question.into(),
            answer: answer.into(),
            sources,
            confidence,
            feedback: FeedbackTally::default(),
            created_at: Utc::now(),
        }
    }
}
