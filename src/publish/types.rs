//! Publish requests and their per-step outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::telegram::{SentMessage, TelegramError};

/// Which stories to publish alongside the post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryMode {
    #[default]
    None,
    /// A story on the account's own profile.
    Personal,
    /// A story in the destination chat.
    Channel,
    Both,
}

impl StoryMode {
    pub fn includes_personal(self) -> bool {
        matches!(self, Self::Personal | Self::Both)
    }

    pub fn includes_channel(self) -> bool {
        matches!(self, Self::Channel | Self::Both)
    }
}

impl FromStr for StoryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "off" => Ok(Self::None),
            "personal" | "self" | "profile" => Ok(Self::Personal),
            "channel" | "group" => Ok(Self::Channel),
            "both" | "all" => Ok(Self::Both),
            other => Err(format!(
                "unknown story mode '{other}' (expected none, personal, channel or both)"
            )),
        }
    }
}

impl fmt::Display for StoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Personal => "personal",
            Self::Channel => "channel",
            Self::Both => "both",
        })
    }
}

/// What to publish and where.
#[derive(Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// `@username`, `t.me` link or numeric chat id.
    pub destination: String,
    pub text: String,
    pub image: Option<Vec<u8>>,
    pub story_mode: StoryMode,
}

impl PublishRequest {
    pub fn new(destination: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            text: text.into(),
            image: None,
            story_mode: StoryMode::None,
        }
    }

    #[must_use]
    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    #[must_use]
    pub fn with_story_mode(mut self, story_mode: StoryMode) -> Self {
        self.story_mode = story_mode;
        self
    }

    /// The image, if one with content was supplied.
    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref().filter(|image| !image.is_empty())
    }

    /// Checks the request before anything is sent.
    ///
    /// # Errors
    ///
    /// [`TelegramError::ImageRequired`] if a story is requested without an
    /// image, [`TelegramError::EmptyPost`] if there is neither text nor image.
    pub fn validate(&self) -> Result<(), TelegramError> {
        if self.story_mode != StoryMode::None && self.image().is_none() {
            return Err(TelegramError::ImageRequired);
        }
        if self.image().is_none() && self.text.trim().is_empty() {
            return Err(TelegramError::EmptyPost);
        }
        Ok(())
    }
}

impl fmt::Debug for PublishRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishRequest")
            .field("destination", &self.destination)
            .field("text_len", &self.text.chars().count())
            .field("image_len", &self.image.as_ref().map(Vec::len))
            .field("story_mode", &self.story_mode)
            .finish()
    }
}

/// Outcome of the regular post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PostOutcome {
    Success {
        /// Missing if the server did not report the id.
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<i32>,
        chat_id: i64,
    },
    Failed { error: TelegramError },
}

impl PostOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<Result<SentMessage, TelegramError>> for PostOutcome {
    fn from(result: Result<SentMessage, TelegramError>) -> Self {
        match result {
            Ok(sent) => Self::Success {
                message_id: sent.message_id,
                chat_id: sent.chat_id,
            },
            Err(error) => Self::Failed { error },
        }
    }
}

/// Outcome of one story attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoryOutcome {
    /// Published as a real story. The id is missing if the server did not report it.
    NativeStory { story_id: Option<i32> },
    /// The destination refused the story; an ordinary tagged post was sent instead.
    FallbackPost {
        message_id: Option<i32>,
        chat_id: i64,
        native_error: TelegramError,
    },
    Failed { error: TelegramError },
}

impl StoryOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

impl Serialize for StoryOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Repr<'a> {
            status: &'static str,
            #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
            kind: Option<&'static str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            story_id: Option<i32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            message_id: Option<i32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            chat_id: Option<i64>,
            #[serde(skip_serializing_if = "Option::is_none")]
            native_error: Option<&'a TelegramError>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a TelegramError>,
        }

        let empty = Repr {
            status: "success",
            kind: None,
            story_id: None,
            message_id: None,
            chat_id: None,
            native_error: None,
            error: None,
        };

        let repr = match self {
            Self::NativeStory { story_id } => Repr {
                kind: Some("native_story"),
                story_id: *story_id,
                ..empty
            },
            Self::FallbackPost {
                message_id,
                chat_id,
                native_error,
            } => Repr {
                kind: Some("fallback_post"),
                message_id: *message_id,
                chat_id: Some(*chat_id),
                native_error: Some(native_error),
                ..empty
            },
            Self::Failed { error } => Repr {
                status: "failed",
                error: Some(error),
                ..empty
            },
        };
        repr.serialize(serializer)
    }
}

/// Overall result of a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    /// Every requested step succeeded.
    Success,
    /// Some steps succeeded.
    Partial,
    /// Nothing was published.
    Failed,
}

/// Independent outcomes of the post and each requested story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    pub status: PublishStatus,
    pub group_post: PostOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_story: Option<StoryOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_story: Option<StoryOutcome>,
}

impl PublishResult {
    pub fn new(
        group_post: PostOutcome,
        channel_story: Option<StoryOutcome>,
        personal_story: Option<StoryOutcome>,
    ) -> Self {
        let steps: Vec<bool> = std::iter::once(group_post.is_success())
            .chain(channel_story.iter().map(StoryOutcome::is_success))
            .chain(personal_story.iter().map(StoryOutcome::is_success))
            .collect();

        let status = if steps.iter().all(|ok| *ok) {
            PublishStatus::Success
        } else if steps.iter().any(|ok| *ok) {
            PublishStatus::Partial
        } else {
            PublishStatus::Failed
        };

        Self {
            status,
            group_post,
            channel_story,
            personal_story,
        }
    }
}
