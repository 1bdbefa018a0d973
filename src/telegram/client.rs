//! The seam between the orchestration logic and the account client library.
//!
//! [`AccountClient`] is the subset of protocol operations the publisher needs;
//! [`ClientConnector`] builds a connected client from credentials and an
//! optional stored session. The production implementation lives in
//! [`super::grammers`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ClientError, TelegramError};
use crate::config::Credentials;
use crate::session::SessionBlob;

/// Offset Telegram's Bot API adds to channel ids (`-100…`).
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// The authorized account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub premium: bool,
}

impl AccountInfo {
    /// Human-readable name for status output.
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        match (&self.username, name.is_empty()) {
            (Some(username), true) => format!("@{username}"),
            (Some(username), false) => format!("{name} (@{username})"),
            (None, false) => name,
            (None, true) => self.id.to_string(),
        }
    }
}

/// Kind of a resolved chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// Broadcast channel.
    Channel,
    /// Megagroup.
    Supergroup,
    /// Basic group.
    Group,
    /// Private chat with a user or bot.
    User,
}

/// Admin rights of the account in a chat, as far as publishing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AdminRights {
    pub post_messages: bool,
    pub post_stories: bool,
}

/// A resolved destination chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    /// Raw protocol id (without the Bot API sign/offset).
    pub id: i64,
    pub access_hash: Option<i64>,
    pub kind: ChatKind,
    pub title: String,
    pub username: Option<String>,
    pub is_creator: bool,
    pub admin_rights: Option<AdminRights>,
}

impl ChatInfo {
    /// Id in Bot API form: `-100…` for channels, negative for basic groups.
    pub fn bot_api_id(&self) -> i64 {
        match self.kind {
            ChatKind::Channel | ChatKind::Supergroup => -(CHANNEL_ID_OFFSET + self.id),
            ChatKind::Group => -self.id,
            ChatKind::User => self.id,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.is_creator || self.admin_rights.is_some()
    }
}

/// How a destination was identified by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRef {
    /// Public username without the leading `@`.
    Username(String),
    /// Numeric id in Bot API form.
    Id(i64),
}

impl ChatRef {
    /// Parses `@name`, `name`, `t.me/name` links or a numeric id.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::DestinationNotFound`] for empty or malformed input.
    pub fn parse(raw: &str) -> Result<Self, TelegramError> {
        let trimmed = raw.trim();
        let without_link = ["https://t.me/", "http://t.me/", "t.me/"]
            .iter()
            .find_map(|prefix| trimmed.strip_prefix(prefix))
            .unwrap_or(trimmed);
        let name = without_link.strip_prefix('@').unwrap_or(without_link);
        let name = name.trim_end_matches('/');

        if let Ok(id) = name.parse::<i64>() {
            return match Self::split_bot_api_id(id) {
                Some(_) => Ok(Self::Id(id)),
                None => Err(TelegramError::DestinationNotFound {
                    destination: raw.to_owned(),
                    reason: "chat id is out of range".to_owned(),
                }),
            };
        }

        let valid = !name.is_empty()
            && name.len() <= 32
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(TelegramError::DestinationNotFound {
                destination: raw.to_owned(),
                reason: "not a username or numeric chat id".to_owned(),
            });
        }

        Ok(Self::Username(name.to_owned()))
    }

    /// Splits a Bot API style id into the peer kind it denotes and the raw id.
    ///
    /// Channels and supergroups share the `-100…` range and are reported as
    /// [`ChatKind::Channel`]. Returns `None` for `0` and ids with no positive
    /// counterpart.
    pub fn split_bot_api_id(id: i64) -> Option<(ChatKind, i64)> {
        let magnitude = id.checked_neg()?;
        if id == 0 {
            None
        } else if id <= -CHANNEL_ID_OFFSET {
            Some((ChatKind::Channel, magnitude - CHANNEL_ID_OFFSET))
        } else if id < 0 {
            Some((ChatKind::Group, magnitude))
        } else {
            Some((ChatKind::User, id))
        }
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username(name) => write!(f, "@{name}"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

/// A message delivered to a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SentMessage {
    /// Missing if the server did not report the id.
    pub message_id: Option<i32>,
    pub chat_id: i64,
}

/// Who can see a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivacyRule {
    AllowAll,
}

/// Where a story goes.
#[derive(Debug, Clone, Copy)]
pub enum StoryPeer<'a> {
    /// The account's own profile.
    SelfAccount,
    /// A channel or group the account administers.
    Chat(&'a ChatInfo),
}

/// Parameters of a story submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryDraft {
    pub caption: String,
    pub privacy: Vec<PrivacyRule>,
    pub period: Duration,
}

/// Answer to a QR login token export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginTokenState {
    /// Token to display as a QR code until it expires.
    Token {
        token: Vec<u8>,
        expires: DateTime<Utc>,
    },
    /// Another device accepted the token.
    Success(AccountInfo),
    /// The account lives on another datacenter; `token` has to be imported there.
    MigrateTo { dc_id: i32, token: Vec<u8> },
}

/// Protocol operations used by authentication and publishing.
///
/// A client is not safe for concurrent use; callers serialize access.
#[async_trait]
pub trait AccountClient: Send + Sync {
    /// Proof of a sent login code; holds the phone code hash.
    type LoginToken: Send + Sync;

    /// A file uploaded to Telegram, consumed by one send.
    type Upload: Send + Sync;

    async fn is_authorized(&self) -> Result<bool, ClientError>;

    async fn request_login_code(&self, phone: &str) -> Result<Self::LoginToken, ClientError>;

    async fn sign_in(&self, token: &Self::LoginToken, code: &str) -> Result<AccountInfo, ClientError>;

    async fn export_login_token(&self) -> Result<LoginTokenState, ClientError>;

    /// Finishes a QR login on the account's home datacenter after
    /// [`LoginTokenState::MigrateTo`].
    async fn import_login_token(&self, dc_id: i32, token: &[u8]) -> Result<LoginTokenState, ClientError>;

    /// Serializes the current session so it can be resumed later.
    async fn export_session(&self) -> Result<SessionBlob, ClientError>;

    async fn get_me(&self) -> Result<AccountInfo, ClientError>;

    async fn log_out(&self) -> Result<(), ClientError>;

    async fn resolve_chat(&self, chat: &ChatRef) -> Result<ChatInfo, ClientError>;

    async fn upload_photo(&self, bytes: &[u8], file_name: &str) -> Result<Self::Upload, ClientError>;

    async fn send_text(&self, chat: &ChatInfo, text: &str) -> Result<SentMessage, ClientError>;

    async fn send_photo(
        &self,
        chat: &ChatInfo,
        photo: Self::Upload,
        caption: &str,
    ) -> Result<SentMessage, ClientError>;

    /// Publishes a story, returning its id when the server reports one.
    async fn send_story(
        &self,
        peer: StoryPeer<'_>,
        photo: Self::Upload,
        draft: &StoryDraft,
    ) -> Result<Option<i32>, ClientError>;

    /// Asks the server whether a story could be posted to the chat.
    async fn can_send_story(&self, chat: &ChatInfo) -> Result<(), ClientError>;

    fn disconnect(&self);
}

/// Builds connected clients.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    type Client: AccountClient;

    /// Connects using a stored session, or an anonymous one when `session` is `None`.
    async fn connect(
        &self,
        credentials: &Credentials,
        session: Option<&SessionBlob>,
    ) -> Result<Self::Client, ClientError>;
}
