//! Error taxonomy for authentication and publishing.
//!
//! The underlying client reports failures as [`ClientError`]: either a
//! structured RPC error (code, name, optional numeric value) or a transport
//! failure. Callers never see those directly; they are classified into
//! [`TelegramError`] by RPC name and code.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::session::SessionStoreError;

/// An error returned by Telegram in response to an RPC call.
///
/// Numeric suffixes are split off the name: `FLOOD_WAIT_30` is
/// `{ code: 420, name: "FLOOD_WAIT", value: Some(30) }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFailure {
    pub code: i32,
    pub name: String,
    pub value: Option<u32>,
}

impl RpcFailure {
    #[must_use]
    pub fn new(code: i32, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            value: None,
        }
    }

    /// Parses a raw error message such as `FLOOD_WAIT_30`.
    #[must_use]
    pub fn from_message(code: i32, message: &str) -> Self {
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty()
                && suffix.chars().all(|c| c.is_ascii_digit())
                && let Ok(value) = suffix.parse::<u32>()
            {
                return Self {
                    code,
                    name: message[..idx].to_owned(),
                    value: Some(value),
                };
            }
        }
        Self::new(code, message)
    }

    /// Matches the error name; `'*'` at either end is a wildcard.
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }

    /// Seconds to wait if this is a flood-control error.
    pub fn flood_wait_secs(&self) -> Option<u32> {
        const FLOOD_ERRORS: [&str; 3] = ["FLOOD_WAIT", "FLOOD_PREMIUM_WAIT", "SLOWMODE_WAIT"];
        if FLOOD_ERRORS.iter().any(|name| self.is(name)) {
            self.value
        } else {
            None
        }
    }

    /// Whether the server no longer accepts the session's authorization.
    pub fn is_session_revoked(&self) -> bool {
        self.code == 401
            || self.is("AUTH_KEY_UNREGISTERED")
            || self.is("SESSION_REVOKED")
            || self.is("SESSION_EXPIRED")
            || self.is("USER_DEACTIVATED*")
    }
}

impl fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(value) = self.value {
            write!(f, " ({value})")?;
        }
        Ok(())
    }
}

/// Failure reported by an [`AccountClient`](super::AccountClient) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{0}")]
    Rpc(RpcFailure),

    #[error("{0}")]
    Transport(String),
}

impl ClientError {
    /// Shorthand for an RPC error parsed from its raw message.
    #[must_use]
    pub fn rpc(code: i32, message: &str) -> Self {
        Self::Rpc(RpcFailure::from_message(code, message))
    }

    pub fn as_rpc(&self) -> Option<&RpcFailure> {
        match self {
            Self::Rpc(rpc) => Some(rpc),
            Self::Transport(_) => None,
        }
    }

    /// Matches the RPC error name; transport errors never match.
    pub fn is(&self, pattern: &str) -> bool {
        self.as_rpc().is_some_and(|rpc| rpc.is(pattern))
    }
}

/// Why a destination refused a native story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryRejection {
    /// The chat type cannot host stories.
    UnsupportedDestination,
    /// The account lacks admin rights to post stories there.
    AdminRequired,
    /// Telegram Premium (or boosts) is required.
    PremiumRequired,
    /// The peer is not valid for story calls.
    PeerInvalid,
}

impl StoryRejection {
    /// Classifies a failed story call. `None` means the failure is not a
    /// capability rejection (flood control, transport, ...).
    pub fn classify(err: &ClientError) -> Option<Self> {
        let rpc = err.as_rpc()?;
        if rpc.is("PREMIUM_ACCOUNT_REQUIRED") || rpc.is("BOOSTS_REQUIRED") {
            Some(Self::PremiumRequired)
        } else if rpc.is("CHAT_ADMIN_REQUIRED")
            || rpc.is("CHAT_WRITE_FORBIDDEN")
            || rpc.is("RIGHT_FORBIDDEN")
            || rpc.is("STORIES_NOT_ALLOWED")
        {
            Some(Self::AdminRequired)
        } else if rpc.is("STORY_PEER_INVALID") || rpc.is("STORIES_DISABLED") {
            Some(Self::UnsupportedDestination)
        } else if rpc.is("PEER_ID_INVALID") || rpc.is("CHANNEL_INVALID") || rpc.is("*_PEER_INVALID") {
            Some(Self::PeerInvalid)
        } else {
            None
        }
    }
}

impl fmt::Display for StoryRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnsupportedDestination => "destination does not support stories",
            Self::AdminRequired => "admin rights to post stories are required",
            Self::PremiumRequired => "Telegram Premium or boosts are required",
            Self::PeerInvalid => "destination is not a valid story peer",
        })
    }
}

/// Errors surfaced to callers of the authentication and publishing layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelegramError {
    #[error("Not authorized. Request a login code and verify it first.")]
    NotAuthorized,

    #[error("Rate limited by Telegram, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u32 },

    #[error("A login code was requested recently, retry after {remaining_secs} seconds")]
    CooldownActive { remaining_secs: u64 },

    #[error("Invalid login code")]
    InvalidCode,

    #[error("Login code expired or was never requested. Request a new code.")]
    CodeExpired,

    #[error("Two-factor authentication password required (not supported)")]
    PasswordRequired,

    #[error("Phone number is not registered on Telegram")]
    SignUpRequired,

    #[error("Destination {destination} not found: {reason}")]
    DestinationNotFound { destination: String, reason: String },

    #[error("An image is required to publish a story")]
    ImageRequired,

    #[error("Nothing to publish: text and image are both empty")]
    EmptyPost,

    #[error("Story rejected: {rejection} ({detail})")]
    StoryRejected {
        rejection: StoryRejection,
        detail: String,
    },

    #[error("QR login did not complete before the timeout")]
    QrTimedOut,

    #[error("Telegram error: {0}")]
    Transport(String),

    #[error("Operation timed out; its outcome is unknown")]
    TimedOut,

    /// Another operation held the account for too long; nothing was sent.
    #[error("Another operation for this account is still running")]
    AccountBusy,

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl TelegramError {
    /// Stable machine-readable name of the error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotAuthorized => "not_authorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::InvalidCode => "invalid_code",
            Self::CodeExpired => "code_expired",
            Self::PasswordRequired => "password_required",
            Self::SignUpRequired => "sign_up_required",
            Self::DestinationNotFound { .. } => "destination_not_found",
            Self::ImageRequired => "image_required",
            Self::EmptyPost => "empty_post",
            Self::StoryRejected { .. } => "story_rejected",
            Self::QrTimedOut => "qr_timed_out",
            Self::Transport(_) => "transport_error",
            Self::TimedOut => "timed_out",
            Self::AccountBusy => "account_busy",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Seconds the caller should wait before retrying, when known.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(u64::from(*retry_after_secs)),
            Self::CooldownActive { remaining_secs } => Some(*remaining_secs),
            _ => None,
        }
    }
}

impl From<ClientError> for TelegramError {
    fn from(err: ClientError) -> Self {
        let rpc = match err {
            ClientError::Rpc(rpc) => rpc,
            ClientError::Transport(message) => return Self::Transport(message),
        };

        if let Some(retry_after_secs) = rpc.flood_wait_secs() {
            return Self::RateLimited { retry_after_secs };
        }

        if rpc.is("PHONE_CODE_INVALID") || rpc.is("PHONE_CODE_EMPTY") {
            Self::InvalidCode
        } else if rpc.is("PHONE_CODE_EXPIRED") || rpc.is("PHONE_CODE_HASH_EMPTY") {
            Self::CodeExpired
        } else if rpc.is("SESSION_PASSWORD_NEEDED") {
            Self::PasswordRequired
        } else if rpc.is("PHONE_NUMBER_UNOCCUPIED") {
            Self::SignUpRequired
        } else if rpc.is_session_revoked() {
            Self::NotAuthorized
        } else {
            Self::Transport(rpc.to_string())
        }
    }
}

impl From<SessionStoreError> for TelegramError {
    fn from(err: SessionStoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl Serialize for TelegramError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
