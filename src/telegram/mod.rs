//! Telegram account layer.
//!
//! Authentication ([`AuthStateMachine`]), the client seam ([`AccountClient`])
//! with its grammers implementation, and the error taxonomy shared with the
//! publishing code.

mod auth;
mod client;
mod cooldown;
mod error;
mod grammers;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{
    AuthPhase, AuthStateMachine, CODE_VALIDITY, CodeRequest, QR_POLL_INTERVAL, QrHandle, QrLogin,
    QrPoll, qr_login_url,
};
pub use client::{
    AccountClient, AccountInfo, AdminRights, ChatInfo, ChatKind, ChatRef, ClientConnector,
    LoginTokenState, PrivacyRule, SentMessage, StoryDraft, StoryPeer,
};
pub use cooldown::Cooldown;
pub use error::{ClientError, RpcFailure, StoryRejection, TelegramError};
pub use grammers::{GrammersClient, GrammersConnector};
pub use registry::{AccountRegistry, SharedAccount};
