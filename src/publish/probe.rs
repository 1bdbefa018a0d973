//! Best-effort check of whether a destination accepts stories.
//!
//! The report only sets expectations. Publishing always attempts the story
//! itself and falls back when it is refused.

use serde::Serialize;
use tracing::{debug, info};

use crate::telegram::{
    AccountClient, AuthStateMachine, ChatInfo, ChatKind, ChatRef, ClientConnector, StoryRejection,
};

/// Whether the account may post stories to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryRights {
    Yes,
    No,
    Unknown,
}

/// What is known about a destination's story support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityReport {
    pub destination: String,
    pub supported: bool,
    pub entity_kind: Option<ChatKind>,
    pub title: Option<String>,
    pub is_admin: bool,
    pub has_story_rights: StoryRights,
    pub premium_required_hint: bool,
    /// Premium status of the account, when it could be read.
    pub account_premium: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CapabilityReport {
    pub(crate) fn unsupported(destination: &str, reason: impl Into<String>) -> Self {
        Self {
            destination: destination.to_owned(),
            supported: false,
            entity_kind: None,
            title: None,
            is_admin: false,
            has_story_rights: StoryRights::Unknown,
            premium_required_hint: false,
            account_premium: None,
            reason: Some(reason.into()),
        }
    }
}

/// Inspects destinations without posting anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityProbe;

impl CapabilityProbe {
    /// Reports story support for `destination`. Never fails: problems are
    /// described in [`CapabilityReport::reason`].
    pub async fn probe<C: ClientConnector>(
        &self,
        auth: &mut AuthStateMachine<C>,
        destination: &str,
    ) -> CapabilityReport {
        let chat_ref = match ChatRef::parse(destination) {
            Ok(chat_ref) => chat_ref,
            Err(e) => return CapabilityReport::unsupported(destination, e.to_string()),
        };

        let client = match auth.authorized_client().await {
            Ok(client) => client,
            Err(e) => return CapabilityReport::unsupported(destination, e.to_string()),
        };

        let chat = match client.resolve_chat(&chat_ref).await {
            Ok(chat) => chat,
            Err(e) => {
                return CapabilityReport::unsupported(destination, format!("cannot resolve destination: {e}"));
            }
        };

        let account_premium = match client.get_me().await {
            Ok(account) => Some(account.premium),
            Err(e) => {
                debug!("Could not read account info: {}", e);
                None
            }
        };

        let report = inspect(client, destination, chat, account_premium).await;
        info!(
            "Capability of {}: supported={}, admin={}, story rights={:?}",
            destination, report.supported, report.is_admin, report.has_story_rights
        );
        report
    }
}

async fn inspect<A: AccountClient>(
    client: &A,
    destination: &str,
    chat: ChatInfo,
    account_premium: Option<bool>,
) -> CapabilityReport {
    let mut report = CapabilityReport {
        destination: destination.to_owned(),
        supported: false,
        entity_kind: Some(chat.kind),
        title: Some(chat.title.clone()),
        is_admin: chat.is_admin(),
        has_story_rights: static_story_rights(&chat),
        premium_required_hint: false,
        account_premium,
        reason: None,
    };

    match chat.kind {
        ChatKind::User => {
            report.reason = Some("stories can only be posted to channels and supergroups".to_owned());
            return report;
        }
        ChatKind::Group => {
            report.reason = Some("basic groups cannot host stories".to_owned());
            return report;
        }
        ChatKind::Channel | ChatKind::Supergroup => {}
    }

    match client.can_send_story(&chat).await {
        Ok(()) => {
            report.supported = true;
            report.has_story_rights = StoryRights::Yes;
        }
        Err(err) => match StoryRejection::classify(&err) {
            Some(rejection) => {
                report.premium_required_hint = rejection == StoryRejection::PremiumRequired;
                if rejection == StoryRejection::AdminRequired {
                    report.has_story_rights = StoryRights::No;
                }
                report.reason = Some(format!("{rejection} ({err})"));
            }
            None => {
                // The check itself failed; judge by the admin rights alone.
                report.supported = report.has_story_rights != StoryRights::No;
                report.reason = Some(format!("story check unavailable: {err}"));
            }
        },
    }

    report
}

fn static_story_rights(chat: &ChatInfo) -> StoryRights {
    if chat.is_creator {
        return StoryRights::Yes;
    }
    match chat.admin_rights {
        Some(rights) if rights.post_stories => StoryRights::Yes,
        Some(_) => StoryRights::No,
        None => StoryRights::No,
    }
}
