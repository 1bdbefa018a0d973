//! Publishing a post plus optional stories through an authorized account.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::caption::{
    MAX_MEDIA_CAPTION_LENGTH, MAX_STORY_CAPTION_LENGTH, MAX_TEXT_MESSAGE_LENGTH, truncate_caption,
    truncate_for_log,
};
use super::types::{PostOutcome, PublishRequest, PublishResult, StoryOutcome};
use crate::telegram::{
    AccountClient, AuthStateMachine, ChatInfo, ChatRef, ClientConnector, ClientError, PrivacyRule,
    SentMessage, StoryDraft, StoryPeer, StoryRejection, TelegramError,
};

/// How long stories stay visible.
pub const STORY_PERIOD: Duration = Duration::from_secs(86_400);

/// Tag prepended to posts that stand in for a rejected story.
pub const FALLBACK_STORY_TAG: &str = "#story";

const UPLOAD_FILE_NAME: &str = "image.jpg";

/// Sends posts and stories; holds no per-account state.
#[derive(Debug, Clone)]
pub struct PublishCoordinator {
    story_period: Duration,
    privacy: Vec<PrivacyRule>,
}

impl Default for PublishCoordinator {
    fn default() -> Self {
        Self {
            story_period: STORY_PERIOD,
            privacy: vec![PrivacyRule::AllowAll],
        }
    }
}

impl PublishCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `request` with the account behind `auth`.
    ///
    /// Fails as a whole only before anything is sent: invalid request, not
    /// authorized, or unresolvable destination. After that every step has its
    /// own outcome in the [`PublishResult`].
    pub async fn publish<C: ClientConnector>(
        &self,
        auth: &mut AuthStateMachine<C>,
        request: &PublishRequest,
    ) -> Result<PublishResult, TelegramError> {
        request.validate()?;
        let destination = ChatRef::parse(&request.destination)?;

        info!(
            "Publishing to {} (story mode: {}): \"{}\"",
            destination,
            request.story_mode,
            truncate_for_log(&request.text, 40)
        );

        let client = auth.authorized_client().await?;
        let chat = client
            .resolve_chat(&destination)
            .await
            .map_err(|e| resolve_error(&request.destination, e))?;
        debug!("Resolved {} to {} ({:?})", destination, chat.bot_api_id(), chat.kind);

        let group_post = PostOutcome::from(self.send_post(client, &chat, request).await);
        match &group_post {
            PostOutcome::Success { message_id, .. } => info!("Post sent, message id {:?}", message_id),
            PostOutcome::Failed { error } => warn!("Post failed: {}", error),
        }

        let image = request.image().unwrap_or_default();

        let personal_story = if request.story_mode.includes_personal() {
            Some(self.personal_story(client, image, &request.text).await)
        } else {
            None
        };

        let channel_story = if request.story_mode.includes_channel() {
            Some(self.channel_story(client, &chat, image, &request.text).await)
        } else {
            None
        };

        let result = PublishResult::new(group_post, channel_story, personal_story);
        info!("Publish finished with status {:?}", result.status);
        Ok(result)
    }

    async fn send_post<A: AccountClient>(
        &self,
        client: &A,
        chat: &ChatInfo,
        request: &PublishRequest,
    ) -> Result<SentMessage, TelegramError> {
        match request.image() {
            Some(image) => {
                let photo = client.upload_photo(image, UPLOAD_FILE_NAME).await?;
                let caption = truncate_caption(&request.text, MAX_MEDIA_CAPTION_LENGTH);
                Ok(client.send_photo(chat, photo, &caption).await?)
            }
            None => {
                let text = truncate_caption(&request.text, MAX_TEXT_MESSAGE_LENGTH);
                Ok(client.send_text(chat, &text).await?)
            }
        }
    }

    fn story_draft(&self, text: &str) -> StoryDraft {
        StoryDraft {
            caption: truncate_caption(text, MAX_STORY_CAPTION_LENGTH).into_owned(),
            privacy: self.privacy.clone(),
            period: self.story_period,
        }
    }

    async fn personal_story<A: AccountClient>(
        &self,
        client: &A,
        image: &[u8],
        text: &str,
    ) -> StoryOutcome {
        match self.upload_story(client, StoryPeer::SelfAccount, image, text).await {
            Ok(story_id) => {
                info!("Personal story published");
                StoryOutcome::NativeStory { story_id }
            }
            Err(err) => {
                warn!("Personal story failed: {}", err);
                StoryOutcome::Failed { error: story_error(err) }
            }
        }
    }

    /// Posts a story to the destination, falling back to a tagged post when
    /// the destination refuses stories.
    async fn channel_story<A: AccountClient>(
        &self,
        client: &A,
        chat: &ChatInfo,
        image: &[u8],
        text: &str,
    ) -> StoryOutcome {
        let err = match self.upload_story(client, StoryPeer::Chat(chat), image, text).await {
            Ok(story_id) => {
                info!("Story published to {}", chat.title);
                return StoryOutcome::NativeStory { story_id };
            }
            Err(err) => err,
        };

        let Some(rejection) = StoryRejection::classify(&err) else {
            warn!("Story to {} failed: {}", chat.title, err);
            return StoryOutcome::Failed { error: err.into() };
        };

        info!("{} rejected the story ({}), sending a tagged post instead", chat.title, rejection);
        let native_error = TelegramError::StoryRejected {
            rejection,
            detail: err.to_string(),
        };

        match self.fallback_post(client, chat, image, text).await {
            Ok(sent) => StoryOutcome::FallbackPost {
                message_id: sent.message_id,
                chat_id: sent.chat_id,
                native_error,
            },
            Err(fallback_err) => {
                warn!("Fallback post failed as well: {}", fallback_err);
                StoryOutcome::Failed { error: native_error }
            }
        }
    }

    async fn upload_story<A: AccountClient>(
        &self,
        client: &A,
        peer: StoryPeer<'_>,
        image: &[u8],
        text: &str,
    ) -> Result<Option<i32>, ClientError> {
        let photo = client.upload_photo(image, UPLOAD_FILE_NAME).await?;
        client.send_story(peer, photo, &self.story_draft(text)).await
    }

    async fn fallback_post<A: AccountClient>(
        &self,
        client: &A,
        chat: &ChatInfo,
        image: &[u8],
        text: &str,
    ) -> Result<SentMessage, ClientError> {
        let tagged = if text.trim().is_empty() {
            FALLBACK_STORY_TAG.to_owned()
        } else {
            format!("{FALLBACK_STORY_TAG}\n\n{text}")
        };
        let photo = client.upload_photo(image, UPLOAD_FILE_NAME).await?;
        let caption = truncate_caption(&tagged, MAX_MEDIA_CAPTION_LENGTH);
        client.send_photo(chat, photo, &caption).await
    }
}

/// Story errors that are capability rejections keep their classification.
fn story_error(err: ClientError) -> TelegramError {
    match StoryRejection::classify(&err) {
        Some(rejection) => TelegramError::StoryRejected {
            rejection,
            detail: err.to_string(),
        },
        None => err.into(),
    }
}

fn resolve_error(destination: &str, err: ClientError) -> TelegramError {
    match TelegramError::from(err.clone()) {
        TelegramError::Transport(_) if err.as_rpc().is_some() => {
            TelegramError::DestinationNotFound {
                destination: destination.to_owned(),
                reason: err.to_string(),
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::publish::types::{PublishStatus, StoryMode};
    use crate::session::SessionStore;
    use crate::telegram::testing::{FakeConnector, channel, test_credentials};
    use crate::telegram::AdminRights;

    struct Fixture {
        _dir: tempfile::TempDir,
        connector: FakeConnector,
        machine: AuthStateMachine<FakeConnector>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let connector = FakeConnector::default();
        {
            let mut state = connector.state();
            state.authorized = true;
            state.add_chat(channel(
                "news",
                1_234,
                Some(AdminRights {
                    post_messages: true,
                    post_stories: true,
                }),
            ));
        }
        let machine = AuthStateMachine::new(
            test_credentials(),
            connector.clone(),
            Arc::new(SessionStore::new(dir.path().join("sessions.json"))),
        );
        Fixture {
            _dir: dir,
            connector,
            machine,
        }
    }

    fn request(mode: StoryMode) -> PublishRequest {
        PublishRequest::new("@news", "Fresh story")
            .with_image(vec![0xff, 0xd8, 0xff])
            .with_story_mode(mode)
    }

    fn story_calls(fx: &Fixture) -> usize {
        fx.connector
            .state()
            .calls
            .iter()
            .filter(|c| c.starts_with("send_story"))
            .count()
    }

    #[tokio::test]
    async fn test_publish_without_story_never_calls_story() {
        let mut fx = fixture();
        let result = PublishCoordinator::new()
            .publish(&mut fx.machine, &request(StoryMode::None))
            .await
            .unwrap();

        assert_eq!(result.status, PublishStatus::Success);
        assert!(result.group_post.is_success());
        assert!(result.channel_story.is_none());
        assert!(result.personal_story.is_none());
        assert_eq!(story_calls(&fx), 0);
    }

    #[tokio::test]
    async fn test_text_only_post() {
        let mut fx = fixture();
        let result = PublishCoordinator::new()
            .publish(&mut fx.machine, &PublishRequest::new("@news", "just words"))
            .await
            .unwrap();

        assert!(matches!(
            result.group_post,
            PostOutcome::Success { chat_id: -1_000_000_001_234, .. }
        ));
        let state = fx.connector.state();
        assert!(state.called("send_text"));
        assert!(!state.called("upload_photo"));
    }

    #[tokio::test]
    async fn test_personal_story_success() {
        let mut fx = fixture();
        let result = PublishCoordinator::new()
            .publish(&mut fx.machine, &request(StoryMode::Personal))
            .await
            .unwrap();

        assert_eq!(result.status, PublishStatus::Success);
        assert!(result.group_post.is_success());
        assert!(matches!(
            result.personal_story,
            Some(StoryOutcome::NativeStory { story_id: Some(_) })
        ));
        assert!(result.channel_story.is_none());
    }

    #[tokio::test]
    async fn test_personal_story_failure_is_partial() {
        let mut fx = fixture();
        fx.connector.state().self_story_error =
            Some(ClientError::Transport("connection reset".to_owned()));

        let result = PublishCoordinator::new()
            .publish(&mut fx.machine, &request(StoryMode::Personal))
            .await
            .unwrap();

        assert_eq!(result.status, PublishStatus::Partial);
        assert!(result.group_post.is_success());
        assert_eq!(
            result.personal_story,
            Some(StoryOutcome::Failed {
                error: TelegramError::Transport("connection reset".to_owned())
            })
        );
    }

    #[tokio::test]
    async fn test_story_without_image_fails_before_network() {
        let mut fx = fixture();
        let request = PublishRequest::new("@news", "text").with_story_mode(StoryMode::Personal);

        let err = PublishCoordinator::new()
            .publish(&mut fx.machine, &request)
            .await
            .unwrap_err();

        assert_eq!(err, TelegramError::ImageRequired);
        assert!(fx.connector.state().connects.is_empty());
        assert!(fx.connector.state().calls.is_empty());
    }

    #[tokio::test]
    async fn test_long_text_with_both_stories() {
        let mut fx = fixture();
        let text = "x".repeat(1600);
        let request = PublishRequest::new("@news", text.clone())
            .with_image(vec![1, 2, 3])
            .with_story_mode(StoryMode::Both);

        let result = PublishCoordinator::new()
            .publish(&mut fx.machine, &request)
            .await
            .unwrap();
        assert_eq!(result.status, PublishStatus::Success);

        let state = fx.connector.state();
        let post = state.sent.iter().find(|s| s.kind == "photo").unwrap();
        assert_eq!(post.text.chars().count(), MAX_MEDIA_CAPTION_LENGTH);
        assert!(post.text.ends_with("..."));

        let stories: Vec<_> = state.sent.iter().filter(|s| s.kind == "story").collect();
        assert_eq!(stories.len(), 2);
        for story in stories {
            assert_eq!(story.text.chars().count(), MAX_STORY_CAPTION_LENGTH);
            assert!(story.text.ends_with("..."));
        }
    }

    #[tokio::test]
    async fn test_channel_story_falls_back_on_rejection() {
        let mut fx = fixture();
        fx.connector.state().chat_story_error = Some(ClientError::rpc(400, "CHAT_ADMIN_REQUIRED"));

        let result = PublishCoordinator::new()
            .publish(&mut fx.machine, &request(StoryMode::Channel))
            .await
            .unwrap();

        assert_eq!(result.status, PublishStatus::Success);
        let Some(StoryOutcome::FallbackPost { native_error, .. }) = result.channel_story else {
            panic!("expected a fallback post");
        };
        assert!(matches!(
            native_error,
            TelegramError::StoryRejected {
                rejection: StoryRejection::AdminRequired,
                ..
            }
        ));

        let state = fx.connector.state();
        let photos: Vec<_> = state.sent.iter().filter(|s| s.kind == "photo").collect();
        assert_eq!(photos.len(), 2);
        assert!(photos[1].text.starts_with("#story\n\nFresh story"));
    }

    #[tokio::test]
    async fn test_failed_fallback_keeps_native_error() {
        let mut fx = fixture();
        {
            let mut state = fx.connector.state();
            state.chat_story_error = Some(ClientError::rpc(400, "PREMIUM_ACCOUNT_REQUIRED"));
            state.send_error = Some(ClientError::rpc(403, "CHAT_WRITE_FORBIDDEN"));
        }

        let result = PublishCoordinator::new()
            .publish(&mut fx.machine, &request(StoryMode::Channel))
            .await
            .unwrap();

        assert_eq!(result.status, PublishStatus::Failed);
        assert!(matches!(
            result.channel_story,
            Some(StoryOutcome::Failed {
                error: TelegramError::StoryRejected {
                    rejection: StoryRejection::PremiumRequired,
                    ..
                }
            })
        ));
    }

    #[tokio::test]
    async fn test_flood_on_story_does_not_fall_back() {
        let mut fx = fixture();
        fx.connector.state().chat_story_error = Some(ClientError::rpc(420, "FLOOD_WAIT_60"));

        let result = PublishCoordinator::new()
            .publish(&mut fx.machine, &request(StoryMode::Channel))
            .await
            .unwrap();

        assert_eq!(result.status, PublishStatus::Partial);
        assert_eq!(
            result.channel_story,
            Some(StoryOutcome::Failed {
                error: TelegramError::RateLimited { retry_after_secs: 60 }
            })
        );
        assert_eq!(fx.connector.state().sent.len(), 1);
    }

    #[tokio::test]
    async fn test_not_authorized_fails_fast() {
        let mut fx = fixture();
        fx.connector.state().authorized = false;

        let err = PublishCoordinator::new()
            .publish(&mut fx.machine, &request(StoryMode::None))
            .await
            .unwrap_err();
        assert_eq!(err, TelegramError::NotAuthorized);
        assert!(!fx.connector.state().called("resolve_chat"));
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let mut fx = fixture();
        let err = PublishCoordinator::new()
            .publish(&mut fx.machine, &PublishRequest::new("@missing", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, TelegramError::DestinationNotFound { .. }));
    }

    #[tokio::test]
    async fn test_numeric_destination() {
        let mut fx = fixture();
        let result = PublishCoordinator::new()
            .publish(&mut fx.machine, &PublishRequest::new("-1000000001234", "hi"))
            .await
            .unwrap();
        assert!(result.group_post.is_success());
    }
}
