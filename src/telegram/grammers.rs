//! [`AccountClient`] implementation on top of grammers.
//!
//! Each account gets its own SQLite session file under the session directory.
//! The file is materialized from the stored [`SessionBlob`] on connect and
//! read back (base64) when the session is exported.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use grammers_client::client::LoginToken;
use grammers_client::{Client, InvocationError, SenderPool, SignInError, sender};
use grammers_session::Session as _;
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::client::{
    AccountClient, AccountInfo, AdminRights, ChatInfo, ChatKind, ChatRef, ClientConnector,
    LoginTokenState, PrivacyRule, SentMessage, StoryDraft, StoryPeer,
};
use super::{ClientError, RpcFailure};
use crate::config::Credentials;
use crate::session::SessionBlob;

/// Chunk size for file uploads (512 KB).
const UPLOAD_PART_SIZE: usize = 512 * 1024;

/// Files from this size on are uploaded as "big files".
const BIG_FILE_THRESHOLD: usize = 10 * 1024 * 1024;

/// Dialogs scanned when resolving a numeric chat id.
const DIALOG_SCAN_LIMIT: i32 = 100;

impl From<InvocationError> for ClientError {
    fn from(err: InvocationError) -> Self {
        match err {
            InvocationError::Rpc(rpc) => Self::Rpc(RpcFailure {
                code: rpc.code,
                name: rpc.name,
                value: rpc.value,
            }),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Connects grammers clients with per-account session files.
#[derive(Debug, Clone)]
pub struct GrammersConnector {
    session_dir: PathBuf,
}

impl GrammersConnector {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
        }
    }

    fn session_path(&self, phone: &str) -> PathBuf {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        self.session_dir.join(format!("{digits}.session"))
    }
}

#[async_trait]
impl ClientConnector for GrammersConnector {
    type Client = GrammersClient;

    async fn connect(
        &self,
        credentials: &Credentials,
        session: Option<&SessionBlob>,
    ) -> Result<GrammersClient, ClientError> {
        let session_path = self.session_path(credentials.phone());
        prepare_session_file(&session_path, session).await?;

        let session = Arc::new(
            SqliteSession::open(&session_path)
                .await
                .map_err(|e| ClientError::Transport(format!("failed to open session: {e}")))?,
        );

        let SenderPool {
            runner,
            updates: _updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), credentials.api_id());

        let client = Client::new(handle.clone());

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        debug!("Sender pool started for {}", session_path.display());

        Ok(GrammersClient {
            client,
            session,
            handle: handle.thin,
            session_path,
            api_id: credentials.api_id(),
            api_hash: credentials.api_hash().to_owned(),
            _pool_task: pool_task,
        })
    }
}

/// Writes the stored session to disk, or clears a stale file for a fresh login.
async fn prepare_session_file(path: &Path, session: Option<&SessionBlob>) -> Result<(), ClientError> {
    let io_error = |e: std::io::Error| {
        ClientError::Transport(format!("session file {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    match session {
        Some(blob) => {
            let bytes = STANDARD
                .decode(blob.as_str())
                .map_err(|e| ClientError::Transport(format!("stored session is not valid base64: {e}")))?;
            tokio::fs::write(path, bytes).await.map_err(io_error)
        }
        None => match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(io_error(e)),
            _ => Ok(()),
        },
    }
}

/// A connected grammers client.
pub struct GrammersClient {
    client: Client,
    session: Arc<SqliteSession>,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    session_path: PathBuf,
    api_id: i32,
    api_hash: String,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl GrammersClient {
    async fn invoke<R: tl::RemoteCall>(&self, request: &R) -> Result<R::Return, ClientError> {
        self.client.invoke(request).await.map_err(ClientError::from)
    }

    async fn login_token_state(
        &self,
        answer: tl::enums::auth::LoginToken,
    ) -> Result<LoginTokenState, ClientError> {
        match answer {
            tl::enums::auth::LoginToken::Token(token) => Ok(LoginTokenState::Token {
                token: token.token,
                expires: DateTime::from_timestamp(i64::from(token.expires), 0)
                    .unwrap_or_else(Utc::now),
            }),
            tl::enums::auth::LoginToken::MigrateTo(migrate) => Ok(LoginTokenState::MigrateTo {
                dc_id: migrate.dc_id,
                token: migrate.token,
            }),
            tl::enums::auth::LoginToken::Success(success) => {
                if let tl::enums::auth::Authorization::Authorization(auth) = success.authorization
                    && let tl::enums::User::User(user) = auth.user
                {
                    return Ok(LoginTokenState::Success(account_info(user)));
                }
                Ok(LoginTokenState::Success(self.get_me().await?))
            }
        }
    }

    async fn scan_dialogs(&self, bot_api_id: i64) -> Result<Option<ChatInfo>, ClientError> {
        let request = tl::functions::messages::GetDialogs {
            exclude_pinned: false,
            folder_id: None,
            offset_date: 0,
            offset_id: 0,
            offset_peer: tl::enums::InputPeer::Empty,
            limit: DIALOG_SCAN_LIMIT,
            hash: 0,
        };

        let chats = match self.invoke(&request).await? {
            tl::enums::messages::Dialogs::Dialogs(d) => d.chats,
            tl::enums::messages::Dialogs::Slice(d) => d.chats,
            tl::enums::messages::Dialogs::NotModified(_) => Vec::new(),
        };

        Ok(chats
            .into_iter()
            .filter_map(chat_info)
            .find(|chat| chat.bot_api_id() == bot_api_id))
    }
}

#[async_trait]
impl AccountClient for GrammersClient {
    type LoginToken = LoginToken;
    type Upload = tl::enums::InputFile;

    async fn is_authorized(&self) -> Result<bool, ClientError> {
        Ok(self.client.is_authorized().await?)
    }

    async fn request_login_code(&self, phone: &str) -> Result<LoginToken, ClientError> {
        Ok(self.client.request_login_code(phone, &self.api_hash).await?)
    }

    async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<AccountInfo, ClientError> {
        match self.client.sign_in(token, code).await {
            Ok(_) => self.get_me().await,
            Err(SignInError::PasswordRequired(_)) => {
                Err(ClientError::rpc(401, "SESSION_PASSWORD_NEEDED"))
            }
            Err(SignInError::InvalidCode) => Err(ClientError::rpc(400, "PHONE_CODE_INVALID")),
            Err(SignInError::SignUpRequired { .. }) => {
                Err(ClientError::rpc(400, "PHONE_NUMBER_UNOCCUPIED"))
            }
            Err(SignInError::Other(e)) => Err(e.into()),
            Err(e) => Err(ClientError::Transport(e.to_string())),
        }
    }

    async fn export_login_token(&self) -> Result<LoginTokenState, ClientError> {
        let request = tl::functions::auth::ExportLoginToken {
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            except_ids: vec![],
        };

        let answer = self.invoke(&request).await?;
        self.login_token_state(answer).await
    }

    async fn import_login_token(&self, dc_id: i32, token: &[u8]) -> Result<LoginTokenState, ClientError> {
        let request = tl::functions::auth::ImportLoginToken {
            token: token.to_vec(),
        };
        let answer = self.client.invoke_in_dc(dc_id, &request).await?;

        if matches!(answer, tl::enums::auth::LoginToken::Success(_)) {
            info!("Home datacenter is now {}", dc_id);
            self.session.set_home_dc_id(dc_id).await;
        }
        self.login_token_state(answer).await
    }

    async fn export_session(&self) -> Result<SessionBlob, ClientError> {
        let bytes = tokio::fs::read(&self.session_path).await.map_err(|e| {
            ClientError::Transport(format!("failed to read {}: {e}", self.session_path.display()))
        })?;
        Ok(SessionBlob::new(STANDARD.encode(bytes)))
    }

    async fn get_me(&self) -> Result<AccountInfo, ClientError> {
        let request = tl::functions::users::GetUsers {
            id: vec![tl::enums::InputUser::UserSelf],
        };

        let users = self.invoke(&request).await?;
        match users.into_iter().next() {
            Some(tl::enums::User::User(user)) => Ok(account_info(user)),
            _ => Err(ClientError::Transport("server returned no user for self".to_owned())),
        }
    }

    async fn log_out(&self) -> Result<(), ClientError> {
        self.invoke(&tl::functions::auth::LogOut {}).await?;
        Ok(())
    }

    async fn resolve_chat(&self, chat: &ChatRef) -> Result<ChatInfo, ClientError> {
        let username = match chat {
            ChatRef::Username(username) => username,
            ChatRef::Id(id) => {
                let (kind, raw_id) = ChatRef::split_bot_api_id(*id)
                    .ok_or_else(|| ClientError::rpc(400, "PEER_ID_INVALID"))?;
                if kind == ChatKind::Group {
                    let chats = self
                        .invoke(&tl::functions::messages::GetChats { id: vec![raw_id] })
                        .await?;
                    let chats = match chats {
                        tl::enums::messages::Chats::Chats(c) => c.chats,
                        tl::enums::messages::Chats::Slice(c) => c.chats,
                    };
                    if let Some(found) = chats.into_iter().find_map(chat_info) {
                        return Ok(found);
                    }
                }
                return self
                    .scan_dialogs(*id)
                    .await?
                    .ok_or_else(|| ClientError::rpc(400, "PEER_ID_INVALID"));
            }
        };

        let request = tl::functions::contacts::ResolveUsername {
            username: username.clone(),
            referer: None,
        };
        let tl::enums::contacts::ResolvedPeer::Peer(resolved) = self.invoke(&request).await?;

        let found = match resolved.peer {
            tl::enums::Peer::Channel(peer) => resolved
                .chats
                .into_iter()
                .filter_map(chat_info)
                .find(|c| c.id == peer.channel_id),
            tl::enums::Peer::Chat(peer) => resolved
                .chats
                .into_iter()
                .filter_map(chat_info)
                .find(|c| c.id == peer.chat_id),
            tl::enums::Peer::User(peer) => resolved.users.into_iter().find_map(|user| match user {
                tl::enums::User::User(u) if u.id == peer.user_id => Some(user_chat_info(u)),
                _ => None,
            }),
        };

        found.ok_or_else(|| ClientError::rpc(400, "USERNAME_NOT_OCCUPIED"))
    }

    async fn upload_photo(&self, bytes: &[u8], file_name: &str) -> Result<tl::enums::InputFile, ClientError> {
        let file_id = rand::random::<i64>();
        let big = bytes.len() >= BIG_FILE_THRESHOLD;
        let total_parts = i32::try_from(bytes.len().div_ceil(UPLOAD_PART_SIZE))
            .map_err(|_| ClientError::Transport("file is too large to upload".to_owned()))?;

        for (file_part, chunk) in (0..).zip(bytes.chunks(UPLOAD_PART_SIZE)) {
            if big {
                let request = tl::functions::upload::SaveBigFilePart {
                    file_id,
                    file_part,
                    file_total_parts: total_parts,
                    bytes: chunk.to_vec(),
                };
                self.invoke(&request).await?;
            } else {
                let request = tl::functions::upload::SaveFilePart {
                    file_id,
                    file_part,
                    bytes: chunk.to_vec(),
                };
                self.invoke(&request).await?;
            }
        }

        debug!("Uploaded {} ({} bytes, {} parts)", file_name, bytes.len(), total_parts);

        Ok(if big {
            tl::enums::InputFile::Big(tl::types::InputFileBig {
                id: file_id,
                parts: total_parts,
                name: file_name.to_owned(),
            })
        } else {
            tl::enums::InputFile::File(tl::types::InputFile {
                id: file_id,
                parts: total_parts,
                name: file_name.to_owned(),
                md5_checksum: String::new(),
            })
        })
    }

    async fn send_text(&self, chat: &ChatInfo, text: &str) -> Result<SentMessage, ClientError> {
        let request = tl::functions::messages::SendMessage {
            no_webpage: false,
            silent: false,
            background: false,
            clear_draft: false,
            noforwards: false,
            update_stickersets_order: false,
            invert_media: false,
            allow_paid_floodskip: false,
            peer: input_peer(chat),
            reply_to: None,
            message: text.to_owned(),
            random_id: rand::random(),
            reply_markup: None,
            entities: None,
            schedule_date: None,
            schedule_repeat_period: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            rich_message: None,
            allow_paid_stars: None,
            suggested_post: None,
        };

        let updates = self.invoke(&request).await?;
        Ok(SentMessage {
            message_id: sent_message_id(&updates),
            chat_id: chat.bot_api_id(),
        })
    }

    async fn send_photo(
        &self,
        chat: &ChatInfo,
        photo: tl::enums::InputFile,
        caption: &str,
    ) -> Result<SentMessage, ClientError> {
        let request = tl::functions::messages::SendMedia {
            silent: false,
            background: false,
            clear_draft: false,
            noforwards: false,
            update_stickersets_order: false,
            invert_media: false,
            allow_paid_floodskip: false,
            peer: input_peer(chat),
            reply_to: None,
            media: uploaded_photo(photo),
            message: caption.to_owned(),
            random_id: rand::random(),
            reply_markup: None,
            entities: None,
            schedule_date: None,
            schedule_repeat_period: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            allow_paid_stars: None,
            suggested_post: None,
        };

        let updates = self.invoke(&request).await?;
        Ok(SentMessage {
            message_id: sent_message_id(&updates),
            chat_id: chat.bot_api_id(),
        })
    }

    async fn send_story(
        &self,
        peer: StoryPeer<'_>,
        photo: tl::enums::InputFile,
        draft: &StoryDraft,
    ) -> Result<Option<i32>, ClientError> {
        let peer = match peer {
            StoryPeer::SelfAccount => tl::enums::InputPeer::PeerSelf,
            StoryPeer::Chat(chat) => input_peer(chat),
        };
        let period = i32::try_from(clamp_story_period(draft.period).as_secs()).unwrap_or(i32::MAX);

        let request = tl::functions::stories::SendStory {
            pinned: false,
            noforwards: false,
            fwd_modified: false,
            peer,
            media: uploaded_photo(photo),
            media_areas: None,
            caption: (!draft.caption.is_empty()).then(|| draft.caption.clone()),
            entities: None,
            privacy_rules: draft.privacy.iter().map(|rule| privacy_rule(*rule)).collect(),
            random_id: rand::random(),
            period: Some(period),
            fwd_from_id: None,
            fwd_from_story: None,
            albums: None,
            music: None,
        };

        let updates = self.invoke(&request).await?;
        Ok(story_id(&updates))
    }

    async fn can_send_story(&self, chat: &ChatInfo) -> Result<(), ClientError> {
        let request = tl::functions::stories::CanSendStory {
            peer: input_peer(chat),
        };
        self.invoke(&request).await?;
        Ok(())
    }

    fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

impl std::fmt::Debug for GrammersClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrammersClient")
            .field("session_path", &self.session_path)
            .field("api_id", &self.api_id)
            .finish_non_exhaustive()
    }
}

fn account_info(user: tl::types::User) -> AccountInfo {
    AccountInfo {
        id: user.id,
        first_name: user.first_name,
        last_name: user.last_name,
        username: user.username,
        phone: user.phone,
        premium: user.premium,
    }
}

fn admin_rights(rights: tl::enums::ChatAdminRights) -> AdminRights {
    let tl::enums::ChatAdminRights::Rights(rights) = rights;
    AdminRights {
        post_messages: rights.post_messages,
        post_stories: rights.post_stories,
    }
}

fn chat_info(chat: tl::enums::Chat) -> Option<ChatInfo> {
    match chat {
        tl::enums::Chat::Channel(channel) => Some(ChatInfo {
            id: channel.id,
            access_hash: channel.access_hash,
            kind: if channel.megagroup {
                ChatKind::Supergroup
            } else {
                ChatKind::Channel
            },
            title: channel.title,
            username: channel.username,
            is_creator: channel.creator,
            admin_rights: channel.admin_rights.map(admin_rights),
        }),
        tl::enums::Chat::Chat(group) => Some(ChatInfo {
            id: group.id,
            access_hash: None,
            kind: ChatKind::Group,
            title: group.title,
            username: None,
            is_creator: group.creator,
            admin_rights: group.admin_rights.map(admin_rights),
        }),
        _ => None,
    }
}

fn user_chat_info(user: tl::types::User) -> ChatInfo {
    let title = account_info(user.clone()).display_name();
    ChatInfo {
        id: user.id,
        access_hash: user.access_hash,
        kind: ChatKind::User,
        title,
        username: user.username,
        is_creator: false,
        admin_rights: None,
    }
}

fn input_peer(chat: &ChatInfo) -> tl::enums::InputPeer {
    match chat.kind {
        ChatKind::Channel | ChatKind::Supergroup => {
            tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
                channel_id: chat.id,
                access_hash: chat.access_hash.unwrap_or_default(),
            })
        }
        ChatKind::Group => tl::enums::InputPeer::Chat(tl::types::InputPeerChat { chat_id: chat.id }),
        ChatKind::User => tl::enums::InputPeer::User(tl::types::InputPeerUser {
            user_id: chat.id,
            access_hash: chat.access_hash.unwrap_or_default(),
        }),
    }
}

fn uploaded_photo(file: tl::enums::InputFile) -> tl::enums::InputMedia {
    tl::enums::InputMedia::UploadedPhoto(tl::types::InputMediaUploadedPhoto {
        spoiler: false,
        file,
        stickers: None,
        ttl_seconds: None,
        live_photo: false,
        video: None,
    })
}

fn privacy_rule(rule: PrivacyRule) -> tl::enums::InputPrivacyRule {
    match rule {
        PrivacyRule::AllowAll => tl::enums::InputPrivacyRule::InputPrivacyValueAllowAll,
    }
}

fn update_list(updates: &tl::enums::Updates) -> &[tl::enums::Update] {
    match updates {
        tl::enums::Updates::Updates(u) => &u.updates,
        tl::enums::Updates::Combined(u) => &u.updates,
        _ => &[],
    }
}

fn sent_message_id(updates: &tl::enums::Updates) -> Option<i32> {
    if let tl::enums::Updates::UpdateShortSentMessage(sent) = updates {
        return Some(sent.id);
    }
    update_list(updates).iter().find_map(|update| match update {
        tl::enums::Update::MessageId(m) => Some(m.id),
        _ => None,
    })
}

fn story_id(updates: &tl::enums::Updates) -> Option<i32> {
    update_list(updates).iter().find_map(|update| match update {
        tl::enums::Update::StoryId(s) => Some(s.id),
        _ => None,
    })
}

/// Keeps the story lifetime within what Telegram accepts (6h..48h, 24h default).
fn clamp_story_period(period: Duration) -> Duration {
    period.clamp(Duration::from_secs(6 * 3600), Duration::from_secs(48 * 3600))
}
