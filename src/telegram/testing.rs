//! Scriptable in-memory [`AccountClient`] for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};

use super::client::{
    AccountClient, AccountInfo, AdminRights, ChatInfo, ChatKind, ChatRef, ClientConnector,
    LoginTokenState, SentMessage, StoryDraft, StoryPeer,
};
use super::ClientError;
use crate::config::Credentials;
use crate::session::SessionBlob;

pub const TEST_CODE: &str = "12345";

pub fn test_credentials() -> Credentials {
    Credentials::new(12345, "0123456789abcdef0123456789abcdef", "+15551234567").unwrap()
}

pub fn test_account() -> AccountInfo {
    AccountInfo {
        id: 1001,
        first_name: Some("Test".to_owned()),
        last_name: None,
        username: Some("tester".to_owned()),
        phone: Some("15551234567".to_owned()),
        premium: false,
    }
}

pub fn channel(username: &str, id: i64, admin: Option<AdminRights>) -> ChatInfo {
    ChatInfo {
        id,
        access_hash: Some(id * 7),
        kind: ChatKind::Channel,
        title: format!("Channel {username}"),
        username: Some(username.to_owned()),
        is_creator: false,
        admin_rights: admin,
    }
}

/// A story or message the fake accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub kind: &'static str,
    pub chat_id: Option<i64>,
    pub text: String,
}

/// Shared script and call log.
#[derive(Debug)]
pub struct FakeState {
    pub authorized: bool,
    pub account: AccountInfo,
    pub connects: Vec<Option<SessionBlob>>,
    pub connect_error: Option<ClientError>,
    pub calls: Vec<String>,
    pub sent: Vec<Sent>,

    pub code_requests: usize,
    pub send_code_error: Option<ClientError>,
    pub sign_in_attempts: usize,
    pub sign_in_errors: VecDeque<ClientError>,
    pub log_out_error: Option<ClientError>,

    /// Number of token exports before the QR login is confirmed.
    pub qr_success_after: Option<usize>,
    /// Datacenter the confirmed QR login has to be imported on.
    pub qr_migrate_dc: Option<i32>,
    pub qr_exports: usize,

    pub chats: HashMap<String, ChatInfo>,
    pub send_error: Option<ClientError>,
    pub self_story_error: Option<ClientError>,
    pub chat_story_error: Option<ClientError>,
    pub can_send_story_error: Option<ClientError>,
    /// Delay applied to every story call.
    pub story_delay: Option<Duration>,
    next_id: i32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            authorized: false,
            account: test_account(),
            connects: Vec::new(),
            connect_error: None,
            calls: Vec::new(),
            sent: Vec::new(),
            code_requests: 0,
            send_code_error: None,
            sign_in_attempts: 0,
            sign_in_errors: VecDeque::new(),
            log_out_error: None,
            qr_success_after: None,
            qr_migrate_dc: None,
            qr_exports: 0,
            chats: HashMap::new(),
            send_error: None,
            self_story_error: None,
            chat_story_error: None,
            can_send_story_error: None,
            story_delay: None,
            next_id: 100,
        }
    }
}

impl FakeState {
    pub fn add_chat(&mut self, chat: ChatInfo) {
        if let Some(username) = chat.username.clone() {
            self.chats.insert(username, chat);
        }
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls.iter().any(|call| call == name)
    }

    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    shared: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.shared.lock()
    }
}

#[async_trait]
impl ClientConnector for FakeConnector {
    type Client = FakeClient;

    async fn connect(
        &self,
        _credentials: &Credentials,
        session: Option<&SessionBlob>,
    ) -> Result<FakeClient, ClientError> {
        let mut state = self.state();
        state.connects.push(session.cloned());
        if let Some(err) = state.connect_error.clone() {
            return Err(err);
        }
        Ok(FakeClient {
            shared: Arc::clone(&self.shared),
        })
    }
}

#[derive(Debug)]
pub struct FakeClient {
    shared: Arc<Mutex<FakeState>>,
}

impl FakeClient {
    fn record(&self, call: &str) -> MutexGuard<'_, FakeState> {
        let mut state = self.shared.lock();
        state.calls.push(call.to_owned());
        state
    }
}

#[async_trait]
impl AccountClient for FakeClient {
    type LoginToken = String;
    type Upload = String;

    async fn is_authorized(&self) -> Result<bool, ClientError> {
        Ok(self.shared.lock().authorized)
    }

    async fn request_login_code(&self, _phone: &str) -> Result<String, ClientError> {
        let mut state = self.record("request_login_code");
        if let Some(err) = state.send_code_error.clone() {
            return Err(err);
        }
        state.code_requests += 1;
        Ok(format!("hash-{}", state.code_requests))
    }

    async fn sign_in(&self, token: &String, code: &str) -> Result<AccountInfo, ClientError> {
        let mut state = self.record("sign_in");
        state.sign_in_attempts += 1;
        if let Some(err) = state.sign_in_errors.pop_front() {
            return Err(err);
        }
        if *token != format!("hash-{}", state.code_requests) {
            return Err(ClientError::rpc(400, "PHONE_CODE_EXPIRED"));
        }
        if code != TEST_CODE {
            return Err(ClientError::rpc(400, "PHONE_CODE_INVALID"));
        }
        state.authorized = true;
        Ok(state.account.clone())
    }

    async fn export_login_token(&self) -> Result<LoginTokenState, ClientError> {
        let mut state = self.record("export_login_token");
        state.qr_exports += 1;
        if state
            .qr_success_after
            .is_some_and(|after| state.qr_exports > after)
        {
            if let Some(dc_id) = state.qr_migrate_dc {
                return Ok(LoginTokenState::MigrateTo {
                    dc_id,
                    token: b"migrate".to_vec(),
                });
            }
            state.authorized = true;
            return Ok(LoginTokenState::Success(state.account.clone()));
        }
        let marker = u8::try_from(state.qr_exports % 256).unwrap_or_default();
        Ok(LoginTokenState::Token {
            token: vec![marker; 16],
            expires: Utc::now() + chrono::Duration::seconds(30),
        })
    }

    async fn import_login_token(&self, dc_id: i32, token: &[u8]) -> Result<LoginTokenState, ClientError> {
        let mut state = self.record(&format!("import_login_token:{dc_id}"));
        if state.qr_migrate_dc != Some(dc_id) || token != b"migrate" {
            return Err(ClientError::rpc(400, "AUTH_TOKEN_INVALID"));
        }
        state.authorized = true;
        Ok(LoginTokenState::Success(state.account.clone()))
    }

    async fn export_session(&self) -> Result<SessionBlob, ClientError> {
        self.record("export_session");
        Ok(SessionBlob::new("fake-session"))
    }

    async fn get_me(&self) -> Result<AccountInfo, ClientError> {
        let state = self.record("get_me");
        if state.authorized {
            Ok(state.account.clone())
        } else {
            Err(ClientError::rpc(401, "AUTH_KEY_UNREGISTERED"))
        }
    }

    async fn log_out(&self) -> Result<(), ClientError> {
        let mut state = self.record("log_out");
        if let Some(err) = state.log_out_error.clone() {
            return Err(err);
        }
        state.authorized = false;
        Ok(())
    }

    async fn resolve_chat(&self, chat: &ChatRef) -> Result<ChatInfo, ClientError> {
        let state = self.record("resolve_chat");
        match chat {
            ChatRef::Username(name) => state
                .chats
                .get(name)
                .cloned()
                .ok_or_else(|| ClientError::rpc(400, "USERNAME_NOT_OCCUPIED")),
            ChatRef::Id(id) => state
                .chats
                .values()
                .find(|c| c.bot_api_id() == *id)
                .cloned()
                .ok_or_else(|| ClientError::rpc(400, "PEER_ID_INVALID")),
        }
    }

    async fn upload_photo(&self, bytes: &[u8], file_name: &str) -> Result<String, ClientError> {
        self.record("upload_photo");
        Ok(format!("{file_name}:{}", bytes.len()))
    }

    async fn send_text(&self, chat: &ChatInfo, text: &str) -> Result<SentMessage, ClientError> {
        let mut state = self.record("send_text");
        if let Some(err) = state.send_error.clone() {
            return Err(err);
        }
        state.sent.push(Sent {
            kind: "text",
            chat_id: Some(chat.bot_api_id()),
            text: text.to_owned(),
        });
        Ok(SentMessage {
            message_id: Some(state.next_id()),
            chat_id: chat.bot_api_id(),
        })
    }

    async fn send_photo(
        &self,
        chat: &ChatInfo,
        _photo: String,
        caption: &str,
    ) -> Result<SentMessage, ClientError> {
        let mut state = self.record("send_photo");
        if let Some(err) = state.send_error.clone() {
            return Err(err);
        }
        state.sent.push(Sent {
            kind: "photo",
            chat_id: Some(chat.bot_api_id()),
            text: caption.to_owned(),
        });
        Ok(SentMessage {
            message_id: Some(state.next_id()),
            chat_id: chat.bot_api_id(),
        })
    }

    async fn send_story(
        &self,
        peer: StoryPeer<'_>,
        _photo: String,
        draft: &StoryDraft,
    ) -> Result<Option<i32>, ClientError> {
        let (call, chat_id) = match peer {
            StoryPeer::SelfAccount => ("send_story:self", None),
            StoryPeer::Chat(chat) => ("send_story:chat", Some(chat.bot_api_id())),
        };

        let delay = self.record(call).story_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.shared.lock();
        let error = match peer {
            StoryPeer::SelfAccount => state.self_story_error.clone(),
            StoryPeer::Chat(_) => state.chat_story_error.clone(),
        };
        if let Some(err) = error {
            return Err(err);
        }
        state.sent.push(Sent {
            kind: "story",
            chat_id,
            text: draft.caption.clone(),
        });
        Ok(Some(state.next_id()))
    }

    async fn can_send_story(&self, _chat: &ChatInfo) -> Result<(), ClientError> {
        let state = self.record("can_send_story");
        match state.can_send_story_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn disconnect(&self) {
        self.record("disconnect");
    }
}
