//! Login state machine for one Telegram user account.
//!
//! ```text
//! Unauthenticated ──request_code──▶ CodeRequested ──verify_code──▶ Authorized
//!        │                               │
//!        │                               └──(2FA enabled)──▶ PasswordRequired
//!        └──start_qr_login──▶ QrPending ──(scanned)──▶ Authorized
//! ```
//!
//! The machine owns the client connection for its phone number and persists
//! the session through [`SessionStore`] once a login completes. Protocol
//! failures are returned as [`TelegramError`] values; nothing is retried here.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::client::{AccountClient, AccountInfo, ClientConnector, LoginTokenState};
use super::{Cooldown, TelegramError};
use crate::config::{Credentials, MIN_CODE_COOLDOWN_SECS, mask_phone};
use crate::session::SessionStore;

/// How long a requested login code is accepted locally.
pub const CODE_VALIDITY: Duration = Duration::from_secs(600);

/// Interval between QR login status checks.
pub const QR_POLL_INTERVAL: Duration = Duration::from_secs(3);

type LoginTokenOf<C> = <<C as ClientConnector>::Client as AccountClient>::LoginToken;

/// Where the account is in the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Unauthenticated,
    CodeRequested,
    /// The account has 2FA enabled; password login is not supported.
    PasswordRequired,
    QrPending,
    Authorized,
}

/// Outcome of a successful [`AuthStateMachine::request_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRequest {
    Sent,
    AlreadyAuthorized,
}

/// Outcome of one QR login status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrPoll {
    /// Waiting for another device to scan `url`.
    Pending { url: String, expires: DateTime<Utc> },
    Authorized(AccountInfo),
}

/// Result of starting a QR login.
#[derive(Debug)]
pub enum QrLogin<'a, C: ClientConnector> {
    AlreadyAuthorized(AccountInfo),
    Pending(QrHandle<'a, C>),
}

/// A QR login waiting to be confirmed from another device.
#[derive(Debug)]
pub struct QrHandle<'a, C: ClientConnector> {
    machine: &'a mut AuthStateMachine<C>,
    url: String,
    expires: DateTime<Utc>,
}

impl<C: ClientConnector> QrHandle<'_, C> {
    /// `tg://login?token=…` URL to render as a QR code.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    /// Polls until the login is confirmed or `timeout` elapses.
    pub async fn wait(self, timeout: Duration) -> Result<AccountInfo, TelegramError> {
        self.machine.wait_qr_login(timeout).await
    }
}

struct PendingCode<T> {
    /// Holds the phone code hash. Never persisted or logged.
    token: T,
    requested_at: Instant,
}

struct PendingQr {
    url: String,
    expires: DateTime<Utc>,
}

/// Drives one account through login and hands out its authorized client.
pub struct AuthStateMachine<C: ClientConnector> {
    credentials: Credentials,
    connector: C,
    store: Arc<SessionStore>,
    client: Option<C::Client>,

    /// Whether the open connection was built from a stored session.
    resumed_session: bool,

    phase: AuthPhase,
    pending_code: Option<PendingCode<LoginTokenOf<C>>>,
    pending_qr: Option<PendingQr>,
    cooldown: Cooldown,
    code_validity: Duration,
    qr_poll_interval: Duration,
}

impl<C: ClientConnector> AuthStateMachine<C> {
    #[must_use]
    pub fn new(credentials: Credentials, connector: C, store: Arc<SessionStore>) -> Self {
        Self {
            credentials,
            connector,
            store,
            client: None,
            resumed_session: false,
            phase: AuthPhase::Unauthenticated,
            pending_code: None,
            pending_qr: None,
            cooldown: Cooldown::from_secs(MIN_CODE_COOLDOWN_SECS),
            code_validity: CODE_VALIDITY,
            qr_poll_interval: QR_POLL_INTERVAL,
        }
    }

    /// Sets the minimum interval between code requests (never below 10 seconds).
    #[must_use]
    pub fn with_code_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Cooldown::new(cooldown.max(Duration::from_secs(MIN_CODE_COOLDOWN_SECS)));
        self
    }

    #[must_use]
    pub fn with_qr_poll_interval(mut self, interval: Duration) -> Self {
        self.qr_poll_interval = interval;
        self
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Whether a client connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Returns the open client, connecting first if needed.
    ///
    /// The client is built from the stored session for this phone number if
    /// there is one, otherwise from a fresh anonymous session.
    pub async fn ensure_connected(&mut self) -> Result<&C::Client, TelegramError> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                let session = self.store.load(self.credentials.phone());
                info!(
                    "Connecting to Telegram as {} ({} session)...",
                    mask_phone(self.credentials.phone()),
                    if session.is_some() { "stored" } else { "new" }
                );

                let client = self
                    .connector
                    .connect(&self.credentials, session.as_ref())
                    .await?;
                self.resumed_session = session.is_some();
                client
            }
        };

        Ok(self.client.insert(client))
    }

    /// Queries whether the connected client is authorized.
    ///
    /// A stored session that no longer authorizes has been revoked; it is
    /// deleted from the store.
    pub async fn is_authorized(&mut self) -> Result<bool, TelegramError> {
        let result = self.ensure_connected().await?.is_authorized().await;

        match result {
            Ok(true) => {
                self.phase = AuthPhase::Authorized;
                Ok(true)
            }
            Ok(false) => {
                self.on_unauthorized();
                Ok(false)
            }
            Err(err) if err.as_rpc().is_some_and(super::RpcFailure::is_session_revoked) => {
                debug!("Authorization check reported a revoked session: {}", err);
                self.on_unauthorized();
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Sends a login code to the account's phone.
    ///
    /// Does nothing if already authorized. Refused with
    /// [`TelegramError::CooldownActive`] if the previous request was too recent.
    pub async fn request_code(&mut self) -> Result<CodeRequest, TelegramError> {
        if self.is_authorized().await? {
            debug!("Code request skipped: already authorized");
            return Ok(CodeRequest::AlreadyAuthorized);
        }

        if let Err(remaining) = self.cooldown.check() {
            return Err(TelegramError::CooldownActive {
                remaining_secs: ceil_secs(remaining),
            });
        }

        info!(
            "Requesting login code for {}...",
            mask_phone(self.credentials.phone())
        );

        let token = self
            .connected()?
            .request_login_code(self.credentials.phone())
            .await?;

        self.pending_code = Some(PendingCode {
            token,
            requested_at: Instant::now(),
        });
        self.pending_qr = None;
        self.cooldown.mark_used();
        self.phase = AuthPhase::CodeRequested;

        info!("Login code sent");
        Ok(CodeRequest::Sent)
    }

    /// Signs in with a code received after [`AuthStateMachine::request_code`].
    ///
    /// Whitespace and dashes in the code are ignored. Without a pending code
    /// request this fails with [`TelegramError::CodeExpired`].
    pub async fn verify_code(&mut self, code: &str) -> Result<AccountInfo, TelegramError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(TelegramError::InvalidCode);
        }

        if self.is_authorized().await? {
            debug!("Code verification skipped: already authorized");
            self.pending_code = None;
            return Ok(self.connected()?.get_me().await?);
        }

        let Some(pending) = self.pending_code.as_ref() else {
            return Err(TelegramError::CodeExpired);
        };

        if pending.requested_at.elapsed() >= self.code_validity {
            info!("Pending login code is too old, a new one must be requested");
            self.pending_code = None;
            self.phase = AuthPhase::Unauthenticated;
            return Err(TelegramError::CodeExpired);
        }

        info!("Signing in with login code...");
        let result = self.connected()?.sign_in(&pending.token, &code).await;

        match result {
            Ok(account) => {
                self.pending_code = None;
                self.phase = AuthPhase::Authorized;
                self.persist_session().await;
                info!("Signed in as {}", account.display_name());
                Ok(account)
            }
            Err(err) => {
                let err = TelegramError::from(err);
                match err {
                    TelegramError::CodeExpired | TelegramError::SignUpRequired => {
                        self.pending_code = None;
                        self.phase = AuthPhase::Unauthenticated;
                    }
                    TelegramError::PasswordRequired => {
                        warn!("Account has two-factor authentication enabled, which is not supported");
                        self.pending_code = None;
                        self.phase = AuthPhase::PasswordRequired;
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    /// Starts a QR login, an alternative to SMS codes when those are flood-limited.
    pub async fn start_qr_login(&mut self) -> Result<QrLogin<'_, C>, TelegramError> {
        match self.poll_qr_login().await? {
            QrPoll::Authorized(account) => Ok(QrLogin::AlreadyAuthorized(account)),
            QrPoll::Pending { url, expires } => {
                info!("QR login started, token expires at {}", expires);
                Ok(QrLogin::Pending(QrHandle {
                    machine: self,
                    url,
                    expires,
                }))
            }
        }
    }

    /// Checks a QR login once without blocking.
    ///
    /// Issues a login token when none is pending or the previous one expired,
    /// so the returned URL may change between calls.
    pub async fn poll_qr_login(&mut self) -> Result<QrPoll, TelegramError> {
        if self.is_authorized().await? {
            self.pending_qr = None;
            let account = self.connected()?.get_me().await?;
            return Ok(QrPoll::Authorized(account));
        }

        let mut state = self.connected()?.export_login_token().await?;
        if let LoginTokenState::MigrateTo { dc_id, token } = state {
            info!("QR login continues on datacenter {}", dc_id);
            state = self.connected()?.import_login_token(dc_id, &token).await?;
        }

        match state {
            LoginTokenState::Token { token, expires } => {
                let now = Utc::now();
                let pending = match self.pending_qr.take() {
                    Some(current) if current.expires > now => current,
                    _ => {
                        debug!("Issued new QR login token");
                        PendingQr {
                            url: qr_login_url(&token),
                            expires,
                        }
                    }
                };

                let poll = QrPoll::Pending {
                    url: pending.url.clone(),
                    expires: pending.expires,
                };
                self.pending_qr = Some(pending);
                self.pending_code = None;
                self.phase = AuthPhase::QrPending;
                Ok(poll)
            }
            LoginTokenState::Success(account) => {
                self.pending_qr = None;
                self.phase = AuthPhase::Authorized;
                self.persist_session().await;
                info!("QR login confirmed for {}", account.display_name());
                Ok(QrPoll::Authorized(account))
            }
            LoginTokenState::MigrateTo { dc_id, .. } => {
                self.pending_qr = None;
                self.phase = AuthPhase::Unauthenticated;
                Err(TelegramError::Transport(format!(
                    "QR login was redirected again, to datacenter {dc_id}"
                )))
            }
        }
    }

    /// Polls the QR login until it is confirmed or `timeout` elapses.
    pub async fn wait_qr_login(&mut self, timeout: Duration) -> Result<AccountInfo, TelegramError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let QrPoll::Authorized(account) = self.poll_qr_login().await? {
                return Ok(account);
            }

            let now = Instant::now();
            if now >= deadline {
                info!("QR login was not confirmed within {:?}", timeout);
                self.pending_qr = None;
                self.phase = AuthPhase::Unauthenticated;
                return Err(TelegramError::QrTimedOut);
            }
            tokio::time::sleep(self.qr_poll_interval.min(deadline - now)).await;
        }
    }

    /// Returns the client if the account is authorized.
    pub async fn authorized_client(&mut self) -> Result<&C::Client, TelegramError> {
        if !self.is_authorized().await? {
            return Err(TelegramError::NotAuthorized);
        }
        self.connected()
    }

    /// Fetches the authorized account's profile.
    pub async fn account_info(&mut self) -> Result<AccountInfo, TelegramError> {
        Ok(self.authorized_client().await?.get_me().await?)
    }

    /// Logs out remotely and deletes the stored session.
    ///
    /// The local copy is removed even if the remote call fails; that failure
    /// is still reported.
    pub async fn logout(&mut self) -> Result<(), TelegramError> {
        info!("Logging out {}...", mask_phone(self.credentials.phone()));

        let remote = match self.ensure_connected().await {
            Ok(client) => client.log_out().await.map_err(TelegramError::from),
            Err(err) => Err(err),
        };

        self.disconnect();
        let local = self.store.delete(self.credentials.phone());
        self.phase = AuthPhase::Unauthenticated;

        match remote {
            Ok(()) | Err(TelegramError::NotAuthorized) => {}
            Err(err) => return Err(err),
        }
        local?;
        info!("Logged out");
        Ok(())
    }

    /// Closes the connection. Pending code and QR logins are abandoned since
    /// they are bound to it.
    pub fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            debug!("Disconnecting client for {}", mask_phone(self.credentials.phone()));
            client.disconnect();
        }
        self.resumed_session = false;
        self.pending_code = None;
        self.pending_qr = None;
        if self.phase != AuthPhase::Authorized {
            self.phase = AuthPhase::Unauthenticated;
        }
    }

    fn connected(&self) -> Result<&C::Client, TelegramError> {
        self.client
            .as_ref()
            .ok_or_else(|| TelegramError::Transport("client is not connected".to_owned()))
    }

    fn on_unauthorized(&mut self) {
        if self.resumed_session {
            warn!(
                "Stored session for {} is no longer authorized, deleting it",
                mask_phone(self.credentials.phone())
            );
            if let Err(e) = self.store.delete(self.credentials.phone()) {
                warn!("Failed to delete revoked session: {}", e);
            }
            self.resumed_session = false;
        }
        if self.phase == AuthPhase::Authorized {
            self.phase = AuthPhase::Unauthenticated;
        }
    }

    /// Saves the current session. Failures are logged: the login itself
    /// succeeded, only resuming it later will not.
    async fn persist_session(&mut self) {
        let Some(client) = self.client.as_ref() else {
            return;
        };

        match client.export_session().await {
            Ok(blob) => match self.store.save(self.credentials.phone(), &blob) {
                Ok(()) => self.resumed_session = true,
                Err(e) => warn!("Failed to save session: {}", e),
            },
            Err(e) => warn!("Failed to export session: {}", e),
        }
    }
}

impl<C: ClientConnector> Drop for AuthStateMachine<C> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            client.disconnect();
        }
    }
}

impl<C: ClientConnector> std::fmt::Debug for AuthStateMachine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStateMachine")
            .field("credentials", &self.credentials)
            .field("phase", &self.phase)
            .field("connected", &self.client.is_some())
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

/// Strips whitespace and dashes users type into codes.
fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// Builds the `tg://login` URL for a QR login token.
pub fn qr_login_url(token: &[u8]) -> String {
    format!("tg://login?token={}", URL_SAFE_NO_PAD.encode(token))
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
