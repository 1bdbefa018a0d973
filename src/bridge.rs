//! Synchronous entry points over the async account layer.
//!
//! [`AsyncBridge`] runs one future to completion on its own runtime with a
//! wall-clock limit. [`Publisher`] uses it to expose the publish and login
//! operations to blocking callers such as request handlers or the CLI.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::config::{AppConfig, Credentials, PublisherSettings, mask_phone};
use crate::publish::{CapabilityProbe, CapabilityReport, PublishCoordinator, PublishRequest, PublishResult, StoryMode};
use crate::session::SessionStore;
use crate::telegram::{
    AccountInfo, AccountRegistry, AuthStateMachine, ClientConnector, CodeRequest, GrammersConnector,
    QrPoll, TelegramError,
};

/// Failures of the bridge itself, as opposed to the operation it ran.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The operation did not finish in time. It may still have taken effect remotely.
    #[error("Operation timed out after {0:?}; its outcome is unknown")]
    TimedOut(Duration),

    #[error("Blocking call made from inside an async runtime")]
    InsideRuntime,

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Runs async operations from synchronous code.
pub struct AsyncBridge {
    runtime: Runtime,
}

impl AsyncBridge {
    pub fn new() -> Result<Self, BridgeError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("story-publisher")
            .enable_all()
            .build()?;
        Ok(Self { runtime })
    }

    /// Blocks until `future` completes or `timeout` elapses.
    ///
    /// On timeout the future is dropped; nothing it was doing is resumed.
    pub fn run<F: Future>(&self, timeout: Duration, future: F) -> Result<F::Output, BridgeError> {
        if Handle::try_current().is_ok() {
            return Err(BridgeError::InsideRuntime);
        }

        self.runtime
            .block_on(tokio::time::timeout(timeout, future))
            .map_err(|_| BridgeError::TimedOut(timeout))
    }
}

impl std::fmt::Debug for AsyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncBridge").finish_non_exhaustive()
    }
}

/// Reply to a login step, shaped for an HTTP or CLI caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthReply {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl AuthReply {
    fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            error_kind: None,
            retry_after_secs: None,
        }
    }

    fn failure(error: &TelegramError) -> Self {
        Self {
            ok: false,
            message: error.to_string(),
            error_kind: Some(error.kind()),
            retry_after_secs: error.retry_after_secs(),
        }
    }
}

/// Blocking facade for one configured account.
pub struct Publisher<C: ClientConnector + Clone = GrammersConnector> {
    /// Declared before the bridge so connections close while its runtime is alive.
    registry: AccountRegistry<C>,
    bridge: AsyncBridge,
    credentials: Credentials,
    settings: PublisherSettings,
    coordinator: PublishCoordinator,
}

impl Publisher<GrammersConnector> {
    /// Builds a publisher backed by grammers from application configuration.
    pub fn from_config(config: &AppConfig, settings: PublisherSettings) -> Result<Self, BridgeError> {
        let store = Arc::new(SessionStore::new(&config.session_store_path));
        let connector = GrammersConnector::new(config.session_dir());
        Self::new(connector, store, config.credentials.clone(), settings)
    }
}

impl<C: ClientConnector + Clone> Publisher<C> {
    pub fn new(
        connector: C,
        store: Arc<SessionStore>,
        credentials: Credentials,
        settings: PublisherSettings,
    ) -> Result<Self, BridgeError> {
        Ok(Self {
            registry: AccountRegistry::new(connector, store, settings.code_cooldown),
            bridge: AsyncBridge::new()?,
            credentials,
            settings,
            coordinator: PublishCoordinator::new(),
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    /// Waits up to the call timeout for exclusive use of the account.
    ///
    /// The wait is separate from the operation's own timeout, so a caller
    /// queued behind a slow operation fails with
    /// [`TelegramError::AccountBusy`] without having sent anything.
    fn lock_account(&self) -> Result<OwnedMutexGuard<AuthStateMachine<C>>, TelegramError> {
        let account = self.registry.account(&self.credentials);
        match self.bridge.run(self.settings.call_timeout, account.lock_owned()) {
            Ok(guard) => Ok(guard),
            Err(BridgeError::TimedOut(after)) => {
                debug!(
                    "Account {} stayed busy for {:?}",
                    mask_phone(self.credentials.phone()),
                    after
                );
                Err(TelegramError::AccountBusy)
            }
            Err(e) => Err(TelegramError::Transport(e.to_string())),
        }
    }

    /// Maps the bridge's answer to the operation's result. A timed-out
    /// operation leaves its connection in an unknown state, so the connection
    /// is dropped.
    fn settle<T>(
        &self,
        auth: &mut AuthStateMachine<C>,
        outcome: Result<Result<T, TelegramError>, BridgeError>,
    ) -> Result<T, TelegramError> {
        match outcome {
            Ok(result) => result,
            Err(BridgeError::TimedOut(after)) => {
                warn!(
                    "Operation for {} timed out after {:?}, dropping the connection",
                    mask_phone(self.credentials.phone()),
                    after
                );
                auth.disconnect();
                Err(TelegramError::TimedOut)
            }
            Err(e) => Err(TelegramError::Transport(e.to_string())),
        }
    }

    /// Publishes a post and the requested stories.
    pub fn publish(&self, request: &PublishRequest) -> Result<PublishResult, TelegramError> {
        let timeout = if request.story_mode == StoryMode::None {
            self.settings.call_timeout
        } else {
            self.settings.story_timeout
        };

        let mut auth = self.lock_account()?;
        let outcome = self.bridge.run(timeout, self.coordinator.publish(&mut auth, request));
        self.settle(&mut auth, outcome)
    }

    /// Sends a login code to the account's phone.
    pub fn request_code(&self) -> AuthReply {
        let result = self.lock_account().and_then(|mut auth| {
            let outcome = self.bridge.run(self.settings.call_timeout, auth.request_code());
            self.settle(&mut auth, outcome)
        });

        match result {
            Ok(CodeRequest::Sent) => AuthReply::success(format!(
                "Login code sent to {}",
                mask_phone(self.credentials.phone())
            )),
            Ok(CodeRequest::AlreadyAuthorized) => AuthReply::success("Already authorized"),
            Err(e) => AuthReply::failure(&e),
        }
    }

    /// Completes login with the code received on the phone.
    pub fn verify_code(&self, code: &str) -> AuthReply {
        let result = self.lock_account().and_then(|mut auth| {
            let outcome = self.bridge.run(self.settings.call_timeout, auth.verify_code(code));
            self.settle(&mut auth, outcome)
        });

        match result {
            Ok(info) => AuthReply::success(format!("Signed in as {}", info.display_name())),
            Err(e) => AuthReply::failure(&e),
        }
    }

    /// Reports story support for `destination`.
    pub fn check_capability(&self, destination: &str) -> CapabilityReport {
        let report = self.lock_account().and_then(|mut auth| {
            let outcome = self.bridge.run(self.settings.call_timeout, async {
                Ok::<_, TelegramError>(CapabilityProbe.probe(&mut auth, destination).await)
            });
            self.settle(&mut auth, outcome)
        });

        report.unwrap_or_else(|e| {
            debug!("Capability probe did not finish: {}", e);
            CapabilityReport::unsupported(destination, e.to_string())
        })
    }

    pub fn is_authorized(&self) -> Result<bool, TelegramError> {
        let mut auth = self.lock_account()?;
        let outcome = self.bridge.run(self.settings.call_timeout, auth.is_authorized());
        self.settle(&mut auth, outcome)
    }

    pub fn account_info(&self) -> Result<AccountInfo, TelegramError> {
        let mut auth = self.lock_account()?;
        let outcome = self.bridge.run(self.settings.call_timeout, auth.account_info());
        self.settle(&mut auth, outcome)
    }

    /// Checks a QR login once; starts one if none is pending.
    pub fn poll_qr_login(&self) -> Result<QrPoll, TelegramError> {
        let mut auth = self.lock_account()?;
        let outcome = self.bridge.run(self.settings.call_timeout, auth.poll_qr_login());
        self.settle(&mut auth, outcome)
    }

    /// Waits for a pending QR login to be confirmed.
    pub fn wait_qr_login(&self) -> Result<AccountInfo, TelegramError> {
        let qr_timeout = self.settings.qr_timeout;
        let mut auth = self.lock_account()?;
        let outcome = self
            .bridge
            .run(qr_timeout + self.settings.call_timeout, auth.wait_qr_login(qr_timeout));
        self.settle(&mut auth, outcome)
    }

    /// Logs out and deletes the stored session.
    pub fn logout(&self) -> Result<(), TelegramError> {
        let mut auth = self.lock_account()?;
        let outcome = self.bridge.run(self.settings.call_timeout, auth.logout());
        self.settle(&mut auth, outcome)
    }

    /// Closes the account's connection, if open.
    pub fn disconnect(&self) {
        match self.lock_account() {
            Ok(mut auth) => auth.disconnect(),
            Err(e) => debug!("Connection not closed: {}", e),
        }
    }
}

impl<C: ClientConnector + Clone> std::fmt::Debug for Publisher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("credentials", &self.credentials)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
