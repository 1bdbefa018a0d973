//! One [`AuthStateMachine`] per phone number, shared between callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use super::AuthStateMachine;
use super::client::ClientConnector;
use crate::config::{Credentials, mask_phone};
use crate::session::SessionStore;

/// An account's state machine; the async mutex serializes operations on it.
pub type SharedAccount<C> = Arc<tokio::sync::Mutex<AuthStateMachine<C>>>;

/// Keeps login state per account across requests.
pub struct AccountRegistry<C: ClientConnector + Clone> {
    connector: C,
    store: Arc<SessionStore>,
    code_cooldown: Duration,
    accounts: Mutex<HashMap<String, (Credentials, SharedAccount<C>)>>,
}

impl<C: ClientConnector + Clone> AccountRegistry<C> {
    pub fn new(connector: C, store: Arc<SessionStore>, code_cooldown: Duration) -> Self {
        Self {
            connector,
            store,
            code_cooldown,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the state machine for the credentials' phone number, creating
    /// it on first use. Changed API credentials replace the existing entry.
    pub fn account(&self, credentials: &Credentials) -> SharedAccount<C> {
        let mut accounts = self.accounts.lock();

        if let Some((known, account)) = accounts.get(credentials.phone()) {
            if known == credentials {
                return Arc::clone(account);
            }
            info!(
                "API credentials for {} changed, starting a new login state",
                mask_phone(credentials.phone())
            );
        }

        let account = Arc::new(tokio::sync::Mutex::new(
            AuthStateMachine::new(
                credentials.clone(),
                self.connector.clone(),
                Arc::clone(&self.store),
            )
            .with_code_cooldown(self.code_cooldown),
        ));
        accounts.insert(
            credentials.phone().to_owned(),
            (credentials.clone(), Arc::clone(&account)),
        );
        account
    }

    /// Drops the state machine for `phone`, closing its connection once no
    /// caller holds it.
    pub fn remove(&self, phone: &str) -> bool {
        self.accounts.lock().remove(phone).is_some()
    }

    pub fn len(&self) -> usize {
        self.accounts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.lock().is_empty()
    }
}

impl<C: ClientConnector + Clone> std::fmt::Debug for AccountRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRegistry")
            .field("store", &self.store.path())
            .field("accounts", &self.len())
            .finish_non_exhaustive()
    }
}
