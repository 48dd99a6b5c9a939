//! Session state shared by every sync manager
//!
//! Holds the active session token and the saved login credentials, and
//! publishes [`SessionStatus`] transitions. Login, logout and restore are
//! serialized; expiry is a non-destructive reset that keeps the credentials.

pub mod auth;
pub mod store;

pub use auth::{Authenticator, DsAuthenticator};
pub use store::{FileSecretStore, MemorySecretStore, SecretStore};

use crate::db::{Cache, User};
use crate::error::SessionError;
use crate::observable::Observable;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Connection status of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotConnected = 0,
    PendingValidation = 1,
    Connected = 2,
}

/// Where the station listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationAddress {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
}

impl StationAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secure: false,
        }
    }

    /// Parse `http(s)://host[:port]`, defaulting to the station's standard ports
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(raw)?;
        let host = url.host_str().ok_or(url::ParseError::EmptyHost)?.to_string();
        let secure = url.scheme() == "https";
        let port = url.port().unwrap_or(if secure { 5001 } else { 5000 });
        Ok(Self { host, port, secure })
    }

    /// `http(s)://host:port/webapi/`
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        let scheme = if self.secure { "https" } else { "http" };
        Url::parse(&format!("{}://{}:{}/webapi/", scheme, self.host, self.port))
    }

    /// Full URL of a web API path, e.g. `DownloadStation/task.cgi`
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url()?.join(path)
    }
}

/// Authenticated session on a station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub sid: String,
    pub account: String,
    pub station: StationAddress,
}

impl Session {
    pub fn new(sid: impl Into<String>, account: impl Into<String>, station: StationAddress) -> Self {
        Self {
            sid: sid.into(),
            account: account.into(),
            station,
        }
    }
}

/// Saved login, used to sign in again after the session expires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub station: StationAddress,
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(station: StationAddress, login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            station,
            login: login.into(),
            password: password.into(),
        }
    }

    /// Same station and account, ignoring the password
    pub fn same_account(&self, other: &Credentials) -> bool {
        self.station.host == other.station.host
            && self.station.port == other.station.port
            && self.login == other.login
    }
}

/// Process-wide session holder
pub struct SessionState {
    status: Observable<SessionStatus>,
    session: RwLock<Option<Session>>,
    credentials: RwLock<Option<Credentials>>,
    /// Held by login, logout and restore
    transition: tokio::sync::Mutex<()>,
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn SecretStore>,
    cache: Cache,
}

impl SessionState {
    /// Create a disconnected session state, restoring saved credentials
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn SecretStore>,
        cache: Cache,
    ) -> Self {
        let credentials = match store.load_credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("Failed to load saved credentials: {}", e);
                None
            }
        };

        Self {
            status: Observable::new(SessionStatus::NotConnected),
            session: RwLock::new(None),
            credentials: RwLock::new(credentials),
            transition: tokio::sync::Mutex::new(()),
            authenticator,
            store,
            cache,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.get()
    }

    /// Status publisher, for observers of session transitions
    pub fn state(&self) -> &Observable<SessionStatus> {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected && self.session.read().is_some()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    /// Sign in and install the new session.
    ///
    /// A second login while one is running is rejected. Signing in to a
    /// different account wipes the cache.
    pub async fn login(
        &self,
        station: StationAddress,
        login: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        let _guard = self
            .transition
            .try_lock()
            .map_err(|_| SessionError::LoginInProgress)?;

        info!("Logging in as {} on {}:{}", login, station.host, station.port);
        let session = self.authenticator.login(&station, login, password).await?;
        let credentials = Credentials::new(station, login, password);

        self.store.save_session(&session)?;
        self.store.save_credentials(&credentials)?;

        let switched = self
            .credentials
            .read()
            .as_ref()
            .map_or(true, |saved| !saved.same_account(&credentials));
        if switched {
            // Stop the previous account's queues before its records go away
            if self.session.write().take().is_some() {
                self.status.set_if_changed(SessionStatus::NotConnected);
            }
            info!("New account, resetting local cache");
            self.cache.write(|tx| {
                tx.delete_all()?;
                tx.put_user(&User::new(login))
            })?;
        }

        *self.credentials.write() = Some(credentials);
        *self.session.write() = Some(session);
        self.status.set(SessionStatus::Connected);
        info!("Session connected");
        Ok(())
    }

    /// Close the session and forget the saved credentials
    pub async fn logout(&self) -> Result<(), SessionError> {
        let _guard = self.transition.lock().await;

        if let Some(session) = self.session() {
            if let Err(e) = self.authenticator.logout(&session).await {
                warn!("Remote logout failed: {}", e);
            }
        }

        *self.credentials.write() = None;
        self.reset();
        self.store.clear_credentials()?;
        info!("Logged out");
        Ok(())
    }

    /// Drop the active session but keep the credentials
    pub fn expire(&self) {
        warn!("Session expired");
        self.reset();
    }

    /// Expire only if `sid` is still the active session token.
    ///
    /// Returns whether the session was dropped.
    pub fn expire_if_current(&self, sid: &str) -> bool {
        if self.session.read().as_ref().map(|s| s.sid.as_str()) != Some(sid) {
            return false;
        }
        self.expire();
        true
    }

    /// Revalidate a persisted session. Returns whether it was accepted.
    pub async fn restore(&self) -> Result<bool, SessionError> {
        let _guard = self.transition.lock().await;

        let session = match self.store.load_session()? {
            Some(session) => session,
            None => return Ok(false),
        };

        info!("Validating saved session on {}", session.station.host);
        self.status.set(SessionStatus::PendingValidation);

        match self.authenticator.ping(&session.station).await {
            Ok(()) => {
                *self.session.write() = Some(session);
                self.status.set(SessionStatus::Connected);
                info!("Saved session restored");
                Ok(true)
            }
            Err(e) => {
                warn!("Station unreachable, dropping saved session: {}", e);
                if let Err(e) = self.store.clear_session() {
                    warn!("Failed to clear saved session: {}", e);
                }
                self.status.set(SessionStatus::NotConnected);
                Ok(false)
            }
        }
    }

    fn reset(&self) {
        self.session.write().take();
        if let Err(e) = self.store.clear_session() {
            warn!("Failed to clear saved session: {}", e);
        }
        self.status.set_if_changed(SessionStatus::NotConnected);
    }
}
