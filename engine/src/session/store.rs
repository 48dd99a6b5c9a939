//! Persistence of the session token and login credentials

use super::{Credentials, Session};
use crate::error::SessionError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Two independent slots: the active session and the saved credentials
pub trait SecretStore: Send + Sync {
    fn load_session(&self) -> Result<Option<Session>, SessionError>;
    fn save_session(&self, session: &Session) -> Result<(), SessionError>;
    fn clear_session(&self) -> Result<(), SessionError>;

    fn load_credentials(&self) -> Result<Option<Credentials>, SessionError>;
    fn save_credentials(&self, credentials: &Credentials) -> Result<(), SessionError>;
    fn clear_credentials(&self) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Secrets {
    #[serde(default)]
    session: Option<Session>,
    #[serde(default)]
    credentials: Option<Credentials>,
}

/// Secrets kept in a JSON file
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Secrets, SessionError> {
        if !self.path.exists() {
            return Ok(Secrets::default());
        }
        let content = fs::read_to_string(&self.path).map_err(store_error)?;
        serde_json::from_str(&content).map_err(store_error)
    }

    fn update<F>(&self, f: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut Secrets),
    {
        let _guard = self.lock.lock();
        let mut secrets = self.read()?;
        f(&mut secrets);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(store_error)?;
        }
        let content = serde_json::to_string_pretty(&secrets).map_err(store_error)?;
        fs::write(&self.path, content).map_err(store_error)
    }
}

fn store_error(err: impl std::fmt::Display) -> SessionError {
    SessionError::Store(err.to_string())
}

impl SecretStore for FileSecretStore {
    fn load_session(&self) -> Result<Option<Session>, SessionError> {
        let _guard = self.lock.lock();
        Ok(self.read()?.session)
    }

    fn save_session(&self, session: &Session) -> Result<(), SessionError> {
        self.update(|s| s.session = Some(session.clone()))
    }

    fn clear_session(&self) -> Result<(), SessionError> {
        self.update(|s| s.session = None)
    }

    fn load_credentials(&self) -> Result<Option<Credentials>, SessionError> {
        let _guard = self.lock.lock();
        Ok(self.read()?.credentials)
    }

    fn save_credentials(&self, credentials: &Credentials) -> Result<(), SessionError> {
        self.update(|s| s.credentials = Some(credentials.clone()))
    }

    fn clear_credentials(&self) -> Result<(), SessionError> {
        self.update(|s| s.credentials = None)
    }
}

/// Secrets held for the lifetime of the process
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<Secrets>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session and credentials
    pub fn with(session: Option<Session>, credentials: Option<Credentials>) -> Self {
        Self {
            secrets: Mutex::new(Secrets {
                session,
                credentials,
            }),
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn load_session(&self) -> Result<Option<Session>, SessionError> {
        Ok(self.secrets.lock().session.clone())
    }

    fn save_session(&self, session: &Session) -> Result<(), SessionError> {
        self.secrets.lock().session = Some(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> Result<(), SessionError> {
        self.secrets.lock().session = None;
        Ok(())
    }

    fn load_credentials(&self) -> Result<Option<Credentials>, SessionError> {
        Ok(self.secrets.lock().credentials.clone())
    }

    fn save_credentials(&self, credentials: &Credentials) -> Result<(), SessionError> {
        self.secrets.lock().credentials = Some(credentials.clone());
        Ok(())
    }

    fn clear_credentials(&self) -> Result<(), SessionError> {
        self.secrets.lock().credentials = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StationAddress;

    fn station() -> StationAddress {
        StationAddress::new("nas.local", 5000)
    }

    #[test]
    fn file_store_keeps_slots_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets.json"));

        assert!(store.load_session().unwrap().is_none());

        store
            .save_session(&Session::new("sid-1", "admin", station()))
            .unwrap();
        store
            .save_credentials(&Credentials::new(station(), "admin", "pw"))
            .unwrap();
        store.clear_session().unwrap();

        assert!(store.load_session().unwrap().is_none());
        let creds = store.load_credentials().unwrap().unwrap();
        assert_eq!(creds.login, "admin");

        let reopened = FileSecretStore::new(store.path());
        assert_eq!(reopened.load_credentials().unwrap().unwrap().password, "pw");
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        fs::write(&path, "not json").unwrap();

        let store = FileSecretStore::new(&path);
        assert!(matches!(store.load_session(), Err(SessionError::Store(_))));
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySecretStore::new();
        store
            .save_session(&Session::new("sid", "admin", station()))
            .unwrap();
        assert_eq!(store.load_session().unwrap().unwrap().sid, "sid");
        store.clear_session().unwrap();
        assert!(store.load_session().unwrap().is_none());
    }
}
