//! Credential persistence.
//!
//! The credential blob is opaque to Courier: the protocol client produces it
//! and reads it back. The only field looked at here is `registered`, which
//! says whether this device has been linked to an account yet.
//!
//! # File Layout
//!
//! ```text
//! <session_dir>/
//! └── creds.json       # The whole blob, rewritten on every update
//! ```
//!
//! Saves write `creds.json.tmp` and rename it over `creds.json`.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CREDS_FILE: &str = "creds.json";
const CREDS_TEMP_FILE: &str = "creds.json.tmp";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Credential blob must be a JSON object")]
    NotAnObject,
}

/// The loaded authentication state.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub creds: Value,
}

impl AuthState {
    /// Fresh, unregistered credentials.
    pub fn empty() -> Self {
        Self {
            creds: Value::Object(Map::new()),
        }
    }

    pub fn new(creds: Value) -> Result<Self, CredentialError> {
        if !creds.is_object() {
            return Err(CredentialError::NotAnObject);
        }
        Ok(Self { creds })
    }

    pub fn is_registered(&self) -> bool {
        self.creds
            .get("registered")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Apply a partial update: each top-level key replaces the stored one.
    pub fn merge(&mut self, update: &Value) -> Result<(), CredentialError> {
        let Value::Object(update) = update else {
            return Err(CredentialError::NotAnObject);
        };
        let Value::Object(creds) = &mut self.creds else {
            return Err(CredentialError::NotAnObject);
        };
        for (key, value) in update {
            creds.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::empty()
    }
}

/// Loads and saves the credential blob.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<AuthState, CredentialError>;

    fn save(&self, state: &AuthState) -> Result<(), CredentialError>;
}

/// Stores credentials as JSON under a session directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CredentialStore for FileCredentialStore {
    /// A missing file loads as empty credentials.
    fn load(&self) -> Result<AuthState, CredentialError> {
        let file_path = self.dir.join(CREDS_FILE);
        if !file_path.exists() {
            return Ok(AuthState::empty());
        }

        let contents = fs::read_to_string(&file_path)?;
        AuthState::new(serde_json::from_str(&contents)?)
    }

    fn save(&self, state: &AuthState) -> Result<(), CredentialError> {
        fs::create_dir_all(&self.dir)?;

        let file_path = self.dir.join(CREDS_FILE);
        let temp_path = self.dir.join(CREDS_TEMP_FILE);

        let json = serde_json::to_string_pretty(&state.creds)?;
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &file_path)?;

        Ok(())
    }
}
