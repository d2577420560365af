//! Credential persistence: session token and conversation id, surviving
//! restarts.
//!
//! Two files under the profile directory: `credentials.json` (the store,
//! read synchronously at startup) and `session_token.json` (a mirror of the
//! token with a recorded expiry, read by the edge gate without going through
//! the store). The store never validates token shape or expiry.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Declared lifetime of the mirrored token (matches the 30-day cookie
/// max-age of the web client). Recorded in the mirror, never enforced.
pub const TOKEN_MIRROR_TTL_DAYS: i64 = 30;

/// Expiry threshold in seconds carried over from the web client's config.
/// Present for parity; nothing enforces it.
pub const TOKEN_EXPIRY_THRESHOLD_SECS: u64 = 300;

/// The two logical keys the store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKey {
    SessionToken,
    ConversationId,
}

/// On-disk shape of `credentials.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
}

/// Mirror of the session token (`session_token.json`), the side channel the
/// edge gate reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMirror {
    pub token: String,
    /// Write time plus TOKEN_MIRROR_TTL_DAYS. Recorded only.
    pub expires_at: DateTime<Utc>,
}

/// Durable key-value persistence for the session token and conversation id.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn store_path(&self) -> PathBuf {
        self.dir.join("credentials.json")
    }

    fn mirror_path(&self) -> PathBuf {
        self.dir.join("session_token.json")
    }

    /// Load the store file. Missing or invalid file => empty store.
    fn load_file(&self) -> CredentialFile {
        let s = match std::fs::read_to_string(self.store_path()) {
            Ok(s) => s,
            Err(_) => return CredentialFile::default(),
        };
        serde_json::from_str(&s).unwrap_or_default()
    }

    fn save_file(&self, file: &CredentialFile) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let s = serde_json::to_string_pretty(file)?;
        std::fs::write(self.store_path(), s)?;
        Ok(())
    }

    /// Read a key. Absent file, absent key, or blank value => None.
    pub fn read(&self, key: CredentialKey) -> Option<String> {
        let file = self.load_file();
        let value = match key {
            CredentialKey::SessionToken => file.session_token,
            CredentialKey::ConversationId => file.conversation_id,
        };
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Overwrite a key. No merge semantics.
    pub fn write(&self, key: CredentialKey, value: &str) -> Result<()> {
        let mut file = self.load_file();
        match key {
            CredentialKey::SessionToken => file.session_token = Some(value.to_string()),
            CredentialKey::ConversationId => file.conversation_id = Some(value.to_string()),
        }
        self.save_file(&file)
    }

    /// Remove a key. Clearing an absent key is a no-op, not an error.
    pub fn clear(&self, key: CredentialKey) -> Result<()> {
        let mut file = self.load_file();
        match key {
            CredentialKey::SessionToken => file.session_token = None,
            CredentialKey::ConversationId => file.conversation_id = None,
        }
        self.save_file(&file)
    }

    /// Write the token mirror with a fresh expiry.
    pub fn write_token_mirror(&self, token: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mirror = TokenMirror {
            token: token.to_string(),
            expires_at: Utc::now() + Duration::days(TOKEN_MIRROR_TTL_DAYS),
        };
        let s = serde_json::to_string_pretty(&mirror)?;
        std::fs::write(self.mirror_path(), s)?;
        Ok(())
    }

    /// Token from the mirror file, if present. Expiry is not checked.
    pub fn read_token_mirror(&self) -> Option<String> {
        let s = std::fs::read_to_string(self.mirror_path()).ok()?;
        let mirror: TokenMirror = serde_json::from_str(&s).ok()?;
        let t = mirror.token.trim().to_string();
        if t.is_empty() {
            None
        } else {
            Some(t)
        }
    }

    /// Remove the mirror file. Missing file is a no-op.
    pub fn clear_token_mirror(&self) -> Result<()> {
        match std::fs::remove_file(self.mirror_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Default profile directory (~/.taskmate).
pub fn default_profile_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".taskmate"))
        .unwrap_or_else(|| PathBuf::from("."))
}
