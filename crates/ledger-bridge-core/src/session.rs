// crates/ledger-bridge-core/src/session.rs
// ============================================================================
// Module: Session Identifiers
// Description: Opaque session identifiers and per-session directory layout.
// Purpose: Map transport-issued session ids onto private working directories.
// Dependencies: serde, sha2
// ============================================================================

//! ## Overview
//! Session identifiers are issued by the transport layer and are opaque to the
//! core. Each session owns a private working directory whose path is derived
//! deterministically from the identifier: a sanitized, length-capped prefix
//! for readability plus a SHA-256 suffix so distinct identifiers never share a
//! directory even when sanitization collapses them to the same prefix.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted session identifier length in bytes.
pub const MAX_SESSION_ID_LENGTH: usize = 256;
/// Directory under the data root that holds per-session working directories.
pub const SESSIONS_DIR_NAME: &str = "sessions";
/// Maximum length of the readable prefix in a session directory name.
const MAX_DIR_PREFIX_LENGTH: usize = 48;
/// Number of digest bytes rendered into the directory suffix.
const DIGEST_SUFFIX_BYTES: usize = 8;

// ============================================================================
// SECTION: Session Identifier
// ============================================================================

/// Session identifier supplied by the transport layer.
///
/// # Invariants
/// - Stable for the lifetime of a client's logical session.
/// - Never generated by the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new session identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when the identifier is usable as a pool key.
    ///
    /// Identifiers must be non-empty, at most [`MAX_SESSION_ID_LENGTH`] bytes,
    /// and free of control characters.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_SESSION_ID_LENGTH
            && !self.0.chars().any(char::is_control)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Working Directories
// ============================================================================

/// Returns the private working directory for a session under `data_dir`.
///
/// The same identifier always maps to the same directory.
#[must_use]
pub fn session_working_dir(data_dir: &Path, session: &SessionId) -> PathBuf {
    data_dir.join(SESSIONS_DIR_NAME).join(session_dir_name(session))
}

/// Builds the directory name for a session identifier.
fn session_dir_name(session: &SessionId) -> String {
    let mut prefix: String = session
        .as_str()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .take(MAX_DIR_PREFIX_LENGTH)
        .collect();
    if prefix.is_empty() {
        prefix.push_str("session");
    }
    let digest = Sha256::digest(session.as_str().as_bytes());
    let mut suffix = String::with_capacity(DIGEST_SUFFIX_BYTES * 2);
    for byte in digest.iter().take(DIGEST_SUFFIX_BYTES) {
        suffix.push_str(&format!("{byte:02x}"));
    }
    format!("{prefix}-{suffix}")
}

// ============================================================================
// SECTION: Tests
// ============================================================================
