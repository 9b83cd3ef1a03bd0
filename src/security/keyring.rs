//! Keyring integration for session storage
//! Falls back to file storage if keyring is unavailable

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::backend::Session;
use crate::config::BackendKind;

const SERVICE_NAME: &str = "questline";

fn entry_name(kind: BackendKind) -> String {
    format!("session-{}", kind)
}

/// Get the path for the fallback session file
fn session_file_path(kind: BackendKind) -> Result<PathBuf> {
    let path = crate::config::config_path()?;
    let dir = path.parent().context("Config path has no parent")?;
    fs::create_dir_all(dir).context("Failed to create config directory")?;
    Ok(dir.join(format!("{}.json", entry_name(kind))))
}

/// Store a session - tries keyring first, falls back to file
pub fn save_session(kind: BackendKind, session: &Session) -> Result<()> {
    let json = serde_json::to_string(session).context("Failed to serialize session")?;

    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, &entry_name(kind)) {
        if entry.set_password(&json).is_ok() {
            return Ok(());
        }
    }

    tracing::debug!("Keyring unavailable, storing session in a file");
    save_to_file(&session_file_path(kind)?, &json)
}

fn save_to_file(path: &PathBuf, contents: &str) -> Result<()> {
    fs::write(path, contents).context("Failed to write session file")?;

    // Set restrictive permissions on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).context("Failed to set file permissions")?;
    }

    Ok(())
}

/// Load the stored session, if any
pub fn load_session(kind: BackendKind) -> Result<Option<Session>> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, &entry_name(kind)) {
        if let Ok(json) = entry.get_password() {
            return Ok(Some(serde_json::from_str(&json).context("Stored session is corrupt")?));
        }
    }

    let path = session_file_path(kind)?;
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(&path).context("Failed to read session file")?;
    Ok(Some(serde_json::from_str(&json).context("Stored session is corrupt")?))
}

/// Forget the stored session in both keyring and file
pub fn clear_session(kind: BackendKind) -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, &entry_name(kind)) {
        let _ = entry.delete_credential();
    }

    let path = session_file_path(kind)?;
    if path.exists() {
        fs::remove_file(&path).context("Failed to delete session file")?;
    }

    Ok(())
}
