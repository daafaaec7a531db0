//! Terminal configuration: data directory and remote store credentials.
//!
//! Credentials live in the OS credential store (via the `keyring` crate).
//! Environment variables override the stored values, which keeps headless
//! deployments and tests away from the keyring.

use keyring::Entry;
use std::path::PathBuf;
use tracing::{info, warn};

const SERVICE_NAME: &str = "hybrid-pos";
const APP_DIR_NAME: &str = "hybrid-pos";

// Credential keys
const KEY_REMOTE_URL: &str = "remote_url";
const KEY_API_KEY: &str = "api_key";

const ALL_KEYS: &[&str] = &[KEY_REMOTE_URL, KEY_API_KEY];

pub const ENV_DATA_DIR: &str = "HYBRID_POS_DATA_DIR";
pub const ENV_REMOTE_URL: &str = "HYBRID_POS_REMOTE_URL";
pub const ENV_API_KEY: &str = "HYBRID_POS_API_KEY";

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())
}

/// Silently succeeds if the entry does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_value(name: &str) -> Option<String> {
    non_blank(std::env::var(name).ok())
}

// ---------------------------------------------------------------------------
// Remote store configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: Option<String>,
}

/// Resolve the remote store configuration. `None` means sync is disabled.
pub fn remote_config() -> Option<RemoteConfig> {
    resolve_remote(
        env_value(ENV_REMOTE_URL),
        env_value(ENV_API_KEY),
        || non_blank(get_credential(KEY_REMOTE_URL)),
        || non_blank(get_credential(KEY_API_KEY)),
    )
}

fn resolve_remote(
    env_url: Option<String>,
    env_key: Option<String>,
    stored_url: impl FnOnce() -> Option<String>,
    stored_key: impl FnOnce() -> Option<String>,
) -> Option<RemoteConfig> {
    let url = env_url.or_else(stored_url)?;
    let api_key = env_key.or_else(stored_key);
    Some(RemoteConfig { url, api_key })
}

/// Persist the remote store configuration in the OS keyring.
pub fn configure_remote(url: &str, api_key: Option<&str>) -> Result<(), String> {
    let url = url.trim();
    if url.is_empty() {
        return Err("Missing required field: remote URL".to_string());
    }
    set_credential(KEY_REMOTE_URL, &crate::api::normalize_base_url(url))?;
    match api_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => set_credential(KEY_API_KEY, key)?,
        None => delete_credential(KEY_API_KEY)?,
    }
    info!("remote store configuration updated");
    Ok(())
}

/// Forget the remote store; sync becomes disabled on next start.
pub fn clear_remote() -> Result<(), String> {
    info!("clearing remote store configuration");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Data directory
// ---------------------------------------------------------------------------

/// Directory holding the database and the `logs/` folder.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = env_value(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_env_url_wins_over_stored() {
        let cfg = resolve_remote(
            Some("https://env.example".into()),
            None,
            || Some("https://stored.example".into()),
            || Some("stored-key".into()),
        )
        .unwrap();
        assert_eq!(cfg.url, "https://env.example");
        assert_eq!(cfg.api_key.as_deref(), Some("stored-key"));
    }

    #[test]
    fn test_no_url_disables_sync() {
        assert_eq!(resolve_remote(None, Some("k".into()), || None, || None), None);
    }

    #[test]
    fn test_configure_rejects_blank_url_before_touching_keyring() {
        assert!(configure_remote("   ", Some("k")).is_err());
    }

    #[test]
    #[serial]
    fn test_data_dir_env_override() {
        std::env::set_var(ENV_DATA_DIR, "/tmp/hybrid-pos-test");
        assert_eq!(data_dir(), PathBuf::from("/tmp/hybrid-pos-test"));
        std::env::set_var(ENV_DATA_DIR, "   ");
        assert!(data_dir().ends_with(APP_DIR_NAME));
        std::env::remove_var(ENV_DATA_DIR);
    }

    #[test]
    #[serial]
    fn test_blank_env_values_are_ignored() {
        std::env::set_var(ENV_API_KEY, "  ");
        assert_eq!(env_value(ENV_API_KEY), None);
        std::env::set_var(ENV_API_KEY, " secret ");
        assert_eq!(env_value(ENV_API_KEY).as_deref(), Some("secret"));
        std::env::remove_var(ENV_API_KEY);
    }
}
