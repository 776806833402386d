// =============================================================================
// Trade Republic authentication state machine
// =============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{info, warn};

use crate::bridge::BrokerBridge;
use crate::error::{EngineError, EngineResult};
use crate::types::AuthState;

const KEYRING_SERVICE: &str = "portfolio-prism-tr";

#[derive(Debug, Clone, Default)]
struct AuthRecord {
    state: AuthState,
    phone: Option<String>,
}

pub struct AuthManager {
    bridge: Arc<BrokerBridge>,
    cookie_path: PathBuf,
    record: RwLock<AuthRecord>,
}

impl AuthManager {
    pub fn new(bridge: Arc<BrokerBridge>, cookie_path: PathBuf) -> Self {
        Self {
            bridge,
            cookie_path,
            record: RwLock::new(AuthRecord::default()),
        }
    }

    /// Current state and masked phone. Never touches the bridge — polling
    /// this from the UI must not generate broker traffic (non-negotiable).
    pub fn status(&self) -> (AuthState, Option<String>) {
        let r = self.record.read();
        (r.state, r.phone.as_deref().map(mask_phone))
    }

    pub async fn login(&self, phone: &str, pin: &str, remember: bool) -> EngineResult<AuthState> {
        {
            let r = self.record.read();
            if r.state != AuthState::Idle && r.state != AuthState::Error {
                // A fresh login from any non-terminal state is still allowed
                // (re-login), but we log it since it's unusual.
                warn!(state = %r.state, "login invoked while not idle");
            }
        }

        let result = self
        .bridge
        .call("login", json!({"phone": phone, "pin": pin, "remember": remember}))
        .await;

        match result {
            Ok(value) => {
                let needs_2fa = value.get("needs_2fa").and_then(|v| v.as_bool()).unwrap_or(false);
                let mut r = self.record.write();
                r.phone = Some(phone.to_string());
                r.state = if needs_2fa { AuthState::WaitingFor2fa } else { AuthState::Authenticated };
                if remember && r.state == AuthState::Authenticated {
                    self.persist_credentials(phone, pin)?;
                }
                info!(new_state = %r.state, "login transition");
                Ok(r.state)
            }
            Err(e) => {
                self.record.write().state = AuthState::Error;
                Err(e)
            }
        }
    }

    pub async fn submit_2fa(&self, code: &str) -> EngineResult<AuthState> {
        {
            let r = self.record.read();
            if r.state != AuthState::WaitingFor2fa {
                return Err(EngineError::Tr2faInvalidState);
            }
        }

        let result = self.bridge.call("submit_2fa", json!({"code": code})).await;
        match result {
            Ok(_) => {
                let mut r = self.record.write();
                r.state = AuthState::Authenticated;
                Ok(r.state)
            }
            Err(EngineError::TrAuth(msg)) => {
                self.record.write().state = AuthState::Error;
                Err(EngineError::TrAuth(msg))
            }
            Err(e) => {
                self.record.write().state = AuthState::Error;
                Err(e)
            }
        }
    }

    pub async fn try_restore_session(&self) -> EngineResult<AuthState> {
        if !self.cookie_path.exists() {
            return Ok(self.record.read().state);
        }
        let result = self.bridge.call("try_restore_session", json!({})).await;
        match result {
            Ok(value) => {
                let restored = value.get("restored").and_then(|v| v.as_bool()).unwrap_or(false);
                let mut r = self.record.write();
                if restored {
                    r.state = AuthState::Authenticated;
                }
                Ok(r.state)
            }
            Err(e) => {
                self.record.write().state = AuthState::Error;
                Err(e)
            }
        }
    }

    pub async fn logout(&self) -> EngineResult<()> {
        let _ = self.bridge.call("logout", json!({})).await;
        if self.cookie_path.exists() {
            std::fs::remove_file(&self.cookie_path).map_err(EngineError::Io)?;
        }
        let mut r = self.record.write();
        r.state = AuthState::Idle;
        r.phone = None;
        Ok(())
    }

    /// `{hasCredentials, maskedPhone?}` — the raw record never leaves this
    /// module.
    pub fn stored_credentials(&self) -> (bool, Option<String>) {
        match keyring::Entry::new(KEYRING_SERVICE, "tr_account") {
            Ok(entry) => match entry.get_password() {
                Ok(_) => (true, self.record.read().phone.as_deref().map(mask_phone)),
                Err(_) => (false, None),
            },
            Err(_) => (false, None),
        }
    }

    fn persist_credentials(&self, phone: &str, pin: &str) -> EngineResult<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, "tr_account")
        .map_err(|e| EngineError::DataFetchFailed(format!("keyring unavailable: {e}")))?;
        let payload = json!({"phone": phone, "pin": pin}).to_string();
        entry
        .set_password(&payload)
        .map_err(|e| EngineError::DataFetchFailed(format!("failed to persist credentials: {e}")))
    }
}

/// Mask all but the last 4 digits of a phone number for logs and responses.
fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "*".repeat(digits.len());
    }
    format!("***{}", &digits[digits.len() - 4..])
}

/// Resolve and validate the cookie file path: must canonicalize to a location
/// under `home_root`, preventing traversal via a crafted environment value.
pub fn validated_cookie_path(raw: &str, home_root: &Path) -> EngineResult<PathBuf> {
    let candidate = PathBuf::from(raw);
    let parent = candidate
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(home_root);
    std::fs::create_dir_all(parent).map_err(EngineError::Io)?;
    let canon_parent = parent.canonicalize().map_err(EngineError::Io)?;
    if !canon_parent.starts_with(home_root) {
        return Err(EngineError::InvalidCommand(format!(
                    "cookie path {} escapes the permitted root",
                    candidate.display()
                )));
    }
    let file_name = candidate
    .file_name()
    .ok_or_else(|| EngineError::InvalidCommand("cookie path has no file name".into()))?;
    Ok(canon_parent.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_all_but_last_four_digits() {
        assert_eq!(mask_phone("+15551234567"), "***4567");
    }

    #[test]
    fn short_phone_masks_entirely() {
        assert_eq!(mask_phone("123"), "***");
    }

    #[test]
    fn cookie_path_traversal_rejected() {
        let tmp = std::env::temp_dir().join(format!("auth-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&tmp).unwrap();
        let root = tmp.canonicalize().unwrap();
        let traversal = root.join("../../../etc/passwd").to_string_lossy().to_string();
        assert!(validated_cookie_path(&traversal, &root).is_err());
    }

    #[test]
    fn cookie_path_within_root_accepted() {
        let tmp = std::env::temp_dir().join(format!("auth-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&tmp).unwrap();
        let root = tmp.canonicalize().unwrap();
        let ok = root.join("tr_cookies.txt").to_string_lossy().to_string();
        assert!(validated_cookie_path(&ok, &root).is_ok());
    }
}
