// =============================================================================
// tr_* handlers — thin wrappers over `AuthManager`
// =============================================================================

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::handlers::{optional_bool, require_str};
use crate::state::EngineState;
use crate::types::ProgressEvent;

pub async fn get_auth_status(
    state: &EngineState,
    _payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    // Never touches the bridge ( non-negotiable rule).
    let auth = state.auth().await;
    let (state, masked_phone) = auth.status();
    Ok(serde_json::json!({"state": state.to_string(), "maskedPhone": masked_phone}))
}

pub async fn login(
    state: &EngineState,
    payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let phone = require_str(&payload, "phone")?;
    let pin = require_str(&payload, "pin")?;
    let remember = optional_bool(&payload, "remember");

    let auth = state.auth().await;
    let new_state = auth.login(&phone, &pin, remember).await?;
    Ok(serde_json::json!({"state": new_state.to_string()}))
}

pub async fn submit_2fa(
    state: &EngineState,
    payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let code = require_str(&payload, "code")?;
    let auth = state.auth().await;
    let new_state = auth.submit_2fa(&code).await?;
    Ok(serde_json::json!({"state": new_state.to_string()}))
}

pub async fn try_restore_session(
    state: &EngineState,
    _payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let auth = state.auth().await;
    let new_state = auth.try_restore_session().await?;
    Ok(serde_json::json!({"state": new_state.to_string()}))
}

pub async fn logout(
    state: &EngineState,
    _payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let auth = state.auth().await;
    auth.logout().await?;
    Ok(serde_json::json!({"state": "IDLE"}))
}

pub async fn get_stored_credentials(
    state: &EngineState,
    _payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let auth = state.auth().await;
    let (has_credentials, masked_phone) = auth.stored_credentials();
    Ok(serde_json::json!({"hasCredentials": has_credentials, "maskedPhone": masked_phone}))
}
