// =============================================================================
// Dispatcher — static command -> handler table
// =============================================================================

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::error;

use crate::error::ErrorCode;
use crate::handlers;
use crate::protocol::{sanitize_for_log, Command, Response};
use crate::state::EngineState;
use crate::types::ProgressEvent;

type HandlerFn =
for<'a> fn(&'a EngineState, Map<String, Value>, mpsc::UnboundedSender<ProgressEvent>) -> BoxFuture<'a, anyhow::Result<Value>>;

pub struct Dispatcher {
    handlers: HashMap<&'static str, HandlerFn>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, HandlerFn> = HashMap::new();
        handlers.insert("get_health", |s, p, pr| Box::pin(handlers::get_health::run(s, p, pr)));
        handlers.insert("tr_get_auth_status", |s, p, pr| Box::pin(handlers::tr_auth::get_auth_status(s, p, pr)));
        handlers.insert("tr_login", |s, p, pr| Box::pin(handlers::tr_auth::login(s, p, pr)));
        handlers.insert("tr_submit_2fa", |s, p, pr| Box::pin(handlers::tr_auth::submit_2fa(s, p, pr)));
        handlers.insert("tr_try_restore_session", |s, p, pr| Box::pin(handlers::tr_auth::try_restore_session(s, p, pr)));
        handlers.insert("tr_logout", |s, p, pr| Box::pin(handlers::tr_auth::logout(s, p, pr)));
        handlers.insert("tr_get_stored_credentials", |s, p, pr| Box::pin(handlers::tr_auth::get_stored_credentials(s, p, pr)));
        handlers.insert("sync_portfolio", |s, p, pr| Box::pin(handlers::portfolio::sync_portfolio(s, p, pr)));
        handlers.insert("run_pipeline", |s, p, pr| Box::pin(handlers::portfolio::run_pipeline(s, p, pr)));
        handlers.insert("get_dashboard_data", |s, p, pr| Box::pin(handlers::portfolio::get_dashboard_data(s, p, pr)));
        handlers.insert("upload_holdings", |s, p, pr| Box::pin(handlers::portfolio::upload_holdings(s, p, pr)));
        handlers.insert("set_hive_contribution", |s, p, pr| Box::pin(handlers::portfolio::set_hive_contribution(s, p, pr)));
        handlers.insert("get_pipeline_report", |s, p, pr| Box::pin(handlers::portfolio::get_pipeline_report(s, p, pr)));
        Self { handlers }
    }

    /// Resolve, await, and catch any handler failure, translating it to a
    /// well-formed response envelope. This is the only place a panic inside
    /// a handler future is allowed to surface as anything other than
    /// `HANDLER_ERROR` — callers never see Rust panic text.
    pub async fn dispatch(
        &self,
        state: &EngineState,
        command: Command,
        progress: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Response {
        let Some(handler) = self.handlers.get(command.command.as_str()) else {
            let sanitized = sanitize_for_log(&command.command);
            error!(command = %sanitized, "unknown command");
            return Response::error(
                Some(command.command.clone()),
                command.id,
                ErrorCode::UnknownCommand,
                format!("unknown command '{sanitized}'"),
            );
        };

        let fut = handler(state, command.payload, progress);
        let caught = std::panic::AssertUnwindSafe(fut).catch_unwind().await;

        match caught {
            Ok(Ok(data)) => Response::success(command.command, command.id, data),
            Ok(Err(e)) => {
                if let Some(engine_err) = e.downcast_ref::<crate::error::EngineError>() {
                    error!(command = %command.command, error = %engine_err, "handler returned engine error");
                    Response::error(Some(command.command), command.id, engine_err.code(), engine_err.public_message())
                } else {
                    error!(command = %command.command, error = %e, "handler returned unexpected error");
                    Response::error(
                        Some(command.command),
                        command.id,
                        ErrorCode::HandlerError,
                        "internal error — see logs",
                    )
                }
            }
            Err(panic) => {
                let msg = panic_message(&panic);
                error!(command = %command.command, panic = %msg, "handler panicked");
                Response::error(
                    Some(command.command),
                    command.id,
                    ErrorCode::HandlerError,
                    "internal error — see logs",
                )
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn unknown_command_returns_unknown_command_error() {
        let dispatcher = Dispatcher::new();
        // We can't easily construct a full EngineState without I/O in a unit
        // test, so unknown-command handling — which never touches state — is
        // the slice exercised here directly.
        assert!(dispatcher.handlers.get("definitely_not_a_real_command").is_none());
    }

    #[test]
    fn panic_message_extracts_str_payload() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
    }
}
