// =============================================================================
// Stdin/stdout line transport — the production front-end
// =============================================================================
//
// Every input line is handed to the dispatcher; the response is written to
// stdout exactly once per input, flushed once per frame. Stdout carries
// nothing but response envelopes — diagnostics go to stderr via `tracing`.
// =============================================================================

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::protocol::{decode_line, encode_response, DecodedLine, Response};
use crate::state::EngineState;
use crate::types::ProgressEvent;

pub async fn run(state: &EngineState, dispatcher: &Dispatcher) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin).lines();

    // Progress frames are dropped on the floor in the stdin/stdout transport
    // today — the host shell reads them over the HTTP/SSE dev transport or a
    // future dedicated channel. Keeping the sender alive here just lets
    // handlers push without caring which transport is active.
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
    tokio::spawn(async move { while progress_rx.recv().await.is_some() {} });

    while let Some(line) = reader.next_line().await? {
        match decode_line(line.as_bytes()) {
            DecodedLine::Blank => continue,
            DecodedLine::Error(e) => {
                warn!(error = %e.message, command = ?e.command_name, "rejected malformed input line");
                let response = Response::error(e.command_name, e.id.unwrap_or(serde_json::Value::Null), e.code, e.message);
                write_response(&mut stdout, &response).await?;
            }
            DecodedLine::Command(command) => {
                let response = dispatcher.dispatch(state, command, progress_tx.clone()).await;
                write_response(&mut stdout, &response).await?;
            }
        }
    }

    info!("stdin closed, stdio transport exiting");
    Ok(())
}

async fn write_response(stdout: &mut Stdout, response: &Response) -> anyhow::Result<()> {
    let bytes = encode_response(response);
    stdout.write_all(&bytes).await?;
    stdout.flush().await?;
    Ok(())
}
