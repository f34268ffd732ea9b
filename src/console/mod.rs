// src/console/mod.rs
//
// Newline-delimited JSON-RPC over stdin/stdout for driving a session
// without a browser.

pub mod handler;
pub mod protocol;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::console::handler::handle_request;
use crate::console::protocol::{error_codes, Request, Response};
use crate::AppState;

/// Serves requests read from `input` until EOF, answering on `output`.
///
/// Each request runs on its own task, so an action waiting for finality
/// never holds up `status`, `disconnect` or another action. Responses are
/// written in completion order by a single writer task.
pub async fn serve<R, W>(input: R, output: W, state: AppState)
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (responses, mut outbox) = mpsc::unbounded_channel::<Response>();

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(response) = outbox.recv().await {
            let line = match serde_json::to_string(&response) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to encode response: {}", e);
                    continue;
                }
            };
            debug!("Sending: {}", line);
            if let Err(e) = output.write_all(format!("{}\n", line).as_bytes()).await {
                error!("Failed to write response: {}", e);
                break;
            }
            let _ = output.flush().await;
        }
    });

    let mut lines = input.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                debug!("Received: {}", line);

                match serde_json::from_str::<Request>(line) {
                    Ok(request) => {
                        let state = state.clone();
                        let responses = responses.clone();
                        tokio::spawn(async move {
                            if let Some(response) = handle_request(request, state).await {
                                let _ = responses.send(response);
                            }
                        });
                    }
                    Err(parse_error) => {
                        error!("JSON parse error: {}", parse_error);
                        let _ = responses.send(Response::error(
                            Value::Null,
                            error_codes::PARSE_ERROR,
                            format!("Parse error: {}", parse_error),
                        ));
                    }
                }
            }
            Ok(None) => {
                info!("EOF received, finishing in-flight requests");
                break;
            }
            Err(e) => {
                error!("Failed to read request: {}", e);
                break;
            }
        }
    }

    // The writer drains until every in-flight request has answered.
    drop(responses);
    if let Err(e) = writer.await {
        error!("Response writer stopped: {}", e);
    }
}
