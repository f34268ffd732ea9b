// src/console/handler.rs

use serde_json::{json, Value};
use tracing::debug;

use crate::blockchain::abi::narrow;
use crate::console::protocol::{error_codes, Request, Response};
use crate::error::SessionError;
use crate::session::{Action, CallStatus, CounterSnapshot, PendingCall, Session};
use crate::AppState;

fn session_json(session: &Session) -> Value {
    json!({
        "account": session.account,
        "shortAccount": session.short_account(),
        "chainId": session.chain_id,
        "status": session.status,
    })
}

fn call_json(call: &PendingCall) -> Value {
    let (status, error) = match &call.status {
        CallStatus::Submitted => ("submitted", None),
        CallStatus::Confirmed => ("confirmed", None),
        CallStatus::Failed(e) => ("failed", Some(e.status_message())),
    };
    json!({
        "id": call.id.to_string(),
        "action": call.action,
        "submittedAt": call.submitted_at,
        "txHash": call.tx_hash,
        "status": status,
        "error": error,
    })
}

fn counter_json(snapshot: &CounterSnapshot) -> Value {
    // Narrowed here, at the display boundary.
    let (value, decode_error) = match snapshot.display_value() {
        Ok(v) => (json!(v), None),
        Err(e) => (json!(snapshot.value.map(|v| v.to_string())), Some(e.status_message())),
    };
    json!({
        "value": value,
        "calls": snapshot.calls.iter().map(call_json).collect::<Vec<_>>(),
        "status": snapshot.status,
        "error": snapshot.error.as_ref().map(SessionError::status_message).or(decode_error),
    })
}

async fn status(state: &AppState) -> Value {
    let session = state.session.session().await;
    let counter = state.session.coordinator().snapshot().await;
    let last_error = state.session.last_error().await;
    json!({
        "session": session_json(&session),
        "counter": counter_json(&counter),
        "chain": {
            "chainId": state.config.chain.chain_id,
            "chainName": state.config.chain.chain_name,
        },
        "contract": format!("{:?}", state.config.contract_address),
        "lastError": last_error.map(|e| e.status_message()),
    })
}

fn action_for(method: &str) -> Option<Action> {
    match method {
        "increment" => Some(Action::Increment),
        "decrement" => Some(Action::Decrement),
        "reset" => Some(Action::Reset),
        _ => None,
    }
}

async fn dispatch(method: &str, state: &AppState) -> Result<Option<Value>, SessionError> {
    let result = match method {
        "connect" => session_json(&state.session.connect().await?),
        "restore" => session_json(&state.session.restore().await?),
        "disconnect" => session_json(&state.session.disconnect().await),
        "status" => status(state).await,
        "getValue" => {
            let snapshot = state.session.coordinator().snapshot().await;
            json!({ "value": snapshot.value.map(narrow).transpose()? })
        }
        "refresh" => json!({ "value": narrow(state.session.refresh().await?)? }),
        other => match action_for(other) {
            Some(action) => call_json(&state.session.trigger(action).await?),
            None => return Ok(None),
        },
    };
    Ok(Some(result))
}

/// Handles one console request; notifications get no response.
pub async fn handle_request(req: Request, state: AppState) -> Option<Response> {
    debug!("Console request: {}", req.method);
    let notification = req.is_notification();

    let response = match dispatch(&req.method, &state).await {
        Ok(Some(result)) => Response::success(req.id, result),
        Ok(None) => Response::error(
            req.id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", req.method),
        ),
        Err(e) => Response::session_error(req.id, &e),
    };

    if notification {
        None
    } else {
        Some(response)
    }
}
