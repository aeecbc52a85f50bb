use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use relay_core::{AbandonReason, Outcome, RelayError, Trigger};

use crate::error::AppError;
use crate::state::AppState;

const ECHO_SUCCESS: &str = "SUCCESS";
const ECHO_SKIP: &str = "SKIP";

/// POST /ecom/webhook — receive one platform trigger for the store named in
/// `X-Store-ID`.
pub async fn receive(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let store_id = headers
        .get("x-store-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::bad_request("missing X-Store-ID header"))?
        .to_string();
    let trigger: Trigger = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("malformed trigger: {e}")))?;

    // The run keeps its admission slot until release even if the client goes away.
    let relay = app.relay.clone();
    let task_store = store_id.clone();
    let task_trigger = trigger.clone();
    let handled = tokio::spawn(async move { relay.handle(&task_store, &task_trigger).await })
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?;

    match handled {
        Ok(outcome) => Ok(outcome_response(outcome)),
        Err(e) => {
            match &e {
                RelayError::Coordination(_) => {
                    tracing::error!(store = %store_id, "running state unavailable: {e}");
                    tokio::time::sleep(app.coordination_error_delay).await;
                }
                RelayError::Upstream(inner) => {
                    tracing::error!(
                        store = %store_id,
                        resource = %trigger.resource,
                        "webhook processing failed: {inner:?}"
                    );
                }
                RelayError::InvalidTrigger(_) => {}
            }
            Err(e.into())
        }
    }
}

fn outcome_response(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Processed {
            namespace,
            queue,
            more_queued,
        } => {
            let status = if more_queued {
                StatusCode::ACCEPTED
            } else {
                StatusCode::CREATED
            };
            (status, format!("> Processed `{namespace}.{queue}`")).into_response()
        }
        Outcome::NothingToDo => (StatusCode::OK, ECHO_SUCCESS).into_response(),
        Outcome::Ignored => (StatusCode::OK, ECHO_SKIP).into_response(),
        Outcome::Skipped(reason @ (AbandonReason::Stopped | AbandonReason::Superseded)) => {
            tracing::debug!(reason = reason.as_str(), "trigger skipped");
            StatusCode::NO_CONTENT.into_response()
        }
        Outcome::Skipped(reason) => {
            (StatusCode::NON_AUTHORITATIVE_INFORMATION, reason.as_str()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::app_config::{Namespace, SyncAction};

    #[test]
    fn queue_state_picks_201_or_202() {
        let processed = |more_queued| Outcome::Processed {
            namespace: Namespace::visible(SyncAction::Importation),
            queue: "skus".into(),
            more_queued,
        };
        assert_eq!(outcome_response(processed(false)).status(), StatusCode::CREATED);
        assert_eq!(outcome_response(processed(true)).status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn guard_outcomes_map_to_204_or_203() {
        for (reason, status) in [
            (AbandonReason::Stopped, StatusCode::NO_CONTENT),
            (AbandonReason::Superseded, StatusCode::NO_CONTENT),
            (AbandonReason::RateLimited, StatusCode::NON_AUTHORITATIVE_INFORMATION),
            (
                AbandonReason::SupersededWhileWaiting,
                StatusCode::NON_AUTHORITATIVE_INFORMATION,
            ),
        ] {
            assert_eq!(outcome_response(Outcome::Skipped(reason)).status(), status);
        }
    }
}
