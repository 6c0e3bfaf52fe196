//! Pre- and post-turn strategy hooks.
//!
//! Both hooks are strictly advisory: any strategy failure is logged and the
//! turn proceeds as if the hook had not run.

use crate::context::adapter::events_to_messages;
use crate::session::event::{Content, Part, Session};
use crate::strategies::{ContextStrategies, TaskOutcome};
use std::sync::Arc;

/// Token budget handed to the memory sieve for prompt enrichment.
const SIEVE_TOKEN_BUDGET: u32 = 600;

/// Glue inserted between a stuck-recovery nudge and the user's own text.
const RECOVERY_GLUE: &str = "\n\n[User message]\n";

/// Maximum characters of the user turn kept in the post-hook ingest summary.
const INGEST_USER_CHARS: usize = 200;
/// Maximum characters of the response kept in the post-hook ingest summary.
const INGEST_RESPONSE_CHARS: usize = 500;

/// Run stuck detection and memory enrichment against the incoming message.
///
/// Returns the (possibly rewritten) message to hand to the runner. Non-text
/// parts of the original message are carried over unchanged.
pub async fn pre_run(
    strategies: &ContextStrategies,
    session: &Session,
    new_message: &Content,
) -> Content {
    let mut text = new_message.text();

    let (messages, _) = events_to_messages(&session.events);
    match strategies.stuck.detect_stuck(&messages).await {
        Ok(detection) if detection.is_stuck => {
            tracing::info!(
                kind = %detection.kind,
                confidence = detection.confidence,
                "stuck loop detected, prepending recovery message"
            );
            match strategies.stuck.generate_recovery_message(&detection).await {
                Ok(recovery) => {
                    let recovery_text = recovery
                        .content
                        .iter()
                        .filter_map(|p| p.as_text())
                        .collect::<Vec<_>>()
                        .join("");
                    if !recovery_text.is_empty() {
                        text = format!("{recovery_text}{RECOVERY_GLUE}{text}");
                    }
                }
                Err(e) => tracing::warn!("recovery message generation failed: {e}"),
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("stuck detection failed: {e}"),
    }

    match strategies.memory.sieve(&new_message.text(), SIEVE_TOKEN_BUDGET).await {
        Ok(result) if !result.context.is_empty() => {
            tracing::debug!(nodes = result.nodes_included, "enriching turn from memory");
            text = format!("[Relevant context]\n{}\n\n{text}", result.context);
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("memory sieve failed: {e}"),
    }

    let mut parts = vec![Part::text(text)];
    parts.extend(
        new_message
            .parts
            .iter()
            .filter(|p| p.as_text().is_none())
            .cloned(),
    );
    Content {
        role: new_message.role.clone(),
        parts,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Ingest a condensed record of the exchange and record the turn's outcome.
///
/// Runs detached; the SSE stream has already closed by the time this lands.
pub fn post_run(
    strategies: Arc<ContextStrategies>,
    app_name: String,
    user_text: String,
    response_text: String,
    had_error: bool,
) {
    tokio::spawn(async move {
        let summary = format!(
            "User: {}\nAssistant: {}",
            truncate_chars(&user_text, INGEST_USER_CHARS),
            truncate_chars(&response_text, INGEST_RESPONSE_CHARS),
        );
        if let Err(e) = strategies
            .memory
            .ingest(&summary, "conversation", &app_name, "run_sse", &[])
            .await
        {
            tracing::warn!("post-run ingest failed: {e}");
        }

        let outcome = if had_error {
            TaskOutcome::Failure
        } else {
            TaskOutcome::Success
        };
        if let Err(e) = strategies.memory.record_task_outcome(outcome).await {
            tracing::warn!("recording task outcome failed: {e}");
        }
    });
}
