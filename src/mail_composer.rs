//! Follow-up email composition
//!
//! Turns the user's original query and the support team's reply into an
//! email subject and body using the agent.

use crate::agent::Agent;
use std::time::Duration;
use tokio::time::timeout;

const MAX_SUBJECT_LENGTH: usize = 120;
const FALLBACK_SUBJECT: &str = "Update on your support request";

/// Email subject and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMail {
    pub subject: String,
    pub content: String,
}

fn subject_prompt(query: &str, solution: &str) -> String {
    format!(
        "Create a subject for the email based on the following message: query {query} and solution {solution} which should be sent back to the user. It should be a single line subject."
    )
}

fn content_prompt(query: &str, solution: &str) -> String {
    format!(
        "Create a content for the email based on the following message: query {query} and solution {solution}. Only send the content of the email, do not include any additional text and variable. No salutations or closing."
    )
}

/// Compose the resolution email.
///
/// Never fails: when the agent errors or times out, the subject falls back
/// to a fixed line and the body to the support team's reply verbatim.
pub async fn compose_resolution_mail(
    agent: &dyn Agent,
    query: &str,
    solution: &str,
    limit: Duration,
) -> ComposedMail {
    let subject = match timeout(limit, agent.generate_text(&subject_prompt(query, solution))).await
    {
        Ok(Ok(text)) => sanitize_subject(&text),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Mail subject generation failed");
            None
        }
        Err(_) => {
            tracing::warn!("Mail subject generation timed out");
            None
        }
    };

    let content = match timeout(limit, agent.generate_text(&content_prompt(query, solution))).await
    {
        Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(Ok(_)) => solution.to_string(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Mail body generation failed");
            solution.to_string()
        }
        Err(_) => {
            tracing::warn!("Mail body generation timed out");
            solution.to_string()
        }
    };

    ComposedMail {
        subject: subject.unwrap_or_else(|| FALLBACK_SUBJECT.to_string()),
        content,
    }
}

/// Single line, no quotes, bounded length
fn sanitize_subject(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let cleaned: String = line.chars().filter(|c| *c != '"').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    if cleaned.chars().count() <= MAX_SUBJECT_LENGTH {
        return Some(cleaned.to_string());
    }

    // Cut at a word boundary
    let truncated: String = cleaned.chars().take(MAX_SUBJECT_LENGTH).collect();
    Some(match truncated.rfind(' ') {
        Some(idx) => truncated.get(..idx).unwrap_or(&truncated).to_string(),
        None => truncated,
    })
}
