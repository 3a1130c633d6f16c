use crate::format::{commit_link, escape_html};
use crate::{EventError, Notification, Result};
use serde::Deserialize;
use std::fmt::Write;

const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Render a GitHub webhook delivery. `event_type` is the `X-GitHub-Event`
/// header value; `branch_filter` comes from the webhook URL query string.
pub fn render_github(
    event_type: &str,
    payload: &[u8],
    branch_filter: Option<&str>,
) -> Result<Option<Notification>> {
    match event_type {
        "ping" => render_ping(payload),
        "push" => render_push(payload, branch_filter),
        "workflow_run" => render_workflow_run(payload),
        other => Err(EventError::UnsupportedEvent(other.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct Repository {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    html_url: String,
}

fn render_ping(payload: &[u8]) -> Result<Option<Notification>> {
    #[derive(Debug, Deserialize)]
    struct PingEvent {
        repository: Repository,
    }

    let event: PingEvent = serde_json::from_slice(payload)?;
    Ok(Some(Notification::Message(format!(
        "✅ Webhook configured for <a href=\"{}\">{}</a>.",
        event.repository.html_url,
        escape_html(&event.repository.full_name),
    ))))
}

fn render_push(payload: &[u8], branch_filter: Option<&str>) -> Result<Option<Notification>> {
    #[derive(Debug, Deserialize)]
    struct Author {
        #[serde(default)]
        name: String,
    }

    #[derive(Debug, Deserialize)]
    struct Commit {
        #[serde(default)]
        message: String,
        #[serde(default)]
        url: String,
        author: Author,
    }

    #[derive(Debug, Deserialize)]
    struct Pusher {
        #[serde(default)]
        name: String,
    }

    #[derive(Debug, Deserialize)]
    struct PushEvent {
        #[serde(default)]
        r#ref: String,
        #[serde(default)]
        after: String,
        pusher: Pusher,
        #[serde(default)]
        forced: bool,
        #[serde(default)]
        commits: Vec<Commit>,
    }

    let event: PushEvent = serde_json::from_slice(payload)?;
    let branch = event.r#ref.strip_prefix("refs/heads/").unwrap_or(&event.r#ref);

    if let Some(filter) = branch_filter {
        if filter != branch {
            return Ok(None);
        }
    }

    let mut message = String::new();
    if event.after == ZERO_SHA {
        write!(
            message,
            "🗑️ <b>{}</b> deleted branch <code>{}</code>",
            escape_html(&event.pusher.name),
            escape_html(branch),
        )
        .ok();
    } else {
        let verb = if event.forced { "force-pushed" } else { "pushed" };
        write!(
            message,
            "🚀 <b>{}</b> {verb} to <code>{}</code>",
            escape_html(&event.pusher.name),
            escape_html(branch),
        )
        .ok();
        if !event.commits.is_empty() {
            message.push_str(":\n");
            for commit in &event.commits {
                writeln!(
                    message,
                    "👉 <b>{}</b>: {}",
                    escape_html(&commit.author.name),
                    commit_link(&commit.message, &commit.url),
                )
                .ok();
            }
        }
    }

    Ok(Some(Notification::Message(message)))
}

fn render_workflow_run(payload: &[u8]) -> Result<Option<Notification>> {
    #[derive(Debug, Deserialize)]
    struct WorkflowRun {
        #[serde(default)]
        name: String,
        #[serde(default)]
        html_url: String,
        #[serde(default)]
        conclusion: String,
    }

    #[derive(Debug, Deserialize)]
    struct WorkflowRunEvent {
        #[serde(default)]
        action: String,
        workflow_run: WorkflowRun,
        repository: Repository,
    }

    let event: WorkflowRunEvent = serde_json::from_slice(payload)?;
    if event.action != "completed" {
        return Ok(None);
    }

    let emoji = match event.workflow_run.conclusion.as_str() {
        "success" => "✅",
        "failure" => "❌",
        "cancelled" => "⚠️",
        _ => "ℹ️",
    };

    Ok(Some(Notification::Message(format!(
        "{emoji} Workflow {}: <a href=\"{}\">{}</a> — <a href=\"{}\">{}</a>.",
        escape_html(&event.workflow_run.conclusion),
        event.repository.html_url,
        escape_html(&event.repository.full_name),
        event.workflow_run.html_url,
        escape_html(&event.workflow_run.name),
    ))))
}
