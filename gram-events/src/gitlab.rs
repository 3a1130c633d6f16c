use crate::format::escape_html;
use crate::{EventError, Notification, Result};
use serde::Deserialize;
use std::fmt::Write;

const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Render a GitLab webhook delivery. `event_type` is the `X-Gitlab-Event`
/// header value.
pub fn render_gitlab(event_type: &str, payload: &[u8]) -> Result<Option<Notification>> {
    match event_type {
        "Push Hook" => render_push(payload),
        "Pipeline Hook" => render_pipeline(payload),
        "Merge Request Hook" => render_merge_request(payload),
        "Issue Hook" => render_issue(payload),
        other => Err(EventError::UnsupportedEvent(other.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct Project {
    #[serde(default)]
    name: String,
    #[serde(default)]
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    name: String,
}

fn render_push(payload: &[u8]) -> Result<Option<Notification>> {
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
    struct PushEvent {
        #[serde(default)]
        r#ref: String,
        #[serde(default)]
        after: String,
        #[serde(default)]
        user_name: String,
        project: Project,
        #[serde(default)]
        commits: Vec<Commit>,
    }

    let event: PushEvent = serde_json::from_slice(payload)?;
    let branch = event.r#ref.strip_prefix("refs/heads/").unwrap_or(&event.r#ref);

    let mut message = String::new();
    if event.after == ZERO_SHA {
        write!(
            message,
            "🗑️ <b>{}</b> deleted branch <code>{}</code> from <a href=\"{}\">{}</a>",
            escape_html(&event.user_name),
            escape_html(branch),
            event.project.web_url,
            escape_html(&event.project.name),
        )
        .ok();
    } else {
        write!(
            message,
            "🚀 <b>{}</b> pushed to <a href=\"{}\">{}</a> (branch <code>{}</code>)",
            escape_html(&event.user_name),
            event.project.web_url,
            escape_html(&event.project.name),
            escape_html(branch),
        )
        .ok();
        if !event.commits.is_empty() {
            message.push_str(":\n\n");
            for commit in &event.commits {
                writeln!(
                    message,
                    "👉 <b>{}</b>: <a href=\"{}\">{}</a>",
                    escape_html(&commit.author.name),
                    commit.url,
                    escape_html(commit.message.trim()),
                )
                .ok();
            }
        }
    }

    Ok(Some(Notification::Message(message)))
}

fn pipeline_status_emoji(status: &str) -> &'static str {
    match status {
        "success" => "✅",
        "failed" => "❌",
        "running" => "🔄",
        "pending" => "⏳",
        "canceled" => "⚠️",
        "canceling" => "🛑",
        "skipped" => "⏭️",
        "created" => "🛠️",
        "waiting_for_resource" => "🚦",
        "preparing" => "⚙️",
        "manual" => "✋",
        "scheduled" => "📅",
        _ => "ℹ️",
    }
}

fn render_pipeline(payload: &[u8]) -> Result<Option<Notification>> {
    #[derive(Debug, Deserialize)]
    struct Attributes {
        #[serde(default)]
        id: i64,
        #[serde(default)]
        r#ref: String,
        #[serde(default)]
        status: String,
        #[serde(default)]
        url: String,
    }

    #[derive(Debug, Deserialize)]
    struct MergeRequest {
        #[serde(default)]
        iid: i64,
        #[serde(default)]
        title: String,
        #[serde(default)]
        url: String,
    }

    #[derive(Debug, Deserialize)]
    struct Build {
        #[serde(default)]
        id: i64,
        #[serde(default)]
        name: String,
        #[serde(default)]
        status: String,
        #[serde(default)]
        duration: f64,
    }

    #[derive(Debug, Deserialize)]
    struct PipelineEvent {
        object_attributes: Attributes,
        #[serde(default)]
        merge_request: Option<MergeRequest>,
        #[serde(default)]
        builds: Vec<Build>,
    }

    let mut event: PipelineEvent = serde_json::from_slice(payload)?;

    let mut message = String::new();
    message.push_str(pipeline_status_emoji(&event.object_attributes.status));
    message.push(' ');

    let status_display = event.object_attributes.status.replace('_', " ");
    let for_part = match &event.merge_request {
        Some(mr) => format!(
            "<a href=\"{}\">!{} {}</a>",
            mr.url,
            mr.iid,
            escape_html(&mr.title)
        ),
        None => format!("<code>{}</code>", escape_html(&event.object_attributes.r#ref)),
    };
    write!(
        message,
        "<a href=\"{}\">Pipeline #{}</a> {} for {}",
        event.object_attributes.url,
        event.object_attributes.id,
        escape_html(&status_display),
        for_part,
    )
    .ok();

    if !event.builds.is_empty() {
        event.builds.sort_by_key(|build| build.id);
        message.push_str(":\n\n");
        for build in &event.builds {
            let emoji = pipeline_status_emoji(&build.status);
            let duration = if build.duration >= 1.0 {
                format!("{:.0} seconds", build.duration)
            } else if build.duration > 0.0 {
                format!("{:.1} seconds", build.duration)
            } else {
                String::new()
            };
            if duration.is_empty() {
                writeln!(message, "{emoji} <b>{}</b>", escape_html(&build.name)).ok();
            } else {
                writeln!(
                    message,
                    "{emoji} <b>{}</b> ({duration})",
                    escape_html(&build.name)
                )
                .ok();
            }
        }
    }

    Ok(Some(Notification::PipelineUpdate {
        pipeline_url: event.object_attributes.url,
        text: message,
    }))
}

fn render_merge_request(payload: &[u8]) -> Result<Option<Notification>> {
    #[derive(Debug, Deserialize)]
    struct Attributes {
        #[serde(default)]
        title: String,
        #[serde(default)]
        action: String,
        #[serde(default)]
        url: String,
        #[serde(default)]
        source_branch: String,
        #[serde(default)]
        target_branch: String,
    }

    #[derive(Debug, Deserialize)]
    struct MergeRequestEvent {
        object_attributes: Attributes,
        project: Project,
        user: User,
    }

    let event: MergeRequestEvent = serde_json::from_slice(payload)?;
    let (emoji, action) = match event.object_attributes.action.as_str() {
        "open" => ("🔀", "opened"),
        "merge" => ("✅", "merged"),
        "close" => ("❌", "closed"),
        "reopen" => ("🔀", "reopened"),
        "approved" => ("✅", "approved"),
        "unapproved" => ("❌", "revoked approval for"),
        _ => return Ok(None),
    };

    Ok(Some(Notification::Message(format!(
        "{emoji} <b>{}</b> {action} merge request: <a href=\"{}\">{}</a> — <a href=\"{}\">{}</a> (<code>{}</code> → <code>{}</code>).",
        escape_html(&event.user.name),
        event.project.web_url,
        escape_html(&event.project.name),
        event.object_attributes.url,
        escape_html(&event.object_attributes.title),
        escape_html(&event.object_attributes.source_branch),
        escape_html(&event.object_attributes.target_branch),
    ))))
}

fn render_issue(payload: &[u8]) -> Result<Option<Notification>> {
    #[derive(Debug, Deserialize)]
    struct Attributes {
        #[serde(default)]
        title: String,
        #[serde(default)]
        action: String,
        #[serde(default)]
        url: String,
    }

    #[derive(Debug, Deserialize)]
    struct IssueEvent {
        object_attributes: Attributes,
        project: Project,
        user: User,
    }

    let event: IssueEvent = serde_json::from_slice(payload)?;
    let (emoji, action) = match event.object_attributes.action.as_str() {
        "open" => ("🆕", "opened"),
        "close" => ("✅", "closed"),
        "reopen" => ("🔄", "reopened"),
        _ => return Ok(None),
    };

    Ok(Some(Notification::Message(format!(
        "{emoji} <b>{}</b> {action} issue: <a href=\"{}\">{}</a> — <a href=\"{}\">{}</a>.",
        escape_html(&event.user.name),
        event.project.web_url,
        escape_html(&event.project.name),
        event.object_attributes.url,
        escape_html(&event.object_attributes.title),
    ))))
}

#[cfg(test)]
mod tests {
    use super::render_gitlab;
    use crate::{EventError, Notification};
    use serde_json::json;

    #[test]
    fn pipeline_event_routes_through_the_coalescing_path() {
        let payload = json!({
            "object_attributes": {
                "id": 42,
                "ref": "main",
                "status": "waiting_for_resource",
                "url": "https://gitlab.example/acme/app/-/pipelines/42",
            },
            "project": {"name": "app", "web_url": "https://gitlab.example/acme/app"},
            "user": {"name": "dev"},
            "builds": [],
        });
        let rendered = render_gitlab("Pipeline Hook", payload.to_string().as_bytes())
            .unwrap()
            .unwrap();
        match rendered {
            Notification::PipelineUpdate { pipeline_url, text } => {
                assert_eq!(pipeline_url, "https://gitlab.example/acme/app/-/pipelines/42");
                assert_eq!(
                    text,
                    "🚦 <a href=\"https://gitlab.example/acme/app/-/pipelines/42\">Pipeline #42</a> \
                     waiting for resource for <code>main</code>"
                );
            }
            other => panic!("expected pipeline update, got {other:?}"),
        }
    }

    #[test]
    fn pipeline_builds_are_sorted_by_id_with_durations() {
        let payload = json!({
            "object_attributes": {
                "id": 42,
                "ref": "main",
                "status": "running",
                "url": "https://ci/p/42",
            },
            "builds": [
                {"id": 2, "name": "test", "status": "running", "duration": 0.4},
                {"id": 1, "name": "build", "status": "success", "duration": 31.7},
                {"id": 3, "name": "deploy", "status": "created", "duration": 0.0},
            ],
        });
        let rendered = render_gitlab("Pipeline Hook", payload.to_string().as_bytes())
            .unwrap()
            .unwrap();
        let Notification::PipelineUpdate { text, .. } = rendered else {
            panic!("expected pipeline update");
        };
        let build_idx = text.find("<b>build</b> (32 seconds)").unwrap();
        let test_idx = text.find("<b>test</b> (0.4 seconds)").unwrap();
        let deploy_idx = text.find("🛠️ <b>deploy</b>\n").unwrap();
        assert!(build_idx < test_idx && test_idx < deploy_idx);
    }

    #[test]
    fn pipeline_for_merge_request_links_the_mr() {
        let payload = json!({
            "object_attributes": {"id": 7, "ref": "mr-branch", "status": "success", "url": "https://ci/p/7"},
            "merge_request": {"iid": 12, "title": "Add <thing>", "url": "https://gl/mr/12"},
            "builds": [],
        });
        let rendered = render_gitlab("Pipeline Hook", payload.to_string().as_bytes())
            .unwrap()
            .unwrap();
        let Notification::PipelineUpdate { text, .. } = rendered else {
            panic!("expected pipeline update");
        };
        assert!(text.contains("for <a href=\"https://gl/mr/12\">!12 Add &lt;thing&gt;</a>"));
    }

    #[test]
    fn push_and_deletion_render_as_plain_messages() {
        let push = json!({
            "ref": "refs/heads/main",
            "after": "abc",
            "user_name": "dev",
            "project": {"name": "app", "web_url": "https://gl/app"},
            "commits": [
                {"message": " Fix it \n", "url": "https://gl/c/1", "author": {"name": "dev"}}
            ],
        });
        let Some(Notification::Message(text)) =
            render_gitlab("Push Hook", push.to_string().as_bytes()).unwrap()
        else {
            panic!("expected message");
        };
        assert!(text.starts_with("🚀 <b>dev</b> pushed to <a href=\"https://gl/app\">app</a>"));
        assert!(text.contains("👉 <b>dev</b>: <a href=\"https://gl/c/1\">Fix it</a>"));

        let deletion = json!({
            "ref": "refs/heads/old",
            "after": "0000000000000000000000000000000000000000",
            "user_name": "dev",
            "project": {"name": "app", "web_url": "https://gl/app"},
            "commits": [],
        });
        let Some(Notification::Message(text)) =
            render_gitlab("Push Hook", deletion.to_string().as_bytes()).unwrap()
        else {
            panic!("expected message");
        };
        assert!(text.starts_with("🗑️ <b>dev</b> deleted branch <code>old</code>"));
    }

    #[test]
    fn merge_request_ignores_unknown_actions() {
        let base = |action: &str| {
            json!({
                "object_attributes": {
                    "title": "T", "action": action, "url": "https://gl/mr/1",
                    "source_branch": "a", "target_branch": "b",
                },
                "project": {"name": "app", "web_url": "https://gl/app"},
                "user": {"name": "dev"},
            })
        };
        assert!(
            render_gitlab("Merge Request Hook", base("update").to_string().as_bytes())
                .unwrap()
                .is_none()
        );
        let Some(Notification::Message(text)) =
            render_gitlab("Merge Request Hook", base("merge").to_string().as_bytes()).unwrap()
        else {
            panic!("expected message");
        };
        assert!(text.contains("merged merge request"));
        assert!(text.contains("(<code>a</code> → <code>b</code>)."));
    }

    #[test]
    fn issue_actions_are_filtered_and_rendered() {
        let base = |action: &str| {
            json!({
                "object_attributes": {"title": "Bug", "action": action, "url": "https://gl/i/1"},
                "project": {"name": "app", "web_url": "https://gl/app"},
                "user": {"name": "dev"},
            })
        };
        assert!(
            render_gitlab("Issue Hook", base("update").to_string().as_bytes())
                .unwrap()
                .is_none()
        );
        let Some(Notification::Message(text)) =
            render_gitlab("Issue Hook", base("open").to_string().as_bytes()).unwrap()
        else {
            panic!("expected message");
        };
        assert!(text.starts_with("🆕 <b>dev</b> opened issue:"));
    }

    #[test]
    fn unknown_event_type_is_an_error() {
        let err = render_gitlab("Tag Push Hook", b"{}").unwrap_err();
        assert!(matches!(err, EventError::UnsupportedEvent(_)));
    }
}
