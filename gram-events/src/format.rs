/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// HTML link to a commit showing the first line of its message. Multi-line
/// messages get a trailing ellipsis outside the link tag.
pub fn commit_link(message: &str, url: &str) -> String {
    let trimmed = message.trim();
    let mut lines = trimmed.lines();
    let first_line = lines.next().unwrap_or("").trim();
    let link = format!("<a href=\"{url}\">{}</a>", escape_html(first_line));
    if lines.next().is_some() {
        format!("{link} …")
    } else {
        link
    }
}

#[cfg(test)]
mod tests {
    use super::{commit_link, escape_html};

    #[test]
    fn escapes_all_html_significant_characters() {
        assert_eq!(
            escape_html("<b>&\"'</b>"),
            "&lt;b&gt;&amp;&quot;&#39;&lt;/b&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn commit_link_truncates_to_first_line() {
        assert_eq!(
            commit_link("Fix bug", "https://x/c/1"),
            "<a href=\"https://x/c/1\">Fix bug</a>"
        );
        assert_eq!(
            commit_link("Fix bug\n\nLong body here", "https://x/c/1"),
            "<a href=\"https://x/c/1\">Fix bug</a> …"
        );
    }
}
