//! Release-note normalization for ntfy's markdown renderer

use regex::{Captures, Regex};
use std::sync::OnceLock;

fn issue_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https://github\.com/([\w.-]+)/([\w.-]+)/(issues|pull)/(\d+)")
            .expect("valid issue url regex")
    })
}

fn issue_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(^|[^\w/\[])(?:(issue)\s*:\s*)?#(\d+)\b").expect("valid issue ref regex")
    })
}

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(^|\s)@([a-zA-Z0-9-]+)\b").expect("valid mention regex"))
}

fn compare_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"https://github\.com/([\w.-]+/[\w.-]+)/compare/(v?\d+(?:\.\d+)+)\.\.\.(v?\d+(?:\.\d+)+)",
        )
        .expect("valid compare regex")
    })
}

fn shortcode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":([a-z0-9_+-]+):").expect("valid shortcode regex"))
}

/// Rewrite GitHub-flavoured references in `text` as explicit markdown links.
///
/// `repo` is `owner/name` and is used for bare `#123` references.
pub fn github_markdown(text: &str, repo: &str) -> String {
    let text = issue_url_re().replace_all(text, |caps: &Captures| {
        format!(
            "[#{num}](https://github.com/{owner}/{repo}/{kind}/{num})",
            owner = &caps[1],
            repo = &caps[2],
            kind = &caps[3],
            num = &caps[4],
        )
    });

    let text = link_issue_refs(&text, repo);

    let text = mention_re().replace_all(&text, |caps: &Captures| {
        format!("{}[@{user}](https://github.com/{user})", &caps[1], user = &caps[2])
    });

    let text = compare_re().replace_all(&text, |caps: &Captures| {
        format!("[{}...{}]({})", &caps[2], &caps[3], &caps[0])
    });

    emojify(&text)
}

/// Link bare `#N` / `issue: #N` references that are not already link text.
fn link_issue_refs(text: &str, repo: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in issue_ref_re().captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };

        // Already the text of a markdown link
        if text[whole.end()..].starts_with("](") {
            continue;
        }

        out.push_str(&text[last..whole.start()]);
        out.push_str(&caps[1]);
        if let Some(word) = caps.get(2) {
            out.push_str(word.as_str());
            out.push_str(": ");
        }
        out.push_str(&format!(
            "[#{num}](https://github.com/{repo}/issues/{num})",
            num = &caps[3],
            repo = repo
        ));
        last = whole.end();
    }

    out.push_str(&text[last..]);
    out
}

/// Expand `:shortcode:` emoji; unknown codes are left untouched
pub fn emojify(text: &str) -> String {
    shortcode_re()
        .replace_all(text, |caps: &Captures| match emojis::get_by_shortcode(&caps[1]) {
            Some(emoji) => emoji.as_str().to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_urls_become_short_links() {
        let out = github_markdown("Fixed in https://github.com/a/b/pull/12", "a/b");
        assert_eq!(out, "Fixed in [#12](https://github.com/a/b/pull/12)");
    }

    #[test]
    fn test_bare_references_are_linked() {
        let out = github_markdown("fixes #7 and Issue: #8", "owner/repo");
        assert_eq!(
            out,
            "fixes [#7](https://github.com/owner/repo/issues/7) and Issue: [#8](https://github.com/owner/repo/issues/8)"
        );

        let out = github_markdown("#3 at start", "o/r");
        assert_eq!(out, "[#3](https://github.com/o/r/issues/3) at start");
    }

    #[test]
    fn test_existing_links_and_anchors_untouched() {
        let input = "see [#5](https://example.com) and page/#6 and abc#7";
        assert_eq!(github_markdown(input, "o/r"), input);
    }

    #[test]
    fn test_mentions() {
        let out = github_markdown("thanks @octo-cat!", "o/r");
        assert_eq!(out, "thanks [@octo-cat](https://github.com/octo-cat)!");

        // e-mail addresses are not mentions
        assert_eq!(github_markdown("mail me@host.com", "o/r"), "mail me@host.com");
    }

    #[test]
    fn test_compare_links() {
        let url = "https://github.com/o/r/compare/v1.0.0...v1.1.0";
        let out = github_markdown(&format!("Changelog: {}", url), "o/r");
        assert_eq!(out, format!("Changelog: [v1.0.0...v1.1.0]({})", url));
    }

    #[test]
    fn test_emoji_shortcodes() {
        assert_eq!(emojify(":tada: done"), "🎉 done");
        assert_eq!(emojify(":not_a_real_code:"), ":not_a_real_code:");
        assert_eq!(emojify("10:30:45"), "10:30:45");
    }
}
