//! Recover JSON (or plain text) from free-form model output.
//!
//! Models wrap answers in markdown fences and prefix them with labels such as
//! `Refined Prompt:`. [`recover_text`] removes one fence and one leading label
//! in whichever order they appear, re-stripping a fence that only became
//! visible once the label was gone.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*|__)?[ \t]*(?:refined|optimized|optimised|improved)[ \t]+prompt[ \t]*(?:\*\*|__)?[ \t]*:[ \t]*(?:\*\*|__)?[ \t]*")
        .expect("LABEL_RE should compile - this is a bug")
});

/// Strip one surrounding code fence (```` ``` ```` with or without a language
/// tag). Text without an opening fence is returned trimmed.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let body = match rest.find('\n') {
        Some(newline) => {
            let first_line = rest[..newline].trim();
            if is_language_tag(first_line) {
                &rest[newline + 1..]
            } else {
                rest
            }
        }
        None => rest,
    };

    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn is_language_tag(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

/// Strip a single leading `Refined Prompt:` / `Optimized Prompt:` label. If the
/// label sits alone on its line the whole line goes; otherwise only the label.
#[must_use]
pub fn strip_label(text: &str) -> &str {
    let trimmed = text.trim_start();
    let Some(found) = LABEL_RE.find(trimmed) else {
        return text.trim();
    };
    trimmed[found.end()..].trim()
}

/// Remove fences and a leading label, in either order.
#[must_use]
pub fn recover_text(text: &str) -> &str {
    let unfenced = strip_code_fence(text);
    let unlabelled = strip_label(unfenced);
    if unlabelled.len() == unfenced.len() {
        return unfenced;
    }
    // The label may have hidden a fence.
    strip_code_fence(unlabelled)
}

/// Parse recovered model output as JSON.
///
/// Tries the recovered text first, then the outermost `{…}` slice, then the
/// outermost `[…]` slice, to tolerate prose around the payload.
///
/// # Errors
/// Returns the parse error of the recovered text when no candidate parses.
pub fn parse_json(text: &str) -> Result<Value, serde_json::Error> {
    let recovered = recover_text(text);
    serde_json::from_str(recovered).or_else(|err| {
        [('{', '}'), ('[', ']')]
            .into_iter()
            .filter_map(|(open, close)| outermost_slice(recovered, open, close))
            .filter(|slice| slice.len() < recovered.len())
            .find_map(|slice| serde_json::from_str(slice).ok())
            .ok_or(err)
    })
}

fn outermost_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strips_fence_with_language_tag() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn strips_fence_without_language_tag() {
        assert_eq!(strip_code_fence("```\nhello\n```"), "hello");
    }

    #[test]
    fn single_line_fence() {
        assert_eq!(strip_code_fence("```{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn unterminated_fence_keeps_body() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn plain_text_untouched() {
        assert_eq!(strip_code_fence("  just text \n"), "just text");
    }

    #[test]
    fn label_on_own_line_removed() {
        assert_eq!(strip_label("Refined Prompt:\nWrite a haiku"), "Write a haiku");
        assert_eq!(strip_label("**Optimized Prompt:**\nDo it"), "Do it");
        assert_eq!(strip_label("## Refined prompt:\nX"), "X");
    }

    #[test]
    fn inline_label_removed() {
        assert_eq!(strip_label("Optimized Prompt: Summarise the report"), "Summarise the report");
    }

    #[test]
    fn unlabelled_text_kept() {
        assert_eq!(strip_label("Prompt engineering is fun"), "Prompt engineering is fun");
    }

    #[test]
    fn label_then_fence() {
        let text = "Refined Prompt:\n```markdown\nYou are a careful editor.\n```";
        assert_eq!(recover_text(text), "You are a careful editor.");
    }

    #[test]
    fn fence_then_label() {
        let text = "```\nOptimized Prompt: You are terse.\n```";
        assert_eq!(recover_text(text), "You are terse.");
    }

    #[test]
    fn fenced_json_parses() {
        let value = parse_json("```json\n{\"a\":1}\n```").expect("parses");
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn json_surrounded_by_prose_parses() {
        let value = parse_json("Sure! Here it is: {\"score\": 7} Hope that helps.").expect("parses");
        assert_eq!(value, json!({"score": 7}));
    }

    #[test]
    fn bracketed_prose_before_object_is_skipped() {
        let value = parse_json("Here is the JSON [as requested]:\n{\"score\": 8}").expect("parses");
        assert_eq!(value, json!({"score": 8}));
    }

    #[test]
    fn array_surrounded_by_prose_parses() {
        let value = parse_json("The items are [1, 2, 3].").expect("parses");
        assert_eq!(value, json!([1, 2, 3]));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_json("I cannot comply with that request.").is_err());
        assert!(parse_json("{ not json }").is_err());
    }
}
