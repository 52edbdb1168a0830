//! Tolerant extraction of structured blocks from free-form completions.
//!
//! Provider completions wrap JSON in prose, Markdown fences, or both. These
//! helpers produce an ordered list of candidate snippets; callers decide which
//! candidate (if any) is acceptable.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```").expect("fence regex is valid")
});

/// A fenced Markdown code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Info string language tag, lowercased (may be empty).
    pub lang: String,
    pub body: String,
}

/// Return every closed fenced code block in document order.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    FENCE_RE
        .captures_iter(text)
        .map(|caps| FencedBlock {
            lang: caps
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default(),
            body: caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        })
        .collect()
}

/// Strip one surrounding code fence, if the whole text is a single fenced block.
pub fn strip_outer_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return content;
    };
    let Some(newline_idx) = without_open.find('\n') else {
        return content;
    };
    let after_header = &without_open[newline_idx + 1..];
    match after_header.trim_end().strip_suffix("```") {
        Some(body) => body.strip_suffix('\n').unwrap_or(body),
        None => content,
    }
}

/// Ordered JSON candidates: fenced `json` blocks, other fenced blocks,
/// balanced spans, then the whole text.
pub fn json_candidates(text: &str, max_spans: usize) -> Vec<String> {
    let mut out = Vec::new();
    let blocks = fenced_blocks(text);
    for block in blocks.iter().filter(|b| b.lang == "json") {
        push_unique(&mut out, &block.body);
    }
    for block in blocks.iter().filter(|b| b.lang != "json") {
        push_unique(&mut out, &block.body);
    }
    for span in balanced_json_spans(text, max_spans) {
        push_unique(&mut out, &span);
    }
    push_unique(&mut out, text);
    out
}

/// Top-level balanced `{...}` / `[...]` spans, string-literal aware.
pub fn balanced_json_spans(text: &str, max_spans: usize) -> Vec<String> {
    let mut spans = Vec::new();
    let mut idx = 0usize;
    while idx < text.len() && spans.len() < max_spans {
        let Some(offset) = text[idx..].find(['{', '[']) else {
            break;
        };
        let start = idx + offset;
        match balanced_end(text, start) {
            Some(end) => {
                spans.push(text[start..end].to_string());
                idx = end;
            }
            None => idx = start + 1,
        }
    }
    spans
}

fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn push_unique(out: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    if !out.iter().any(|existing| existing == trimmed) {
        out.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_fenced_blocks_with_language() {
        let text = "intro\n```json\n{\"a\": 1}\n```\nmid\n```sh\nls\n```\n";
        let blocks = fenced_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lang, "json");
        assert_eq!(blocks[0].body, "{\"a\": 1}");
        assert_eq!(blocks[1].lang, "sh");
    }

    #[test]
    fn unclosed_fence_yields_no_block() {
        let text = "```json\n{\"tasks\": [";
        assert!(fenced_blocks(text).is_empty());
    }

    #[test]
    fn balanced_spans_ignore_braces_in_strings() {
        let text = r#"prefix {"a": "x}y", "b": [1, 2]} suffix [3]"#;
        let spans = balanced_json_spans(text, 4);
        assert_eq!(spans, vec![r#"{"a": "x}y", "b": [1, 2]}"#, "[3]"]);
    }

    #[test]
    fn truncated_span_is_skipped() {
        let spans = balanced_json_spans("{\"a\": [1, 2", 4);
        assert!(spans.is_empty());
    }

    #[test]
    fn json_blocks_come_before_other_candidates() {
        let text = "```\nnot json\n```\n```json\n{\"x\": 1}\n```";
        let candidates = json_candidates(text, 4);
        assert_eq!(candidates[0], "{\"x\": 1}");
        assert_eq!(candidates[1], "not json");
    }

    #[test]
    fn strip_outer_fence_only_when_fully_wrapped() {
        assert_eq!(strip_outer_fence("```rust\nfn main() {}\n```"), "fn main() {}");
        assert_eq!(strip_outer_fence("plain text"), "plain text");
    }
}
