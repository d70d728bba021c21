//! JSON extraction from messy model output.

/// Extract a JSON object from a model response that may wrap it in markdown
/// fences, prefix it with prose, or append trailing commentary.
///
/// Strategy, first hit wins:
/// 1. strip ```json fences and try the remainder verbatim,
/// 2. the first balanced `{...}` block,
/// 3. the widest span between the first `{` and the last `}`.
///
/// When nothing parses, the stripped text is returned unchanged so the
/// caller surfaces the real parse error (or falls back).
pub fn sanitize_json_response(response: &str) -> String {
    if response.is_empty() {
        return "{}".to_string();
    }

    let mut text = response.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    if serde_json::from_str::<serde_json::Value>(text).is_ok() {
        return text.to_string();
    }

    if let Some(block) = first_balanced_object(text)
        && serde_json::from_str::<serde_json::Value>(block).is_ok()
    {
        return block.to_string();
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}'))
        && end > start
    {
        let candidate = &text[start..=end];
        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
            return candidate.to_string();
        }
    }

    text.to_string()
}

/// Find the first balanced `{...}` block, respecting string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(s: &str) -> serde_json::Value {
        serde_json::from_str(&sanitize_json_response(s)).unwrap()
    }

    #[test]
    fn passes_through_pure_json() {
        assert_eq!(parsed(r#"{"a": 1}"#), json!({"a": 1}));
    }

    #[test]
    fn strips_markdown_fences() {
        let input = "```json\n{\"intent\": \"DOCUMENT_SEARCH\"}\n```";
        assert_eq!(parsed(input), json!({"intent": "DOCUMENT_SEARCH"}));
    }

    #[test]
    fn extracts_object_embedded_in_prose() {
        let input = "Sure! Here is the classification: {\"confidence\": 0.9} hope that helps";
        assert_eq!(parsed(input), json!({"confidence": 0.9}));
    }

    #[test]
    fn handles_nested_objects() {
        let input = "prefix {\"filters\": {\"file_type\": [\".pdf\"]}} suffix";
        assert_eq!(parsed(input), json!({"filters": {"file_type": [".pdf"]}}));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let input = r#"note {"reasoning": "uses {curly} braces", "ok": true}"#;
        assert_eq!(
            parsed(input),
            json!({"reasoning": "uses {curly} braces", "ok": true})
        );
    }

    #[test]
    fn empty_input_becomes_empty_object() {
        assert_eq!(sanitize_json_response(""), "{}");
    }

    #[test]
    fn unparseable_text_is_returned_for_caller_fallback() {
        let input = "no json here at all";
        assert_eq!(sanitize_json_response(input), input);
    }
}
