//! Prompt template rendering.

use std::collections::HashMap;

/// Sentinel that should never appear in real templates.
const ESCAPE_SENTINEL: &str = "\x00LBRACE\x00";
/// Sentinel for escaped closing brace.
const ESCAPE_SENTINEL_CLOSE: &str = "\x00RBRACE\x00";

/// Substitute `{input}` and `{key}` placeholders.
///
/// `{input}` is replaced by `input`; every other `{key}` present in `vars`
/// is replaced by its value. Unknown placeholders are left as they are.
/// Use `{{` and `}}` for literal braces.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use llm_structures::template::render;
///
/// let vars = HashMap::from([("name".to_string(), "Alice".to_string())]);
/// let result = render("Hello {name}, here is JSON: {{\"key\": \"val\"}}", "data", &vars);
/// assert_eq!(result, r#"Hello Alice, here is JSON: {"key": "val"}"#);
/// ```
pub fn render(template: &str, input: &str, vars: &HashMap<String, String>) -> String {
    let mut rendered = template.replace("{{", ESCAPE_SENTINEL);
    rendered = rendered.replace("}}", ESCAPE_SENTINEL_CLOSE);

    rendered = rendered.replace("{input}", input);
    for (key, value) in vars {
        let placeholder = format!("{{{}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }

    rendered = rendered.replace(ESCAPE_SENTINEL, "{");
    rendered.replace(ESCAPE_SENTINEL_CLOSE, "}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_basic() {
        let result = render("Hello {name}, process {input}", "data", &vars(&[("name", "Alice")]));
        assert_eq!(result, "Hello Alice, process data");
    }

    #[test]
    fn test_render_no_placeholders() {
        assert_eq!(render("static prompt", "ignored", &vars(&[])), "static prompt");
    }

    #[test]
    fn test_render_unknown_placeholder_kept() {
        assert_eq!(render("{missing} {input}", "x", &vars(&[])), "{missing} x");
    }

    #[test]
    fn test_render_escaped_braces_no_substitution() {
        let result = render("Output format: {{\"result\": {{\"value\": 42}}}}", "data", &vars(&[]));
        assert_eq!(result, r#"Output format: {"result": {"value": 42}}"#);
    }

    #[test]
    fn test_render_escaped_input_placeholder() {
        assert_eq!(render("{{input}} is {input}", "x", &vars(&[])), "{input} is x");
    }
}
