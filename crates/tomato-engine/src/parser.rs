use serde_json::{Map, Value};
use tomato_contracts::report::UNKNOWN_AGENT;

/// Turns a free-form model reply into a JSON object.
///
/// Parsing never fails: a reply without a usable object becomes a fallback
/// record carrying the raw text, a `parsing_error` and `agent_name: "Unknown"`.
pub trait ReplyParser: Send + Sync {
    fn parse(&self, reply: &str) -> Map<String, Value>;
}

/// Decodes the span from the first `{` to the last `}`.
///
/// Assumes the reply embeds a single object; a stray `}` after it (or a
/// second object) makes the span undecodable and yields the fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct BraceSpanParser;

impl ReplyParser for BraceSpanParser {
    fn parse(&self, reply: &str) -> Map<String, Value> {
        match (reply.find('{'), reply.rfind('}')) {
            (Some(start), Some(end)) if end > start => decode_object(reply, &reply[start..=end]),
            _ => no_json_fallback(reply),
        }
    }
}

/// Decodes the first complete top-level object, tracking nesting depth and
/// skipping braces inside string literals.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedObjectParser;

impl ReplyParser for BalancedObjectParser {
    fn parse(&self, reply: &str) -> Map<String, Value> {
        let Some(start) = reply.find('{') else {
            return no_json_fallback(reply);
        };
        match balanced_object_end(&reply[start..]) {
            Some(len) => decode_object(reply, &reply[start..start + len]),
            None => no_json_fallback(reply),
        }
    }
}

/// Parses with the default lenient heuristic.
pub fn parse_json_response(reply: &str) -> Map<String, Value> {
    BraceSpanParser.parse(reply)
}

/// Byte length of the object opening at `text[0]`, if it closes.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
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
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn decode_object(reply: &str, candidate: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => object,
        Ok(other) => fallback(
            reply,
            format!("JSON decode error: expected an object, found {}", value_kind(&other)),
        ),
        Err(err) => fallback(reply, format!("JSON decode error: {err}")),
    }
}

fn no_json_fallback(reply: &str) -> Map<String, Value> {
    fallback(reply, "No valid JSON found in response".to_string())
}

fn fallback(reply: &str, parsing_error: String) -> Map<String, Value> {
    let mut object = Map::new();
    object.insert("raw_response".to_string(), Value::String(reply.to_string()));
    object.insert("parsing_error".to_string(), Value::String(parsing_error));
    object.insert(
        "agent_name".to_string(),
        Value::String(UNKNOWN_AGENT.to_string()),
    );
    object
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{parse_json_response, BalancedObjectParser, BraceSpanParser, ReplyParser};

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let reply = "Here is the result: {\"agent_name\": \"Plant Pathology Specialist\", \"diseases_identified\": [\"Early Blight (90%)\"]}";
        let parsed = parse_json_response(reply);
        assert_eq!(parsed["agent_name"], json!("Plant Pathology Specialist"));
        assert_eq!(parsed["diseases_identified"], json!(["Early Blight (90%)"]));
        assert!(parsed.get("parsing_error").is_none());
    }

    #[test]
    fn nested_structures_survive_parsing() {
        let original = json!({
            "agent_name": "Treatment Coordinator",
            "priority_treatments": ["Remove lower leaves", "Apply copper fungicide"],
            "treatment_timeline": {"week_1": ["scout"], "week_2": ["spray"]},
        });
        let reply = format!("```json\n{}\n```", serde_json::to_string_pretty(&original).unwrap());
        assert_eq!(Value::Object(parse_json_response(&reply)), original);
    }

    #[test]
    fn reply_without_braces_falls_back_with_raw_text() {
        let reply = "I cannot analyze this image.";
        let parsed = parse_json_response(reply);
        assert_eq!(parsed["raw_response"], json!(reply));
        assert_eq!(parsed["parsing_error"], json!("No valid JSON found in response"));
        assert_eq!(parsed["agent_name"], json!("Unknown"));
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn closing_brace_before_opening_brace_is_not_a_span() {
        let parsed = parse_json_response("} nothing here {");
        assert_eq!(parsed["parsing_error"], json!("No valid JSON found in response"));
    }

    #[test]
    fn malformed_span_reports_decode_error() {
        let reply = "{\"agent_name\": \"Entomology Specialist\", \"pest_damage_detected\": [}";
        let parsed = parse_json_response(reply);
        assert_eq!(parsed["raw_response"], json!(reply));
        assert_eq!(parsed["agent_name"], json!("Unknown"));
        let message = parsed["parsing_error"].as_str().unwrap_or_default();
        assert!(message.starts_with("JSON decode error: "), "{message}");
    }

    #[test]
    fn two_objects_defeat_the_span_heuristic() {
        let reply = "{\"a\": 1} and also {\"b\": 2}";
        let lenient = BraceSpanParser.parse(reply);
        assert!(lenient.contains_key("parsing_error"));

        let balanced = BalancedObjectParser.parse(reply);
        assert_eq!(Value::Object(balanced), json!({"a": 1}));
    }

    #[test]
    fn balanced_parser_ignores_braces_inside_strings() {
        let reply = r#"Result {"damage_pattern": "ring {outer} with \"quoted\" text"} trailing }"#;
        let parsed = BalancedObjectParser.parse(reply);
        assert_eq!(
            parsed["damage_pattern"],
            json!("ring {outer} with \"quoted\" text")
        );
    }

    #[test]
    fn balanced_parser_falls_back_on_unclosed_object() {
        let reply = "{\"agent_name\": \"Plant Nutrition Specialist\"";
        let parsed = BalancedObjectParser.parse(reply);
        assert_eq!(parsed["parsing_error"], json!("No valid JSON found in response"));
        assert_eq!(parsed["raw_response"], json!(reply));
    }
}
