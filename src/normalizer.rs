use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

// matches an opening fence (with an optional json tag) at the start of a line or
// a closing fence at the end of one.
static CODE_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^```(?:json)?\s*|\s*```$").expect("code fence regex should compile")
});

// greedy match from the first '{' to the last '}', newlines included.
static JSON_OBJECT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("json object regex should compile"));

// The structured reply the text model is instructed to produce.
//
// `want_image` being true does not guarantee a non-empty `image_prompt`;
// callers have to check both before offering an image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedReply {
    pub reply: String,
    pub want_image: bool,
    pub image_prompt: String,
}
impl NormalizedReply {
    // the record used whenever the raw text can't be read as a JSON object
    fn plain_text(raw: &str) -> Self {
        Self {
            reply: raw.trim().to_owned(),
            want_image: false,
            image_prompt: String::new(),
        }
    }

    fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            reply: obj.get("reply").map(value_as_text).unwrap_or_default(),
            want_image: obj.get("want_image").map(value_as_flag).unwrap_or(false),
            image_prompt: obj.get("image_prompt").map(value_as_text).unwrap_or_default(),
        }
    }
}

// removes markdown code fences wrapping the text, tolerating a `json` language tag
// in any letter case.
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE_REGEX.replace_all(text.trim(), "").into_owned()
}

// Coerces raw model output into a [`NormalizedReply`].
//
// This never fails: text that has no decodable `{...}` object in it becomes a
// plain reply with no image requested.
pub fn normalize_reply(raw: &str) -> NormalizedReply {
    let cleaned = strip_code_fences(raw);
    let Some(found) = JSON_OBJECT_REGEX.find(&cleaned) else {
        log::debug!("No JSON object found in the model reply; using it as plain text.");
        return NormalizedReply::plain_text(raw);
    };

    match serde_json::from_str::<Value>(found.as_str()) {
        Ok(Value::Object(obj)) => NormalizedReply::from_object(&obj),
        Ok(_) => NormalizedReply::plain_text(raw),
        Err(err) => {
            log::debug!("Model reply wasn't valid JSON ({err}); using it as plain text.");
            NormalizedReply::plain_text(raw)
        }
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_owned(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// true for JSON true, the strings "true"/"yes"/"1" in any case, and non-zero
// numbers. anything else, including the string "false", is false.
fn value_as_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("yes") || s == "1"
        }
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_is_decoded_exactly() {
        let raw = "```json\n{\"reply\":\"hi\",\"want_image\":true,\"image_prompt\":\"a cat\"}\n```";
        let parsed = normalize_reply(raw);
        assert_eq!(
            parsed,
            NormalizedReply {
                reply: "hi".to_owned(),
                want_image: true,
                image_prompt: "a cat".to_owned(),
            }
        );
    }

    #[test]
    fn uppercase_fence_tag_is_stripped() {
        let raw = "```JSON\n{\"reply\":\"loud\"}\n```";
        assert_eq!(normalize_reply(raw).reply, "loud");
        assert_eq!(strip_code_fences(raw), "{\"reply\":\"loud\"}");
    }

    #[test]
    fn plain_text_falls_back() {
        let parsed = normalize_reply("  just plain text \n");
        assert_eq!(parsed.reply, "just plain text");
        assert!(!parsed.want_image);
        assert!(parsed.image_prompt.is_empty());
    }

    #[test]
    fn missing_keys_default() {
        let parsed = normalize_reply("{\"reply\":\"ok\"}");
        assert_eq!(parsed.reply, "ok");
        assert!(!parsed.want_image);
        assert_eq!(parsed.image_prompt, "");
    }

    #[test]
    fn object_embedded_in_prose_is_found() {
        let raw = "Sure! Here it is:\n{\"reply\":\"drawn\",\n\"want_image\":true,\"image_prompt\":\"a fox\"}\nEnjoy.";
        let parsed = normalize_reply(raw);
        assert_eq!(parsed.reply, "drawn");
        assert!(parsed.want_image);
        assert_eq!(parsed.image_prompt, "a fox");
    }

    #[test]
    fn broken_json_uses_the_whole_input() {
        let raw = "{\"reply\": \"unterminated}";
        assert_eq!(normalize_reply(raw).reply, raw);

        // greedy span covers both objects and so can't decode
        let two = "{\"reply\":\"a\"} and {\"reply\":\"b\"}";
        let parsed = normalize_reply(two);
        assert_eq!(parsed.reply, two);
        assert!(!parsed.want_image);
    }

    #[test]
    fn loose_field_types_are_coerced() {
        let parsed = normalize_reply(
            "{\"reply\":42,\"want_image\":\"Yes\",\"image_prompt\":null}",
        );
        assert_eq!(parsed.reply, "42");
        assert!(parsed.want_image);
        assert_eq!(parsed.image_prompt, "");

        assert!(!normalize_reply("{\"want_image\":0}").want_image);
        assert!(normalize_reply("{\"want_image\":1}").want_image);
        assert!(!normalize_reply("{\"want_image\":[true]}").want_image);
    }

    #[test]
    fn quoted_false_is_not_an_image_request() {
        assert!(!normalize_reply("{\"want_image\":\"false\"}").want_image);
        assert!(!normalize_reply("{\"want_image\":\"no\"}").want_image);
        assert!(normalize_reply("{\"want_image\":\" TRUE \"}").want_image);
    }

    #[test]
    fn empty_input_is_an_empty_reply() {
        assert_eq!(normalize_reply(""), NormalizedReply::default());
    }
}
