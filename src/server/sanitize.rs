//! Removes schema hints from outbound error messages.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref SUGGESTION: Regex = Regex::new(r#"Did you mean\s+"[^?]*"\?"#).unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Drops `Did you mean "..."?` suggestions and collapses whitespace.
pub fn sanitize_message(message: &str) -> String {
    let stripped = SUGGESTION.replace_all(message, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

/// Sanitises every `errors[i].message` of a response body in place.
pub fn sanitize_response(body: &mut Value) {
    let Some(errors) = body.get_mut("errors").and_then(Value::as_array_mut) else {
        return;
    };
    for error in errors {
        if let Some(Value::String(message)) = error.get_mut("message") {
            *message = sanitize_message(message);
        }
    }
}
