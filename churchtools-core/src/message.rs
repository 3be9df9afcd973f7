//! Human readable messages from error bodies.
//!
//! Error bodies from both APIs look roughly like
//! `{message, translatedMessage, messageKey, args, errors: [...]}`, possibly
//! wrapped in one or more `data` envelopes or a `response` member.

use serde_json::Value;

const TRANSLATION_NOT_READY: &str = "Translation not yet initialized";

/// Callback turning a message key and its arguments into display text.
pub type Translate<'a> = &'a dyn Fn(&str, &Value) -> String;

/// Best available human readable message for an error value.
///
/// Plain strings are returned as they are. `translatedMessage` wins over a
/// translated `messageKey`, which wins over `message`. Nested `errors` are
/// appended.
pub fn translated_error_message(error: &Value, translate: Option<Translate<'_>>) -> Option<String> {
    error
        .get("response")
        .and_then(|response| from_data(response, translate))
        .or_else(|| from_data(error, translate))
        .or_else(|| error.as_str().map(str::to_string))
}

/// The `messageKey` of an error value, if it carries one.
pub fn error_message_key(error: &Value) -> Option<String> {
    error
        .get("response")
        .and_then(key_from_data)
        .or_else(|| key_from_data(error))
}

fn key_from_data(value: &Value) -> Option<String> {
    match value.get("data").filter(|d| is_truthy(d)) {
        Some(inner) => key_from_data(inner),
        None => value
            .get("messageKey")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .map(str::to_string),
    }
}

fn from_data(value: &Value, translate: Option<Translate<'_>>) -> Option<String> {
    if let Some(inner) = value.get("data").filter(|d| is_truthy(d)) {
        return from_data(inner, translate);
    }
    if !value.is_object() {
        return None;
    }

    let nested: Vec<String> = value
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| translated_error_message(e, translate))
                .filter(|m| !m.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let additional = if nested.is_empty() {
        String::new()
    } else {
        format!(" {}", nested.join(" "))
    };

    let text = |key: &str| value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());

    if let Some(translated) = text("translatedMessage") {
        if translated == TRANSLATION_NOT_READY && !additional.is_empty() {
            return Some(additional.trim().to_string());
        }
        return Some(format!("{}{}", translated, additional));
    }
    if let (Some(key), Some(translate)) = (text("messageKey"), translate) {
        let args = value.get("args").unwrap_or(&Value::Null);
        return Some(format!("{}{}", translate(key, args), additional));
    }
    text("message").map(|message| format!("{}{}", message, additional))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn login_error() -> Value {
        json!({
            "message": "Username or password wrong for test",
            "translatedMessage":
                "Login ist fehlgeschlagen. Benutzername oder Passwort sind falsch.",
            "messageKey": "login.failed",
            "args": [],
            "errors": []
        })
    }

    #[test]
    fn test_plain_string() {
        let err = json!("Ein Fehler ist aufgetreten.");
        assert_eq!(
            translated_error_message(&err, None).as_deref(),
            Some("Ein Fehler ist aufgetreten.")
        );
    }

    #[test]
    fn test_exception_message() {
        let err = json!({"message": "undefined is not an object."});
        assert_eq!(
            translated_error_message(&err, None).as_deref(),
            Some("undefined is not an object.")
        );
    }

    #[test]
    fn test_translated_message_through_envelopes() {
        let expected = "Login ist fehlgeschlagen. Benutzername oder Passwort sind falsch.";
        let data = login_error();
        assert_eq!(translated_error_message(&data, None).as_deref(), Some(expected));

        let wrapped = json!({"data": {"data": data.clone()}});
        assert_eq!(translated_error_message(&wrapped, None).as_deref(), Some(expected));

        let response = json!({"response": {"data": data}});
        assert_eq!(translated_error_message(&response, None).as_deref(), Some(expected));
        assert_eq!(error_message_key(&response).as_deref(), Some("login.failed"));
    }

    #[test]
    fn test_translate_callback_used_for_key() {
        let err = json!({
            "message": "fallback",
            "messageKey": "group.full",
            "args": {"name": "Youth"}
        });
        let translate =
            |key: &str, args: &Value| format!("{}:{}", key, args["name"].as_str().unwrap_or(""));
        assert_eq!(
            translated_error_message(&err, Some(&translate)).as_deref(),
            Some("group.full:Youth")
        );
        assert_eq!(translated_error_message(&err, None).as_deref(), Some("fallback"));
    }

    #[test]
    fn test_nested_errors_appended() {
        let err = json!({
            "message": "Validation failed.",
            "errors": [{"message": "Name missing."}, {"message": "Email invalid."}]
        });
        assert_eq!(
            translated_error_message(&err, None).as_deref(),
            Some("Validation failed. Name missing. Email invalid.")
        );

        let not_ready = json!({
            "translatedMessage": "Translation not yet initialized",
            "errors": [{"translatedMessage": "Feld fehlt."}]
        });
        assert_eq!(translated_error_message(&not_ready, None).as_deref(), Some("Feld fehlt."));
    }

    #[test]
    fn test_no_message() {
        assert_eq!(translated_error_message(&json!({"status": 3}), None), None);
        assert_eq!(error_message_key(&json!({"message": "x"})), None);
    }
}
