use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Response is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// What the server said: text to show and optionally audio to play
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResponsePayload {
    #[serde(default, deserialize_with = "non_blank")]
    pub text: Option<String>,

    #[serde(default, rename = "audio_url", deserialize_with = "non_blank")]
    pub audio_locator: Option<String>,
}

impl ResponsePayload {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.audio_locator.is_none()
    }
}

/// Blank strings carry no information and are treated as absent
fn non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode a response body. Either both fields decode or the whole body is rejected.
pub fn decode(raw: &[u8]) -> Result<ResponsePayload, DecodeError> {
    let value: Value = serde_json::from_slice(raw)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject(kind_of(&value)));
    }

    let payload = ResponsePayload::deserialize(value)?;
    log::debug!(
        "📝 Decoded response: text={:?} audio_url={:?}",
        payload.text,
        payload.audio_locator
    );
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_fields() {
        let payload = decode(br#"{"text":"Hello","audio_url":"http://x/y.mp3"}"#).unwrap();
        assert_eq!(payload.text.as_deref(), Some("Hello"));
        assert_eq!(payload.audio_locator.as_deref(), Some("http://x/y.mp3"));
    }

    #[test]
    fn test_empty_object_is_valid() {
        let payload = decode(b"{}").unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_nulls_blanks_and_extra_keys() {
        let payload =
            decode(br#"{"text":null,"audio_url":"   ","transcript":"hi","took_ms":812}"#).unwrap();
        assert_eq!(payload, ResponsePayload::default());
    }

    #[test]
    fn test_text_only() {
        let payload = decode(b" {\"text\": \"Sunny, 21C\"}\n").unwrap();
        assert_eq!(payload.text.as_deref(), Some("Sunny, 21C"));
        assert!(payload.audio_locator.is_none());
    }

    #[test]
    fn test_truncated_is_an_error() {
        assert!(matches!(
            decode(br#"{"text":"Hel"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(decode(b""), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_non_object_is_an_error() {
        assert!(matches!(
            decode(br#"["Hello","http://x/y.mp3"]"#),
            Err(DecodeError::NotAnObject("array"))
        ));
        assert!(matches!(
            decode(br#""Hello""#),
            Err(DecodeError::NotAnObject("string"))
        ));
    }

    #[test]
    fn test_wrong_field_type_fails_whole_decode() {
        assert!(decode(br#"{"text":"Hello","audio_url":42}"#).is_err());
    }
}
