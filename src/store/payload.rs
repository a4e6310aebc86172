//! Versioned encoding for list columns (checks, attachments).
//!
//! Written once at dispatch time, decoded at evaluation time. Unknown versions
//! are rejected instead of guessed at.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    items: &'a [T],
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u32,
    items: Vec<T>,
}

pub fn encode_payload<T: Serialize>(items: &[T]) -> Result<String, String> {
    serde_json::to_string(&EnvelopeRef {
        version: PAYLOAD_VERSION,
        items,
    })
    .map_err(|e| format!("Failed to encode payload: {}", e))
}

pub fn decode_payload<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, String> {
    let envelope: Envelope<T> =
        serde_json::from_str(raw).map_err(|e| format!("Malformed payload: {}", e))?;
    if envelope.version != PAYLOAD_VERSION {
        return Err(format!(
            "Unsupported payload version {} (expected {})",
            envelope.version, PAYLOAD_VERSION
        ));
    }
    Ok(envelope.items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Check;

    #[test]
    fn checks_keep_their_tags() {
        let checks = vec![
            Check::Script("document.title === `x`".to_string()),
            Check::Rubric("Explains the algorithm".to_string()),
        ];
        let raw = encode_payload(&checks).unwrap();
        assert!(raw.starts_with(r#"{"version":1,"#));
        let decoded: Vec<Check> = decode_payload(&raw).unwrap();
        assert_eq!(decoded, checks);
    }

    #[test]
    fn future_version_rejected() {
        let err = decode_payload::<Check>(r#"{"version":2,"items":[]}"#).unwrap_err();
        assert!(err.contains("Unsupported payload version 2"));
    }

    #[test]
    fn legacy_bare_list_rejected() {
        assert!(decode_payload::<String>(r#"["js: 1 === 1"]"#).is_err());
    }
}
