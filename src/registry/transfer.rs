//! Moving a project between installations as one base64 string.
//!
//! The payload is the stored record with its `name` added, serialized as
//! JSON and encoded with the standard base64 alphabet. Derived fields
//! (`_dn`, `_type`, `_gsp`) never travel: the importing side recomputes them.
//! Build results travel only when asked for.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

use super::model::{BUILD_KEY_PREFIX, ProjectFields, ProjectRecord};
use crate::errors::RegistryError;

const DERIVED_KEYS: [&str; 3] = ["_dn", "_type", "_gsp"];

/// A decoded transfer string, ready for [`super::Registry::create`].
#[derive(Debug, Clone)]
pub struct Imported {
    pub name: String,
    pub url: String,
    pub fields: ProjectFields,
}

/// Encode `record` as a transfer string.
pub fn encode(record: &ProjectRecord, with_builds: bool) -> Result<String, RegistryError> {
    let value = serde_json::to_value(record).map_err(|source| RegistryError::InvalidRecord {
        name: record.name.clone(),
        source,
    })?;
    let Value::Object(mut map) = value else {
        return Err(invalid("record is not a JSON object"));
    };
    map.retain(|key, _| {
        !DERIVED_KEYS.contains(&key.as_str())
            && (with_builds || !key.starts_with(BUILD_KEY_PREFIX))
    });
    map.insert("name".to_string(), Value::String(record.name.clone()));

    let json = serde_json::to_vec(&Value::Object(map)).map_err(|source| {
        RegistryError::InvalidRecord {
            name: record.name.clone(),
            source,
        }
    })?;
    Ok(STANDARD.encode(json))
}

/// Decode a transfer string to its JSON payload without interpreting it.
pub fn decode_payload(encoded: &str) -> Result<Map<String, Value>, RegistryError> {
    let compact: String = encoded.split_whitespace().collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| invalid(format!("not base64: {e}")))?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(invalid("payload is not a JSON object")),
        Err(e) => Err(invalid(format!("payload is not JSON: {e}"))),
    }
}

/// Decode a transfer string; `rename` replaces the name it carries.
pub fn decode(encoded: &str, rename: Option<&str>) -> Result<Imported, RegistryError> {
    let mut map = decode_payload(encoded)?;
    let carried = match map.remove("name") {
        Some(Value::String(name)) => Some(name),
        Some(_) => return Err(invalid("name must be a string")),
        None => None,
    };
    let name = rename
        .map(str::to_string)
        .or(carried)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| invalid("no project name given"))?;

    for key in DERIVED_KEYS {
        map.remove(key);
    }
    // Placeholder so the record parses; create computes the real domain.
    map.insert("_dn".to_string(), Value::String(String::new()));
    let record: ProjectRecord = serde_json::from_value(Value::Object(map))
        .map_err(|e| invalid(format!("bad project data: {e}")))?;

    Ok(Imported {
        name,
        url: record.url.clone(),
        fields: ProjectFields::from_record(record),
    })
}

fn invalid(reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidTransfer {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ProjectRecord {
        let mut record: ProjectRecord = serde_json::from_value(json!({
            "url": "https://github.com/acme/docs-a",
            "latest": "main",
            "languages": ["en", "zh"],
            "default_language": "zh",
            "secret": "s3cret",
            "before_hook": "make deps",
            "_dn": "docs-a.docs.example.com",
            "_type": "public",
            "_gsp": "GitHub",
            "_build_main": {
                "btime": "2024-01-01 10:00:00",
                "status": "passing",
                "sender": "cli",
                "usedtime": 3
            }
        }))
        .unwrap();
        record.name = "docs-a".into();
        record
    }

    #[test]
    fn test_encode_strips_derived_fields_and_builds() {
        let encoded = encode(&record(), false).unwrap();
        let payload = decode_payload(&encoded).unwrap();
        assert_eq!(payload["name"], "docs-a");
        assert_eq!(payload["latest"], "main");
        assert_eq!(payload["before_hook"], "make deps");
        for key in ["_dn", "_type", "_gsp", "_build_main"] {
            assert!(!payload.contains_key(key), "{key} exported");
        }

        let payload = decode_payload(&encode(&record(), true).unwrap()).unwrap();
        assert_eq!(payload["_build_main"]["status"], "passing");
        assert!(!payload.contains_key("_dn"));
    }

    #[test]
    fn test_decode_keeps_fields_and_honours_rename() {
        let encoded = encode(&record(), true).unwrap();
        let imported = decode(&encoded, None).unwrap();
        assert_eq!(imported.name, "docs-a");
        assert_eq!(imported.url, "https://github.com/acme/docs-a");
        assert_eq!(imported.fields.latest.as_deref(), Some("main"));
        assert_eq!(imported.fields.default_language.as_deref(), Some("zh"));
        assert_eq!(imported.fields.secret.as_deref(), Some("s3cret"));
        assert_eq!(imported.fields.before_hook.as_deref(), Some("make deps"));
        assert!(imported.fields.builds.contains_key("main"));

        let imported = decode(&encoded, Some("docs-copy")).unwrap();
        assert_eq!(imported.name, "docs-copy");
    }

    #[test]
    fn test_decode_tolerates_wrapped_lines() {
        let encoded = encode(&record(), false).unwrap();
        let wrapped = format!("{}\n{}\n", &encoded[..10], &encoded[10..]);
        assert_eq!(decode(&wrapped, None).unwrap().name, "docs-a");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let inputs = [
            "%%%".to_string(),
            String::new(),
            STANDARD.encode("[1,2]"),
            STANDARD.encode("not json"),
        ];
        for input in &inputs {
            let err = decode(input, None).unwrap_err();
            assert!(
                matches!(err, RegistryError::InvalidTransfer { .. }),
                "{input}: {err}"
            );
        }

        let no_url = STANDARD.encode(r#"{"name":"docs-a"}"#);
        assert!(decode(&no_url, None).is_err());

        let no_name = STANDARD.encode(r#"{"url":"https://github.com/acme/x"}"#);
        assert!(decode(&no_name, None).is_err());
        assert_eq!(decode(&no_name, Some("docs-x")).unwrap().name, "docs-x");
    }
}
