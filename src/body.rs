//! Request payloads and their encoding into transport bodies.
//!
//! A payload whose top-level fields contain file attachments is sent as a
//! multipart body: one part per file plus a [`MULTIPART_JSON_FIELD`] part
//! with the JSON of the remaining fields. Any other payload is sent as JSON.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::http::HeaderList;

/// Field name of the multipart part holding the non-file fields as JSON.
pub const MULTIPART_JSON_FIELD: &str = "jsonData";

/// A single file attachment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePart {
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: Bytes,
}

impl FilePart {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// Top-level payload field.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Value(Value),
    File(FilePart),
    Files(Vec<FilePart>),
}

impl Field {
    fn is_file_like(&self) -> bool {
        match self {
            Field::File(_) => true,
            Field::Files(files) => !files.is_empty(),
            Field::Value(_) => false,
        }
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::Value(value)
    }
}

impl From<FilePart> for Field {
    fn from(file: FilePart) -> Self {
        Field::File(file)
    }
}

impl From<Vec<FilePart>> for Field {
    fn from(files: Vec<FilePart>) -> Self {
        Field::Files(files)
    }
}

/// Logical request payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestData {
    #[default]
    Empty,
    Json(Value),
    /// Named top-level fields, in insertion order.
    Fields(Vec<(String, Field)>),
}

impl RequestData {
    pub fn fields() -> Self {
        RequestData::Fields(Vec::new())
    }

    /// Add (or replace) a top-level field. A `Json` object payload is
    /// converted into fields first.
    pub fn with(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.insert(name, field);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, field: impl Into<Field>) {
        let name = name.into();
        let field = field.into();
        let fields = match std::mem::take(self) {
            RequestData::Fields(fields) => fields,
            RequestData::Json(Value::Object(map)) => {
                map.into_iter().map(|(k, v)| (k, Field::Value(v))).collect()
            }
            RequestData::Json(other) => vec![("value".to_string(), Field::Value(other))],
            RequestData::Empty => Vec::new(),
        };
        let mut fields: Vec<(String, Field)> =
            fields.into_iter().filter(|(k, _)| *k != name).collect();
        fields.push((name, field));
        *self = RequestData::Fields(fields);
    }

    /// Plain (non-file) value of a top-level field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            RequestData::Json(Value::Object(map)) => map.get(name),
            RequestData::Fields(fields) => fields.iter().find_map(|(k, field)| match field {
                Field::Value(value) if k == name => Some(value),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestData::Empty)
    }
}

impl From<Value> for RequestData {
    fn from(value: Value) -> Self {
        RequestData::Json(value)
    }
}

/// Transport-independent multipart description.
#[derive(Clone, Debug, PartialEq)]
pub struct MultipartBody {
    pub parts: Vec<MultipartPart>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MultipartPart {
    pub name: String,
    pub content: PartContent,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PartContent {
    File(FilePart),
    Text(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Empty,
    Json(Bytes),
    Multipart(MultipartBody),
}

#[derive(Clone, Debug, PartialEq)]
pub struct EncodedBody {
    pub body: Body,
    pub headers: HeaderList,
}

/// Encode a payload. The caller's payload is left untouched.
pub fn encode_body(data: &RequestData) -> EncodedBody {
    match data {
        RequestData::Empty => json_encoded(Body::Empty),
        RequestData::Json(value) => json_encoded(Body::Json(json_bytes(value))),
        RequestData::Fields(fields) => {
            if !fields.iter().any(|(_, field)| field.is_file_like()) {
                return json_encoded(Body::Json(json_bytes(&plain_object(fields))));
            }

            let mut parts = Vec::new();
            for (name, field) in fields {
                match field {
                    Field::File(file) => parts.push(file_part(name, file)),
                    Field::Files(files) if !files.is_empty() => {
                        parts.extend(files.iter().map(|file| file_part(name, file)));
                    }
                    _ => {}
                }
            }
            let remainder = Value::Object(plain_object(fields)).to_string();
            parts.push(MultipartPart {
                name: MULTIPART_JSON_FIELD.to_string(),
                content: PartContent::Text(remainder),
            });

            EncodedBody {
                body: Body::Multipart(MultipartBody { parts }),
                headers: HeaderList::new(),
            }
        }
    }
}

fn json_encoded(body: Body) -> EncodedBody {
    let mut headers = HeaderList::new();
    headers.set("Content-Type", "application/json");
    EncodedBody { body, headers }
}

fn json_bytes(value: &impl serde::Serialize) -> Bytes {
    // Serializing a `Value` (or a map of them) cannot fail.
    Bytes::from(serde_json::to_vec(value).unwrap_or_default())
}

fn plain_object(fields: &[(String, Field)]) -> Map<String, Value> {
    fields
        .iter()
        .filter_map(|(name, field)| match field {
            Field::Value(value) => Some((name.clone(), value.clone())),
            Field::Files(files) if files.is_empty() => Some((name.clone(), Value::Array(Vec::new()))),
            _ => None,
        })
        .collect()
}

fn file_part(name: &str, file: &FilePart) -> MultipartPart {
    MultipartPart {
        name: name.to_string(),
        content: PartContent::File(file.clone()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn json_body(encoded: &EncodedBody) -> Value {
        match &encoded.body {
            Body::Json(bytes) => serde_json::from_slice(bytes).expect("json body"),
            other => panic!("expected json body, got {other:?}"),
        }
    }

    #[test]
    fn plain_payload_is_json_with_content_type() {
        let payload = RequestData::from(json!({"name": "ada", "tags": ["x", "y"], "n": 3}));
        let encoded = encode_body(&payload);
        assert_eq!(encoded.headers.get("content-type"), Some("application/json"));
        assert_eq!(json_body(&encoded), json!({"name": "ada", "tags": ["x", "y"], "n": 3}));
    }

    #[test]
    fn field_payload_without_files_round_trips() {
        let payload = RequestData::fields()
            .with("id", json!(7))
            .with("meta", json!({"deep": [1, 2, {"k": null}]}))
            .with("empty", Vec::<FilePart>::new());
        let encoded = encode_body(&payload);
        assert_eq!(
            json_body(&encoded),
            json!({"id": 7, "meta": {"deep": [1, 2, {"k": null}]}, "empty": []})
        );
    }

    #[test]
    fn files_produce_multipart_with_json_remainder() {
        let avatar = FilePart::new("a.png", &b"png"[..]).with_mime("image/png");
        let docs = vec![
            FilePart::new("1.txt", &b"one"[..]),
            FilePart::new("2.txt", &b"two"[..]),
        ];
        let payload = RequestData::fields()
            .with("user", json!("ada"))
            .with("avatar", avatar.clone())
            .with("docs", docs.clone());

        let encoded = encode_body(&payload);
        assert!(encoded.headers.is_empty());
        let Body::Multipart(multipart) = encoded.body else {
            panic!("expected multipart body");
        };

        let names: Vec<&str> = multipart.parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["avatar", "docs", "docs", MULTIPART_JSON_FIELD]);
        assert_eq!(multipart.parts[0].content, PartContent::File(avatar));
        assert_eq!(multipart.parts[2].content, PartContent::File(docs[1].clone()));
        match &multipart.parts[3].content {
            PartContent::Text(text) => {
                let remainder: Value = serde_json::from_str(text).unwrap();
                assert_eq!(remainder, json!({"user": "ada"}));
            }
            other => panic!("expected text part, got {other:?}"),
        }
    }

    #[test]
    fn encoding_does_not_mutate_payload() {
        let payload = RequestData::fields()
            .with("file", FilePart::new("f.bin", &b"\x00\x01"[..]))
            .with("x", json!(1));
        let before = payload.clone();
        let _ = encode_body(&payload);
        assert_eq!(payload, before);
    }

    #[test]
    fn empty_payload_has_no_body() {
        let encoded = encode_body(&RequestData::Empty);
        assert_eq!(encoded.body, Body::Empty);
        assert_eq!(encoded.headers.get("Content-Type"), Some("application/json"));
    }

    #[test]
    fn insert_converts_json_objects_and_replaces_fields() {
        let mut data = RequestData::from(json!({"a": 1, "b": 2}));
        data.insert("a", json!(10));
        assert_eq!(data.get("a"), Some(&json!(10)));
        assert_eq!(data.get("b"), Some(&json!(2)));
        assert_eq!(json_body(&encode_body(&data)), json!({"a": 10, "b": 2}));
    }
}
