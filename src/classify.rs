use serde_json::Value;

use crate::{errors::ErrorCode, http::ResponseMeta};

/// Failure reported by a classifier for a response the transport considered
/// successful.
#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    pub code: ErrorCode,
    pub message: Option<String>,
    pub data: Option<Value>,
}

impl Rejection {
    pub fn new(code: impl Into<ErrorCode>) -> Self {
        Self {
            code: code.into(),
            message: None,
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Accept(Value),
    Reject(Rejection),
}

/// Decides whether a parsed response body is a success.
pub trait ResponseClassifier: Send + Sync {
    fn classify(&self, data: Value, response: &ResponseMeta) -> Verdict;
}

/// Every parsed body is a success.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl ResponseClassifier for AcceptAll {
    fn classify(&self, data: Value, _response: &ResponseMeta) -> Verdict {
        Verdict::Accept(data)
    }
}

impl<F> ResponseClassifier for F
where
    F: Fn(Value, &ResponseMeta) -> Verdict + Send + Sync,
{
    fn classify(&self, data: Value, response: &ResponseMeta) -> Verdict {
        self(data, response)
    }
}

/// Classifier for `{ "code": ..., "data": ..., "message": ... }` envelopes:
/// accepts `data` when `code` equals `success_code`, rejects with the
/// envelope's code and message otherwise.
#[derive(Clone, Debug)]
pub struct EnvelopeClassifier {
    pub success_code: Value,
}

impl EnvelopeClassifier {
    pub fn new(success_code: impl Into<Value>) -> Self {
        Self {
            success_code: success_code.into(),
        }
    }
}

impl ResponseClassifier for EnvelopeClassifier {
    fn classify(&self, data: Value, _response: &ResponseMeta) -> Verdict {
        let code = data.get("code").cloned().unwrap_or(Value::Null);
        if code == self.success_code {
            return Verdict::Accept(data.get("data").cloned().unwrap_or(Value::Null));
        }
        let code = match code {
            Value::Null => ErrorCode::Request,
            Value::String(s) => ErrorCode::Custom(s),
            other => ErrorCode::Custom(other.to_string()),
        };
        let mut rejection = Rejection::new(code);
        if let Some(message) = data.get("message").and_then(Value::as_str) {
            rejection = rejection.with_message(message);
        }
        Verdict::Reject(rejection.with_data(data))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn meta() -> ResponseMeta {
        ResponseMeta::new(200, "https://api.test")
    }

    #[test]
    fn accept_all_passes_data_through() {
        assert_eq!(
            AcceptAll.classify(json!({"code": 500}), &meta()),
            Verdict::Accept(json!({"code": 500}))
        );
    }

    #[test]
    fn closures_are_classifiers() {
        let classifier = |data: Value, resp: &ResponseMeta| {
            if resp.status == 200 && data["ok"] == json!(true) {
                Verdict::Accept(data)
            } else {
                Verdict::Reject(Rejection::new("NOT_OK"))
            }
        };
        assert!(matches!(
            classifier.classify(json!({"ok": false}), &meta()),
            Verdict::Reject(Rejection { code: ErrorCode::Custom(ref c), .. }) if c == "NOT_OK"
        ));
    }

    #[test]
    fn envelope_accepts_success_code_and_unwraps_data() {
        let classifier = EnvelopeClassifier::new(0);
        assert_eq!(
            classifier.classify(json!({"code": 0, "data": [1, 2]}), &meta()),
            Verdict::Accept(json!([1, 2]))
        );
    }

    #[test]
    fn envelope_rejects_other_codes_with_message() {
        let classifier = EnvelopeClassifier::new(0);
        let body = json!({"code": "E_AUTH", "message": "login required"});
        let Verdict::Reject(rejection) = classifier.classify(body.clone(), &meta()) else {
            panic!("expected rejection");
        };
        assert_eq!(rejection.code, ErrorCode::Custom("E_AUTH".into()));
        assert_eq!(rejection.message.as_deref(), Some("login required"));
        assert_eq!(rejection.data, Some(body));
    }
}
