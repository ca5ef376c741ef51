//! Request/response envelope and dispatch onto tuner sessions.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use af_tuner::{SearchSpaceSpec, TunerConfig, TunerSession};
use af_types::{TrialParameters, TunerError, TunerResult};

/// Session used when a request does not name one.
pub const DEFAULT_SESSION: &str = "default";

/// One line from a trial worker or orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Echoed back unchanged so callers can match responses.
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub session: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    /// Whether the session is still usable and the caller may simply go on.
    pub recoverable: bool,
}

impl ErrorBody {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: "invalid_request".to_string(),
            message: message.into(),
            recoverable: true,
        }
    }
}

impl From<&TunerError> for ErrorBody {
    fn from(err: &TunerError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, error: ErrorBody) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateSearchSpaceParams {
    spec: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateParams {
    trial_id: u64,
}

#[derive(Debug, Deserialize)]
struct ReceiveParams {
    trial_id: u64,
    #[serde(default)]
    parameters: TrialParameters,
    result: Value,
}

enum DispatchError {
    Request(String),
    Tuner(TunerError),
}

impl From<TunerError> for DispatchError {
    fn from(err: TunerError) -> Self {
        Self::Tuner(err)
    }
}

/// Named tuner sessions shared by every connection.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<TunerSession>>,
    defaults: TunerConfig,
}

impl SessionRegistry {
    pub fn new(defaults: TunerConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            defaults,
        }
    }

    /// Look up a session, creating it with the default configuration on
    /// first use.
    pub fn get_or_create(&self, name: &str) -> TunerResult<Arc<TunerSession>> {
        if let Some(session) = self.sessions.get(name) {
            return Ok(Arc::clone(session.value()));
        }
        let created = Arc::new(TunerSession::new(self.defaults.clone())?);
        let entry = self.sessions.entry(name.to_string()).or_insert(created);
        info!("Registered tuner session '{name}' ({})", entry.id());
        Ok(Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Handle one raw line. Never fails: problems become error responses.
    pub fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request),
            Err(e) => Response::err(Value::Null, ErrorBody::invalid_request(e.to_string())),
        }
    }

    pub fn handle(&self, request: Request) -> Response {
        let name = request.session.as_deref().unwrap_or(DEFAULT_SESSION);
        debug!("Request {} on session '{name}'", request.method);

        let outcome = self
            .get_or_create(name)
            .map_err(DispatchError::from)
            .and_then(|session| dispatch(&session, &request.method, request.params));

        match outcome {
            Ok(result) => Response::ok(request.id, result),
            Err(DispatchError::Request(message)) => {
                Response::err(request.id, ErrorBody::invalid_request(message))
            }
            Err(DispatchError::Tuner(err)) => Response::err(request.id, ErrorBody::from(&err)),
        }
    }
}

fn params<T: for<'de> Deserialize<'de>>(method: &str, value: Value) -> Result<T, DispatchError> {
    serde_json::from_value(value)
        .map_err(|e| DispatchError::Request(format!("invalid params for {method}: {e}")))
}

fn dispatch(session: &TunerSession, method: &str, raw: Value) -> Result<Value, DispatchError> {
    match method {
        "update_search_space" => {
            let p: UpdateSearchSpaceParams = params(method, raw)?;
            let spec = SearchSpaceSpec::from_value(p.spec)?;
            let candidates = session.update_search_space(&spec)?;
            Ok(json!({ "candidates": candidates }))
        }
        "generate_parameters" => {
            let p: GenerateParams = params(method, raw)?;
            let parameters = session.generate_parameters(p.trial_id)?;
            Ok(serde_json::to_value(parameters).map_err(TunerError::from)?)
        }
        "receive_trial_result" => {
            let p: ReceiveParams = params(method, raw)?;
            session.receive_trial_result(p.trial_id, &p.parameters, &p.result)?;
            Ok(json!({ "accepted": true }))
        }
        "snapshot" => Ok(serde_json::to_value(session.snapshot()).map_err(TunerError::from)?),
        other => Err(DispatchError::Request(format!("unknown method '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(TunerConfig::default().with_seed(8))
    }

    fn call(registry: &SessionRegistry, request: Value) -> Response {
        registry.handle_line(&request.to_string())
    }

    #[test]
    fn protocol_round() {
        let registry = registry();

        let r = call(
            &registry,
            json!({"id": 1, "method": "update_search_space",
                   "params": {"spec": {"count": ["a", "b", "c"], "target": ["a", "b"]}}}),
        );
        assert_eq!(r.result, Some(json!({"candidates": 5})));

        let r = call(
            &registry,
            json!({"id": 2, "method": "generate_parameters", "params": {"trial_id": 0}}),
        );
        assert_eq!(r.id, json!(2));
        assert_eq!(r.result, Some(json!({"sample_feature": []})));

        let r = call(
            &registry,
            json!({"id": 3, "method": "receive_trial_result", "params": {
                "trial_id": 0,
                "parameters": {"sample_feature": []},
                "result": {"reward": 0.8, "feature_importance": [
                    {"feature_name": "a", "feature_score": 0.6},
                    {"feature_name": "b", "feature_score": 0.4}
                ]}
            }}),
        );
        assert_eq!(r.result, Some(json!({"accepted": true})));

        let r = call(
            &registry,
            json!({"id": 4, "method": "generate_parameters", "params": {"trial_id": 1}}),
        );
        let sampled = r.result.unwrap()["sample_feature"].as_array().unwrap().len();
        assert_eq!(sampled, 3);

        let r = call(&registry, json!({"id": 5, "method": "snapshot"}));
        let snapshot = r.result.unwrap();
        assert_eq!(snapshot["phase"], json!("Searching"));
        assert_eq!(snapshot["trial_count"], json!(2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn malformed_feedback_is_flagged_recoverable() {
        let registry = registry();
        let r = call(
            &registry,
            json!({"id": "x", "method": "receive_trial_result",
                   "params": {"trial_id": 0, "result": {"reward": 1.0}}}),
        );
        let error = r.error.unwrap();
        assert_eq!(error.kind, "malformed_feedback");
        assert!(error.recoverable);
        assert_eq!(r.id, json!("x"));
    }

    #[test]
    fn configuration_errors_are_fatal() {
        let registry = registry();
        let r = call(
            &registry,
            json!({"method": "update_search_space", "params": {"spec": {"square": ["a"]}}}),
        );
        let error = r.error.unwrap();
        assert_eq!(error.kind, "configuration");
        assert!(!error.recoverable);
    }

    #[test]
    fn bad_requests_get_error_responses() {
        let registry = registry();

        let r = registry.handle_line("not json");
        assert_eq!(r.error.unwrap().kind, "invalid_request");

        let r = call(&registry, json!({"id": 1, "method": "explode"}));
        assert!(r.error.unwrap().message.contains("explode"));

        let r = call(&registry, json!({"id": 2, "method": "generate_parameters"}));
        assert_eq!(r.error.unwrap().kind, "invalid_request");
    }

    #[test]
    fn sessions_are_independent() {
        let registry = registry();
        for session in ["s1", "s2"] {
            call(
                &registry,
                json!({"session": session, "method": "update_search_space",
                       "params": {"spec": {"count": ["a"]}}}),
            );
        }
        call(
            &registry,
            json!({"session": "s1", "method": "generate_parameters", "params": {"trial_id": 0}}),
        );

        let s1 = registry.get_or_create("s1").unwrap();
        let s2 = registry.get_or_create("s2").unwrap();
        assert_eq!(s1.trial_count(), 1);
        assert_eq!(s2.trial_count(), 0);
        assert_ne!(s1.id(), s2.id());
        assert_eq!(registry.len(), 2);
    }
}
