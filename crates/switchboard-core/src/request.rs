use serde_json::{Map, Value};

use crate::session::Session;

/// The inputs of one command invocation.
///
/// Built once per inbound message. Only `session` may be attached after
/// construction; params and args are fixed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Request {
    session: Option<Session>,
    params: Map<String, Value>,
    args: Vec<Value>,
}

impl Request {
    pub fn new(session: Option<Session>, params: Map<String, Value>, args: Vec<Value>) -> Self {
        Self {
            session,
            params,
            args,
        }
    }

    pub fn with_params(params: Map<String, Value>) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Attach the session resolved for this request.
    pub fn attach_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Look up a required string param.
    pub fn require_str(&self, key: &str) -> Result<&str, String> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("Missing required parameter: {key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SessionId;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn defaults_are_empty() {
        let request = Request::default();
        assert!(request.session().is_none());
        assert!(request.params().is_empty());
        assert!(request.args().is_empty());
    }

    #[test]
    fn with_session() {
        let session = Session::new(SessionId::from_raw("sess_1"), json!("alice"));
        let request = Request::new(Some(session.clone()), Map::new(), Vec::new());
        assert_eq!(request.session(), Some(&session));
        assert!(request.params().is_empty());
        assert!(request.args().is_empty());
    }

    #[test]
    fn with_params() {
        let request = Request::with_params(params(json!({"foo": 7, "bar": 23})));
        assert!(request.session().is_none());
        assert_eq!(request.params().get("foo"), Some(&json!(7)));
        assert_eq!(request.params().get("bar"), Some(&json!(23)));
        assert!(request.args().is_empty());
    }

    #[test]
    fn args_keep_order() {
        let request = Request::new(None, Map::new(), vec![json!(3), json!(1), json!(2)]);
        assert_eq!(request.args(), &[json!(3), json!(1), json!(2)]);
    }

    #[test]
    fn attach_session_after_construction() {
        let mut request = Request::with_params(params(json!({"a": 1})));
        request.attach_session(Session::new(SessionId::new(), json!({"name": "bob"})));
        assert!(request.session().is_some());
        assert_eq!(request.params().get("a"), Some(&json!(1)));
    }

    #[test]
    fn require_str_extracts() {
        let request = Request::with_params(params(json!({"name": "x", "count": 5})));
        assert_eq!(request.require_str("name").unwrap(), "x");
        assert!(request.require_str("count").is_err());
        assert!(request.require_str("missing").is_err());
    }
}
