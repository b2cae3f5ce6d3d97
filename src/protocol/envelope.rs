//! Request and Reply envelopes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::JsonCodec;
use crate::error::{HandlerError, RabbitwireError, Result};

/// Reply status codes.
pub mod codes {
    /// Handler ran and returned a value.
    pub const OK: u16 = 200;
    /// No handler is registered for the route.
    pub const NOT_FOUND: u16 = 404;
    /// Handler reported a failure, rejected its input, or panicked.
    pub const HANDLER_FAILED: u16 = 500;
    /// Handler hit a transport failure or its result could not be encoded.
    pub const INFRASTRUCTURE_FAILED: u16 = 503;
}

/// Routed request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Route key used to pick a handler.
    pub route: String,
    /// Opaque JSON payload.
    #[serde(default)]
    pub data: Value,
    /// Queue the sender listens on for a correlated reply.
    #[serde(default)]
    pub reply_on_queue: Option<String>,
}

impl Request {
    /// Create a fire-and-forget request.
    pub fn new(route: impl Into<String>, data: Value) -> Self {
        Self {
            route: route.into(),
            data,
            reply_on_queue: None,
        }
    }

    /// Ask for a reply on the given queue.
    pub fn reply_on(mut self, queue: impl Into<String>) -> Self {
        self.reply_on_queue = Some(queue.into());
        self
    }

    /// Whether the sender waits for a reply.
    #[inline]
    pub fn expects_reply(&self) -> bool {
        self.reply_on_queue.is_some()
    }

    /// Deserialize `data` into a concrete type.
    ///
    /// Data that does not fit `T` is the sender's mistake, so it surfaces as
    /// [`HandlerError::Failed`] and a `?` inside a handler yields a 500.
    pub fn data_as<T>(&self) -> std::result::Result<T, HandlerError>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_value(self.data.clone()).map_err(HandlerError::failed)
    }
}

/// Reply envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Status code, see [`codes`].
    pub code: u16,
    /// Handler result, null when absent.
    #[serde(default)]
    pub data: Value,
}

impl Reply {
    /// Reply with an explicit code.
    pub fn new(code: u16, data: Value) -> Self {
        Self { code, data }
    }

    /// 200 reply carrying a value.
    pub fn ok(data: Value) -> Self {
        Self::new(codes::OK, data)
    }

    /// Reply with no data.
    pub fn status(code: u16) -> Self {
        Self::new(code, Value::Null)
    }

    /// Whether the handler ran and returned a value.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.code == codes::OK
    }

    /// Deserialize `data` into a concrete type.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Which envelope an endpoint sends and expects to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends requests, receives requests on its own queue.
    Request,
    /// Sends and receives bare replies.
    Reply,
}

/// A decoded delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Request(Request),
    Reply(Reply),
}

impl Payload {
    /// Decode a delivered body as the envelope `role` expects.
    ///
    /// Malformed JSON and missing required fields (`route`, `code`) are
    /// reported as [`RabbitwireError::DeliveryDecode`], never defaulted.
    pub fn decode(role: Role, queue: &str, body: &[u8]) -> Result<Self> {
        let decoded = match role {
            Role::Request => serde_json::from_slice(body).map(Payload::Request),
            Role::Reply => serde_json::from_slice(body).map(Payload::Reply),
        };

        decoded.map_err(|source| RabbitwireError::DeliveryDecode {
            queue: queue.to_string(),
            source,
        })
    }

    /// Encode the envelope as a JSON body.
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Payload::Request(request) => JsonCodec::encode(request),
            Payload::Reply(reply) => JsonCodec::encode(reply),
        }
    }

    /// The request, if this delivery is one.
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Payload::Request(request) => Some(request),
            Payload::Reply(_) => None,
        }
    }

    /// The reply, if this delivery is one.
    pub fn as_reply(&self) -> Option<&Reply> {
        match self {
            Payload::Reply(reply) => Some(reply),
            Payload::Request(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let body = Payload::Request(Request::new("ping", json!({"n": 1})))
            .encode()
            .unwrap();

        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            value,
            json!({"route": "ping", "data": {"n": 1}, "replyOnQueue": null})
        );
    }

    #[test]
    fn test_reply_wire_shape() {
        let body = Payload::Reply(Reply::ok(json!("pong"))).encode().unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"code": 200, "data": "pong"}));
    }

    #[test]
    fn test_round_trip() {
        let request = Payload::Request(Request::new("a", json!([1, "two", null])).reply_on("q_a"));
        let body = request.encode().unwrap();
        assert_eq!(Payload::decode(Role::Request, "q", &body).unwrap(), request);

        let reply = Payload::Reply(Reply::status(codes::NOT_FOUND));
        let body = reply.encode().unwrap();
        assert_eq!(Payload::decode(Role::Reply, "q", &body).unwrap(), reply);
    }

    #[test]
    fn test_optional_fields_default() {
        let payload = Payload::decode(Role::Request, "q", br#"{"route":"x"}"#).unwrap();
        let request = payload.as_request().unwrap();
        assert_eq!(request.data, Value::Null);
        assert!(!request.expects_reply());

        let payload = Payload::decode(Role::Reply, "q", br#"{"code":500}"#).unwrap();
        assert_eq!(payload.as_reply().unwrap(), &Reply::status(codes::HANDLER_FAILED));
    }

    #[test]
    fn test_missing_required_field_is_error() {
        let err = Payload::decode(Role::Request, "jobs", br#"{"data":1}"#).unwrap_err();
        assert!(matches!(err, RabbitwireError::DeliveryDecode { ref queue, .. } if queue == "jobs"));

        let err = Payload::decode(Role::Reply, "jobs", br#"{"data":1}"#).unwrap_err();
        assert!(matches!(err, RabbitwireError::DeliveryDecode { .. }));
    }

    #[test]
    fn test_malformed_json_is_error() {
        let err = Payload::decode(Role::Request, "jobs", b"{not json").unwrap_err();
        assert!(matches!(err, RabbitwireError::DeliveryDecode { .. }));
    }

    #[test]
    fn test_data_as() {
        let request = Request::new("sum", json!([1, 2, 3]));
        let numbers: Vec<i32> = request.data_as().unwrap();
        assert_eq!(numbers, vec![1, 2, 3]);

        let err = request.data_as::<String>().unwrap_err();
        assert!(!err.is_infrastructure());
    }
}
