use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use vis_core::AccessLevel;
use vis_ports::SignalMap;

use crate::application::subscriptions::{Notification, SubscriptionId};
use crate::error::VisError;

pub const ACTION_AUTHORIZE: &str = "authorize";
pub const ACTION_GET: &str = "get";
pub const ACTION_SET: &str = "set";
pub const ACTION_SUBSCRIBE: &str = "subscribe";
pub const ACTION_UNSUBSCRIBE: &str = "unsubscribe";
pub const ACTION_UNSUBSCRIBE_ALL: &str = "unsubscribeAll";
pub const ACTION_SUBSCRIPTION: &str = "subscription";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tokens {
    pub authorization: String,
}

/// Client request frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VisRequest {
    Authorize {
        #[serde(default)]
        request_id: Value,
        tokens: Tokens,
    },
    Get {
        #[serde(default)]
        request_id: Value,
        path: String,
    },
    Set {
        #[serde(default)]
        request_id: Value,
        path: String,
        value: Value,
    },
    Subscribe {
        #[serde(default)]
        request_id: Value,
        path: String,
        /// Accepted for compatibility, not applied
        #[serde(default)]
        filters: Option<Value>,
    },
    Unsubscribe {
        #[serde(default)]
        request_id: Value,
        subscription_id: Value,
    },
    UnsubscribeAll {
        #[serde(default)]
        request_id: Value,
    },
}

impl VisRequest {
    pub fn action(&self) -> &'static str {
        match self {
            VisRequest::Authorize { .. } => ACTION_AUTHORIZE,
            VisRequest::Get { .. } => ACTION_GET,
            VisRequest::Set { .. } => ACTION_SET,
            VisRequest::Subscribe { .. } => ACTION_SUBSCRIBE,
            VisRequest::Unsubscribe { .. } => ACTION_UNSUBSCRIBE,
            VisRequest::UnsubscribeAll { .. } => ACTION_UNSUBSCRIBE_ALL,
        }
    }

    pub fn request_id(&self) -> &Value {
        match self {
            VisRequest::Authorize { request_id, .. }
            | VisRequest::Get { request_id, .. }
            | VisRequest::Set { request_id, .. }
            | VisRequest::Subscribe { request_id, .. }
            | VisRequest::Unsubscribe { request_id, .. }
            | VisRequest::UnsubscribeAll { request_id } => request_id,
        }
    }
}

/// A frame that could not be decoded, with whatever could be salvaged from it
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub action: String,
    pub request_id: Value,
    pub message: String,
}

pub fn decode(text: &str) -> Result<VisRequest, DecodeError> {
    let raw: Value = serde_json::from_str(text).map_err(|e| DecodeError {
        action: String::new(),
        request_id: Value::Null,
        message: format!("invalid JSON: {}", e),
    })?;

    let action = raw
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let request_id = raw.get("requestId").cloned().unwrap_or(Value::Null);

    serde_json::from_value(raw).map_err(|e| DecodeError {
        action,
        request_id,
        message: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub number: u16,
    pub reason: String,
    pub message: String,
}

impl From<&VisError> for ErrorBody {
    fn from(err: &VisError) -> Self {
        ErrorBody {
            number: err.number(),
            reason: err.reason().to_string(),
            message: err.to_string(),
        }
    }
}

/// Server frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum VisResponse {
    Authorize {
        action: String,
        request_id: Value,
        #[serde(rename = "TTL")]
        ttl: u64,
        permissions: BTreeMap<String, AccessLevel>,
        timestamp: i64,
    },
    Get {
        action: String,
        request_id: Value,
        value: Value,
        timestamp: i64,
    },
    /// subscribe and unsubscribe
    SubscriptionAck {
        action: String,
        request_id: Value,
        subscription_id: String,
        timestamp: i64,
    },
    /// set and unsubscribeAll
    Ack {
        action: String,
        request_id: Value,
        timestamp: i64,
    },
    Notification {
        action: String,
        subscription_id: String,
        value: Value,
        timestamp: i64,
    },
    Error {
        action: String,
        request_id: Value,
        error: ErrorBody,
        timestamp: i64,
    },
}

impl VisResponse {
    pub fn authorize(
        request_id: Value,
        ttl: u64,
        permissions: BTreeMap<String, AccessLevel>,
        timestamp: i64,
    ) -> Self {
        VisResponse::Authorize {
            action: ACTION_AUTHORIZE.into(),
            request_id,
            ttl,
            permissions,
            timestamp,
        }
    }

    pub fn get(request_id: Value, value: Value, timestamp: i64) -> Self {
        VisResponse::Get {
            action: ACTION_GET.into(),
            request_id,
            value,
            timestamp,
        }
    }

    pub fn subscription_ack(
        action: &str,
        request_id: Value,
        id: SubscriptionId,
        timestamp: i64,
    ) -> Self {
        VisResponse::SubscriptionAck {
            action: action.into(),
            request_id,
            subscription_id: id.to_string(),
            timestamp,
        }
    }

    pub fn ack(action: &str, request_id: Value, timestamp: i64) -> Self {
        VisResponse::Ack {
            action: action.into(),
            request_id,
            timestamp,
        }
    }

    pub fn notification(notification: Notification) -> Self {
        VisResponse::Notification {
            action: ACTION_SUBSCRIPTION.into(),
            subscription_id: notification.subscription_id.to_string(),
            value: values_object(notification.values),
            timestamp: notification.timestamp,
        }
    }

    pub fn error(
        action: impl Into<String>,
        request_id: Value,
        err: &VisError,
        timestamp: i64,
    ) -> Self {
        VisResponse::Error {
            action: action.into(),
            request_id,
            error: ErrorBody::from(err),
            timestamp,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, VisResponse::Error { .. })
    }
}

/// `{path: value, ...}` as a JSON object
pub fn values_object(values: SignalMap) -> Value {
    let object: Map<String, Value> = values
        .into_iter()
        .map(|(path, value)| (path, Value::from(value)))
        .collect();
    Value::Object(object)
}
