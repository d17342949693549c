//! Per-connection protocol state machine
//!
//! A session turns decoded frames into calls on the registry, the
//! subscription table and the permission gate, and every outcome into a
//! response frame. It knows nothing about the transport: the websocket
//! handler feeds it text and writes back whatever it returns.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::application::permissions::AuthSession;
use crate::application::registry::SetValue;
use crate::application::subscriptions::{ConnectionId, Notification, SubscriptionId};
use crate::error::VisError;

use super::handler::WsState;
use super::message::{
    ACTION_SET, ACTION_SUBSCRIBE, ACTION_UNSUBSCRIBE, ACTION_UNSUBSCRIBE_ALL, VisRequest,
    VisResponse, decode, values_object,
};

pub struct ProtocolSession {
    connection: ConnectionId,
    auth: AuthSession,
    state: Arc<WsState>,
    // Owning handle of the notification channel; the subscription table only
    // keeps a weak one.
    sink: Option<mpsc::Sender<Notification>>,
}

impl ProtocolSession {
    /// Open a session and the receiving end of its notification queue
    pub fn open(state: Arc<WsState>) -> (Self, mpsc::Receiver<Notification>) {
        let connection = ConnectionId::new();
        let (tx, rx) = mpsc::channel(state.outbound_capacity.max(1));
        state.subscriptions.connect(connection, &tx);

        let session = ProtocolSession {
            connection,
            auth: AuthSession::new(),
            state,
            sink: Some(tx),
        };
        (session, rx)
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn auth(&self) -> &AuthSession {
        &self.auth
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub async fn handle_text(&mut self, text: &str) -> VisResponse {
        match decode(text) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                tracing::debug!(connection = %self.connection, "undecodable frame: {}", e.message);
                VisResponse::error(
                    e.action,
                    e.request_id,
                    &VisError::BadRequest(e.message),
                    self.now(),
                )
            }
        }
    }

    pub async fn handle(&mut self, request: VisRequest) -> VisResponse {
        let action = request.action();
        let request_id = request.request_id().clone();

        match self.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(
                    connection = %self.connection,
                    action,
                    number = e.number(),
                    "request failed: {}",
                    e
                );
                VisResponse::error(action, request_id, &e, self.now())
            }
        }
    }

    async fn execute(&mut self, request: VisRequest) -> Result<VisResponse, VisError> {
        if !self.is_open() {
            return Err(VisError::BadRequest("session is closed".into()));
        }

        match request {
            VisRequest::Authorize { request_id, tokens } => {
                let authorization = self.state.gate.authorize(&tokens.authorization).await?;
                let ttl = authorization.ttl_secs;
                let permissions = authorization.permissions.to_grants();
                self.auth.grant(authorization);
                self.refresh_visibility();
                tracing::info!(connection = %self.connection, grants = permissions.len(), "session authorized");
                Ok(VisResponse::authorize(request_id, ttl, permissions, self.now()))
            }
            VisRequest::Get { request_id, path } => {
                let values = self.state.registry.get(&path, &self.auth)?;
                let value = match values.get(&path) {
                    // A literal path answers with the bare value.
                    Some(value) if values.len() == 1 => Value::from(value.clone()),
                    _ => values_object(values),
                };
                Ok(VisResponse::get(request_id, value, self.now()))
            }
            VisRequest::Set {
                request_id,
                path,
                value,
            } => {
                let value = SetValue::try_from(value)?;
                self.state.registry.set(&path, value, &self.auth).await?;
                Ok(VisResponse::ack(ACTION_SET, request_id, self.now()))
            }
            VisRequest::Subscribe {
                request_id,
                path,
                filters,
            } => {
                if filters.is_some() {
                    tracing::debug!(connection = %self.connection, "subscription filters are not applied");
                }
                let (matcher, visible) = self.state.registry.readable_paths(&path, &self.auth)?;
                let id = self
                    .state
                    .subscriptions
                    .subscribe_filtered(self.connection, matcher, visible);
                Ok(VisResponse::subscription_ack(
                    ACTION_SUBSCRIBE,
                    request_id,
                    id,
                    self.now(),
                ))
            }
            VisRequest::Unsubscribe {
                request_id,
                subscription_id,
            } => {
                let id = parse_subscription_id(&subscription_id)?;
                self.state.subscriptions.unsubscribe(self.connection, id)?;
                Ok(VisResponse::subscription_ack(
                    ACTION_UNSUBSCRIBE,
                    request_id,
                    id,
                    self.now(),
                ))
            }
            VisRequest::UnsubscribeAll { request_id } => {
                let removed = self.state.subscriptions.unsubscribe_all(self.connection);
                tracing::debug!(connection = %self.connection, removed, "unsubscribed all");
                Ok(VisResponse::ack(ACTION_UNSUBSCRIBE_ALL, request_id, self.now()))
            }
        }
    }

    /// Recompute what existing subscriptions may deliver under the current grants
    fn refresh_visibility(&self) {
        for (id, matcher) in self.state.subscriptions.patterns_of(self.connection) {
            let visible = self.state.registry.visible_paths(&matcher, &self.auth);
            self.state
                .subscriptions
                .set_visible(self.connection, id, visible);
        }
    }

    /// Drop every subscription and stop notification delivery. Idempotent.
    pub fn close(&mut self) {
        if self.sink.take().is_some() {
            self.state.subscriptions.disconnect(self.connection);
        }
    }

    fn now(&self) -> i64 {
        self.state.clock.now_millis()
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn parse_subscription_id(raw: &Value) -> Result<SubscriptionId, VisError> {
    match raw {
        Value::String(s) => s.parse(),
        Value::Number(n) => n
            .as_u64()
            .map(|n| n.to_string())
            .ok_or_else(|| VisError::SubscriptionNotFound(n.to_string()))?
            .parse(),
        other => Err(VisError::SubscriptionNotFound(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::permissions::PermissionGate;
    use crate::application::registry::SignalRegistry;
    use crate::application::subscriptions::SubscriptionManager;
    use crate::infrastructure::permission::StaticPermissionResolver;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use vis_adapters::{BaseAdapter, SignalSpec};
    use vis_core::AccessLevel;
    use vis_ports::{ChangeBatch, Clock, FixedClock};

    async fn state() -> Arc<WsState> {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::from_millis(1_700_000_000_000));
        let subscriptions = Arc::new(SubscriptionManager::new(Arc::clone(&clock)));
        let registry = Arc::new(SignalRegistry::new(
            Arc::clone(&subscriptions),
            CancellationToken::new(),
        ));
        let adapter = Arc::new(
            BaseAdapter::new("body")
                .with_signal("Signal.Body.Trunk.IsLocked", SignalSpec::new(false))
                .with_signal("Signal.Body.Trunk.IsOpen", SignalSpec::new(false))
                .with_signal(
                    "Attribute.Vehicle.VIN",
                    SignalSpec::new("1HGCM82633A004352").public(true).read_only(true),
                ),
        );
        registry.register_adapter(adapter).await.unwrap();

        let mut grants = BTreeMap::new();
        grants.insert("Signal.Body.*".to_string(), AccessLevel::ReadWrite);
        let mut tokens = BTreeMap::new();
        tokens.insert("driver".to_string(), grants);
        let mut narrow = BTreeMap::new();
        narrow.insert("Signal.Body.Trunk.IsOpen".to_string(), AccessLevel::Read);
        tokens.insert("trunk-reader".to_string(), narrow);
        let gate = Arc::new(PermissionGate::new(Arc::new(StaticPermissionResolver::new(
            tokens, 3600,
        ))));

        Arc::new(WsState {
            registry,
            subscriptions,
            gate,
            clock,
            outbound_capacity: 16,
        })
    }

    fn frame(response: &VisResponse) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn test_public_get_needs_no_authorization() {
        let (mut session, _rx) = ProtocolSession::open(state().await);
        let response = session
            .handle_text(r#"{"action":"get","path":"Attribute.Vehicle.VIN","requestId":"1"}"#)
            .await;
        assert_eq!(
            frame(&response),
            json!({"action": "get", "requestId": "1", "value": "1HGCM82633A004352",
                   "timestamp": 1_700_000_000_000i64})
        );
    }

    #[tokio::test]
    async fn test_authorize_then_get_wildcard() {
        let (mut session, _rx) = ProtocolSession::open(state().await);

        let denied = session
            .handle_text(r#"{"action":"get","path":"Signal.Body.Trunk.*","requestId":"1"}"#)
            .await;
        assert_eq!(frame(&denied)["error"]["number"], 401);

        let auth = session
            .handle_text(r#"{"action":"authorize","tokens":{"authorization":"driver"},"requestId":"2"}"#)
            .await;
        assert_eq!(frame(&auth)["TTL"], 3600);
        assert_eq!(frame(&auth)["permissions"]["Signal.Body.*"], "readwrite");

        let values = session
            .handle_text(r#"{"action":"get","path":"Signal.Body.Trunk.*","requestId":"3"}"#)
            .await;
        assert_eq!(
            frame(&values)["value"],
            json!({"Signal.Body.Trunk.IsLocked": false, "Signal.Body.Trunk.IsOpen": false})
        );
    }

    #[tokio::test]
    async fn test_bad_token_keeps_session_unauthenticated() {
        let (mut session, _rx) = ProtocolSession::open(state().await);
        let response = session
            .handle_text(r#"{"action":"authorize","tokens":{"authorization":"thief"},"requestId":9}"#)
            .await;
        assert_eq!(frame(&response)["error"]["number"], 401);
        assert_eq!(frame(&response)["requestId"], 9);
        assert!(!session.auth().is_authorized());
    }

    #[tokio::test]
    async fn test_subscribe_set_and_notification() {
        let (mut session, mut rx) = ProtocolSession::open(state().await);
        session
            .handle_text(r#"{"action":"authorize","tokens":{"authorization":"driver"}}"#)
            .await;

        let ack = session
            .handle_text(r#"{"action":"subscribe","path":"Signal.Body.Trunk.*","requestId":"s"}"#)
            .await;
        let id = frame(&ack)["subscriptionId"].as_str().unwrap().to_string();

        let set = session
            .handle_text(r#"{"action":"set","path":"Signal.Body.Trunk.IsLocked","value":true,"requestId":"w"}"#)
            .await;
        assert!(!set.is_error(), "{:?}", set);

        let n = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let push = frame(&VisResponse::notification(n));
        assert_eq!(push["subscriptionId"], id.as_str());
        assert_eq!(push["value"], json!({"Signal.Body.Trunk.IsLocked": true}));
    }

    #[tokio::test]
    async fn test_reauthorization_narrows_existing_subscriptions() {
        let state = state().await;
        let (mut session, mut rx) = ProtocolSession::open(Arc::clone(&state));
        session
            .handle_text(r#"{"action":"authorize","tokens":{"authorization":"driver"}}"#)
            .await;
        let ack = session
            .handle_text(r#"{"action":"subscribe","path":"Signal.Body.Trunk.*"}"#)
            .await;
        assert!(!ack.is_error(), "{:?}", ack);

        let auth = session
            .handle_text(r#"{"action":"authorize","tokens":{"authorization":"trunk-reader"}}"#)
            .await;
        assert!(!auth.is_error(), "{:?}", auth);

        let batch = ChangeBatch {
            seq: 1,
            values: [
                ("Signal.Body.Trunk.IsLocked".to_string(), true.into()),
                ("Signal.Body.Trunk.IsOpen".to_string(), true.into()),
            ]
            .into_iter()
            .collect(),
        };
        assert_eq!(state.registry.apply_external_update(0, &batch), 2);

        let n = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let push = frame(&VisResponse::notification(n));
        assert_eq!(push["value"], json!({"Signal.Body.Trunk.IsOpen": true}));
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames() {
        let (mut session, _rx) = ProtocolSession::open(state().await);

        let broken = frame(&session.handle_text("{\"action\":").await);
        assert_eq!(broken["error"]["number"], 400);
        assert_eq!(broken["action"], "");

        let unknown = frame(&session.handle_text(r#"{"action":"reboot","requestId":"x"}"#).await);
        assert_eq!(unknown["error"]["number"], 400);
        assert_eq!(unknown["action"], "reboot");
        assert_eq!(unknown["requestId"], "x");
    }

    #[tokio::test]
    async fn test_read_only_set_is_rejected() {
        let (mut session, _rx) = ProtocolSession::open(state().await);
        let response = frame(
            &session
                .handle_text(r#"{"action":"set","path":"Attribute.Vehicle.VIN","value":"X"}"#)
                .await,
        );
        assert_eq!(response["error"]["number"], 400);
        assert!(response["error"]["message"].as_str().unwrap().contains("read-only"));
    }

    #[tokio::test]
    async fn test_unsubscribe_semantics() {
        let state = state().await;
        let (mut a, _rx_a) = ProtocolSession::open(Arc::clone(&state));
        let (mut b, _rx_b) = ProtocolSession::open(Arc::clone(&state));

        let ack = frame(&a.handle_text(r#"{"action":"subscribe","path":"Attribute.*"}"#).await);
        let id = ack["subscriptionId"].as_str().unwrap().to_string();

        let foreign = json!({"action": "unsubscribe", "subscriptionId": id}).to_string();
        assert_eq!(frame(&b.handle_text(&foreign).await)["error"]["number"], 404);

        let own = frame(&a.handle_text(&foreign).await);
        assert_eq!(own["action"], "unsubscribe");
        assert_eq!(own["subscriptionId"], id.as_str());
        assert_eq!(frame(&a.handle_text(&foreign).await)["error"]["number"], 404);

        let all = r#"{"action":"unsubscribeAll","requestId":"u"}"#;
        assert!(!a.handle_text(all).await.is_error());
        assert!(!a.handle_text(all).await.is_error());
    }

    #[tokio::test]
    async fn test_close_removes_subscriptions() {
        let state = state().await;
        let (mut session, _rx) = ProtocolSession::open(Arc::clone(&state));
        session
            .handle_text(r#"{"action":"subscribe","path":"Attribute.Vehicle.VIN"}"#)
            .await;
        assert_eq!(state.subscriptions.subscription_count(), 1);

        session.close();
        session.close();
        assert_eq!(state.subscriptions.subscription_count(), 0);
        assert!(session.handle_text(r#"{"action":"unsubscribeAll"}"#).await.is_error());

        let (mut other, _rx) = ProtocolSession::open(Arc::clone(&state));
        other
            .handle_text(r#"{"action":"subscribe","path":"Attribute.Vehicle.VIN"}"#)
            .await;
        drop(other);
        assert_eq!(state.subscriptions.subscription_count(), 0);
    }
}
