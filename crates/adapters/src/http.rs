//! HTTP telemetry adapter
//!
//! Polls a JSON endpoint (a sensor emulator, a telemetry gateway) on a fixed
//! period and publishes the configured fields as read-only signals under
//! `vssPath`. Failed polls keep the last values and back off.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vis_core::SignalValue;
use vis_ports::{AdapterBinding, AdapterError, AdapterResult, ChangeBatch, PathSet, SignalMap};

use crate::base::{BaseAdapter, SignalSpec};
use crate::factory::AdapterSpec;

fn default_period() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpAdapterConfig {
    pub url: String,
    pub vss_path: String,
    /// Field names in the response; each becomes `<vssPath>.<field>`
    pub signals: Vec<String>,
    /// Poll interval in milliseconds
    #[serde(default = "default_period")]
    pub period: u64,
    /// Upper bound of the retry delay in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff: u64,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub public: bool,
}

/// Retry delay that doubles on failure and snaps back on success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Backoff {
            base,
            max,
            current: base,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn fail(&mut self) -> Duration {
        self.current = (self.current * 2).min(self.max);
        self.current
    }

    pub fn succeed(&mut self) -> Duration {
        self.current = self.base;
        self.current
    }
}

pub struct HttpPollAdapter {
    base: BaseAdapter,
    client: Client,
    config: HttpAdapterConfig,
}

impl HttpPollAdapter {
    pub fn new(name: impl Into<String>, config: HttpAdapterConfig) -> AdapterResult<Self> {
        let name = name.into();
        if config.signals.is_empty() {
            return Err(AdapterError::InvalidConfig(format!(
                "{}: no signals configured",
                name
            )));
        }
        if config.period == 0 {
            return Err(AdapterError::InvalidConfig(format!(
                "{}: period must be positive",
                name
            )));
        }
        if config.timeout_ms == 0 {
            return Err(AdapterError::InvalidConfig(format!(
                "{}: timeoutMs must be positive",
                name
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AdapterError::InvalidConfig(format!("{}: {}", name, e)))?;

        let mut base = BaseAdapter::new(name);
        for field in &config.signals {
            base = base.with_signal(
                signal_path(&config.vss_path, field),
                SignalSpec::new(SignalValue::Null)
                    .public(config.public)
                    .read_only(true),
            );
        }

        Ok(HttpPollAdapter {
            base,
            client,
            config,
        })
    }

    pub fn from_spec(spec: &AdapterSpec) -> AdapterResult<Arc<dyn AdapterBinding>> {
        let config: HttpAdapterConfig = spec.parse_config()?;
        Ok(Arc::new(HttpPollAdapter::new(spec.name.clone(), config)?))
    }

    /// Fetch once and write the configured fields through the store
    pub async fn poll(&self) -> AdapterResult<u64> {
        let body: Map<String, Value> = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| AdapterError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AdapterError::Unavailable(e.to_string()))?;

        let mut values = SignalMap::new();
        for field in &self.config.signals {
            let Some(raw) = body.get(field) else {
                continue;
            };
            match SignalValue::try_from(raw.clone()) {
                Ok(value) => {
                    values.insert(signal_path(&self.config.vss_path, field), value);
                }
                Err(e) => {
                    tracing::warn!(adapter = %self.name(), field = %field, "skipping field: {}", e);
                }
            }
        }

        self.base.update(values).await
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.period),
            Duration::from_millis(self.config.max_backoff),
        );

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.poll() => polled,
            };
            let delay = match polled {
                Ok(_) => backoff.succeed(),
                Err(e) => {
                    let delay = backoff.fail();
                    tracing::warn!(
                        adapter = %self.name(),
                        retry_in_ms = delay.as_millis() as u64,
                        "poll failed: {}",
                        e
                    );
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!(adapter = %self.name(), "poll loop stopped");
    }
}

fn signal_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

#[async_trait]
impl AdapterBinding for HttpPollAdapter {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn path_list(&self) -> PathSet {
        self.base.path_list().await
    }

    async fn is_public(&self, path: &str) -> AdapterResult<bool> {
        self.base.is_public(path).await
    }

    async fn is_read_only(&self, path: &str) -> AdapterResult<bool> {
        self.base.is_read_only(path).await
    }

    async fn get(&self, paths: &PathSet) -> AdapterResult<SignalMap> {
        self.base.get(paths).await
    }

    async fn set(&self, values: SignalMap) -> AdapterResult<u64> {
        self.base.set(values).await
    }

    async fn subscribe(&self, paths: &PathSet) -> AdapterResult<()> {
        self.base.subscribe(paths).await
    }

    async fn unsubscribe(&self, paths: &PathSet) -> AdapterResult<()> {
        self.base.unsubscribe(paths).await
    }

    async fn unsubscribe_all(&self) {
        self.base.unsubscribe_all().await
    }

    fn change_stream(&self) -> Option<mpsc::Receiver<ChangeBatch>> {
        self.base.change_stream()
    }

    fn start(self: Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        Some(tokio::spawn(self.run(shutdown)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn start_sensor(body: Value) -> String {
        let app = Router::new().route(
            "/sensors",
            get(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/sensors", addr)
    }

    fn config(url: String) -> HttpAdapterConfig {
        HttpAdapterConfig {
            url,
            vss_path: "Signal.Cabin.Environment".into(),
            signals: vec!["Temperature".into(), "Humidity".into()],
            period: 20,
            max_backoff: 100,
            timeout_ms: 5000,
            public: true,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.fail(), Duration::from_millis(200));
        assert_eq!(backoff.fail(), Duration::from_millis(350));
        assert_eq!(backoff.fail(), Duration::from_millis(350));
        assert_eq!(backoff.succeed(), Duration::from_millis(100));
    }

    #[test]
    fn test_requires_signals() {
        let mut cfg = config("http://localhost".into());
        cfg.signals.clear();
        assert!(matches!(
            HttpPollAdapter::new("env", cfg),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_paths_are_read_only_and_start_null() {
        let adapter = HttpPollAdapter::new("env", config("http://localhost".into())).unwrap();
        let path = "Signal.Cabin.Environment.Temperature";
        assert!(adapter.is_read_only(path).await.unwrap());
        assert!(adapter.is_public(path).await.unwrap());

        let paths: PathSet = [path.to_string()].into_iter().collect();
        assert_eq!(adapter.get(&paths).await.unwrap()[path], SignalValue::Null);
    }

    #[tokio::test]
    async fn test_poll_updates_configured_fields() {
        let url = start_sensor(json!({"Temperature": 21.5, "Humidity": 40, "Other": 1})).await;
        let adapter = HttpPollAdapter::new("env", config(url)).unwrap();

        adapter.poll().await.unwrap();

        let all = adapter.path_list().await;
        assert_eq!(all.len(), 2);
        let values = adapter.get(&all).await.unwrap();
        assert_eq!(
            values["Signal.Cabin.Environment.Temperature"],
            SignalValue::from(21.5)
        );
        assert_eq!(
            values["Signal.Cabin.Environment.Humidity"],
            SignalValue::from(40i64)
        );
    }

    #[tokio::test]
    async fn test_poll_failure_is_unavailable() {
        let adapter =
            HttpPollAdapter::new("env", config("http://127.0.0.1:9/sensors".into())).unwrap();
        assert!(matches!(
            adapter.poll().await,
            Err(AdapterError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_started_loop_pushes_changes_and_stops() {
        let url = start_sensor(json!({"Temperature": 19.0})).await;
        let adapter = Arc::new(HttpPollAdapter::new("env", config(url)).unwrap());
        let mut rx = adapter.change_stream().unwrap();
        adapter.subscribe(&adapter.path_list().await).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&adapter).start(shutdown.clone()).unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timeout waiting for poll")
            .expect("stream closed");
        assert_eq!(
            batch.values["Signal.Cabin.Environment.Temperature"],
            SignalValue::from(19.0)
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poll loop did not stop")
            .unwrap();
    }

    /// Accepts connections and holds them open without ever answering
    async fn start_silent_sensor() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        (format!("http://{}/sensors", addr), handle)
    }

    #[tokio::test]
    async fn test_cancel_stops_loop_during_hung_request() {
        let (url, sensor) = start_silent_sensor().await;
        let mut cfg = config(url);
        cfg.timeout_ms = 60_000;
        let adapter = Arc::new(HttpPollAdapter::new("env", cfg).unwrap());

        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&adapter).start(shutdown.clone()).unwrap();
        // Let the first request reach the silent server.
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poll loop ignored cancellation")
            .unwrap();
        sensor.abort();
    }

    #[tokio::test]
    async fn test_hung_request_times_out() {
        let (url, sensor) = start_silent_sensor().await;
        let mut cfg = config(url);
        cfg.timeout_ms = 100;
        let adapter = HttpPollAdapter::new("env", cfg).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), adapter.poll())
            .await
            .expect("request timeout not applied");
        assert!(matches!(result, Err(AdapterError::Unavailable(_))));
        sensor.abort();
    }

    #[test]
    fn test_requires_positive_timeout() {
        let mut cfg = config("http://localhost".into());
        cfg.timeout_ms = 0;
        assert!(matches!(
            HttpPollAdapter::new("env", cfg),
            Err(AdapterError::InvalidConfig(_))
        ));
    }
}
