//! Seeded signal simulator
//!
//! Generates vehicle signals for demos and tests. Every random draw comes from
//! one `StdRng` seeded from the configuration, so the same seed replays the
//! same VIN and the same value sequence.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
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

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorConfig {
    #[serde(default)]
    pub seed: u64,
    /// Tick interval in milliseconds
    #[serde(default = "default_period")]
    pub period: u64,
    /// Expose a generated VIN at this path (public, read-only)
    #[serde(default)]
    pub vin_path: Option<String>,
    #[serde(default)]
    pub signals: Vec<SimulatedSignal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedSignal {
    pub path: String,
    #[serde(flatten)]
    pub kind: SignalKind,
    #[serde(default)]
    pub initial: Option<SignalValue>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignalKind {
    Bool,
    Number { min: f64, max: f64 },
    /// Keeps its initial value; only clients change it
    Fixed,
}

impl SignalKind {
    fn initial(&self) -> SignalValue {
        match self {
            SignalKind::Bool => SignalValue::Bool(false),
            SignalKind::Number { min, .. } => SignalValue::from_f64(*min),
            SignalKind::Fixed => SignalValue::Null,
        }
    }

    fn draw(&self, rng: &mut StdRng) -> Option<SignalValue> {
        match self {
            SignalKind::Bool => Some(SignalValue::Bool(rng.gen_bool(0.5))),
            SignalKind::Number { min, max } => {
                let raw: f64 = rng.gen_range(*min..=*max);
                Some(SignalValue::from_f64((raw * 100.0).round() / 100.0))
            }
            SignalKind::Fixed => None,
        }
    }
}

// ISO 3779: no I, O or Q anywhere in a VIN.
const VIN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPRSTUVWXYZ0123456789";
const VIN_WEIGHTS: [u32; 17] = [8, 7, 6, 5, 4, 3, 2, 10, 0, 9, 8, 7, 6, 5, 4, 3, 2];

fn transliterate(c: u8) -> u32 {
    match c {
        b'0'..=b'9' => u32::from(c - b'0'),
        b'A' | b'J' => 1,
        b'B' | b'K' | b'S' => 2,
        b'C' | b'L' | b'T' => 3,
        b'D' | b'M' | b'U' => 4,
        b'E' | b'N' | b'V' => 5,
        b'F' | b'W' => 6,
        b'G' | b'P' | b'X' => 7,
        b'H' | b'Y' => 8,
        b'R' | b'Z' => 9,
        _ => 0,
    }
}

/// Check digit (position 9) of a 17 character VIN
pub fn vin_check_digit(vin: &[u8]) -> char {
    let sum: u32 = vin
        .iter()
        .zip(VIN_WEIGHTS.iter())
        .map(|(c, w)| transliterate(*c) * w)
        .sum();
    match sum % 11 {
        10 => 'X',
        d => char::from_digit(d, 10).unwrap_or('0'),
    }
}

/// Random VIN with a valid check digit
pub fn generate_vin(rng: &mut impl Rng) -> String {
    let mut vin: Vec<u8> = (0..17)
        .map(|_| VIN_ALPHABET[rng.gen_range(0..VIN_ALPHABET.len())])
        .collect();
    vin[8] = b'0';
    vin[8] = vin_check_digit(&vin) as u8;
    String::from_utf8_lossy(&vin).into_owned()
}

pub struct SimulatorAdapter {
    base: BaseAdapter,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    vin: Option<String>,
}

impl SimulatorAdapter {
    pub fn new(name: impl Into<String>, config: SimulatorConfig) -> AdapterResult<Self> {
        let name = name.into();
        if config.period == 0 {
            return Err(AdapterError::InvalidConfig(format!(
                "{}: period must be positive",
                name
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut base = BaseAdapter::new(name.clone());

        let vin = match &config.vin_path {
            Some(path) => {
                let vin = generate_vin(&mut rng);
                base = base.with_signal(
                    path.clone(),
                    SignalSpec::new(vin.clone()).public(true).read_only(true),
                );
                Some(vin)
            }
            None => None,
        };

        for signal in &config.signals {
            if let SignalKind::Number { min, max } = signal.kind {
                if !(min <= max) {
                    return Err(AdapterError::InvalidConfig(format!(
                        "{}: {}: min must not exceed max",
                        name, signal.path
                    )));
                }
            }
            let initial = signal
                .initial
                .clone()
                .unwrap_or_else(|| signal.kind.initial());
            base = base.with_signal(
                signal.path.clone(),
                SignalSpec::new(initial)
                    .public(signal.public)
                    .read_only(signal.read_only),
            );
        }

        Ok(SimulatorAdapter {
            base,
            config,
            rng: Mutex::new(rng),
            vin,
        })
    }

    pub fn from_spec(spec: &AdapterSpec) -> AdapterResult<Arc<dyn AdapterBinding>> {
        let config: SimulatorConfig = spec.parse_config()?;
        Ok(Arc::new(SimulatorAdapter::new(spec.name.clone(), config)?))
    }

    pub fn vin(&self) -> Option<&str> {
        self.vin.as_deref()
    }

    /// Draw the next value of every simulated signal
    pub fn next_values(&self) -> SignalMap {
        let mut rng = self.rng.lock();
        self.config
            .signals
            .iter()
            .filter_map(|s| s.kind.draw(&mut rng).map(|value| (s.path.clone(), value)))
            .collect()
    }

    pub async fn tick(&self) -> AdapterResult<u64> {
        let values = self.next_values();
        self.base.update(values).await
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.period));
        // The first tick of a tokio interval fires immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(adapter = %self.name(), "simulation tick failed: {}", e);
                    }
                }
            }
        }

        tracing::debug!(adapter = %self.name(), "simulator stopped");
    }
}

#[async_trait]
impl AdapterBinding for SimulatorAdapter {
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
        if self
            .config
            .signals
            .iter()
            .all(|s| s.kind == SignalKind::Fixed)
        {
            return None;
        }
        Some(tokio::spawn(self.run(shutdown)))
    }
}
