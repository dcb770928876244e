//! Progress stream emitted while a dispatch runs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Lifecycle milestone a progress line reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ProgressStage {
    Submitting { source: String },
    Submitted { tx_id: String },
    Included { block_number: u64, message_id: Option<String> },
    AwaitingDelivery { destination: String, timeout_ms: u64 },
    Delivered { text: String },
    TimedOut { timeout_ms: u64 },
    DeliveryUnobservable { reason: String },
    Failed { reason: String },
}

impl ProgressStage {
    /// Whether this stage ends the progress stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressStage::Delivered { .. }
                | ProgressStage::TimedOut { .. }
                | ProgressStage::DeliveryUnobservable { .. }
                | ProgressStage::Failed { .. }
        )
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStage::Submitting { source } => {
                write!(f, "Sending message transaction from source chain {}...", source)
            }
            ProgressStage::Submitted { tx_id } => write!(f, "TX hash (source): {}", tx_id),
            ProgressStage::Included {
                block_number,
                message_id: Some(id),
            } => write!(
                f,
                "Transaction confirmed on source chain in block {} (message id {})",
                block_number, id
            ),
            ProgressStage::Included { block_number, .. } => write!(
                f,
                "Transaction confirmed on source chain in block {}",
                block_number
            ),
            ProgressStage::AwaitingDelivery {
                destination,
                timeout_ms,
            } => write!(
                f,
                "Waiting up to {}s for message to be received on chain {}...",
                seconds(*timeout_ms),
                destination
            ),
            ProgressStage::Delivered { text } => {
                write!(f, "Message received on destination chain: \"{}\"", text)
            }
            ProgressStage::TimedOut { timeout_ms } => write!(
                f,
                "MessageReceived not emitted within {}s. Check destination contract or wait longer.",
                seconds(*timeout_ms)
            ),
            ProgressStage::DeliveryUnobservable { reason } => {
                write!(f, "Cannot watch destination chain for delivery: {}", reason)
            }
            ProgressStage::Failed { reason } => write!(f, "Error: {}", reason),
        }
    }
}

/// `20000` renders as `20`, `500` as `0.5`
fn seconds(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// One immutable status line
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(flatten)]
    pub stage: ProgressStage,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage) -> Self {
        Self {
            message: stage.to_string(),
            stage,
            at: Utc::now(),
        }
    }
}

/// Receiver of progress lines for one dispatch
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // Receiver gone means the caller stopped listening
        let _ = self.send(event);
    }
}

/// Collects progress lines in memory
#[derive(Debug, Default)]
pub struct ProgressLog {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn stages(&self) -> Vec<ProgressStage> {
        self.events().into_iter().map(|e| e.stage).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressSink for ProgressLog {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
