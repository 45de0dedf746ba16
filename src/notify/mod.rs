//! Credential-rotation notifications
//!
//! Rotating a leaked key is a human step. gitredact only reports which
//! signatures were exposed, through a [`RotationNotifier`].

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Emitted when matches are found or history was remediated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsExposedEvent {
    /// Sorted, distinct signature ids
    pub signature_ids: Vec<String>,
    pub blob_count: usize,
}

pub trait RotationNotifier: Send + Sync {
    fn notify(&self, event: &SecretsExposedEvent) -> Result<()>;
}

/// Logs a rotation reminder through `tracing`.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl RotationNotifier for LogNotifier {
    fn notify(&self, event: &SecretsExposedEvent) -> Result<()> {
        tracing::warn!(
            signatures = ?event.signature_ids,
            blobs = event.blob_count,
            "Secrets exposed; rotate the affected credentials"
        );
        Ok(())
    }
}

/// Appends one JSON object per event to a file.
#[derive(Debug)]
pub struct JsonLinesNotifier {
    path: PathBuf,
}

impl JsonLinesNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RotationNotifier for JsonLinesNotifier {
    fn notify(&self, event: &SecretsExposedEvent) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        tracing::debug!("Recorded exposure event in {}", self.path.display());
        Ok(())
    }
}

/// Fans an event out to several notifiers; stops at the first failure.
#[derive(Default)]
pub struct CompositeNotifier {
    notifiers: Vec<Box<dyn RotationNotifier>>,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl RotationNotifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl RotationNotifier for CompositeNotifier {
    fn notify(&self, event: &SecretsExposedEvent) -> Result<()> {
        for notifier in &self.notifiers {
            notifier.notify(event)?;
        }
        Ok(())
    }
}

/// Keeps events in memory. Useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<SecretsExposedEvent>>,
}

impl MemoryNotifier {
    pub fn events(&self) -> Vec<SecretsExposedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl RotationNotifier for MemoryNotifier {
    fn notify(&self, event: &SecretsExposedEvent) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

impl<T: RotationNotifier + ?Sized> RotationNotifier for std::sync::Arc<T> {
    fn notify(&self, event: &SecretsExposedEvent) -> Result<()> {
        (**self).notify(event)
    }
}
