//! Audit log of administrative and console access events
//!
//! Entries are JSON lines appended to the configured file by a background
//! writer task, so recording an event never blocks a request handler.
//! Credentials and token values are never written; tokens appear only as the
//! short prefix their `Debug` form shows.

use crate::config::AuditConfig;
use anyhow::{Context, Result};
use protocol::NodeId;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    NodePut,
    NodeDeleted,
    TokenIssued,
    TokensRevoked,
    ConsoleAttached,
    ConsoleDetached,
    PowerAction,
    /// Admin or token check failed
    AuthFailure,
    ServerStarted,
    ServerStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Denied,
}

/// One line of the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(event_type: AuditEventType, result: AuditResult) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            timestamp_ms,
            event_type,
            node_id: None,
            result,
            detail: None,
        }
    }

    pub fn with_node(mut self, id: &NodeId) -> Self {
        self.node_id = Some(id.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

enum AuditMessage {
    Log(AuditEntry),
    Shutdown,
}

/// Handle to the background audit writer
pub struct AuditLogger {
    sender: mpsc::UnboundedSender<AuditMessage>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Start the writer task; `None` when audit logging is disabled
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: AuditConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = AuditWriter::new(config);
        let writer = tokio::spawn(writer.run(receiver));

        Some(Self {
            sender,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn log(&self, entry: AuditEntry) {
        if let Err(e) = self.sender.send(AuditMessage::Log(entry)) {
            warn!("Failed to queue audit entry: {}", e);
        }
    }

    /// Stop the writer once everything queued so far is on disk
    pub async fn shutdown(&self) {
        let _ = self.sender.send(AuditMessage::Shutdown);

        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                error!("Audit writer task failed: {}", e);
            }
        }
    }

    pub fn log_node_put(&self, id: &NodeId, outcome: &str) {
        self.log(
            AuditEntry::new(AuditEventType::NodePut, AuditResult::Success)
                .with_node(id)
                .with_detail(outcome),
        );
    }

    pub fn log_node_deleted(&self, id: &NodeId) {
        self.log(AuditEntry::new(AuditEventType::NodeDeleted, AuditResult::Success).with_node(id));
    }

    pub fn log_token_issued(&self, id: &NodeId) {
        self.log(AuditEntry::new(AuditEventType::TokenIssued, AuditResult::Success).with_node(id));
    }

    pub fn log_tokens_revoked(&self, id: &NodeId, count: usize) {
        self.log(
            AuditEntry::new(AuditEventType::TokensRevoked, AuditResult::Success)
                .with_node(id)
                .with_detail(format!("{} tokens", count)),
        );
    }

    pub fn log_console_attached(&self, id: &NodeId, session: u64) {
        self.log(
            AuditEntry::new(AuditEventType::ConsoleAttached, AuditResult::Success)
                .with_node(id)
                .with_detail(format!("session {}", session)),
        );
    }

    pub fn log_console_detached(&self, id: &NodeId, session: u64, reason: &str) {
        self.log(
            AuditEntry::new(AuditEventType::ConsoleDetached, AuditResult::Success)
                .with_node(id)
                .with_detail(format!("session {}: {}", session, reason)),
        );
    }

    pub fn log_power_action(&self, id: &NodeId, action: &str, result: AuditResult) {
        self.log(
            AuditEntry::new(AuditEventType::PowerAction, result)
                .with_node(id)
                .with_detail(action),
        );
    }

    /// `operation` names what was attempted, e.g. `"delete node"`
    pub fn log_auth_failure(&self, id: Option<&NodeId>, operation: &str) {
        let mut entry =
            AuditEntry::new(AuditEventType::AuthFailure, AuditResult::Denied).with_detail(operation);
        if let Some(id) = id {
            entry = entry.with_node(id);
        }
        self.log(entry);
    }

    pub fn log_server_started(&self, version: &str) {
        self.log(
            AuditEntry::new(AuditEventType::ServerStarted, AuditResult::Success)
                .with_detail(format!("version {}", version)),
        );
    }

    pub fn log_server_stopped(&self) {
        self.log(AuditEntry::new(
            AuditEventType::ServerStopped,
            AuditResult::Success,
        ));
    }
}

struct AuditWriter {
    config: AuditConfig,
    file: Option<BufWriter<File>>,
}

impl AuditWriter {
    fn new(config: AuditConfig) -> Self {
        Self { config, file: None }
    }

    fn open_file(&mut self) -> Result<()> {
        let path = &self.config.path;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create audit log directory: {:?}", parent))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open audit log: {:?}", path))?;

        debug!("Opened audit log: {:?}", path);
        self.file = Some(BufWriter::new(file));
        Ok(())
    }

    fn write_entry(&mut self, entry: &AuditEntry) -> Result<()> {
        let json = serde_json::to_string(entry).context("Failed to serialize audit entry")?;

        if self.file.is_none() {
            self.open_file()?;
        }
        let Some(writer) = self.file.as_mut() else {
            return Ok(());
        };
        writeln!(writer, "{}", json).context("Failed to write audit entry")?;
        writer.flush().context("Failed to flush audit log")?;
        Ok(())
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<AuditMessage>) {
        while let Some(message) = receiver.recv().await {
            match message {
                AuditMessage::Log(entry) => {
                    if let Err(e) = self.write_entry(&entry) {
                        error!("Failed to write audit log entry: {:#}", e);
                    }
                }
                AuditMessage::Shutdown => {
                    debug!("Audit logger shutting down");
                    break;
                }
            }
        }

        if let Some(ref mut writer) = self.file {
            let _ = writer.flush();
        }
    }
}

/// Audit logger shared between the gateway and the HTTP handlers
pub type SharedAuditLogger = Arc<Option<AuditLogger>>;

pub fn create_audit_logger(config: AuditConfig) -> SharedAuditLogger {
    Arc::new(AuditLogger::new(config))
}
