//! Audit trail seam.
//!
//! Audit delivery is fire-and-forget: a failing sink must never abort the
//! operation being audited. The command service logs sink failures at `warn`
//! and moves on.

use parking_lot::Mutex;
use tracing::info;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: String,
    pub description: String,
    pub impact: String,
    pub affected_entity: String,
    pub actor_id: String,
    pub actor_email: Option<String>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> anyhow::Result<()>;
}

/// Sink that writes audit entries to the tracing pipeline.
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        info!(
            action = %entry.action,
            entity = %entry.affected_entity,
            actor = %entry.actor_id,
            impact = %entry.impact,
            "{}",
            entry.description
        );
        Ok(())
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        self.entries.lock().push(entry);
        Ok(())
    }
}
