/// Audit trail for controlled runs
/// Every decision that changes what the target observes (injected failures,
/// errno writes, released allocations, captured signals) is recorded as one
/// structured JSON line so a grading run can be reconstructed afterwards.
///
/// - Correlation IDs (run_id, session_id, target pid)
/// - Event types: session start/finish, scope changes, injected failures,
///   degraded best-effort steps, signals, timeouts, teardown outcome
use crate::config::types::{ProbeError, Result};
use crate::safety::ownership::SessionId;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use uuid::Uuid;

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    High,
    Medium,
    Low,
}

/// Types of events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    // Lifecycle
    SessionStart,
    SessionFinish,
    OwnershipRejected,

    // Interception
    ScopeOpened,
    ScopeClosed,
    FailureInjected,

    // Degraded best-effort steps
    ErrnoInjectionFailed,
    ReturnTrapUnavailable,

    // Out-of-band stops
    SignalCaptured,
    TimeoutExpired,

    // Teardown
    AllocationsReleased,
    ReleaseFailed,
}

impl AuditEventType {
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::SessionStart => AuditSeverity::Low,
            AuditEventType::SessionFinish => AuditSeverity::Low,
            AuditEventType::OwnershipRejected => AuditSeverity::High,

            AuditEventType::ScopeOpened => AuditSeverity::Low,
            AuditEventType::ScopeClosed => AuditSeverity::Low,
            AuditEventType::FailureInjected => AuditSeverity::Low,

            AuditEventType::ErrnoInjectionFailed => AuditSeverity::Medium,
            AuditEventType::ReturnTrapUnavailable => AuditSeverity::Medium,

            AuditEventType::SignalCaptured => AuditSeverity::High,
            AuditEventType::TimeoutExpired => AuditSeverity::High,

            AuditEventType::AllocationsReleased => AuditSeverity::Low,
            AuditEventType::ReleaseFailed => AuditSeverity::High,
        }
    }
}

/// Correlation identifiers for event tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationIds {
    /// Unique per controlled run
    pub run_id: String,
    pub session_id: Option<String>,
    pub target_pid: Option<u32>,
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            session_id: None,
            target_pid: None,
        }
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session_id = Some(session.to_string());
        self
    }

    /// Set target PID after launch
    pub fn with_target_pid(mut self, pid: u32) -> Self {
        self.target_pid = Some(pid);
        self
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Individual audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    pub location: Option<String>,
    pub address: Option<u64>,
}

impl AuditEvent {
    /// Create a new event with its type's default severity
    pub fn new(event_type: AuditEventType, details: String) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details,
            correlation: None,
            location: None,
            address: None,
        }
    }

    pub fn with_correlation(mut self, correlation: &CorrelationIds) -> Self {
        self.correlation = Some(correlation.clone());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// JSON-lines audit writer
pub struct AuditLogger {
    audit_file: Arc<Mutex<File>>,
    audit_path: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_path: &Path) -> Result<Self> {
        if let Some(parent) = audit_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ProbeError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(audit_path)
            .map_err(|e| ProbeError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Arc::new(Mutex::new(audit_file)),
            audit_path: audit_path.to_path_buf(),
        })
    }

    pub fn log_event(&self, event: &AuditEvent) {
        let mut log_entry = serde_json::json!({
            "timestamp": event.timestamp.to_rfc3339(),
            "event_type": event.event_type,
            "severity": event.severity,
            "details": event.details,
            "controller_pid": std::process::id(),
        });

        if let Some(correlation) = &event.correlation {
            log_entry["correlation"] = serde_json::json!({
                "run_id": correlation.run_id,
                "session_id": correlation.session_id,
                "target_pid": correlation.target_pid,
            });
        }
        if let Some(location) = &event.location {
            log_entry["location"] = serde_json::json!(location);
        }
        if let Some(address) = event.address {
            log_entry["address"] = serde_json::json!(format!("{:#x}", address));
        }

        log_to_facade(event);

        if let Ok(mut file) = self.audit_file.lock() {
            if let Err(e) = writeln!(file, "{}", log_entry) {
                error!("Failed to write to audit log: {}", e);
            }
            if let Err(e) = file.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        } else {
            error!("Failed to acquire lock on audit file");
        }
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }
}

fn log_to_facade(event: &AuditEvent) {
    match event.severity {
        AuditSeverity::High => warn!("AUDIT: {:?} - {}", event.event_type, event.details),
        AuditSeverity::Medium => warn!("AUDIT: {:?} - {}", event.event_type, event.details),
        AuditSeverity::Low => info!("AUDIT: {:?} - {}", event.event_type, event.details),
    }
}

static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Initialize the global audit logger. Later calls keep the first logger.
pub fn init_audit_logger(audit_path: &Path) -> Result<()> {
    let logger = AuditLogger::new(audit_path)?;
    if AUDIT_LOGGER.set(logger).is_err() {
        warn!("Audit logger already initialized");
    } else {
        info!("Audit logger writing to {}", audit_path.display());
    }
    Ok(())
}

/// Log through the global logger, or the `log` facade when there is none
pub fn log_audit_event(event: AuditEvent) {
    match AUDIT_LOGGER.get() {
        Some(logger) => logger.log_event(&event),
        None => log_to_facade(&event),
    }
}

pub fn session_start(correlation: &CorrelationIds, program: &Path) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::SessionStart,
            format!("Session started: program={}", program.display()),
        )
        .with_correlation(correlation),
    );
}

pub fn session_finish(correlation: &CorrelationIds, released: usize, failed: usize) {
    let event = AuditEvent::new(
        AuditEventType::SessionFinish,
        format!(
            "Session finished: released={}, failed_releases={}",
            released, failed
        ),
    )
    .with_correlation(correlation);
    let event = if failed > 0 {
        event.with_severity(AuditSeverity::Medium)
    } else {
        event
    };
    log_audit_event(event);
}

pub fn ownership_rejected(reason: &str) {
    log_audit_event(AuditEvent::new(
        AuditEventType::OwnershipRejected,
        format!("Control denied: {}", reason),
    ));
}

pub fn scope_opened(correlation: &CorrelationIds, kind: &str, locations: &[String]) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::ScopeOpened,
            format!("{} scope opened on {:?}", kind, locations),
        )
        .with_correlation(correlation),
    );
}

pub fn scope_closed(correlation: &CorrelationIds, kind: &str, locations: &[String]) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::ScopeClosed,
            format!("{} scope closed on {:?}", kind, locations),
        )
        .with_correlation(correlation),
    );
}

pub fn failure_injected(correlation: &CorrelationIds, location: &str, occurrence: usize) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::FailureInjected,
            format!("Forced return from {} (call #{})", location, occurrence),
        )
        .with_correlation(correlation)
        .with_location(location),
    );
}

pub fn errno_injection_failed(
    correlation: &CorrelationIds,
    location: &str,
    errno: i32,
    error: &str,
) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::ErrnoInjectionFailed,
            format!("Could not set errno={} in {}: {}", errno, location, error),
        )
        .with_correlation(correlation)
        .with_location(location),
    );
}

pub fn return_trap_unavailable(correlation: &CorrelationIds, location: &str, reason: &str) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::ReturnTrapUnavailable,
            format!("Return value of {} not captured: {}", location, reason),
        )
        .with_correlation(correlation)
        .with_location(location),
    );
}

pub fn signal_captured(correlation: &CorrelationIds, signal: &str, function: Option<&str>) {
    let event = AuditEvent::new(
        AuditEventType::SignalCaptured,
        format!("Target received {}", signal),
    )
    .with_correlation(correlation);
    let event = match function {
        Some(function) => event.with_location(function),
        None => event,
    };
    log_audit_event(event);
}

pub fn timeout_expired(correlation: &CorrelationIds, seconds: u32) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::TimeoutExpired,
            format!("Alarm fired after {}s, target left stopped", seconds),
        )
        .with_correlation(correlation),
    );
}

pub fn allocations_released(correlation: &CorrelationIds, count: usize, skipped: usize) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::AllocationsReleased,
            format!("Released {} allocations ({} already released)", count, skipped),
        )
        .with_correlation(correlation),
    );
}

pub fn release_failed(correlation: &CorrelationIds, address: u64, error: &str) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::ReleaseFailed,
            format!("Failed to release {:#x}: {}", address, error),
        )
        .with_correlation(correlation)
        .with_address(address),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_creation() {
        let correlation = CorrelationIds::new();
        assert!(!correlation.run_id.is_empty());
        assert!(correlation.session_id.is_none());
        assert!(correlation.target_pid.is_none());
        assert_ne!(correlation.run_id, CorrelationIds::new().run_id);
    }

    #[test]
    fn test_correlation_ids_builders() {
        let session = SessionId::new();
        let correlation = CorrelationIds::new()
            .with_session(session)
            .with_target_pid(1234);
        assert_eq!(correlation.session_id, Some(session.to_string()));
        assert_eq!(correlation.target_pid, Some(1234));
    }

    #[test]
    fn test_event_type_severity() {
        assert_eq!(
            AuditEventType::SessionStart.default_severity(),
            AuditSeverity::Low
        );
        assert_eq!(
            AuditEventType::ReleaseFailed.default_severity(),
            AuditSeverity::High
        );
        assert_eq!(
            AuditEventType::ErrnoInjectionFailed.default_severity(),
            AuditSeverity::Medium
        );
    }

    #[test]
    fn test_audit_logger_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.log");
        let logger = AuditLogger::new(&path).unwrap();

        let correlation = CorrelationIds::new().with_target_pid(42);
        logger.log_event(
            &AuditEvent::new(AuditEventType::FailureInjected, "forced".to_string())
                .with_correlation(&correlation)
                .with_location("malloc"),
        );
        logger.log_event(
            &AuditEvent::new(AuditEventType::ReleaseFailed, "bad".to_string())
                .with_address(0x1000),
        );

        let contents = std::fs::read_to_string(logger.audit_path()).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "FailureInjected");
        assert_eq!(lines[0]["location"], "malloc");
        assert_eq!(lines[0]["correlation"]["target_pid"], 42);
        assert_eq!(lines[1]["address"], "0x1000");
    }

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::new(AuditEventType::SessionStart, "start".to_string())
            .with_correlation(&CorrelationIds::new());
        let json = serde_json::to_string(&event).unwrap();
        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, AuditEventType::SessionStart);
    }
}
