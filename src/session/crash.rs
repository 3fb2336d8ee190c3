//! Out-of-band inspection of a target stopped by a fault signal.

use crate::config::types::{ProbeError, Result};
use crate::target::control::{FrameSummary, StopInspection, VariableSummary};
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const SEPARATOR_WIDTH: usize = 65;

/// State of the target at the moment a signal stopped it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrashReport {
    /// Signal name, e.g. `SIGSEGV`
    pub signal: String,
    /// Innermost frame first
    pub backtrace: Vec<FrameSummary>,
    /// Variables of the innermost frame
    pub locals: Vec<VariableSummary>,
    pub captured_at: DateTime<Utc>,
}

impl CrashReport {
    pub fn new(signal: Signal, inspection: StopInspection) -> Self {
        Self {
            signal: signal.as_str().to_string(),
            backtrace: inspection.backtrace,
            locals: inspection.locals,
            captured_at: Utc::now(),
        }
    }

    /// Report for a signal whose stopped state could not be inspected
    pub fn signal_only(signal: Signal) -> Self {
        Self::new(signal, StopInspection::default())
    }

    /// Function the target was executing when the signal arrived
    pub fn faulting_function(&self) -> Option<&str> {
        self.backtrace.first().map(|frame| frame.function.as_str())
    }

    /// Write the rendered report, replacing any previous one
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_string()).map_err(|e| {
            ProbeError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to write crash log {}: {}", path.display(), e),
            ))
        })
    }
}

impl fmt::Display for CrashReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: Program received signal {}", self.signal)?;
        for (depth, frame) in self.backtrace.iter().enumerate() {
            match &frame.location {
                Some(location) => writeln!(f, "#{:<2} {} at {}", depth, frame.function, location)?,
                None => writeln!(f, "#{:<2} {}", depth, frame.function)?,
            }
        }
        writeln!(f)?;
        writeln!(f, "{}", "=".repeat(SEPARATOR_WIDTH))?;
        writeln!(f, "Stack variables at the moment of the crash:")?;
        if self.locals.is_empty() {
            writeln!(f, "    no variables")?;
        }
        for local in &self.locals {
            writeln!(f, "    {} = ({}) {}", local.name, local.type_name, local.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> CrashReport {
        CrashReport::new(
            Signal::SIGSEGV,
            StopInspection {
                backtrace: vec![
                    FrameSummary {
                        function: "list_push".to_string(),
                        location: Some("list.c:42".to_string()),
                    },
                    FrameSummary {
                        function: "main".to_string(),
                        location: None,
                    },
                ],
                locals: vec![VariableSummary {
                    name: "node".to_string(),
                    type_name: "struct node *".to_string(),
                    value: "0x0".to_string(),
                }],
            },
        )
    }

    #[test]
    fn test_render() {
        let text = report().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ERROR: Program received signal SIGSEGV");
        assert_eq!(lines[1], "#0  list_push at list.c:42");
        assert_eq!(lines[2], "#1  main");
        assert!(text.contains("Stack variables at the moment of the crash:"));
        assert!(text.contains("    node = (struct node *) 0x0"));
    }

    #[test]
    fn test_render_without_locals() {
        let text = CrashReport::signal_only(Signal::SIGABRT).to_string();
        assert!(text.starts_with("ERROR: Program received signal SIGABRT"));
        assert!(text.contains("no variables"));
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("crash_log.txt");
        let report = report();
        report.write_to(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, report.to_string());
        assert_eq!(report.faulting_function(), Some("list_push"));
    }
}
