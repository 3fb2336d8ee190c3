/// Core types shared across cprobe: the error taxonomy and session configuration
use crate::session::crash::CrashReport;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Session configuration for one controlled run of a target program
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Program to load and start under the process-control engine
    pub program: PathBuf,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Alarm delivered into the target after this many seconds (0 disables)
    pub timeout_secs: u32,
    /// Redirect the target's stdout/stderr to files
    pub save_output: bool,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    /// Let the address sanitizer run its leak check after detach
    pub asan_detect_leaks: bool,
    /// Sanitizer report destination (passed through ASAN_OPTIONS)
    pub asan_log_path: PathBuf,
    /// Extra environment for the target
    pub environment: Vec<(String, String)>,
    /// Where the crash report of a fault signal is written
    pub crash_log_path: Option<PathBuf>,
    /// Release marshalled allocations during finish
    pub free_on_finish: bool,
    /// Deallocation primitive hooked for liveness bookkeeping and used by free_all
    pub dealloc_function: String,
    /// Allocation primitives whose watched return values are tracked as live blocks
    pub alloc_functions: Vec<String>,
    /// Upper bound on waiting for the detached target to exit
    pub detach_wait_ms: u64,
    /// JSON-lines audit trail (disabled when unset)
    pub audit_log: Option<PathBuf>,
}

impl SessionConfig {
    /// Configuration for `program` with every other setting at its default
    pub fn for_program<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Sanitizer options string handed to the target
    pub fn asan_options(&self) -> String {
        format!(
            "log_path={}:detect_leaks={}",
            self.asan_log_path.display(),
            if self.asan_detect_leaks { 1 } else { 0 }
        )
    }

    /// Full environment for launching the target
    pub fn launch_environment(&self) -> Vec<(String, String)> {
        let mut env = vec![("ASAN_OPTIONS".to_string(), self.asan_options())];
        env.extend(
            self.environment
                .iter()
                .filter(|(key, _)| key != "ASAN_OPTIONS")
                .cloned(),
        );
        env
    }

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(u64::from(self.timeout_secs)))
        }
    }

    pub fn detach_wait(&self) -> Duration {
        Duration::from_millis(self.detach_wait_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::new(),
            args: Vec::new(),
            timeout_secs: 0,
            save_output: true,
            stdout_path: PathBuf::from("stdout.txt"),
            stderr_path: PathBuf::from("stderr.txt"),
            asan_detect_leaks: false,
            asan_log_path: PathBuf::from("asan_log"),
            environment: Vec::new(),
            crash_log_path: Some(PathBuf::from("crash_log.txt")),
            free_on_finish: true,
            dealloc_function: "free".to_string(),
            alloc_functions: vec!["malloc".to_string(), "calloc".to_string()],
            detach_wait_ms: 30_000,
            audit_log: None,
        }
    }
}

/// Template/type incompatibilities found while planning an encoding.
/// Always raised before anything is written to the target.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("shape mismatch for {ty}: expected {expected}, got {found}")]
    ShapeMismatch {
        ty: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("value {value} out of range for {ty}")]
    OutOfRange { ty: String, value: String },

    #[error("missing field `{field}` for {ty}")]
    MissingField { ty: String, field: String },

    #[error("unknown field `{field}` for {ty}")]
    UnknownField { ty: String, field: String },

    #[error("{ty} is {expected} bytes but the template encodes {actual}")]
    SizeMismatch {
        ty: String,
        expected: usize,
        actual: usize,
    },

    #[error("unknown enumerator `{name}` for {ty}")]
    UnknownEnumerator { ty: String, name: String },

    #[error("cannot encode {ty}: {reason}")]
    Unsupported { ty: String, reason: String },
}

/// Custom error types for cprobe
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Target access error: {0}")]
    TargetAccess(String),

    #[error("Target received signal {signal}")]
    TargetSignal {
        signal: Signal,
        report: Box<CrashReport>,
    },

    #[error("Target timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProbeError {
    pub fn usage<S: Into<String>>(message: S) -> Self {
        ProbeError::Usage(message.into())
    }

    pub fn target_access<S: Into<String>>(message: S) -> Self {
        ProbeError::TargetAccess(message.into())
    }
}

/// Convert errors to process exit codes for the CLI
impl From<&ProbeError> for i32 {
    fn from(err: &ProbeError) -> i32 {
        match err {
            ProbeError::Usage(_) => 64,        // Usage
            ProbeError::Encoding(_) => 65,     // Data error
            ProbeError::Config(_) => 78,       // Config error
            ProbeError::Io(_) => 74,           // IO error
            ProbeError::TargetAccess(_) => 70, // Software error
            ProbeError::TargetSignal { .. } => 3,
            ProbeError::Timeout(_) => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;

impl From<nix::errno::Errno> for ProbeError {
    fn from(err: nix::errno::Errno) -> Self {
        ProbeError::TargetAccess(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_environment() {
        let config = SessionConfig::for_program("./a.out");
        let env = config.launch_environment();
        assert_eq!(env[0].0, "ASAN_OPTIONS");
        assert_eq!(env[0].1, "log_path=asan_log:detect_leaks=0");
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_asan_options_override_is_not_duplicated() {
        let mut config = SessionConfig::for_program("./a.out");
        config.asan_detect_leaks = true;
        config.environment = vec![
            ("ASAN_OPTIONS".to_string(), "bogus".to_string()),
            ("LANG".to_string(), "C".to_string()),
        ];
        let env = config.launch_environment();
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].1, "log_path=asan_log:detect_leaks=1");
        assert_eq!(env[1], ("LANG".to_string(), "C".to_string()));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(i32::from(&ProbeError::usage("x")), 64);
        assert_eq!(i32::from(&ProbeError::Timeout(Duration::from_secs(1))), 2);
        let err: ProbeError = EncodingError::UnknownType("struct nope".into()).into();
        assert_eq!(i32::from(&err), 65);
    }

    #[test]
    fn test_errno_conversion() {
        let err: ProbeError = nix::errno::Errno::EFAULT.into();
        assert!(matches!(err, ProbeError::TargetAccess(_)));
    }
}
