//! Startup validation of a session configuration.
//! Errors abort `start` with an actionable message, warnings are logged.

use crate::config::types::{ProbeError, Result, SessionConfig};

/// Longest alarm a session may request
pub const MAX_TIMEOUT_SECS: u32 = 24 * 60 * 60;

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Check `config` before a session starts. Any error is fatal.
pub fn validate_session_config(config: &SessionConfig) -> Result<ValidationResult> {
    let result = inspect_session_config(config);
    if !result.is_valid() {
        return Err(ProbeError::Config(format!(
            "Session config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }
    Ok(result)
}

/// Collect every problem with `config` without failing
pub fn inspect_session_config(config: &SessionConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_program(config, &mut result);
    validate_output(config, &mut result);
    validate_heap_primitives(config, &mut result);
    validate_environment(config, &mut result);

    if config.timeout_secs > MAX_TIMEOUT_SECS {
        result.add_error(format!(
            "timeout_secs {} exceeds the {} second limit",
            config.timeout_secs, MAX_TIMEOUT_SECS
        ));
    }
    if config.detach_wait_ms == 0 {
        result.add_warning(
            "detach_wait_ms is 0, finish will not wait for the detached program".to_string(),
        );
    }

    result
}

fn validate_program(config: &SessionConfig, result: &mut ValidationResult) {
    if config.program.as_os_str().is_empty() {
        result.add_error("program must be set".to_string());
        return;
    }
    if !config.program.exists() {
        result.add_warning(format!(
            "program {} does not exist on this host",
            config.program.display()
        ));
    }
}

fn validate_output(config: &SessionConfig, result: &mut ValidationResult) {
    if config.save_output {
        if config.stdout_path.as_os_str().is_empty() {
            result.add_error("stdout_path must be set when save_output is on".to_string());
        }
        if config.stderr_path.as_os_str().is_empty() {
            result.add_error("stderr_path must be set when save_output is on".to_string());
        }
        if config.stdout_path == config.stderr_path {
            result.add_warning(format!(
                "stdout and stderr share {}",
                config.stdout_path.display()
            ));
        }
    }

    if let Some(path) = &config.crash_log_path {
        if path.is_dir() {
            result.add_error(format!(
                "crash_log_path {} is a directory",
                path.display()
            ));
        }
    }
}

fn validate_heap_primitives(config: &SessionConfig, result: &mut ValidationResult) {
    if config.dealloc_function.trim().is_empty() {
        result.add_error("dealloc_function cannot be empty".to_string());
    }
    if config.alloc_functions.is_empty() {
        result.add_warning(
            "alloc_functions is empty, marshalled values cannot be placed in the target"
                .to_string(),
        );
    }
    for name in &config.alloc_functions {
        if name.trim().is_empty() {
            result.add_error("alloc_functions contains an empty name".to_string());
        } else if *name == config.dealloc_function {
            result.add_error(format!(
                "{} cannot be both an allocation and the deallocation function",
                name
            ));
        }
    }
}

fn validate_environment(config: &SessionConfig, result: &mut ValidationResult) {
    for (key, _) in &config.environment {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            result.add_error(format!("invalid environment variable name {:?}", key));
        } else if key == "ASAN_OPTIONS" {
            result.add_warning(
                "ASAN_OPTIONS in environment is replaced by asan_detect_leaks/asan_log_path"
                    .to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::for_program("./a.out")
    }

    #[test]
    fn test_valid_default_program_config() {
        let result = validate_session_config(&config()).unwrap();
        assert!(result.is_valid());
        // ./a.out is not there
        assert!(result.warnings.iter().any(|w| w.contains("does not exist")));
    }

    #[test]
    fn test_missing_program_rejected() {
        let result = validate_session_config(&SessionConfig::default());
        assert!(matches!(result, Err(ProbeError::Config(msg)) if msg.contains("program")));
    }

    #[test]
    fn test_empty_output_paths() {
        let mut config = config();
        config.stdout_path = Default::default();

        let result = inspect_session_config(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("stdout_path")));

        config.save_output = false;
        assert!(inspect_session_config(&config).is_valid());
    }

    #[test]
    fn test_dealloc_cannot_be_an_allocator() {
        let mut config = config();
        config.alloc_functions.push("free".to_string());

        let result = inspect_session_config(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("free cannot be both")));
    }

    #[test]
    fn test_bad_environment_name() {
        let mut config = config();
        config
            .environment
            .push(("A=B".to_string(), "1".to_string()));
        config
            .environment
            .push(("ASAN_OPTIONS".to_string(), "x".to_string()));

        let result = inspect_session_config(&config);
        assert_eq!(result.errors.len(), 1);
        assert!(result.warnings.iter().any(|w| w.contains("ASAN_OPTIONS")));
    }

    #[test]
    fn test_timeout_bounded() {
        let mut config = config();
        config.timeout_secs = MAX_TIMEOUT_SECS + 1;
        assert!(!inspect_session_config(&config).is_valid());
    }

    #[test]
    fn test_crash_log_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.crash_log_path = Some(dir.path().to_path_buf());
        assert!(validate_session_config(&config).is_err());
    }
}
