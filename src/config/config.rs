use crate::config::types::{ProbeError, Result, SessionConfig};
use crate::target::catalog::{Declaration, TypeCatalog};
use std::path::Path;

impl SessionConfig {
    /// Load a session configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("Failed to read config file: {}", e)))?;

        let config: SessionConfig = serde_json::from_str(&config_content)
            .map_err(|e| ProbeError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    /// Load `cprobe.json` from the current directory
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| ProbeError::Config(format!("Failed to get current directory: {}", e)))?
            .join("cprobe.json");

        if !config_path.exists() {
            return Err(ProbeError::Config(
                "cprobe.json not found in current directory".to_string(),
            ));
        }

        Self::load_from_file(config_path)
    }
}

impl TypeCatalog {
    /// Load a type catalog (JSON list of declarations) from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("Failed to read type catalog: {}", e)))?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let declarations: Vec<Declaration> = serde_json::from_str(content)
            .map_err(|e| ProbeError::Config(format!("Failed to parse type catalog JSON: {}", e)))?;

        let mut catalog = TypeCatalog::lp64();
        for declaration in declarations {
            catalog.declare(declaration)?;
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_session_config_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"program": "./list", "timeout_secs": 5}}"#).unwrap();

        let config = SessionConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.program, std::path::PathBuf::from("./list"));
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.dealloc_function, "free");
        assert!(config.free_on_finish);
    }

    #[test]
    fn test_load_session_config_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = SessionConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }

    #[test]
    fn test_catalog_from_json() {
        let catalog = TypeCatalog::from_json(
            r#"[{"kind": "struct", "name": "pair", "fields": [["a", "int"], ["b", "char"]]}]"#,
        )
        .unwrap();
        let pair = catalog.lookup("struct pair").unwrap();
        assert_eq!(pair.size, 8);
        assert_eq!(pair.align, 4);
    }

    #[test]
    fn test_catalog_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"kind": "typedef", "name": "handle_t", "target": "long"}},
               {{"kind": "union", "name": "word", "fields": [["c", "char"], ["id", "handle_t"]]}}]"#
        )
        .unwrap();

        let catalog = TypeCatalog::load_from_file(file.path()).unwrap();
        assert_eq!(catalog.lookup("handle_t").unwrap().size, 8);
        assert_eq!(catalog.lookup("union word").unwrap().size, 8);

        let err = TypeCatalog::from_json(r#"{"kind": "struct"}"#).unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }
}
