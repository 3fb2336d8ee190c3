use crate::config::types::{ProbeError, SessionConfig};
use crate::config::validator::inspect_session_config;
use crate::target::catalog::TypeCatalog;
use crate::target::types::{TargetType, TypeKind};
use crate::values::encoder::Encoder;
use crate::values::template::ValueTemplate;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the size, alignment and member offsets of a type
    Layout {
        /// C spelling of the type, e.g. "struct node" or "int[4]"
        type_name: String,
        /// JSON type catalog (LP64 builtins only when omitted)
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Print the resolved type as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the bytes a JSON template encodes to
    Encode {
        type_name: String,
        /// Template as JSON: numbers, strings, arrays, objects
        template: String,
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Validate a session config file
    CheckConfig {
        /// Path to the session config (default: ./cprobe.json)
        config: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Layout {
            type_name,
            catalog,
            json,
        } => {
            let catalog = load_catalog(catalog.as_deref())?;
            let ty = catalog.lookup(&type_name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ty)?);
            } else {
                print!("{}", render_layout(&ty));
            }
            Ok(())
        }
        Commands::Encode {
            type_name,
            template,
            catalog,
        } => {
            let catalog = load_catalog(catalog.as_deref())?;
            let json: serde_json::Value =
                serde_json::from_str(&template).context("template is not valid JSON")?;
            let template = ValueTemplate::from_json(&json)?;
            let plan = Encoder::new(&catalog).plan_named(&type_name, &template)?;
            let bytes = plan.static_bytes().ok_or_else(|| {
                anyhow::anyhow!(
                    "{} needs {} allocation(s) in a running target, only pointer-free values can be shown",
                    plan.ty.name,
                    plan.allocation_count()
                )
            })?;
            println!("{} ({} bytes)", plan.ty.name, bytes.len());
            println!("{}", hex_dump(&bytes));
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let config = match config {
                Some(path) => SessionConfig::load_from_file(path)?,
                None => SessionConfig::load_default()?,
            };
            let result = inspect_session_config(&config);
            for warning in &result.warnings {
                eprintln!("warning: {}", warning);
            }
            for error in &result.errors {
                eprintln!("error: {}", error);
            }
            if !result.is_valid() {
                return Err(ProbeError::Config(format!(
                    "{} error(s) in session config",
                    result.errors.len()
                ))
                .into());
            }
            println!("Config OK: {}", config.program.display());
            Ok(())
        }
    }
}

/// Process exit status for an error returned by [`run`]
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ProbeError>() {
        Some(probe) => i32::from(probe),
        None => 1,
    }
}

fn load_catalog(path: Option<&Path>) -> Result<TypeCatalog> {
    match path {
        Some(path) => Ok(TypeCatalog::load_from_file(path)?),
        None => Ok(TypeCatalog::lp64()),
    }
}

fn render_layout(ty: &TargetType) -> String {
    let mut out = format!(
        "{}: {} (size {}, align {})\n",
        ty.name,
        ty.kind_name(),
        ty.size,
        ty.align
    );
    match &ty.kind {
        TypeKind::Struct { fields } | TypeKind::Union { fields } => {
            for field in fields {
                out.push_str(&format!(
                    "  +{:<4} {} : {} (size {})\n",
                    field.offset, field.name, field.ty.name, field.ty.size
                ));
            }
        }
        TypeKind::Enum { enumerators, .. } => {
            for (name, value) in enumerators {
                out.push_str(&format!("  {} = {}\n", name, value));
            }
        }
        TypeKind::Array { element, length } => {
            let length = length.map_or_else(|| "?".to_string(), |n| n.to_string());
            out.push_str(&format!("  {} x {}\n", length, element.name));
        }
        _ => {}
    }
    out
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            format!("{:04x}  {}", row * 16, hex.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_struct_layout() {
        let catalog = TypeCatalog::lp64()
            .with_struct("struct pair", &[("c", "char"), ("n", "int")])
            .unwrap();
        let text = render_layout(&catalog.lookup("struct pair").unwrap());
        assert!(text.starts_with("struct pair: struct (size 8, align 4)"));
        assert!(text.contains("+4    n : int (size 4)"));
    }

    #[test]
    fn test_hex_dump_rows() {
        let dump = hex_dump(&[0u8; 17]);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "0010  00");
    }

    #[test]
    fn test_exit_code_from_probe_error() {
        let err: anyhow::Error = ProbeError::usage("x").into();
        assert_eq!(exit_code(&err), 64);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
