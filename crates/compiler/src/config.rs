//! Driver configuration, loaded from JSON (`tsnc -c config.json`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn default_group_iterations() -> u32 {
    32
}

/// VM sizing, forwarded to [`tsn_vm::VmConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSizes {
    pub stack_size: u64,
    pub mem_size: u64,
    pub stack_padding: u64,
}

impl Default for VmSizes {
    fn default() -> Self {
        let d = tsn_vm::VmConfig::default();
        VmSizes {
            stack_size: d.stack_size,
            mem_size: d.mem_size,
            stack_padding: d.stack_padding,
        }
    }
}

impl From<&VmSizes> for tsn_vm::VmConfig {
    fn from(s: &VmSizes) -> Self {
        tsn_vm::VmConfig {
            stack_size: s.stack_size,
            mem_size: s.mem_size,
            stack_padding: s.stack_padding,
        }
    }
}

/// The driver's configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Directory module ASTs load from.
    #[serde(default = "default_workspace")]
    pub workspace_root: PathBuf,
    #[serde(default = "default_true")]
    pub optimize: bool,
    #[serde(default = "default_group_iterations")]
    pub max_group_iterations: u32,
    #[serde(default)]
    pub vm: VmSizes,
    /// Host-binding manifests (TOML) to install before compiling.
    #[serde(default)]
    pub host_manifests: Vec<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            workspace_root: default_workspace(),
            optimize: true,
            max_group_iterations: default_group_iterations(),
            vm: VmSizes::default(),
            host_manifests: Vec::new(),
        }
    }
}

impl CompilerConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read config '{}': {e}", path.display()))?;
        Self::from_json(&text).map_err(|e| format!("config '{}': {e}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let c = CompilerConfig::from_json("{}").unwrap();
        assert!(c.optimize);
        assert_eq!(c.max_group_iterations, 32);
        assert_eq!(c.workspace_root, PathBuf::from("."));
    }

    #[test]
    fn test_partial_override() {
        let c = CompilerConfig::from_json(
            r#"{"optimize": false, "vm": {"stack_size": 4096, "mem_size": 65536, "stack_padding": 16}}"#,
        )
        .unwrap();
        assert!(!c.optimize);
        assert_eq!(c.vm.stack_size, 4096);
        let vc: tsn_vm::VmConfig = (&c.vm).into();
        assert_eq!(vc.stack_padding, 16);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        assert!(CompilerConfig::from_json("{not json").is_err());
    }
}
