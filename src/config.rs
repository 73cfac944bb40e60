//! Runtime configuration types.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default limit on nested managed calls.
pub const DEFAULT_CALL_STACK_SIZE: u32 = 2000;

/// Runtime configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Maximum depth of managed calls before the stack overflow guard fires
    pub call_stack_size: u32,
    /// Print a listing of the generated code after linking
    pub print_disassembly: bool,
    pub trace_jit: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            call_stack_size: DEFAULT_CALL_STACK_SIZE,
            print_disassembly: false,
            trace_jit: false,
        }
    }
}

/// Layout of `kiln.toml`
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    runtime: RuntimeConfig,
}

impl RuntimeConfig {
    /// Parse the `[runtime]` table of a config document.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| format!("failed to parse config: {}", e))?;
        Ok(file.runtime)
    }

    /// Load config from a file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::from_toml(&content)
    }

    /// Call depth limit as baked into generated code.
    pub fn call_depth_limit(&self) -> i32 {
        self.call_stack_size.min(i32::MAX as u32) as i32
    }
}
