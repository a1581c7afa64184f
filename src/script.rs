//! Script file references and the naming convention they encode.
//!
//! Delivery scripts follow the naming convention
//! `<lowercased category name>_script_<entry>.rhai`: everything after the
//! last `_script_` marker (minus the extension) is the entry-point function
//! the plugin invokes for each notification. A file name without the marker
//! yields an empty entry point, which deliberately disables delivery rather
//! than failing, so an operator can park a partially configured instance.

use std::fmt;
use std::path::Path;

/// File extension of delivery script modules.
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Marker separating the module prefix from the entry-point suffix.
pub const ENTRY_MARKER: &str = "_script_";

/// A parsed reference to a delivery script.
///
/// Holds the configured file name together with the module and entry-point
/// names derived from it. Directory components are stripped on parse; only
/// the file name participates in module resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptRef {
    /// File name as configured, directories stripped.
    raw: String,
    /// Module name: file name without the extension.
    module: String,
    /// Entry-point function name, empty when the marker is absent.
    entry: String,
}

impl ScriptRef {
    /// Parse a configured script path into a reference.
    ///
    /// The path is reduced to its file name, the module name is the file
    /// name minus the `.rhai` extension, and the entry point is whatever
    /// follows the last `_script_` marker (again minus the extension).
    pub fn parse(configured: &str) -> Self {
        let raw = Path::new(configured)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
            .to_string();

        let module = strip_extension(&raw).to_string();
        let entry = match raw.rfind(ENTRY_MARKER) {
            Some(found) => strip_extension(&raw[found + ENTRY_MARKER.len()..]).to_string(),
            None => String::new(),
        };

        Self { raw, module, entry }
    }

    /// File name as configured (directories stripped, extension kept).
    pub fn file_name(&self) -> &str {
        &self.raw
    }

    /// Module name the script file resolves to.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Entry-point function name, empty when the naming marker is absent.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// True when no script file is configured at all.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// True when the file name encodes an entry-point function.
    pub fn has_entry(&self) -> bool {
        !self.entry.is_empty()
    }

    /// True when both references resolve to the same module file.
    pub fn same_module(&self, other: &ScriptRef) -> bool {
        !self.module.is_empty() && self.module == other.module
    }
}

impl fmt::Display for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn strip_extension(name: &str) -> &str {
    let suffix = format!(".{SCRIPT_EXTENSION}");
    name.strip_suffix(suffix.as_str()).unwrap_or(name)
}
