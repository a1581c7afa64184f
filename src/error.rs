//! Error types for the delivery plugin core.
//!
//! Internally the crate uses `DeliveryError` with the `?` operator as its
//! error currency. Nothing crosses the public plugin boundary as an `Err`:
//! the operations exposed to the host (`init`, `configure`, `reconfigure`,
//! `notify`, `shutdown`) return `bool` and log structured records instead,
//! so a broken user script can never take the host process down with it.
//!
//! The variants follow the failure domains of the plugin lifecycle:
//!
//! - **`Config`**: malformed configuration payloads (bad JSON, missing items).
//! - **`Import` / `EntryPoint`**: bind failures while loading a script module
//!   or resolving its entry-point function.
//! - **`Invocation`**: the entry point was called and raised an error.
//! - **`NotBound` / `RuntimeNotReady`**: lifecycle misuse, e.g. delivering
//!   after shutdown.

use thiserror::Error;

/// Convenience alias for results using the delivery error type.
pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

/// Failures raised by the delivery plugin core.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Malformed or semantically invalid plugin configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A script module could not be located, compiled or evaluated.
    #[error("Failed to import script module '{module}': {detail}")]
    Import {
        /// Module name derived from the configured script file.
        module: String,
        /// Engine rendering of the underlying failure.
        detail: String,
    },

    /// The loaded module does not define the expected entry-point function.
    #[error("Cannot find function '{entry}' in loaded module '{module}'")]
    EntryPoint {
        /// Module the entry point was looked up in.
        module: String,
        /// Entry-point function name derived from the script file name.
        entry: String,
    },

    /// The entry-point invocation raised an error.
    #[error("Invocation of '{entry}' failed: {detail}")]
    Invocation {
        /// Name of the function that was invoked.
        entry: String,
        /// Engine rendering of the underlying failure.
        detail: String,
    },

    /// No script module is currently bound to the delivery instance.
    #[error("No script module is bound")]
    NotBound,

    /// The shared script runtime has not been started or was shut down.
    #[error("Script runtime is not initialized")]
    RuntimeNotReady,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point_error_names_module_and_function() {
        let err = DeliveryError::EntryPoint {
            module: "mycat_script_onalert".into(),
            entry: "onalert".into(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot find function 'onalert' in loaded module 'mycat_script_onalert'"
        );
    }

    #[test]
    fn invocation_error_carries_engine_detail() {
        let err = DeliveryError::Invocation {
            entry: "onalert".into(),
            detail: "Runtime error: boom".into(),
        };
        assert!(err.to_string().contains("onalert"));
        assert!(err.to_string().contains("boom"));
    }
}
