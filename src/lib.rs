//! # Rhai Notification Delivery
//!
//! This crate implements the core of a notification delivery plugin that
//! hands notifications to an embedded Rhai script. The hosting service
//! evaluates notification rules; when a rule triggers, the plugin invokes a
//! function in a user-supplied script with the notification message, so the
//! delivery action can be customized without rebuilding the plugin.
//!
//! The script file name encodes the entry point: `<module>_script_<entry>.rhai`
//! loads the module and invokes `<entry>(message)` on every delivery. Scripts
//! keep their top-level state between invocations and across reloads of the
//! same module, which allows counters, caches and connections to persist for
//! the lifetime of the instance.
//!
//! ## Crate Structure
//!
//! - **`binder`**: Loads script modules, resolves the entry-point function and
//!   invokes it. Owns the compiled AST and the module scope.
//! - **`config`**: Read access to the JSON configuration category supplied by
//!   the host, including item attributes such as the script file path.
//! - **`delivery`**: The `ScriptDelivery` instance driven by the plugin entry
//!   points. Holds the enable/failure state and the error throttle.
//! - **`error`**: The `DeliveryError` type shared across the crate.
//! - **`plugin`**: Host-facing entry points (`plugin_init`, `plugin_deliver`,
//!   ...) and the plugin's identity and default configuration.
//! - **`report`**: Converts parked script errors into log-ready reports with
//!   the failing source line.
//! - **`runtime`**: The process-wide Rhai interpreter shared by all delivery
//!   instances, with script search paths and safety limits.
//! - **`script`**: Script file-name parsing into module name and entry point.

pub mod binder;
pub mod config;
pub mod delivery;
pub mod error;
pub mod plugin;
pub mod report;
pub mod runtime;
pub mod script;
