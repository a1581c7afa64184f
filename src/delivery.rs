//! Delivery controller: per-instance lifecycle around the shared runtime.
//!
//! One `ScriptDelivery` exists per configured notification delivery. It owns
//! the enable flag, the failed-script flag with its error-streak counter,
//! the script reference and the module binding, all guarded by one instance
//! mutex. Engine work happens under the runtime lock, always taken inside
//! the instance mutex, never the other way around, so configuration changes
//! serialize cleanly against in-flight notifications.
//!
//! A script that fails to bind or to execute silences its instance instead
//! of failing the host: `notify` returns `false`, the instance is marked
//! failed, and further notifications are dropped with one throttled warning
//! per [`MAX_DELIVERY_ERRORS`] suppressed attempts until an operator
//! reconfigures the instance.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::binder::ModuleBinder;
use crate::config::{self, ConfigCategory, FILE_ATTRIBUTE};
use crate::error::DeliveryError;
use crate::report::ErrorReport;
use crate::runtime::ScriptRuntime;
use crate::script::{ScriptRef, ENTRY_MARKER};

/// Failed-script notifications suppressed between throttled warnings.
pub const MAX_DELIVERY_ERRORS: u32 = 100;

/// Subdirectory of the host data dir where delivery scripts live.
pub const SCRIPTS_SUBDIR: &str = "scripts";

/// Optional script function that receives the `config` item's JSON text
/// after a successful bind.
pub const CONFIG_HOOK: &str = "set_delivery_config";

/// State of one delivery instance, guarded by the instance mutex.
struct DeliveryState {
    enabled: bool,
    failed_script: bool,
    error_streak: u32,
    script: ScriptRef,
    config_blob: String,
    binder: ModuleBinder,
    runtime: Option<Arc<ScriptRuntime>>,
}

/// A notification delivery instance backed by a user script.
pub struct ScriptDelivery {
    name: String,
    scripts_dir: PathBuf,
    state: Mutex<DeliveryState>,
}

impl ScriptDelivery {
    /// Build an instance from its configuration category, using the host
    /// data directory for script resolution.
    pub fn new(category: &ConfigCategory) -> Self {
        Self::with_data_dir(category, config::host_data_dir())
    }

    /// Build an instance resolving scripts under `<data_dir>/scripts`.
    pub fn with_data_dir(category: &ConfigCategory, data_dir: impl Into<PathBuf>) -> Self {
        let name = category.name().to_string();

        let enabled = category
            .get_value("enable")
            .is_some_and(|value| is_enabled_value(&value));

        let script = category
            .get_item_attribute("script", FILE_ATTRIBUTE)
            .map(|file| ScriptRef::parse(&file))
            .unwrap_or_default();
        if script.is_empty() {
            warn!(
                delivery = %name,
                "configured without a delivery script, check the 'script' item in the configuration"
            );
        }

        let config_blob = category
            .get_value("config")
            .unwrap_or_else(|| String::from("{}"));

        Self {
            name,
            scripts_dir: data_dir.into().join(SCRIPTS_SUBDIR),
            state: Mutex::new(DeliveryState {
                enabled,
                failed_script: false,
                error_streak: 0,
                script,
                config_blob,
                binder: ModuleBinder::new(),
                runtime: None,
            }),
        }
    }

    /// Start (or join) the shared runtime, register the scripts directory
    /// on the search path and run the initial configuration.
    ///
    /// A `false` return means the instance is unusable and should be
    /// discarded by the host.
    pub fn init(&self) -> bool {
        let mut state = self.lock_state();

        let runtime = ScriptRuntime::acquire(&self.name);
        runtime.with_lock(|interpreter| interpreter.prepend_search_path(&self.scripts_dir));
        state.runtime = Some(runtime);

        debug!(
            delivery = %self.name,
            scripts = %self.scripts_dir.display(),
            "delivery instance initialized"
        );
        self.configure_locked(&mut state)
    }

    /// Derive the entry point from the configured script and bind it.
    pub fn configure(&self) -> bool {
        let mut state = self.lock_state();
        self.configure_locked(&mut state)
    }

    /// Apply a new configuration payload.
    ///
    /// Routes module changes explicitly: the same module is reloaded in
    /// place (its state survives), a different one is fully reimported. The
    /// enable flag and config blob are refreshed, then the normal configure
    /// pass re-validates the binding.
    pub fn reconfigure(&self, new_config: &str) -> bool {
        debug!(delivery = %self.name, "plugin_reconfigure called: {new_config}");

        let category = match ConfigCategory::from_json(&self.name, new_config) {
            Ok(category) => category,
            Err(err) => {
                error!(
                    delivery = %self.name,
                    error = %err,
                    "invalid reconfiguration payload, keeping the previous configuration"
                );
                return false;
            }
        };

        let mut state = self.lock_state();

        let new_script = category
            .get_item_attribute("script", FILE_ATTRIBUTE)
            .map(|file| ScriptRef::parse(&file))
            .unwrap_or_default();

        if new_script.is_empty() {
            warn!(
                delivery = %self.name,
                "reconfigured without a delivery script, check the 'script' item in the configuration, notification delivery is disabled"
            );
            state.enabled = false;
            state.failed_script = true;
            return false;
        }

        let Some(runtime) = state.runtime.clone() else {
            error!(
                delivery = %self.name,
                error = %DeliveryError::RuntimeNotReady,
                "cannot reconfigure delivery"
            );
            return false;
        };

        state.script = new_script.clone();

        if new_script.has_entry() {
            state.failed_script = false;
            state.error_streak = 0;

            let routed = runtime.with_lock(|interpreter| {
                if state.binder.is_bound_to(&new_script) {
                    if let Err(err) = state.binder.reload(interpreter, &new_script) {
                        if let Some(report) = ErrorReport::drain(interpreter) {
                            error!(delivery = %self.name, "{}", report.render(new_script.module()));
                        }
                        error!(
                            delivery = %self.name,
                            script = %new_script,
                            error = %err,
                            "error while reloading delivery script in 'plugin_reconfigure'"
                        );
                        return false;
                    }
                    debug!(delivery = %self.name, script = %new_script, "delivery script reloaded in place");
                } else if state.binder.reimport(interpreter, &new_script).is_err() {
                    // The configure pass below retries and reports the failure
                    debug!(
                        delivery = %self.name,
                        script = %new_script,
                        "fresh import failed during reconfigure"
                    );
                }
                true
            });

            if !routed {
                state.failed_script = true;
                return false;
            }
        }

        if let Some(config_value) = category.get_value("config") {
            state.config_blob = config_value;
        }
        if category.item_exists("enable") {
            state.enabled = category
                .get_value("enable")
                .is_some_and(|value| is_enabled_value(&value));
        }

        let result = self.configure_locked(&mut state);
        info!(
            delivery = %self.name,
            enabled = state.enabled,
            script = %state.script,
            success = result,
            "delivery reconfigured"
        );
        result
    }

    /// Deliver one notification message through the script entry point.
    ///
    /// Returns `false` without side effects when the instance is disabled.
    /// A failing script marks the instance failed; subsequent calls are
    /// dropped cheaply with a throttled warning until reconfiguration.
    pub fn notify(
        &self,
        delivery_name: &str,
        notification_name: &str,
        trigger_reason: &str,
        message: &str,
    ) -> bool {
        let mut state = self.lock_state();

        if !state.enabled {
            return false;
        }

        if state.failed_script {
            state.error_streak += 1;
            if state.error_streak > MAX_DELIVERY_ERRORS {
                warn!(
                    delivery = %self.name,
                    notification = notification_name,
                    script = %state.script,
                    "delivery script has errors, notifications are not being processed"
                );
                state.error_streak = 0;
            }
            return false;
        }

        let Some(runtime) = state.runtime.clone() else {
            error!(
                delivery = %self.name,
                error = %DeliveryError::RuntimeNotReady,
                "unable to process notification"
            );
            return false;
        };

        let script = state.script.clone();
        let delivered = runtime.with_lock(|interpreter| {
            match state.binder.invoke(interpreter, message) {
                // Return value of the entry point is dropped
                Ok(_value) => {
                    debug!(
                        delivery = %self.name,
                        notification = notification_name,
                        reason = trigger_reason,
                        "delivery script invocation succeeded"
                    );
                    true
                }
                Err(err) => {
                    error!(
                        delivery = %self.name,
                        sender = delivery_name,
                        script = %script,
                        error = %err,
                        "error in delivery script"
                    );
                    if let Some(report) = ErrorReport::drain(interpreter) {
                        error!(delivery = %self.name, "{}", report.render(script.module()));
                    }
                    false
                }
            }
        });

        if delivered {
            state.error_streak = 0;
        } else {
            state.failed_script = true;
        }

        debug!(
            delivery = %self.name,
            notification = notification_name,
            delivered,
            "plugin_deliver completed"
        );
        delivered
    }

    /// Release the script binding and this instance's runtime handle.
    ///
    /// Idempotent: a second call is a no-op. The shared runtime stops when
    /// the last instance lets go of it.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();

        let Some(runtime) = state.runtime.take() else {
            debug!(delivery = %self.name, "shutdown called with no running script runtime");
            return;
        };

        runtime.with_lock(|_interpreter| state.binder.release());
        state.enabled = false;
        info!(delivery = %self.name, "notification delivery shut down");
        drop(runtime);
    }

    /// Instance name, taken from the configuration category.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory delivery scripts are resolved from.
    pub fn scripts_path(&self) -> &Path {
        &self.scripts_dir
    }

    /// File name of the configured script.
    pub fn script_name(&self) -> String {
        self.lock_state().script.file_name().to_string()
    }

    /// True when the instance is enabled for delivery.
    pub fn is_enabled(&self) -> bool {
        self.lock_state().enabled
    }

    /// Force the instance off without touching the rest of its state.
    pub fn disable_delivery(&self) {
        self.lock_state().enabled = false;
    }

    /// Load generation of the bound script module, if any. Diagnostic:
    /// an unchanged generation across a configure means the module was
    /// reused rather than imported again.
    pub fn script_generation(&self) -> Option<u64> {
        self.lock_state().binder.generation()
    }

    /// Bind the configured script. Caller holds the instance mutex.
    fn configure_locked(&self, state: &mut DeliveryState) -> bool {
        state.failed_script = false;

        let script = state.script.clone();
        debug!(
            delivery = %self.name,
            script = %script,
            entry = script.entry(),
            "configuring delivery script"
        );

        // An entry-less script name is a deliberate off switch, not an
        // error, so a partially configured instance can be reconfigured
        if !script.has_entry() {
            if script.is_empty() {
                warn!(
                    delivery = %self.name,
                    "no delivery script configured, notification delivery is disabled"
                );
            } else {
                warn!(
                    delivery = %self.name,
                    script = %script,
                    "script file name has no '{ENTRY_MARKER}<function>' suffix, notification delivery is disabled"
                );
            }
            state.enabled = false;
            state.binder.clear();
            return true;
        }

        let Some(runtime) = state.runtime.clone() else {
            error!(
                delivery = %self.name,
                error = %DeliveryError::RuntimeNotReady,
                "cannot configure delivery"
            );
            state.failed_script = true;
            return false;
        };

        let config_blob = state.config_blob.clone();
        let bound = runtime.with_lock(|interpreter| {
            if let Err(err) = state.binder.import(interpreter, &script) {
                if let Some(report) = ErrorReport::drain(interpreter) {
                    error!(delivery = %self.name, "{}", report.render(script.module()));
                }
                error!(
                    delivery = %self.name,
                    script = %script,
                    error = %err,
                    "cannot bind delivery script"
                );
                return false;
            }

            // Hand the opaque config blob to modules that ask for it
            if state.binder.has_function(CONFIG_HOOK) {
                if let Err(err) = state.binder.call_function(interpreter, CONFIG_HOOK, &config_blob)
                {
                    if let Some(report) = ErrorReport::drain(interpreter) {
                        warn!(delivery = %self.name, "{}", report.render(script.module()));
                    }
                    warn!(
                        delivery = %self.name,
                        error = %err,
                        "optional {CONFIG_HOOK}() hook failed, continuing"
                    );
                }
            }
            true
        });

        if bound {
            state.error_streak = 0;
            debug!(
                delivery = %self.name,
                script = %script,
                entry = script.entry(),
                "delivery script bound"
            );
        } else {
            state.failed_script = true;
        }
        bound
    }

    fn lock_state(&self) -> MutexGuard<'_, DeliveryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Only the exact literals `true` and `True` enable delivery.
fn is_enabled_value(value: &str) -> bool {
    value == "true" || value == "True"
}
