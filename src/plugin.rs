//! Host-facing plugin surface.
//!
//! The host drives a delivery plugin through five entry points: query its
//! identity and default configuration (`plugin_info`), create an instance
//! (`plugin_init`, where a `None` aborts the setup), deliver notifications
//! (`plugin_deliver`), apply configuration changes (`plugin_reconfigure`)
//! and tear the instance down (`plugin_shutdown`). The delivery script to
//! load is set in the `script` configuration item; its file name encodes
//! the entry-point function the plugin invokes with the notification
//! message.

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::config::ConfigCategory;
use crate::delivery::ScriptDelivery;

/// Plugin name, also the default of the read-only `plugin` item.
pub const PLUGIN_NAME: &str = "rhai";

/// Plugin type understood by the host's notification service.
pub const PLUGIN_TYPE: &str = "notificationDelivery";

/// Version of the plugin interface this plugin implements.
pub const INTERFACE_VERSION: &str = "1.0.0";

/// Identity and default configuration of this plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Capability flags; none are defined for delivery plugins.
    pub options: u32,
    /// Plugin type discriminator.
    #[serde(rename = "type")]
    pub plugin_type: &'static str,
    /// Plugin interface version.
    pub interface: &'static str,
    /// Default configuration category content.
    #[serde(rename = "config")]
    pub default_config: serde_json::Value,
}

static INFO: Lazy<PluginInfo> = Lazy::new(|| PluginInfo {
    name: PLUGIN_NAME,
    version: env!("CARGO_PKG_VERSION"),
    options: 0,
    plugin_type: PLUGIN_TYPE,
    interface: INTERFACE_VERSION,
    default_config: default_config(),
});

fn default_config() -> serde_json::Value {
    json!({
        "plugin": {
            "description": "Rhai notification delivery plugin",
            "type": "string",
            "default": PLUGIN_NAME,
            "readonly": "true"
        },
        "enable": {
            "description": "A switch that can be used to enable or disable execution of the Rhai notification plugin.",
            "type": "boolean",
            "displayName": "Enabled",
            "order": "3",
            "default": "false"
        },
        "config": {
            "description": "Delivery script configuration.",
            "type": "JSON",
            "displayName": "Configuration",
            "order": "2",
            "default": "{}"
        },
        "script": {
            "description": "Rhai script to load.",
            "type": "script",
            "displayName": "Rhai script",
            "order": "1",
            "default": ""
        }
    })
}

/// Information about this plugin.
pub fn plugin_info() -> &'static PluginInfo {
    &INFO
}

/// Create and initialize a delivery instance from its configuration.
///
/// Returns `None` when initialization fails; the host must then abort the
/// plugin setup.
pub fn plugin_init(config: &ConfigCategory) -> Option<Box<ScriptDelivery>> {
    let delivery = Box::new(ScriptDelivery::new(config));

    if !delivery.init() {
        error!(
            plugin = PLUGIN_NAME,
            category = config.name(),
            "delivery plugin initialization failed"
        );
        return None;
    }

    Some(delivery)
}

/// Deliver one received notification.
///
/// Checks the enable flag up front so a disabled instance costs next to
/// nothing, then hands the message to the instance.
pub fn plugin_deliver(
    handle: &ScriptDelivery,
    delivery_name: &str,
    notification_name: &str,
    trigger_reason: &str,
    message: &str,
) -> bool {
    if !handle.is_enabled() {
        return false;
    }

    handle.notify(delivery_name, notification_name, trigger_reason, message)
}

/// Apply a new configuration payload to a delivery instance.
pub fn plugin_reconfigure(handle: &ScriptDelivery, new_config: &str) -> bool {
    handle.reconfigure(new_config)
}

/// Shut the instance down and release it.
pub fn plugin_shutdown(handle: Box<ScriptDelivery>) {
    handle.shutdown();
}
