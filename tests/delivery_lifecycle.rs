//! End-to-end lifecycle tests: real script files on disk, the shared script
//! runtime, and the host-facing plugin entry points.
//!
//! Every test here touches the process-wide runtime, so they are serialized.

use std::fs;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::TempDir;
use tracing_test::traced_test;

use notify_rhai::config::ConfigCategory;
use notify_rhai::delivery::ScriptDelivery;
use notify_rhai::plugin;
use notify_rhai::runtime::ScriptRuntime;

/// Host-style data directory with a `scripts/` subdirectory.
struct DataDir {
    root: TempDir,
}

impl DataDir {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("scripts")).unwrap();
        Self { root }
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn write_script(&self, file_name: &str, body: &str) -> PathBuf {
        let path = self.root.path().join("scripts").join(file_name);
        fs::write(&path, body).unwrap();
        path
    }
}

fn category(name: &str, enable: &str, script_file: &Path) -> ConfigCategory {
    let payload = serde_json::json!({
        "enable": { "type": "boolean", "value": enable },
        "script": {
            "type": "script",
            "value": "",
            "file": script_file.to_string_lossy(),
        },
    });
    ConfigCategory::from_json(name, &payload.to_string()).unwrap()
}

fn reconfig_payload(enable: &str, script_file: &Path) -> String {
    serde_json::json!({
        "enable": { "value": enable },
        "script": { "value": "", "file": script_file.to_string_lossy() },
    })
    .to_string()
}

const SAMPLE_SCRIPT: &str = include_str!("../demos/notify_script_onalert.rhai");

#[test]
#[serial]
#[traced_test]
fn plugin_surface_delivers_end_to_end() {
    let data = DataDir::new();
    let script = data.write_script(
        "outage_script_onalert.rhai",
        r#"
let count = 0;

fn onalert(message) {
    count += 1;
    print("delivered #" + count + ": " + message);
}
"#,
    );

    // plugin_init resolves scripts under the host data directory
    std::env::set_var("NOTIFY_DATA", data.path());
    let config = category("outage", "true", &script);
    let handle = plugin::plugin_init(&config).expect("plugin_init failed");
    std::env::remove_var("NOTIFY_DATA");

    assert!(handle.is_enabled());
    assert!(ScriptRuntime::is_running());

    assert!(plugin::plugin_deliver(
        &handle,
        "outage",
        "overheat",
        "triggered",
        "temp is 92"
    ));
    assert!(plugin::plugin_deliver(
        &handle,
        "outage",
        "overheat",
        "cleared",
        "temp is 60"
    ));
    // Module state accumulated across the two invocations
    assert!(logs_contain("delivered #1: temp is 92"));
    assert!(logs_contain("delivered #2: temp is 60"));

    plugin::plugin_shutdown(handle);
    assert!(!ScriptRuntime::is_running());
}

#[test]
#[serial]
#[traced_test]
fn shipped_sample_script_delivers_notifications() {
    let data = DataDir::new();
    let script = data.write_script("notify_script_onalert.rhai", SAMPLE_SCRIPT);

    let config = category("sample", "true", &script);
    let handle = ScriptDelivery::with_data_dir(&config, data.path());
    assert!(handle.init());

    assert!(handle.notify("sample", "pump-alarm", "triggered", "pump stalled"));
    assert!(handle.notify("sample", "pump-alarm", "cleared", "pump recovered"));
    assert!(logs_contain("Notification alert #1: pump stalled"));
    assert!(logs_contain("Notification alert #2: pump recovered"));

    handle.shutdown();
}

#[test]
#[serial]
#[traced_test]
fn init_fails_when_the_script_file_is_missing() {
    let data = DataDir::new();
    let ghost = data.path().join("scripts").join("ghost_script_onalert.rhai");

    let config = category("ghost", "true", &ghost);
    let handle = ScriptDelivery::with_data_dir(&config, data.path());

    assert!(!handle.init());
    assert!(logs_contain(
        "Rhai error: Module 'ghost_script_onalert' not found in script path"
    ));
    assert!(logs_contain("cannot bind delivery script"));

    handle.shutdown();
}

#[test]
#[serial]
#[traced_test]
fn broken_script_reports_the_failing_line() {
    let data = DataDir::new();
    let script = data.write_script(
        "broken_script_onalert.rhai",
        "fn onalert(message) {\nlet x = ;\n}\n",
    );

    let config = category("broken", "true", &script);
    let handle = ScriptDelivery::with_data_dir(&config, data.path());

    assert!(!handle.init());
    logs_assert(|lines: &[&str]| {
        let quoted = lines.iter().any(|line| {
            line.contains("Rhai error:")
                && line
                    .contains("in let x = ; at line 2 of supplied script 'broken_script_onalert'")
        });
        if quoted {
            Ok(())
        } else {
            Err("expected the report to quote line 2 of the script".into())
        }
    });

    handle.shutdown();
}

#[test]
#[serial]
#[traced_test]
fn failing_invocation_silences_delivery_until_reconfigured() {
    let data = DataDir::new();
    let script = data.write_script(
        "pager_script_onalert.rhai",
        "fn onalert(message) {\n    throw \"pager unreachable\";\n}\n",
    );

    let config = category("pager", "true", &script);
    let handle = ScriptDelivery::with_data_dir(&config, data.path());
    // Binding succeeds, the function only fails when called
    assert!(handle.init());

    assert!(!handle.notify("pager", "disk-full", "triggered", "disk 98%"));
    assert!(logs_contain("error in delivery script"));
    assert!(logs_contain("pager unreachable"));

    // Failed flag short-circuits further attempts without invoking
    assert!(!handle.notify("pager", "disk-full", "triggered", "disk 99%"));

    // Fixed script, same module: reconfiguring reloads it and delivery resumes
    data.write_script(
        "pager_script_onalert.rhai",
        "fn onalert(message) {\n    print(\"paged: \" + message);\n}\n",
    );
    assert!(handle.reconfigure(&reconfig_payload("true", &script)));
    assert!(handle.notify("pager", "disk-full", "triggered", "disk 97%"));
    assert!(logs_contain("paged: disk 97%"));

    handle.shutdown();
}

#[test]
#[serial]
#[traced_test]
fn reconfigure_same_module_reloads_in_place_keeping_state() {
    let data = DataDir::new();
    let script = data.write_script(
        "meter_script_onreading.rhai",
        "let seen = 0;\n\nfn onreading(message) {\n    seen += 1;\n    print(\"v1 \" + seen);\n}\n",
    );

    let config = category("meter", "true", &script);
    let handle = ScriptDelivery::with_data_dir(&config, data.path());
    assert!(handle.init());
    let first_generation = handle.script_generation().unwrap();

    assert!(handle.notify("meter", "reading", "triggered", "12.5"));
    assert!(logs_contain("v1 1"));

    // Same module, new code: the counter survives the reload
    data.write_script(
        "meter_script_onreading.rhai",
        "fn onreading(message) {\n    seen += 1;\n    print(\"v2 \" + seen);\n}\n",
    );
    assert!(handle.reconfigure(&reconfig_payload("true", &script)));
    assert_eq!(handle.script_generation(), Some(first_generation + 1));

    assert!(handle.notify("meter", "reading", "triggered", "12.9"));
    assert!(logs_contain("v2 2"));

    handle.shutdown();
}

#[test]
#[serial]
fn reconfigure_to_a_different_module_starts_fresh() {
    let data = DataDir::new();
    let counting = "let seen = 0;\n\nfn onalert(message) {\n    seen += 1;\n    seen\n}\n";
    let first = data.write_script("alpha_script_onalert.rhai", counting);
    let second = data.write_script("beta_script_onalert.rhai", counting);

    let config = category("swap", "true", &first);
    let handle = ScriptDelivery::with_data_dir(&config, data.path());
    assert!(handle.init());
    let first_generation = handle.script_generation().unwrap();
    assert!(handle.notify("swap", "n", "triggered", "one"));

    assert!(handle.reconfigure(&reconfig_payload("true", &second)));
    assert_eq!(handle.script_name(), "beta_script_onalert.rhai");
    assert!(handle.script_generation().unwrap() > first_generation);
    assert!(handle.notify("swap", "n", "triggered", "two"));

    handle.shutdown();
}

#[test]
#[serial]
fn configure_twice_reuses_the_loaded_module() {
    let data = DataDir::new();
    let script = data.write_script("stable_script_onalert.rhai", "fn onalert(message) { }\n");

    let config = category("stable", "true", &script);
    let handle = ScriptDelivery::with_data_dir(&config, data.path());
    assert!(handle.init());
    let generation = handle.script_generation();
    assert!(generation.is_some());

    assert!(handle.configure());
    assert_eq!(handle.script_generation(), generation, "no second load expected");
    assert!(handle.notify("stable", "n", "triggered", "m"));

    handle.shutdown();
}

#[test]
#[serial]
fn runtime_is_shared_until_the_last_instance_shuts_down() {
    let data = DataDir::new();
    let script_a = data.write_script("a_script_onalert.rhai", "fn onalert(message) { }\n");
    let script_b = data.write_script("b_script_onalert.rhai", "fn onalert(message) { }\n");

    let first = ScriptDelivery::with_data_dir(&category("first", "true", &script_a), data.path());
    let second = ScriptDelivery::with_data_dir(&category("second", "true", &script_b), data.path());

    assert!(first.init());
    assert!(second.init());
    assert!(ScriptRuntime::is_running());

    first.shutdown();
    assert!(
        ScriptRuntime::is_running(),
        "second instance still owns the runtime"
    );
    assert!(second.notify("second", "n", "triggered", "still here"));

    second.shutdown();
    assert!(!ScriptRuntime::is_running());

    // Shutdown is idempotent and a stopped instance stays silent
    second.shutdown();
    assert!(!second.notify("second", "n", "triggered", "late"));
}

#[test]
#[serial]
#[traced_test]
fn config_hook_receives_the_configuration_blob() {
    let data = DataDir::new();
    let script = data.write_script(
        "hooked_script_onalert.rhai",
        r#"
fn set_delivery_config(config) {
    print("config: " + config);
}

fn onalert(message) { }
"#,
    );

    let payload = serde_json::json!({
        "enable": { "value": "true" },
        "config": { "value": { "channel": "ops" } },
        "script": { "value": "", "file": script.to_string_lossy() },
    });
    let config = ConfigCategory::from_json("hooked", &payload.to_string()).unwrap();
    let handle = ScriptDelivery::with_data_dir(&config, data.path());

    assert!(handle.init());
    assert!(logs_contain(r#"config: {"channel":"ops"}"#));

    handle.shutdown();
}

#[test]
#[serial]
#[traced_test]
fn failing_config_hook_does_not_block_delivery() {
    let data = DataDir::new();
    let script = data.write_script(
        "picky_script_onalert.rhai",
        r#"
fn set_delivery_config(config) {
    throw "bad config";
}

fn onalert(message) {
    print("delivered anyway");
}
"#,
    );

    let config = category("picky", "true", &script);
    let handle = ScriptDelivery::with_data_dir(&config, data.path());

    assert!(handle.init(), "the hook is optional, its failure is not fatal");
    assert!(logs_contain("hook failed, continuing"));

    assert!(handle.notify("picky", "n", "triggered", "m"));
    assert!(logs_contain("delivered anyway"));

    handle.shutdown();
}

#[test]
#[serial]
#[traced_test]
fn marker_less_script_name_disables_delivery() {
    let data = DataDir::new();
    let script = data.write_script("plain.rhai", "fn onalert(message) { }\n");

    let config = category("plain", "true", &script);
    let handle = ScriptDelivery::with_data_dir(&config, data.path());

    assert!(handle.init(), "a deliberate disable is not an init failure");
    assert!(!handle.is_enabled());
    assert!(logs_contain("notification delivery is disabled"));
    assert!(!handle.notify("plain", "n", "triggered", "m"));

    handle.shutdown();
}

#[test]
#[serial]
fn concurrent_notifications_and_reconfigures_do_not_deadlock() {
    let data = DataDir::new();
    let script = data.write_script(
        "busy_script_onalert.rhai",
        "let seen = 0;\n\nfn onalert(message) {\n    seen += 1;\n    seen\n}\n",
    );

    let config = category("busy", "true", &script);
    let handle = ScriptDelivery::with_data_dir(&config, data.path());
    assert!(handle.init());

    let payload = reconfig_payload("true", &script);
    std::thread::scope(|scope| {
        for _ in 0..3 {
            scope.spawn(|| {
                for _ in 0..20 {
                    handle.notify("busy", "n", "triggered", "ping");
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..5 {
                handle.reconfigure(&payload);
            }
        });
    });

    // Still consistent and deliverable afterwards
    assert!(handle.is_enabled());
    assert!(handle.notify("busy", "n", "triggered", "after"));

    handle.shutdown();
}
