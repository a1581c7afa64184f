//! Process-wide script runtime shared by every delivery instance.
//!
//! The embedded engine is a per-process singleton, mirroring how a single
//! interpreter serves any number of plugin instances inside the host. The
//! first caller of [`ScriptRuntime::acquire`] starts the runtime and names
//! it; later callers join the running instance. Each caller holds an `Arc`,
//! and dropping the last one stops the runtime, so the instance that happens
//! to shut down first can never tear the engine down under its peers. A
//! subsequent `acquire` starts a fresh runtime.
//!
//! # Locking
//!
//! All engine work goes through [`ScriptRuntime::with_lock`], which grants
//! scoped, exclusive access to the [`Interpreter`] core. Callers that also
//! hold per-instance state under their own mutex must take that mutex first;
//! the interpreter lock is always the inner one.
//!
//! # Error state
//!
//! Failures from compiling or running scripts are parked on the interpreter
//! as a [`PendingError`] until drained into a structured report (see
//! [`crate::report`]). The slot holds one error; a new failure replaces an
//! undrained predecessor.

use once_cell::sync::Lazy;
use rhai::{Engine, EvalAltResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

use crate::script::SCRIPT_EXTENSION;

/// Operation budget per script evaluation.
///
/// Bounds runaway scripts in place of a wall-clock timeout: the engine
/// aborts evaluation once the budget is exhausted.
pub const MAX_SCRIPT_OPERATIONS: u64 = 1_000_000;

/// Registry slot for the shared runtime. Holding only a `Weak` here keeps
/// ownership with the delivery instances, so last-owner drop is teardown.
static RUNTIME: Lazy<Mutex<Weak<ScriptRuntime>>> = Lazy::new(|| Mutex::new(Weak::new()));

/// An engine failure parked until it is drained into a report.
#[derive(Debug)]
pub struct PendingError {
    /// The engine error as raised.
    pub error: Box<EvalAltResult>,
    /// Script file the error originated from, when known.
    pub source_file: Option<PathBuf>,
    /// Full source text of that file, for extracting the offending line.
    pub source: Option<String>,
}

/// The engine core guarded by the runtime lock.
///
/// Owns the engine itself, the script search path and the pending-error
/// slot. Constructed once per runtime generation; unit tests may build a
/// standalone interpreter directly via [`Interpreter::new`].
pub struct Interpreter {
    engine: Engine,
    search_paths: Vec<PathBuf>,
    pending: Option<PendingError>,
    program_name: String,
    loads: u64,
}

impl Interpreter {
    /// Build an interpreter core with the standard engine settings.
    pub fn new(program_name: &str) -> Self {
        let mut engine = Engine::new();

        // Safety: limit operations to prevent infinite loops
        engine.on_progress(|operations| {
            if operations > MAX_SCRIPT_OPERATIONS {
                Some(
                    format!("Safety limit exceeded: maximum {MAX_SCRIPT_OPERATIONS} operations")
                        .into(),
                )
            } else {
                None
            }
        });

        // Forward script print()/debug() output into the host log
        engine.on_print(|text| info!("script output: {text}"));
        engine.on_debug(|text, source, pos| {
            debug!(source = source.unwrap_or(""), position = %pos, "script debug: {text}");
        });

        Self {
            engine,
            search_paths: Vec::new(),
            pending: None,
            program_name: program_name.to_string(),
            loads: 0,
        }
    }

    /// The configured engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Name given to the runtime by its first owner.
    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    /// Insert a directory at the highest priority of the script search path.
    ///
    /// An already-present identical entry is moved to the front rather than
    /// duplicated.
    pub fn prepend_search_path(&mut self, dir: &Path) {
        self.search_paths.retain(|existing| existing != dir);
        self.search_paths.insert(0, dir.to_path_buf());
        debug!(path = %dir.display(), "script search path updated");
    }

    /// Directories searched for script modules, highest priority first.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Locate the file for a module name on the search path.
    pub fn resolve_module(&self, module: &str) -> Option<PathBuf> {
        let file_name = format!("{module}.{SCRIPT_EXTENSION}");
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }

    /// Park an engine failure for later extraction.
    ///
    /// A later failure replaces an undrained earlier one.
    pub fn raise(&mut self, pending: PendingError) {
        debug!(error = %pending.error, "script error recorded");
        self.pending = Some(pending);
    }

    /// Take the pending error, clearing the slot.
    pub fn take_pending(&mut self) -> Option<PendingError> {
        self.pending.take()
    }

    /// True when an error is waiting to be drained.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Total number of module load operations this runtime has performed.
    pub fn load_count(&self) -> u64 {
        self.loads
    }

    pub(crate) fn next_load_id(&mut self) -> u64 {
        self.loads += 1;
        self.loads
    }
}

/// Handle to the shared script runtime.
///
/// Obtained through [`ScriptRuntime::acquire`]; every delivery instance
/// holds one for its whole lifetime. The runtime stops when the last handle
/// is dropped.
pub struct ScriptRuntime {
    core: Mutex<Interpreter>,
}

impl ScriptRuntime {
    /// Join the running runtime, or start it if this is the first caller.
    ///
    /// Only the first caller's `program_name` sticks; later callers join
    /// whatever is already running.
    pub fn acquire(program_name: &str) -> Arc<Self> {
        let mut slot = RUNTIME.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = slot.upgrade() {
            debug!(program = program_name, "joining the running script runtime");
            return existing;
        }

        info!(program = program_name, "starting script runtime");
        let runtime = Arc::new(Self {
            core: Mutex::new(Interpreter::new(program_name)),
        });
        *slot = Arc::downgrade(&runtime);
        runtime
    }

    /// True while at least one acquired handle is alive.
    pub fn is_running() -> bool {
        RUNTIME
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .upgrade()
            .is_some()
    }

    /// Run `f` with exclusive access to the interpreter core.
    ///
    /// The lock is released when `f` returns, on every exit path. Callers
    /// holding their own instance mutex must already hold it here.
    pub fn with_lock<T>(&self, f: impl FnOnce(&mut Interpreter) -> T) -> T {
        let mut core = self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut core)
    }
}

impl Drop for ScriptRuntime {
    fn drop(&mut self) {
        let program = self
            .core
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .program_name
            .clone();
        info!(program = %program, "script runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn resolves_modules_on_the_search_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cat_script_go.rhai"), "fn go(m) {}").unwrap();

        let mut interpreter = Interpreter::new("test");
        assert_eq!(interpreter.resolve_module("cat_script_go"), None);

        interpreter.prepend_search_path(dir.path());
        assert_eq!(
            interpreter.resolve_module("cat_script_go"),
            Some(dir.path().join("cat_script_go.rhai"))
        );
        assert_eq!(interpreter.resolve_module("unknown"), None);
    }

    #[test]
    fn prepend_moves_existing_entry_to_front() {
        let mut interpreter = Interpreter::new("test");
        interpreter.prepend_search_path(Path::new("/a"));
        interpreter.prepend_search_path(Path::new("/b"));
        interpreter.prepend_search_path(Path::new("/a"));

        assert_eq!(
            interpreter.search_paths(),
            &[PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }

    #[test]
    fn pending_error_is_drained_once() {
        let mut interpreter = Interpreter::new("test");
        assert!(!interpreter.has_pending());

        let error = interpreter
            .engine()
            .eval::<i64>(r#"throw "boom";"#)
            .unwrap_err();
        interpreter.raise(PendingError {
            error,
            source_file: None,
            source: None,
        });

        assert!(interpreter.has_pending());
        assert!(interpreter.take_pending().is_some());
        assert!(interpreter.take_pending().is_none());
    }

    #[test]
    fn engine_aborts_runaway_scripts() {
        let interpreter = Interpreter::new("test");
        let result = interpreter.engine().eval::<i64>("let x = 0; loop { x += 1; }");
        let message = result.unwrap_err().to_string();
        assert!(
            message.contains("Script terminated") || message.contains("Safety limit exceeded"),
            "unexpected error: {message}"
        );
    }

    #[test]
    #[serial]
    fn runtime_is_shared_and_stops_with_last_owner() {
        let first = ScriptRuntime::acquire("first");
        let second = ScriptRuntime::acquire("second");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(ScriptRuntime::is_running());

        // First caller's name sticks
        second.with_lock(|interpreter| {
            assert_eq!(interpreter.program_name(), "first");
        });

        drop(second);
        assert!(ScriptRuntime::is_running());
        drop(first);
        assert!(!ScriptRuntime::is_running());

        // A fresh acquire starts a new generation
        let third = ScriptRuntime::acquire("third");
        third.with_lock(|interpreter| {
            assert_eq!(interpreter.program_name(), "third");
        });
        drop(third);
        assert!(!ScriptRuntime::is_running());
    }
}
