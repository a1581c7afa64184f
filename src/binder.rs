//! Loading, reloading and releasing delivery script modules.
//!
//! A script module is the compiled form of one `.rhai` file together with
//! the scope its top level was evaluated into. Module-level `let` bindings
//! live in that scope and stay visible to the entry-point function across
//! invocations, so scripts can keep state between notifications.
//!
//! The binder is a small state machine:
//!
//! - `Unbound`: nothing loaded, either never configured or deliberately
//!   cleared (a script name without an entry marker disables delivery).
//! - `Bound`: module loaded, top level evaluated, entry point resolved.
//! - `Failed`: the last bind attempt failed; the offending reference is kept
//!   for diagnostics.
//!
//! `import` loads a module fresh (or reuses the already-loaded one when the
//! reference has not changed), `reload` re-evaluates the same module's new
//! source into the existing scope so state survives, and `reimport` drops
//! everything before loading, used when the configured script changes to a
//! different module. Every failure parks the engine error on the
//! interpreter for [`crate::report::ErrorReport`] to drain.
//!
//! All operations that touch the engine take `&mut Interpreter` and must be
//! called under the runtime lock.

use rhai::{CallFnOptions, Dynamic, EvalAltResult, Position, Scope, AST};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{DeliveryError, DeliveryResult};
use crate::runtime::{Interpreter, PendingError};
use crate::script::{ScriptRef, SCRIPT_EXTENSION};

/// Observable binding phase, without the bound data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPhase {
    /// No module is bound.
    Unbound,
    /// A module is loaded and its entry point resolved.
    Bound,
    /// The last bind attempt failed.
    Failed,
}

/// A loaded script module: compiled source plus its evaluated scope.
struct BoundModule {
    reference: ScriptRef,
    path: PathBuf,
    source: String,
    ast: AST,
    scope: Scope<'static>,
    generation: u64,
}

enum BindState {
    Unbound,
    Bound(BoundModule),
    Failed(ScriptRef),
}

/// Owns the binding of one delivery instance to its script module.
pub struct ModuleBinder {
    state: BindState,
}

impl ModuleBinder {
    /// A binder with nothing bound.
    pub fn new() -> Self {
        Self {
            state: BindState::Unbound,
        }
    }

    /// Current phase of the binding state machine.
    pub fn phase(&self) -> BindPhase {
        match self.state {
            BindState::Unbound => BindPhase::Unbound,
            BindState::Bound(_) => BindPhase::Bound,
            BindState::Failed(_) => BindPhase::Failed,
        }
    }

    /// True when a module is bound and invocable.
    pub fn is_bound(&self) -> bool {
        matches!(self.state, BindState::Bound(_))
    }

    /// True when the bound module is the one `reference` resolves to.
    pub fn is_bound_to(&self, reference: &ScriptRef) -> bool {
        match &self.state {
            BindState::Bound(module) => module.reference.same_module(reference),
            _ => false,
        }
    }

    /// Reference of the failed bind attempt, if the binder is `Failed`.
    pub fn failed_reference(&self) -> Option<&ScriptRef> {
        match &self.state {
            BindState::Failed(reference) => Some(reference),
            _ => None,
        }
    }

    /// Load generation of the bound module, if any.
    ///
    /// The generation is issued by the runtime on every load or reload, so
    /// an unchanged value means the module was reused, not re-imported.
    pub fn generation(&self) -> Option<u64> {
        match &self.state {
            BindState::Bound(module) => Some(module.generation),
            _ => None,
        }
    }

    /// True when the bound module defines the named function.
    pub fn has_function(&self, name: &str) -> bool {
        match &self.state {
            BindState::Bound(module) => ast_defines(&module.ast, name),
            _ => false,
        }
    }

    /// Bind `reference`, loading its module if necessary.
    ///
    /// When the same module is already bound only the entry point is
    /// re-resolved; the loaded module and its state are kept. Anything else
    /// releases the old binding and loads fresh.
    pub fn import(
        &mut self,
        interpreter: &mut Interpreter,
        reference: &ScriptRef,
    ) -> DeliveryResult<()> {
        if let BindState::Bound(module) = &mut self.state {
            if module.reference.same_module(reference) {
                if ast_defines(&module.ast, reference.entry()) {
                    module.reference = reference.clone();
                    debug!(
                        module = reference.module(),
                        entry = reference.entry(),
                        "reusing loaded script module"
                    );
                    return Ok(());
                }

                let entry = reference.entry().to_string();
                interpreter.raise(PendingError {
                    error: Box::new(EvalAltResult::ErrorFunctionNotFound(
                        entry.clone(),
                        Position::NONE,
                    )),
                    source_file: Some(module.path.clone()),
                    source: Some(module.source.clone()),
                });
                self.state = BindState::Failed(reference.clone());
                return Err(DeliveryError::EntryPoint {
                    module: reference.module().to_string(),
                    entry,
                });
            }
        }

        self.release();
        match Self::load(interpreter, reference, Scope::new()) {
            Ok(module) => {
                self.state = BindState::Bound(module);
                Ok(())
            }
            Err(err) => {
                self.state = BindState::Failed(reference.clone());
                Err(err)
            }
        }
    }

    /// Re-evaluate the bound module's current source into its existing
    /// scope, picking up code changes while keeping module state.
    ///
    /// Falls back to [`ModuleBinder::reimport`] when `reference` names a
    /// different module, and to a plain import when nothing is bound.
    pub fn reload(
        &mut self,
        interpreter: &mut Interpreter,
        reference: &ScriptRef,
    ) -> DeliveryResult<()> {
        match std::mem::replace(&mut self.state, BindState::Unbound) {
            BindState::Bound(module) if module.reference.same_module(reference) => {
                match Self::load(interpreter, reference, module.scope) {
                    Ok(reloaded) => {
                        debug!(module = reference.module(), "script module reloaded");
                        self.state = BindState::Bound(reloaded);
                        Ok(())
                    }
                    Err(err) => {
                        self.state = BindState::Failed(reference.clone());
                        Err(err)
                    }
                }
            }
            BindState::Bound(module) => {
                self.state = BindState::Bound(module);
                self.reimport(interpreter, reference)
            }
            _ => self.import(interpreter, reference),
        }
    }

    /// Release the current binding, then load `reference` from scratch.
    pub fn reimport(
        &mut self,
        interpreter: &mut Interpreter,
        reference: &ScriptRef,
    ) -> DeliveryResult<()> {
        self.release();
        self.import(interpreter, reference)
    }

    /// Deliberately drop any binding without treating it as a failure, e.g.
    /// when the configured script name encodes no entry point.
    pub fn clear(&mut self) {
        self.state = BindState::Unbound;
    }

    /// Drop the bound module and everything it owns.
    pub fn release(&mut self) {
        if let BindState::Bound(module) = &self.state {
            debug!(module = module.reference.module(), "releasing script module");
        }
        self.state = BindState::Unbound;
    }

    /// Invoke the bound entry point with the notification message.
    pub fn invoke(
        &mut self,
        interpreter: &mut Interpreter,
        message: &str,
    ) -> DeliveryResult<Dynamic> {
        let entry = match &self.state {
            BindState::Bound(module) => module.reference.entry().to_string(),
            _ => return Err(DeliveryError::NotBound),
        };
        self.call_function(interpreter, &entry, message)
    }

    /// Call a named function of the bound module with one string argument.
    ///
    /// Used for the entry point itself and for optional per-module hooks.
    /// On failure the engine error is parked on the interpreter.
    pub fn call_function(
        &mut self,
        interpreter: &mut Interpreter,
        function: &str,
        argument: &str,
    ) -> DeliveryResult<Dynamic> {
        let BindState::Bound(module) = &mut self.state else {
            return Err(DeliveryError::NotBound);
        };

        // The module top level already ran at load time; call into the
        // retained scope so module state stays visible to the function.
        let options = CallFnOptions::new().eval_ast(false);
        let result = interpreter.engine().call_fn_with_options::<Dynamic>(
            options,
            &mut module.scope,
            &module.ast,
            function,
            (argument.to_string(),),
        );

        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                let detail = error.to_string();
                interpreter.raise(PendingError {
                    error,
                    source_file: Some(module.path.clone()),
                    source: Some(module.source.clone()),
                });
                Err(DeliveryError::Invocation {
                    entry: function.to_string(),
                    detail,
                })
            }
        }
    }

    fn load(
        interpreter: &mut Interpreter,
        reference: &ScriptRef,
        mut scope: Scope<'static>,
    ) -> DeliveryResult<BoundModule> {
        let module_name = reference.module();

        let Some(path) = interpreter.resolve_module(module_name) else {
            let not_found = std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{module_name}.{SCRIPT_EXTENSION}"),
            );
            interpreter.raise(PendingError {
                error: Box::new(EvalAltResult::ErrorSystem(
                    format!("Module '{module_name}' not found in script path"),
                    Box::new(not_found),
                )),
                source_file: None,
                source: None,
            });
            return Err(DeliveryError::Import {
                module: module_name.to_string(),
                detail: "module file not found in script path".into(),
            });
        };

        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(io_err) => {
                let detail = io_err.to_string();
                interpreter.raise(PendingError {
                    error: Box::new(EvalAltResult::ErrorSystem(
                        format!("Cannot read module '{module_name}'"),
                        Box::new(io_err),
                    )),
                    source_file: Some(path.clone()),
                    source: None,
                });
                return Err(DeliveryError::Import {
                    module: module_name.to_string(),
                    detail,
                });
            }
        };

        let ast = match interpreter.engine().compile(&source) {
            Ok(ast) => ast,
            Err(parse_error) => {
                let error = Box::<EvalAltResult>::from(parse_error);
                let detail = error.to_string();
                interpreter.raise(PendingError {
                    error,
                    source_file: Some(path.clone()),
                    source: Some(source),
                });
                return Err(DeliveryError::Import {
                    module: module_name.to_string(),
                    detail,
                });
            }
        };

        // Run the module top level; definitions and state land in the scope
        if let Err(error) = interpreter
            .engine()
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
        {
            let detail = error.to_string();
            interpreter.raise(PendingError {
                error,
                source_file: Some(path.clone()),
                source: Some(source),
            });
            return Err(DeliveryError::Import {
                module: module_name.to_string(),
                detail,
            });
        }

        if !ast_defines(&ast, reference.entry()) {
            let entry = reference.entry().to_string();
            interpreter.raise(PendingError {
                error: Box::new(EvalAltResult::ErrorFunctionNotFound(
                    entry.clone(),
                    Position::NONE,
                )),
                source_file: Some(path.clone()),
                source: Some(source),
            });
            return Err(DeliveryError::EntryPoint {
                module: module_name.to_string(),
                entry,
            });
        }

        let generation = interpreter.next_load_id();
        debug!(
            module = module_name,
            entry = reference.entry(),
            generation,
            path = %path.display(),
            "script module loaded"
        );

        Ok(BoundModule {
            reference: reference.clone(),
            path,
            source,
            ast,
            scope,
            generation,
        })
    }
}

impl Default for ModuleBinder {
    fn default() -> Self {
        Self::new()
    }
}

fn ast_defines(ast: &AST, name: &str) -> bool {
    !name.is_empty() && ast.iter_functions().any(|function| function.name == name)
}
