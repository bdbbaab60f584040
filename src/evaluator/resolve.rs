//! Fixed-point reference resolution.
//!
//! After the initial evaluation pass, every definition carries the references
//! it could not bind. Each resolver pass walks definitions in declaration
//! order and their pending references in recorded order, so diagnostics come
//! out the same way across runs. A pass can fill splice slots (emitting
//! function calls, whose argument evaluation may record further references),
//! re-attempt invocations whose macro or generator has since been loaded, or
//! request compile-time builds through the [`CompileTimeBuildDriver`] seam.
//! The loop terminates when a pass neither resolves a reference nor loads a
//! compile-time artifact: both quantities are monotone and bounded.

use std::rc::Rc;

use crate::errors::{ErrorKind, TranspileError};
use crate::evaluator::eval::{evaluate_generate_recursive, output_function_call};
use crate::evaluator::{
    DefinitionState, EvaluatorEnvironment, ObjectKind, ObjectReference,
};

/// External seam for building and loading the compile-time code behind a
/// macro or generator definition. The real driver shells out to a toolchain;
/// tests substitute one that registers Rust functions directly.
pub trait CompileTimeBuildDriver {
    /// Build the artifact for `definition_name` and register its functions
    /// into the environment. `Ok(true)` means newly loaded; `Ok(false)` means
    /// nothing could be built (not an error by itself).
    fn build_compile_time_definition(
        &mut self,
        env: &mut EvaluatorEnvironment,
        definition_name: &str,
    ) -> Result<bool, TranspileError>;
}

/// Driver for environments with no compile-time toolchain. Never loads
/// anything, so unresolvable macro definitions surface as unresolved
/// references.
pub struct NullCompileTimeBuildDriver;

impl CompileTimeBuildDriver for NullCompileTimeBuildDriver {
    fn build_compile_time_definition(
        &mut self,
        _env: &mut EvaluatorEnvironment,
        _definition_name: &str,
    ) -> Result<bool, TranspileError> {
        Ok(false)
    }
}

enum ResolveAction {
    /// Target is a known function: emit the call into the splice slot.
    EmitCall,
    /// Target's macro/generator is now registered: re-evaluate the
    /// invocation with its original context.
    Reevaluate,
    /// Target is a compile-time definition whose artifact is not loaded.
    RequestBuild(String),
    /// Target is not something an invocation can call.
    NotCallable(ObjectKind),
    /// Target is mid-evaluation; calling it now would be a cycle.
    Cycle,
    /// Nothing known about the target yet.
    Stuck,
}

/// Run resolution to its fixed point. Returns true if no errors were
/// recorded (pre-existing or new); the writer must not run otherwise.
pub fn evaluate_resolve_references(
    env: &mut EvaluatorEnvironment,
    driver: &mut dyn CompileTimeBuildDriver,
) -> bool {
    let errors_before = env.errors.len();

    loop {
        recompute_required_definitions(env);

        let mut resolved_any = false;
        for definition_name in env.definition_order.clone() {
            let work = pending_references(env, &definition_name);
            for (reference_index, reference) in work {
                match decide(env, &reference) {
                    ResolveAction::EmitCall => {
                        output_function_call(env, &reference);
                        mark_resolved(env, &definition_name, reference_index);
                        resolved_any = true;
                    }
                    ResolveAction::Reevaluate => {
                        let splice = Rc::clone(&reference.splice);
                        evaluate_generate_recursive(
                            env,
                            &reference.context,
                            &reference.tokens,
                            reference.start_index,
                            &mut splice.borrow_mut(),
                        );
                        mark_resolved(env, &definition_name, reference_index);
                        resolved_any = true;
                    }
                    ResolveAction::RequestBuild(target) => {
                        if !env.compile_time_build_requests.contains(&target) {
                            env.compile_time_build_requests.push(target);
                        }
                    }
                    ResolveAction::NotCallable(kind) => {
                        let blame = reference.tokens[reference.start_index + 1].clone();
                        env.record_error(
                            ErrorKind::TypeMismatch {
                                expected: "a callable function".to_string(),
                                actual: format!(
                                    "{} '{}'",
                                    describe_object_kind(kind),
                                    reference.name
                                ),
                            },
                            &blame,
                        );
                        mark_resolved(env, &definition_name, reference_index);
                        resolved_any = true;
                    }
                    ResolveAction::Cycle => {
                        let blame = reference.tokens[reference.start_index + 1].clone();
                        env.record_error(
                            ErrorKind::EvaluationCycle {
                                name: reference.name.clone(),
                            },
                            &blame,
                        );
                        mark_resolved(env, &definition_name, reference_index);
                        resolved_any = true;
                    }
                    ResolveAction::Stuck => {}
                }
            }
        }

        let loaded_any = run_compile_time_builds(env, driver);
        if !resolved_any && !loaded_any {
            break;
        }
    }

    report_unresolved_references(env);
    finalize_definition_states(env);
    env.errors.len() == errors_before && errors_before == 0
}

/// Clone out the unresolved references of one definition so the pass can
/// mutate the environment while working through them. References added
/// during the pass are picked up next pass.
fn pending_references(
    env: &EvaluatorEnvironment,
    definition_name: &str,
) -> Vec<(usize, ObjectReference)> {
    let Some(definition) = env.definitions.get(definition_name) else {
        return Vec::new();
    };
    if !definition.is_required {
        return Vec::new();
    }
    definition
        .references
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.is_resolved)
        .map(|(index, r)| (index, r.clone()))
        .collect()
}

fn decide(env: &EvaluatorEnvironment, reference: &ObjectReference) -> ResolveAction {
    if let Some(target) = env.definitions.get(&reference.name) {
        if target.state == DefinitionState::Evaluating {
            return ResolveAction::Cycle;
        }
        return match target.kind {
            ObjectKind::Function => ResolveAction::EmitCall,
            ObjectKind::Variable => ResolveAction::NotCallable(ObjectKind::Variable),
            ObjectKind::Macro | ObjectKind::Generator => {
                let loaded = env.macros.contains_key(&reference.name)
                    || env.generators.contains_key(&reference.name);
                if loaded {
                    ResolveAction::Reevaluate
                } else if !target.compile_time_loaded {
                    ResolveAction::RequestBuild(reference.name.clone())
                } else {
                    ResolveAction::Stuck
                }
            }
        };
    }

    // A macro or generator registered directly (configuration, or a build
    // that loaded between passes) without an in-source definition.
    if env.macros.contains_key(&reference.name) || env.generators.contains_key(&reference.name) {
        return ResolveAction::Reevaluate;
    }

    ResolveAction::Stuck
}

fn mark_resolved(env: &mut EvaluatorEnvironment, definition_name: &str, reference_index: usize) {
    if let Some(definition) = env.definitions.get_mut(definition_name) {
        if let Some(reference) = definition.references.get_mut(reference_index) {
            reference.is_resolved = true;
        }
    }
}

/// Drain build requests through the driver. Returns whether anything newly
/// loaded.
fn run_compile_time_builds(
    env: &mut EvaluatorEnvironment,
    driver: &mut dyn CompileTimeBuildDriver,
) -> bool {
    let requests = std::mem::take(&mut env.compile_time_build_requests);
    let mut loaded_any = false;
    for name in requests {
        match driver.build_compile_time_definition(env, &name) {
            Ok(true) => {
                if let Some(definition) = env.definitions.get_mut(&name) {
                    definition.compile_time_loaded = true;
                }
                loaded_any = true;
            }
            Ok(false) => {}
            Err(error) => env.errors.push(error),
        }
    }
    loaded_any
}

/// Reachability depends on references, which resolution grows, so the
/// required flags are recomputed from the creation-time roots on every pass
/// rather than cached.
fn recompute_required_definitions(env: &mut EvaluatorEnvironment) {
    let mut queue: Vec<String> = Vec::new();
    for name in &env.definition_order {
        let definition = env
            .definitions
            .get_mut(name)
            .expect("definition_order entry must exist");
        definition.is_required = definition.required_at_creation;
        if definition.is_required {
            queue.push(name.clone());
        }
    }

    while let Some(name) = queue.pop() {
        let Some(definition) = env.definitions.get(&name) else {
            continue;
        };
        let referenced: Vec<String> = definition
            .references
            .iter()
            .map(|r| r.name.clone())
            .collect();
        for target in referenced {
            if let Some(target_definition) = env.definitions.get_mut(&target) {
                if !target_definition.is_required {
                    target_definition.is_required = true;
                    queue.push(target);
                }
            }
        }
    }
}

/// Each leftover reference of a required definition is reported exactly once,
/// in declaration then recorded order. Unrequired definitions are dropped
/// silently, unresolved references and all.
fn report_unresolved_references(env: &mut EvaluatorEnvironment) {
    for definition_name in env.definition_order.clone() {
        let Some(definition) = env.definitions.get(&definition_name) else {
            continue;
        };
        if !definition.is_required {
            continue;
        }
        let leftovers: Vec<(String, crate::syntax::Token)> = definition
            .references
            .iter()
            .filter(|r| !r.is_resolved)
            .map(|r| {
                (
                    r.name.clone(),
                    r.tokens[r.start_index + 1].clone(),
                )
            })
            .collect();
        for (name, blame) in leftovers {
            env.record_error(ErrorKind::UnresolvedReference { name }, &blame);
        }
    }
}

fn finalize_definition_states(env: &mut EvaluatorEnvironment) {
    for name in env.definition_order.clone() {
        let Some(definition) = env.definitions.get_mut(&name) else {
            continue;
        };
        if matches!(
            definition.state,
            DefinitionState::Errored | DefinitionState::Emitted
        ) {
            continue;
        }
        definition.state = if definition.references.iter().all(|r| r.is_resolved) {
            DefinitionState::Resolved
        } else if definition.is_required {
            DefinitionState::Errored
        } else {
            DefinitionState::HasUnresolved
        };
    }
}

const fn describe_object_kind(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Function => "function",
        ObjectKind::Macro => "macro",
        ObjectKind::Generator => "generator",
        ObjectKind::Variable => "variable",
    }
}
