//! The evaluator: environment, context, definitions, dispatch, and
//! fixed-point reference resolution.
//!
//! Evaluation turns a validated token sequence into ordered output fragments.
//! Invocations dispatch to macros (which rewrite tokens) or generators (which
//! emit fragments); anything else becomes an [`ObjectReference`] with a
//! pre-reserved splice slot, filled in later by the resolver once the target
//! definition exists. All mutable state lives in one
//! [`EvaluatorEnvironment`]; the evaluator is single-threaded and
//! synchronous, so for a given input the sequence of generator invocations,
//! and therefore every fragment stream, is fully determined.

pub mod eval;
pub mod resolve;

use std::collections::HashMap;
use std::rc::Rc;

use crate::errors::{ErrorKind, SourceContext, TranspileError};
use crate::output::{GeneratorOutput, OutputHandle};
use crate::syntax::{Token, TokenSeq};

pub use eval::{evaluate_generate_all_recursive, evaluate_generate_recursive};
pub use resolve::{
    evaluate_resolve_references, CompileTimeBuildDriver, NullCompileTimeBuildDriver,
};

/// Name of the pseudo-definition that module top-level references attach to.
pub const MODULE_DEFINITION_NAME: &str = "<module>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorScope {
    /// Top level of a file. Declarations only.
    Module,
    /// Inside a function body. Statements.
    Body,
    /// Argument or operand position.
    ExpressionOrStatement,
}

impl EvaluatorScope {
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Body => "body",
            Self::ExpressionOrStatement => "expression or statement",
        }
    }
}

/// The dynamic record threaded through every evaluation: where we are, which
/// definition owns the fragments being produced, and whether that code must
/// make it into the final output.
#[derive(Debug, Clone)]
pub struct EvaluatorContext {
    pub scope: EvaluatorScope,
    /// Name token of the definition being built; fragments and references
    /// produced under this context belong to it.
    pub definition_name: Rc<Token>,
    /// True for code reachable from the module root, which must compile.
    pub is_required: bool,
}

impl EvaluatorContext {
    pub fn with_scope(&self, scope: EvaluatorScope) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Function,
    Macro,
    Generator,
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionState {
    /// Name known, body not yet evaluated.
    Declared,
    /// Generator in progress. Re-entry here is a cycle error.
    Evaluating,
    /// Fragments emitted, references pending.
    HasUnresolved,
    /// Every splice slot filled.
    Resolved,
    /// Written by the writer.
    Emitted,
    Errored,
}

/// A top-level object: function, variable, or compile-time macro/generator
/// definition. Created by the first invocation that defines it; mutated only
/// by its owning generator and the resolver.
#[derive(Debug)]
pub struct ObjectDefinition {
    pub name: Rc<Token>,
    pub kind: ObjectKind,
    /// Required at the point of definition (module-level code always is).
    pub required_at_creation: bool,
    /// Recomputed every resolver pass by propagation from required roots.
    pub is_required: bool,
    pub state: DefinitionState,
    pub output: OutputHandle,
    /// Use-sites discovered while generating this definition.
    pub references: Vec<ObjectReference>,
    /// For Macro/Generator kinds: whether the compile-time artifact has been
    /// built and its functions registered.
    pub compile_time_loaded: bool,
}

/// A symbol use-site that could not be bound when it was emitted. The splice
/// slot is reserved in the owning stream at record time so fragment order is
/// preserved no matter when the reference resolves.
#[derive(Debug, Clone)]
pub struct ObjectReference {
    pub name: String,
    pub tokens: TokenSeq,
    /// Index of the invocation's open paren.
    pub start_index: usize,
    pub context: EvaluatorContext,
    pub splice: OutputHandle,
    pub is_resolved: bool,
}

/// A macro rewrites the invocation into fresh tokens, appended to `output`.
/// Produced tokens are interned in the environment, so blame coordinates must
/// be copied from real tokens (see [`Token::derive`]). Returns success;
/// failures are recorded in the environment.
pub type MacroFn = fn(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_index: usize,
    output: &mut Vec<Token>,
) -> bool;

/// A generator emits fragments directly, owns recursion into sub-expressions
/// with appropriate sub-contexts, and emits all structural delimiters.
pub type GeneratorFn = fn(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_index: usize,
    output: &mut GeneratorOutput,
) -> bool;

/// Owns every piece of mutable evaluation state: definitions, registries,
/// the unique-symbol counter, the pool of macro-produced token sequences,
/// and the diagnostics accumulated so far. Dropping the environment is the
/// single point at which interned token sequences go away; holders of a
/// [`TokenSeq`] handle keep their sequence alive until then.
pub struct EvaluatorEnvironment {
    pub definitions: HashMap<String, ObjectDefinition>,
    /// Declaration order, for deterministic resolution and reporting.
    pub definition_order: Vec<String>,
    pub macros: HashMap<String, MacroFn>,
    pub generators: HashMap<String, GeneratorFn>,
    /// Token sequences produced by macro expansion. Append-only.
    pub macro_expansions: Vec<TokenSeq>,
    /// File content by filename, for building labeled diagnostics.
    pub sources: HashMap<String, SourceContext>,
    /// Diagnostics in evaluation order. The writer must not run when
    /// non-empty.
    pub errors: Vec<TranspileError>,
    /// Compile-time build requests collected during a resolver pass.
    pub compile_time_build_requests: Vec<String>,
    next_free_unique_symbol_num: u32,
    pub(crate) macro_expansion_depth: usize,
    pub(crate) outermost_macro_invocation: Option<Token>,
}

impl Default for EvaluatorEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluatorEnvironment {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
            definition_order: Vec::new(),
            macros: HashMap::new(),
            generators: HashMap::new(),
            macro_expansions: Vec::new(),
            sources: HashMap::new(),
            errors: Vec::new(),
            compile_time_build_requests: Vec::new(),
            next_free_unique_symbol_num: 1,
            macro_expansion_depth: 0,
            outermost_macro_invocation: None,
        }
    }

    pub fn register_macro(&mut self, name: impl Into<String>, function: MacroFn) {
        self.macros.insert(name.into(), function);
    }

    pub fn register_generator(&mut self, name: impl Into<String>, function: GeneratorFn) {
        self.generators.insert(name.into(), function);
    }

    pub fn register_source(&mut self, source: SourceContext) {
        self.sources.insert(source.name.clone(), source);
    }

    /// Source context for the file `token` came from, with a fallback so
    /// diagnostics never fail to build.
    pub fn source_for(&self, token: &Token) -> SourceContext {
        self.sources
            .get(token.source.as_ref())
            .cloned()
            .unwrap_or_else(|| SourceContext::fallback(token.source.as_ref()))
    }

    /// Add a definition, erroring (with a note at the prior definition) on
    /// duplicates. Returns whether the definition was added.
    pub fn add_object_definition(&mut self, definition: ObjectDefinition) -> bool {
        let name = definition.name.contents.clone();
        if let Some(existing) = self.definitions.get(&name) {
            let error = TranspileError::at_token(
                ErrorKind::DuplicateDefinition { name },
                &definition.name,
                &self.source_for(&definition.name),
            )
            .with_note_at("previously defined here", &existing.name);
            self.errors.push(error);
            return false;
        }
        self.definition_order.push(name.clone());
        self.definitions.insert(name, definition);
        true
    }

    pub fn find_definition(&self, name: &str) -> Option<&ObjectDefinition> {
        self.definitions.get(name)
    }

    pub fn find_definition_mut(&mut self, name: &str) -> Option<&mut ObjectDefinition> {
        self.definitions.get_mut(name)
    }

    /// Record a diagnostic blamed at `token`.
    pub fn record_error(&mut self, kind: ErrorKind, token: &Token) {
        let error = TranspileError::at_token(kind, token, &self.source_for(token));
        self.errors.push(error);
    }

    /// Mark re-entry into a definition's evaluation, detecting cycles.
    /// Returns false (and records the error) if the definition is already
    /// mid-evaluation.
    pub fn begin_definition_evaluation(&mut self, name: &str, blame: &Token) -> bool {
        let state = self.definitions.get(name).map(|d| d.state);
        if state == Some(DefinitionState::Evaluating) {
            self.record_error(
                ErrorKind::EvaluationCycle {
                    name: name.to_string(),
                },
                blame,
            );
            return false;
        }
        if let Some(definition) = self.definitions.get_mut(name) {
            definition.state = DefinitionState::Evaluating;
        }
        true
    }

    /// Settle a definition's state after its generator finishes.
    pub fn end_definition_evaluation(&mut self, name: &str, succeeded: bool) {
        if let Some(definition) = self.definitions.get_mut(name) {
            definition.state = if !succeeded {
                DefinitionState::Errored
            } else if definition.references.iter().any(|r| !r.is_resolved) {
                DefinitionState::HasUnresolved
            } else {
                DefinitionState::Resolved
            };
        }
    }

    /// Intern a macro-produced token sequence. The returned handle stays
    /// valid for the life of the environment.
    pub fn intern_expansion(&mut self, tokens: Vec<Token>) -> TokenSeq {
        let sequence: TokenSeq = Rc::new(tokens);
        self.macro_expansions.push(Rc::clone(&sequence));
        sequence
    }

    /// Claim the next unique-symbol number. Monotone; never reused.
    pub fn next_unique_symbol_num(&mut self) -> u32 {
        let num = self.next_free_unique_symbol_num;
        self.next_free_unique_symbol_num += 1;
        num
    }

    /// Create the pseudo-definition module-level references attach to.
    /// Idempotent across modules sharing the environment.
    pub fn ensure_module_definition(&mut self, name_token: Rc<Token>) {
        if self.definitions.contains_key(MODULE_DEFINITION_NAME) {
            return;
        }
        self.add_object_definition(ObjectDefinition {
            name: name_token,
            kind: ObjectKind::Function,
            required_at_creation: true,
            is_required: true,
            state: DefinitionState::Declared,
            output: GeneratorOutput::new_handle(),
            references: Vec::new(),
            compile_time_loaded: true,
        });
    }
}

/// Build the module pseudo-invocation token for `filename`.
pub fn make_module_pseudo_token(filename: &str) -> Rc<Token> {
    Rc::new(Token {
        kind: crate::syntax::TokenKind::Symbol,
        contents: MODULE_DEFINITION_NAME.to_string(),
        source: Rc::from(filename),
        line: 1,
        column_start: 0,
        column_end: 1,
        offset: 0,
        length: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_definition(name: &str) -> ObjectDefinition {
        let token = make_module_pseudo_token("test.cdl");
        let name_token = Rc::new(token.derive(crate::syntax::TokenKind::Symbol, name));
        ObjectDefinition {
            name: name_token,
            kind: ObjectKind::Function,
            required_at_creation: true,
            is_required: true,
            state: DefinitionState::Declared,
            output: GeneratorOutput::new_handle(),
            references: Vec::new(),
            compile_time_loaded: true,
        }
    }

    #[test]
    fn duplicate_definitions_are_rejected_with_note() {
        let mut env = EvaluatorEnvironment::new();
        assert!(env.add_object_definition(test_definition("f")));
        assert!(!env.add_object_definition(test_definition("f")));
        assert_eq!(env.errors.len(), 1);
        assert!(matches!(
            env.errors[0].kind,
            ErrorKind::DuplicateDefinition { .. }
        ));
        assert_eq!(env.errors[0].diagnostic_info.notes.len(), 1);
    }

    #[test]
    fn definition_order_is_declaration_order() {
        let mut env = EvaluatorEnvironment::new();
        for name in ["zeta", "alpha", "mid"] {
            env.add_object_definition(test_definition(name));
        }
        assert_eq!(env.definition_order, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn evaluating_reentry_is_a_cycle() {
        let mut env = EvaluatorEnvironment::new();
        env.add_object_definition(test_definition("f"));
        let blame = make_module_pseudo_token("test.cdl");
        assert!(env.begin_definition_evaluation("f", &blame));
        assert!(!env.begin_definition_evaluation("f", &blame));
        assert!(matches!(
            env.errors[0].kind,
            ErrorKind::EvaluationCycle { .. }
        ));
    }

    #[test]
    fn unique_symbol_numbers_are_monotone() {
        let mut env = EvaluatorEnvironment::new();
        let first = env.next_unique_symbol_num();
        let second = env.next_unique_symbol_num();
        assert!(second > first);
    }
}
