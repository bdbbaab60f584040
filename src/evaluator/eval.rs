//! Expression dispatch and fragment generation.
//!
//! For each expression: atoms become passthrough fragments; invocations are
//! looked up macros first, then generators, then fall back to recording an
//! [`ObjectReference`] with a splice slot reserved at the current output
//! position. Macro expansions are interned in the environment and re-evaluated
//! in place with the same context, under a hard recursion bound.

use std::rc::Rc;

use crate::errors::{ErrorKind, MAX_MACRO_RECURSION_DEPTH};
use crate::evaluator::{EvaluatorContext, EvaluatorEnvironment, EvaluatorScope, ObjectReference};
use crate::output::{
    add_lang_token_output, add_splice_output, add_string_output, GeneratorOutput,
    OutputModifierFlags, StringOutput,
};
use crate::syntax::{
    find_close_paren, find_expression_end, get_next_argument, validate_parentheses, Token,
    TokenKind, TokenSeq,
};

/// Evaluate every expression in `tokens[start..end]`, inserting
/// `delimiter` (a fragment template, typically newline-after) after each one.
/// Returns the number of errors recorded. At module scope, evaluation
/// continues past a failing form so every sibling definition reports its
/// errors; inside a definition, the first error aborts the rest of it.
pub fn evaluate_generate_all_recursive(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start: usize,
    end: usize,
    delimiter: Option<&StringOutput>,
    output: &mut GeneratorOutput,
) -> usize {
    let mut num_errors = 0;
    let mut at = start;
    while at < end {
        num_errors += evaluate_generate_recursive(env, context, tokens, at, output);
        if num_errors != 0 && context.scope != EvaluatorScope::Module {
            break;
        }
        if let Some(template) = delimiter {
            output.source.push(template.clone());
        }
        at = find_expression_end(tokens, at) + 1;
    }
    num_errors
}

/// Evaluate the single expression starting at `at`. Returns the number of
/// errors recorded.
pub fn evaluate_generate_recursive(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    at: usize,
    output: &mut GeneratorOutput,
) -> usize {
    match tokens[at].kind {
        TokenKind::OpenParen => evaluate_invocation(env, context, tokens, at, output),
        _ => evaluate_atom(env, context, &tokens[at], output),
    }
}

// ============================================================================
// ATOMS
// ============================================================================

fn evaluate_atom(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    token: &Token,
    output: &mut GeneratorOutput,
) -> usize {
    if context.scope == EvaluatorScope::Module {
        env.record_error(
            ErrorKind::ScopeViolation {
                invocation: token.contents.clone(),
                message: "expected a declaration at module scope".to_string(),
            },
            token,
        );
        return 1;
    }

    match token.kind {
        TokenKind::String => {
            add_string_output(
                &mut output.source,
                format!("\"{}\"", escape_string_contents(&token.contents)),
                OutputModifierFlags::empty(),
                token,
            );
            0
        }
        TokenKind::Symbol if token.is_special_symbol() => {
            env.record_error(
                ErrorKind::TypeMismatch {
                    expected: "an expression".to_string(),
                    actual: format!("special symbol '{}'", token.contents),
                },
                token,
            );
            1
        }
        TokenKind::Symbol => {
            let conversion = if is_numeric_literal(&token.contents) {
                OutputModifierFlags::empty()
            } else {
                OutputModifierFlags::CONVERT_VARIABLE_NAME
            };
            add_string_output(&mut output.source, token.contents.clone(), conversion, token);
            0
        }
        TokenKind::OpenParen | TokenKind::CloseParen => {
            unreachable!("parens handled by invocation dispatch")
        }
    }
}

fn is_numeric_literal(contents: &str) -> bool {
    let trimmed = contents.strip_prefix('-').unwrap_or(contents);
    trimmed
        .bytes()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == b'.')
}

fn escape_string_contents(contents: &str) -> String {
    let mut escaped = String::with_capacity(contents.len());
    for c in contents.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(c),
        }
    }
    escaped
}

// ============================================================================
// INVOCATIONS
// ============================================================================

fn evaluate_invocation(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    open_paren: usize,
    output: &mut GeneratorOutput,
) -> usize {
    let end = find_close_paren(tokens, open_paren);
    let head_index = open_paren + 1;
    if head_index >= end {
        env.record_error(
            ErrorKind::TypeMismatch {
                expected: "an invocation head".to_string(),
                actual: "empty expression".to_string(),
            },
            &tokens[open_paren],
        );
        return 1;
    }

    let head = &tokens[head_index];
    if head.kind != TokenKind::Symbol {
        env.record_error(
            ErrorKind::TypeMismatch {
                expected: "a symbol as invocation head".to_string(),
                actual: head.kind.describe().to_string(),
            },
            head,
        );
        return 1;
    }

    let name = head.contents.clone();

    // Lookup order: macros shadow generators shadow function references.
    if let Some(&macro_fn) = env.macros.get(&name) {
        return evaluate_macro_invocation(env, context, tokens, open_paren, &name, macro_fn, output);
    }
    if let Some(&generator_fn) = env.generators.get(&name) {
        let errors_before = env.errors.len();
        let succeeded = generator_fn(env, context, tokens, open_paren, output);
        let recorded = env.errors.len() - errors_before;
        if !succeeded && recorded == 0 {
            env.record_error(
                ErrorKind::UnknownInvocation { name },
                &tokens[head_index].clone(),
            );
            return 1;
        }
        return recorded;
    }

    if head.is_special_symbol() {
        env.record_error(ErrorKind::UnknownInvocation { name }, &tokens[head_index].clone());
        return 1;
    }

    record_object_reference(env, context, tokens, open_paren, &name, output);
    0
}

fn evaluate_macro_invocation(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    open_paren: usize,
    name: &str,
    macro_fn: crate::evaluator::MacroFn,
    output: &mut GeneratorOutput,
) -> usize {
    let head = tokens[open_paren + 1].clone();
    if env.macro_expansion_depth == 0 {
        env.outermost_macro_invocation = Some(head.clone());
    }
    if env.macro_expansion_depth >= MAX_MACRO_RECURSION_DEPTH {
        let blame = env
            .outermost_macro_invocation
            .clone()
            .unwrap_or_else(|| head.clone());
        env.record_error(
            ErrorKind::MacroRecursionLimit {
                depth: MAX_MACRO_RECURSION_DEPTH,
            },
            &blame,
        );
        return 1;
    }

    let errors_before = env.errors.len();
    let mut expansion = Vec::new();
    if !macro_fn(env, context, tokens, open_paren, &mut expansion) {
        if env.errors.len() == errors_before {
            env.record_error(
                ErrorKind::MacroExpansion {
                    macro_name: name.to_string(),
                    reason: "macro signaled failure".to_string(),
                },
                &head,
            );
        }
        return env.errors.len() - errors_before;
    }

    // A macro returning malformed parens would poison every later walk.
    let source = env.source_for(&head);
    if validate_parentheses(&expansion, &source).is_err() {
        env.record_error(
            ErrorKind::MacroExpansion {
                macro_name: name.to_string(),
                reason: "expansion has unbalanced parentheses".to_string(),
            },
            &head,
        );
        return 1;
    }

    let expansion_end = expansion.len();
    let expansion_seq = env.intern_expansion(expansion);
    env.macro_expansion_depth += 1;
    let num_errors = evaluate_generate_all_recursive(
        env,
        context,
        &expansion_seq,
        0,
        expansion_end,
        None,
        output,
    );
    env.macro_expansion_depth -= 1;
    num_errors
}

/// Reserve a splice slot at the current position in both streams and record
/// the unresolved reference on the definition being built.
fn record_object_reference(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    open_paren: usize,
    name: &str,
    output: &mut GeneratorOutput,
) {
    let splice = GeneratorOutput::new_handle();
    add_splice_output(output, &splice, &tokens[open_paren]);

    let reference = ObjectReference {
        name: name.to_string(),
        tokens: Rc::clone(tokens),
        start_index: open_paren,
        context: context.clone(),
        splice,
        is_resolved: false,
    };

    let owner = context.definition_name.contents.clone();
    if let Some(definition) = env.definitions.get_mut(&owner) {
        definition.references.push(reference);
    }
}

/// Fill a reference's splice slot with a C function call. Arguments are
/// evaluated now, in expression scope, so they may record further references
/// that the resolver picks up on its next pass.
pub fn output_function_call(env: &mut EvaluatorEnvironment, reference: &ObjectReference) -> usize {
    let tokens = &reference.tokens;
    let open_paren = reference.start_index;
    let end = find_close_paren(tokens, open_paren);
    let head_index = open_paren + 1;
    let head = tokens[head_index].clone();

    let argument_context = reference
        .context
        .with_scope(EvaluatorScope::ExpressionOrStatement);

    let mut num_errors = 0;
    {
        let splice = Rc::clone(&reference.splice);
        let mut out = splice.borrow_mut();
        add_string_output(
            &mut out.source,
            reference.name.clone(),
            OutputModifierFlags::CONVERT_FUNCTION_NAME,
            &head,
        );
        add_lang_token_output(&mut out.source, OutputModifierFlags::OPEN_PAREN, &head);

        let mut at = get_next_argument(tokens, head_index, end);
        while at < end {
            num_errors +=
                evaluate_generate_recursive(env, &argument_context, tokens, at, &mut out);
            at = get_next_argument(tokens, at, end);
            if at < end {
                add_string_output(
                    &mut out.source,
                    ",",
                    OutputModifierFlags::SPACE_AFTER,
                    &head,
                );
            }
        }

        add_lang_token_output(&mut out.source, OutputModifierFlags::CLOSE_PAREN, &head);
        if reference.context.scope == EvaluatorScope::Body {
            add_lang_token_output(&mut out.source, OutputModifierFlags::SEMICOLON, &head);
        }
    }
    num_errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::make_module_pseudo_token;
    use crate::syntax::tokenize;

    fn setup(source: &str) -> (EvaluatorEnvironment, EvaluatorContext, TokenSeq) {
        let mut env = EvaluatorEnvironment::new();
        env.register_source(crate::errors::SourceContext::from_file("test.cdl", source));
        let module_token = make_module_pseudo_token("test.cdl");
        env.ensure_module_definition(Rc::clone(&module_token));
        let context = EvaluatorContext {
            scope: EvaluatorScope::Body,
            definition_name: module_token,
            is_required: true,
        };
        let tokens: TokenSeq = Rc::new(tokenize(source, "test.cdl").unwrap());
        (env, context, tokens)
    }

    fn rendered_texts(output: &GeneratorOutput) -> Vec<String> {
        output
            .source
            .iter()
            .filter_map(|f| f.text().map(str::to_string))
            .collect()
    }

    #[test]
    fn atoms_become_passthrough_fragments() {
        let (mut env, context, tokens) = setup("42 x \"hi\"");
        let mut output = GeneratorOutput::default();
        for at in 0..3 {
            assert_eq!(
                evaluate_generate_recursive(&mut env, &context, &tokens, at, &mut output),
                0
            );
        }
        assert_eq!(rendered_texts(&output), vec!["42", "x", "\"hi\""]);
        // Only the bare symbol gets variable-name conversion.
        assert!(!output.source[0]
            .modifiers
            .contains(OutputModifierFlags::CONVERT_VARIABLE_NAME));
        assert!(output.source[1]
            .modifiers
            .contains(OutputModifierFlags::CONVERT_VARIABLE_NAME));
    }

    #[test]
    fn atoms_are_illegal_at_module_scope() {
        let (mut env, context, tokens) = setup("42");
        let module_context = context.with_scope(EvaluatorScope::Module);
        let mut output = GeneratorOutput::default();
        assert_eq!(
            evaluate_generate_recursive(&mut env, &module_context, &tokens, 0, &mut output),
            1
        );
        assert!(matches!(
            env.errors[0].kind,
            ErrorKind::ScopeViolation { .. }
        ));
    }

    #[test]
    fn unknown_invocation_records_reference_and_splice() {
        let (mut env, context, tokens) = setup("(launch 1 2)");
        let mut output = GeneratorOutput::default();
        assert_eq!(
            evaluate_generate_recursive(&mut env, &context, &tokens, 0, &mut output),
            0
        );
        // Splice marker reserved in both streams.
        assert_eq!(output.source.len(), 1);
        assert_eq!(output.header.len(), 1);
        let module = env.find_definition("<module>").unwrap();
        assert_eq!(module.references.len(), 1);
        assert_eq!(module.references[0].name, "launch");
        assert!(!module.references[0].is_resolved);
    }

    #[test]
    fn macro_expansion_evaluates_in_place() {
        fn double_macro(
            _env: &mut EvaluatorEnvironment,
            _context: &EvaluatorContext,
            tokens: &TokenSeq,
            start: usize,
            output: &mut Vec<Token>,
        ) -> bool {
            let argument = &tokens[start + 2];
            output.push(argument.derive(TokenKind::OpenParen, ""));
            output.push(argument.derive(TokenKind::Symbol, "*"));
            output.push(argument.clone());
            output.push(argument.derive(TokenKind::Symbol, "2"));
            output.push(argument.derive(TokenKind::CloseParen, ""));
            true
        }

        let (mut env, context, tokens) = setup("(double 21)");
        env.register_macro("double", double_macro);
        crate::generators::import_fundamental_generators(&mut env);
        let mut output = GeneratorOutput::default();
        let expression_context = context.with_scope(EvaluatorScope::ExpressionOrStatement);
        assert_eq!(
            evaluate_generate_recursive(&mut env, &expression_context, &tokens, 0, &mut output),
            0
        );
        let texts = rendered_texts(&output);
        assert!(texts.contains(&"21".to_string()));
        assert!(texts.contains(&"2".to_string()));
    }

    #[test]
    fn runaway_macro_hits_recursion_limit() {
        fn self_macro(
            _env: &mut EvaluatorEnvironment,
            _context: &EvaluatorContext,
            tokens: &TokenSeq,
            start: usize,
            output: &mut Vec<Token>,
        ) -> bool {
            let head = &tokens[start + 1];
            output.push(head.derive(TokenKind::OpenParen, ""));
            output.push(head.clone());
            output.push(head.derive(TokenKind::CloseParen, ""));
            true
        }

        let (mut env, context, tokens) = setup("(forever)");
        env.register_macro("forever", self_macro);
        let mut output = GeneratorOutput::default();
        let num_errors =
            evaluate_generate_recursive(&mut env, &context, &tokens, 0, &mut output);
        assert!(num_errors >= 1);
        assert!(env
            .errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::MacroRecursionLimit { .. })));
    }

    #[test]
    fn unbalanced_macro_expansion_is_an_error() {
        fn bad_macro(
            _env: &mut EvaluatorEnvironment,
            _context: &EvaluatorContext,
            tokens: &TokenSeq,
            start: usize,
            output: &mut Vec<Token>,
        ) -> bool {
            output.push(tokens[start + 1].derive(TokenKind::OpenParen, ""));
            true
        }

        let (mut env, context, tokens) = setup("(bad)");
        env.register_macro("bad", bad_macro);
        let mut output = GeneratorOutput::default();
        assert_eq!(
            evaluate_generate_recursive(&mut env, &context, &tokens, 0, &mut output),
            1
        );
        assert!(matches!(
            env.errors[0].kind,
            ErrorKind::MacroExpansion { .. }
        ));
    }
}
