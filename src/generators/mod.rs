//! The fundamental generator set.
//!
//! Generators emit target-language fragments directly and own recursion into
//! their sub-expressions with the right sub-contexts. Simple statements are
//! driven by [`CStatementOperation`] tables so that adding a C construct is a
//! table entry, not a new function; `defun`, `var`, `if`, and the operator
//! expressions need bespoke bodies.
//!
//! The macro registry has no counterpart here: macros are registered entirely
//! by the embedder.

pub mod helpers;

use std::rc::Rc;

use crate::errors::ErrorKind;
use crate::evaluator::{
    evaluate_generate_all_recursive, evaluate_generate_recursive, DefinitionState,
    EvaluatorContext, EvaluatorEnvironment, EvaluatorScope, ObjectDefinition, ObjectKind,
};
use crate::output::{
    add_lang_token_output, add_splice_output, add_string_output, GeneratorOutput,
    OutputModifierFlags,
};
use crate::syntax::{
    find_close_paren, find_expression_end, get_argument, get_next_argument, get_num_arguments,
    TokenKind, TokenSeq,
};

pub use helpers::{
    expect_evaluator_scope, expect_in_invocation, expect_num_arguments, expect_token_type,
    get_expected_argument, is_forbidden_evaluator_scope, make_context_unique_symbol_name,
    make_unique_symbol_name, output_function_arguments, output_function_return_type,
    parse_function_signature, tokenized_c_type_to_string_recursive, FunctionArgumentTokens,
};

/// Register every fundamental generator. Embedders call this once per
/// environment before evaluating anything.
pub fn import_fundamental_generators(env: &mut EvaluatorEnvironment) {
    env.register_generator("defun", defun_generator);
    env.register_generator("var", var_generator);
    env.register_generator("set", set_generator);
    env.register_generator("return", return_generator);
    env.register_generator("if", if_generator);
    env.register_generator("while", while_generator);
    env.register_generator("block", block_generator);

    for operator in [
        "+", "-", "*", "/", "%", "=", "!=", "<", "<=", ">", ">=", "and", "or", "not",
    ] {
        env.register_generator(operator, c_operator_generator);
    }
}

// ============================================================================
// STATEMENT OPERATION TABLES
// ============================================================================

/// One step of a table-driven statement generator. Argument indices count the
/// invocation head as 0.
#[derive(Debug, Clone, Copy)]
pub enum CStatementOperation {
    /// Keyword or symbol with space on both sides.
    Keyword(&'static str),
    OpenParen,
    CloseParen,
    OpenBlock,
    CloseBlock,
    /// Evaluate exactly argument `n` in expression scope.
    Expression(usize),
    /// Evaluate arguments `n..` in expression scope, comma-separated. May be
    /// empty.
    ExpressionList(usize),
    /// Evaluate arguments `n..` in body scope.
    Body(usize),
    EndStatement,
}

/// Interpret an operation table against an invocation. The table is the whole
/// generator for simple statements.
pub fn c_statement_output(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_token_index: usize,
    operations: &[CStatementOperation],
    output: &mut GeneratorOutput,
) -> bool {
    let end = find_close_paren(tokens, start_token_index);
    let head = tokens[start_token_index + 1].clone();
    let expression_context = context.with_scope(EvaluatorScope::ExpressionOrStatement);
    let body_context = context.with_scope(EvaluatorScope::Body);
    let mut num_errors = 0;

    for operation in operations {
        match *operation {
            CStatementOperation::Keyword(keyword) => add_string_output(
                &mut output.source,
                keyword,
                OutputModifierFlags::SPACE_BEFORE | OutputModifierFlags::SPACE_AFTER,
                &head,
            ),
            CStatementOperation::OpenParen => {
                add_lang_token_output(&mut output.source, OutputModifierFlags::OPEN_PAREN, &head)
            }
            CStatementOperation::CloseParen => {
                add_lang_token_output(&mut output.source, OutputModifierFlags::CLOSE_PAREN, &head)
            }
            CStatementOperation::OpenBlock => {
                add_lang_token_output(&mut output.source, OutputModifierFlags::OPEN_BLOCK, &head)
            }
            CStatementOperation::CloseBlock => {
                add_lang_token_output(&mut output.source, OutputModifierFlags::CLOSE_BLOCK, &head)
            }
            CStatementOperation::Expression(argument) => {
                let Some(argument_index) = get_expected_argument(
                    env,
                    "expected expression",
                    tokens,
                    start_token_index,
                    argument,
                    end,
                ) else {
                    return false;
                };
                num_errors += evaluate_generate_recursive(
                    env,
                    &expression_context,
                    tokens,
                    argument_index,
                    output,
                );
            }
            CStatementOperation::ExpressionList(first_argument) => {
                let mut at = get_argument(tokens, start_token_index, first_argument, end)
                    .unwrap_or(end);
                while at < end {
                    num_errors += evaluate_generate_recursive(
                        env,
                        &expression_context,
                        tokens,
                        at,
                        output,
                    );
                    at = get_next_argument(tokens, at, end);
                    if at < end {
                        add_string_output(
                            &mut output.source,
                            ",",
                            OutputModifierFlags::SPACE_AFTER,
                            &head,
                        );
                    }
                }
            }
            CStatementOperation::Body(first_argument) => {
                let body_start = get_argument(tokens, start_token_index, first_argument, end)
                    .unwrap_or(end);
                num_errors += evaluate_generate_all_recursive(
                    env,
                    &body_context,
                    tokens,
                    body_start,
                    end,
                    None,
                    output,
                );
            }
            CStatementOperation::EndStatement => {
                add_lang_token_output(&mut output.source, OutputModifierFlags::SEMICOLON, &head)
            }
        }
    }

    num_errors == 0
}

const RETURN_OPERATIONS: &[CStatementOperation] = &[
    CStatementOperation::Keyword("return"),
    CStatementOperation::ExpressionList(1),
    CStatementOperation::EndStatement,
];

const SET_OPERATIONS: &[CStatementOperation] = &[
    CStatementOperation::Expression(1),
    CStatementOperation::Keyword("="),
    CStatementOperation::Expression(2),
    CStatementOperation::EndStatement,
];

const WHILE_OPERATIONS: &[CStatementOperation] = &[
    CStatementOperation::Keyword("while"),
    CStatementOperation::OpenParen,
    CStatementOperation::Expression(1),
    CStatementOperation::CloseParen,
    CStatementOperation::OpenBlock,
    CStatementOperation::Body(2),
    CStatementOperation::CloseBlock,
];

const BLOCK_OPERATIONS: &[CStatementOperation] = &[
    CStatementOperation::OpenBlock,
    CStatementOperation::Body(1),
    CStatementOperation::CloseBlock,
];

fn statement_generator(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_token_index: usize,
    operations: &[CStatementOperation],
    output: &mut GeneratorOutput,
) -> bool {
    let head = tokens[start_token_index + 1].clone();
    let name = head.contents.clone();
    if is_forbidden_evaluator_scope(env, &name, &head, context, EvaluatorScope::Module) {
        return false;
    }
    c_statement_output(env, context, tokens, start_token_index, operations, output)
}

fn return_generator(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_token_index: usize,
    output: &mut GeneratorOutput,
) -> bool {
    statement_generator(env, context, tokens, start_token_index, RETURN_OPERATIONS, output)
}

fn set_generator(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_token_index: usize,
    output: &mut GeneratorOutput,
) -> bool {
    let end = find_close_paren(tokens, start_token_index);
    if !expect_num_arguments(env, tokens, start_token_index, end, 3) {
        return false;
    }
    statement_generator(env, context, tokens, start_token_index, SET_OPERATIONS, output)
}

fn while_generator(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_token_index: usize,
    output: &mut GeneratorOutput,
) -> bool {
    statement_generator(env, context, tokens, start_token_index, WHILE_OPERATIONS, output)
}

fn block_generator(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_token_index: usize,
    output: &mut GeneratorOutput,
) -> bool {
    statement_generator(env, context, tokens, start_token_index, BLOCK_OPERATIONS, output)
}

// ============================================================================
// IF
// ============================================================================

/// `(if condition then-statement [else-statement])`.
fn if_generator(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_token_index: usize,
    output: &mut GeneratorOutput,
) -> bool {
    let end = find_close_paren(tokens, start_token_index);
    let head = tokens[start_token_index + 1].clone();
    if is_forbidden_evaluator_scope(env, "if", &head, context, EvaluatorScope::Module) {
        return false;
    }
    let num_arguments = get_num_arguments(tokens, start_token_index, end);
    if !(3..=4).contains(&num_arguments) {
        env.record_error(
            ErrorKind::ArityMismatch {
                invocation: "if".to_string(),
                expected: "3 or 4".to_string(),
                actual: num_arguments,
            },
            &head,
        );
        return false;
    }

    let condition_index = get_argument(tokens, start_token_index, 1, end)
        .expect("argument count already checked");
    let then_index = get_argument(tokens, start_token_index, 2, end)
        .expect("argument count already checked");
    let else_index = get_argument(tokens, start_token_index, 3, end);

    let expression_context = context.with_scope(EvaluatorScope::ExpressionOrStatement);
    let body_context = context.with_scope(EvaluatorScope::Body);
    let mut num_errors = 0;

    add_string_output(
        &mut output.source,
        "if",
        OutputModifierFlags::SPACE_AFTER,
        &head,
    );
    add_lang_token_output(&mut output.source, OutputModifierFlags::OPEN_PAREN, &head);
    num_errors += evaluate_generate_recursive(
        env,
        &expression_context,
        tokens,
        condition_index,
        output,
    );
    add_lang_token_output(&mut output.source, OutputModifierFlags::CLOSE_PAREN, &head);

    add_lang_token_output(&mut output.source, OutputModifierFlags::OPEN_BLOCK, &head);
    num_errors += evaluate_generate_recursive(env, &body_context, tokens, then_index, output);
    add_lang_token_output(&mut output.source, OutputModifierFlags::CLOSE_BLOCK, &head);

    if let Some(else_index) = else_index {
        add_string_output(
            &mut output.source,
            "else",
            OutputModifierFlags::empty(),
            &head,
        );
        add_lang_token_output(&mut output.source, OutputModifierFlags::OPEN_BLOCK, &head);
        num_errors += evaluate_generate_recursive(env, &body_context, tokens, else_index, output);
        add_lang_token_output(&mut output.source, OutputModifierFlags::CLOSE_BLOCK, &head);
    }

    num_errors == 0
}

// ============================================================================
// OPERATORS
// ============================================================================

fn c_operator_for(name: &str) -> Option<&'static str> {
    Some(match name {
        "+" => "+",
        "-" => "-",
        "*" => "*",
        "/" => "/",
        "%" => "%",
        "=" => "==",
        "!=" => "!=",
        "<" => "<",
        "<=" => "<=",
        ">" => ">",
        ">=" => ">=",
        "and" => "&&",
        "or" => "||",
        "not" => "!",
        _ => return None,
    })
}

/// Arithmetic, comparison, and logical expressions. N-ary where C allows it,
/// strictly binary for comparisons, unary for `not` and negation. Always
/// parenthesized, so nesting never depends on C precedence.
fn c_operator_generator(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_token_index: usize,
    output: &mut GeneratorOutput,
) -> bool {
    let end = find_close_paren(tokens, start_token_index);
    let head = tokens[start_token_index + 1].clone();
    if is_forbidden_evaluator_scope(env, &head.contents, &head, context, EvaluatorScope::Module) {
        return false;
    }
    let Some(operator) = c_operator_for(&head.contents) else {
        env.record_error(
            ErrorKind::UnknownInvocation {
                name: head.contents.clone(),
            },
            &head,
        );
        return false;
    };

    let num_arguments = get_num_arguments(tokens, start_token_index, end);
    let is_comparison = matches!(head.contents.as_str(), "=" | "!=" | "<" | "<=" | ">" | ">=");
    let is_unary_not = head.contents == "not";
    let is_negation = head.contents == "-" && num_arguments == 2;

    if is_unary_not && !expect_num_arguments(env, tokens, start_token_index, end, 2) {
        return false;
    }
    if is_comparison && !expect_num_arguments(env, tokens, start_token_index, end, 3) {
        return false;
    }
    if !is_unary_not && !is_negation && num_arguments < 3 {
        env.record_error(
            ErrorKind::ArityMismatch {
                invocation: head.contents.clone(),
                expected: "at least 2".to_string(),
                actual: num_arguments,
            },
            &head,
        );
        return false;
    }

    let expression_context = context.with_scope(EvaluatorScope::ExpressionOrStatement);
    let mut num_errors = 0;

    if is_unary_not || is_negation {
        add_string_output(
            &mut output.source,
            operator,
            OutputModifierFlags::empty(),
            &head,
        );
        add_lang_token_output(&mut output.source, OutputModifierFlags::OPEN_PAREN, &head);
        let operand = get_argument(tokens, start_token_index, 1, end)
            .expect("argument count already checked");
        num_errors +=
            evaluate_generate_recursive(env, &expression_context, tokens, operand, output);
        add_lang_token_output(&mut output.source, OutputModifierFlags::CLOSE_PAREN, &head);
    } else {
        add_lang_token_output(&mut output.source, OutputModifierFlags::OPEN_PAREN, &head);
        let mut at = get_argument(tokens, start_token_index, 1, end)
            .expect("argument count already checked");
        let mut first = true;
        while at < end {
            if !first {
                add_string_output(
                    &mut output.source,
                    operator,
                    OutputModifierFlags::SPACE_BEFORE | OutputModifierFlags::SPACE_AFTER,
                    &head,
                );
            }
            first = false;
            num_errors += evaluate_generate_recursive(env, &expression_context, tokens, at, output);
            at = get_next_argument(tokens, at, end);
        }
        add_lang_token_output(&mut output.source, OutputModifierFlags::CLOSE_PAREN, &head);
    }

    // Expression used directly as a statement.
    if context.scope == EvaluatorScope::Body {
        add_lang_token_output(&mut output.source, OutputModifierFlags::SEMICOLON, &head);
    }

    num_errors == 0
}

// ============================================================================
// DEFUN
// ============================================================================

/// `(defun name (arg type ... [&return type]) body...)`. Declares the
/// function in the header, defines it in the source, and evaluates the body
/// at body scope into the function's own output, spliced into the module
/// stream at the invocation position.
fn defun_generator(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_token_index: usize,
    output: &mut GeneratorOutput,
) -> bool {
    let end = find_close_paren(tokens, start_token_index);
    let invocation_token = tokens[start_token_index].clone();
    if !expect_evaluator_scope(
        env,
        "defun",
        &invocation_token,
        context,
        EvaluatorScope::Module,
    ) {
        return false;
    }

    let Some(name_index) =
        get_expected_argument(env, "expected function name", tokens, start_token_index, 1, end)
    else {
        return false;
    };
    if !expect_token_type(env, "defun", &tokens[name_index], TokenKind::Symbol) {
        return false;
    }
    let Some(args_index) =
        get_expected_argument(env, "expected argument list", tokens, start_token_index, 2, end)
    else {
        return false;
    };
    if !expect_token_type(env, "defun", &tokens[args_index], TokenKind::OpenParen) {
        return false;
    }

    let name_token = Rc::new(tokens[name_index].clone());
    let function_name = name_token.contents.clone();
    let definition_output = GeneratorOutput::new_handle();
    let added = env.add_object_definition(ObjectDefinition {
        name: Rc::clone(&name_token),
        kind: ObjectKind::Function,
        required_at_creation: context.is_required,
        is_required: context.is_required,
        state: DefinitionState::Declared,
        output: Rc::clone(&definition_output),
        references: Vec::new(),
        compile_time_loaded: true,
    });
    if !added {
        return false;
    }
    add_splice_output(output, &definition_output, &invocation_token);

    if !env.begin_definition_evaluation(&function_name, &name_token) {
        return false;
    }

    let mut arguments = Vec::new();
    let mut return_type_start = None;
    if !parse_function_signature(env, tokens, args_index, &mut arguments, &mut return_type_start)
    {
        env.end_definition_evaluation(&function_name, false);
        return false;
    }
    // C++ insists main returns int; everything else defaults to void.
    let default_return = if function_name == "main" { "int" } else { "void" };

    let signature_ok = {
        let mut definition_out = definition_output.borrow_mut();
        let mut ok = output_function_return_type(
            env,
            tokens,
            &mut definition_out,
            return_type_start,
            &invocation_token,
            default_return,
            true,
            true,
        );
        if ok {
            add_string_output(
                &mut definition_out.source,
                function_name.clone(),
                OutputModifierFlags::CONVERT_FUNCTION_NAME | OutputModifierFlags::SPACE_BEFORE,
                &name_token,
            );
            add_string_output(
                &mut definition_out.header,
                function_name.clone(),
                OutputModifierFlags::CONVERT_FUNCTION_NAME | OutputModifierFlags::SPACE_BEFORE,
                &name_token,
            );
            ok = output_function_arguments(
                env,
                tokens,
                &mut definition_out,
                &arguments,
                &invocation_token,
                true,
                true,
            );
        }
        if ok {
            add_lang_token_output(
                &mut definition_out.header,
                OutputModifierFlags::SEMICOLON,
                &name_token,
            );
            add_lang_token_output(
                &mut definition_out.source,
                OutputModifierFlags::OPEN_BLOCK,
                &invocation_token,
            );
        }
        ok
    };
    if !signature_ok {
        env.end_definition_evaluation(&function_name, false);
        return false;
    }

    let body_start = find_expression_end(tokens, args_index) + 1;
    let body_context = EvaluatorContext {
        scope: EvaluatorScope::Body,
        definition_name: Rc::clone(&name_token),
        is_required: context.is_required,
    };
    let body_errors = evaluate_generate_all_recursive(
        env,
        &body_context,
        tokens,
        body_start,
        end,
        None,
        &mut definition_output.borrow_mut(),
    );
    // The block opened above closes on every path, body errors included.
    add_lang_token_output(
        &mut definition_output.borrow_mut().source,
        OutputModifierFlags::CLOSE_BLOCK,
        &tokens[end],
    );

    env.end_definition_evaluation(&function_name, body_errors == 0);
    body_errors == 0
}

// ============================================================================
// VAR
// ============================================================================

/// `(var name type [initializer])`. At module scope: definition in the
/// source, `extern` declaration in the header, and an [`ObjectDefinition`] so
/// references can find it. In a body: a plain local declaration.
fn var_generator(
    env: &mut EvaluatorEnvironment,
    context: &EvaluatorContext,
    tokens: &TokenSeq,
    start_token_index: usize,
    output: &mut GeneratorOutput,
) -> bool {
    let end = find_close_paren(tokens, start_token_index);
    let head = tokens[start_token_index + 1].clone();
    let num_arguments = get_num_arguments(tokens, start_token_index, end);
    if !(3..=4).contains(&num_arguments) {
        env.record_error(
            ErrorKind::ArityMismatch {
                invocation: "var".to_string(),
                expected: "3 or 4".to_string(),
                actual: num_arguments,
            },
            &head,
        );
        return false;
    }

    let name_index = get_argument(tokens, start_token_index, 1, end)
        .expect("argument count already checked");
    if !expect_token_type(env, "var", &tokens[name_index], TokenKind::Symbol) {
        return false;
    }
    let type_index = get_argument(tokens, start_token_index, 2, end)
        .expect("argument count already checked");
    let initializer_index = get_argument(tokens, start_token_index, 3, end);

    let mut type_output = Vec::new();
    let mut after_name_output = Vec::new();
    if !tokenized_c_type_to_string_recursive(
        env,
        tokens,
        type_index,
        true,
        &mut type_output,
        &mut after_name_output,
    ) {
        return false;
    }

    let name_token = Rc::new(tokens[name_index].clone());
    let is_module_variable = context.scope == EvaluatorScope::Module;

    // Module variables get their own spliced definition output; locals write
    // straight into the enclosing stream.
    let definition_output = GeneratorOutput::new_handle();
    if is_module_variable {
        let added = env.add_object_definition(ObjectDefinition {
            name: Rc::clone(&name_token),
            kind: ObjectKind::Variable,
            required_at_creation: context.is_required,
            is_required: context.is_required,
            state: DefinitionState::Resolved,
            output: Rc::clone(&definition_output),
            references: Vec::new(),
            compile_time_loaded: true,
        });
        if !added {
            return false;
        }
        add_splice_output(output, &definition_output, &tokens[start_token_index]);
    }

    let mut declaration = Vec::new();
    declaration.extend(type_output.iter().cloned());
    add_string_output(
        &mut declaration,
        name_token.contents.clone(),
        OutputModifierFlags::CONVERT_VARIABLE_NAME | OutputModifierFlags::SPACE_BEFORE,
        &name_token,
    );
    declaration.extend(after_name_output.iter().cloned());

    let mut num_errors = 0;
    {
        let mut definition_borrow;
        let destination: &mut GeneratorOutput = if is_module_variable {
            definition_borrow = definition_output.borrow_mut();
            &mut definition_borrow
        } else {
            &mut *output
        };

        destination.source.extend(declaration.iter().cloned());
        if let Some(initializer_index) = initializer_index {
            add_string_output(
                &mut destination.source,
                "=",
                OutputModifierFlags::SPACE_BEFORE | OutputModifierFlags::SPACE_AFTER,
                &head,
            );
            let expression_context = context.with_scope(EvaluatorScope::ExpressionOrStatement);
            num_errors += evaluate_generate_recursive(
                env,
                &expression_context,
                tokens,
                initializer_index,
                destination,
            );
        }
        add_lang_token_output(&mut destination.source, OutputModifierFlags::SEMICOLON, &head);

        if is_module_variable {
            add_string_output(
                &mut destination.header,
                "extern",
                OutputModifierFlags::SPACE_AFTER,
                &head,
            );
            destination.header.extend(type_output.iter().cloned());
            add_string_output(
                &mut destination.header,
                name_token.contents.clone(),
                OutputModifierFlags::CONVERT_VARIABLE_NAME | OutputModifierFlags::SPACE_BEFORE,
                &name_token,
            );
            destination.header.extend(after_name_output.iter().cloned());
            add_lang_token_output(
                &mut destination.header,
                OutputModifierFlags::SEMICOLON,
                &head,
            );
        }
    }

    num_errors == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::make_module_pseudo_token;
    use crate::syntax::tokenize;

    fn evaluate_module(source: &str) -> (EvaluatorEnvironment, GeneratorOutput) {
        let mut env = EvaluatorEnvironment::new();
        env.register_source(crate::errors::SourceContext::from_file("test.cdl", source));
        import_fundamental_generators(&mut env);
        let module_token = make_module_pseudo_token("test.cdl");
        env.ensure_module_definition(Rc::clone(&module_token));
        let context = EvaluatorContext {
            scope: EvaluatorScope::Module,
            definition_name: module_token,
            is_required: true,
        };
        let tokens: TokenSeq = Rc::new(tokenize(source, "test.cdl").unwrap());
        let end = tokens.len();
        let mut output = GeneratorOutput::default();
        let errors =
            evaluate_generate_all_recursive(&mut env, &context, &tokens, 0, end, None, &mut output);
        assert_eq!(errors, env.errors.len());
        (env, output)
    }

    fn nonempty_texts(fragments: &[crate::output::StringOutput]) -> Vec<String> {
        fragments
            .iter()
            .filter_map(|f| f.text())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn definition_texts(env: &EvaluatorEnvironment, name: &str) -> Vec<String> {
        nonempty_texts(&env.find_definition(name).unwrap().output.borrow().source)
    }

    #[test]
    fn defun_creates_definition_with_header_declaration() {
        let (env, output) = evaluate_module("(defun main () (return 0))");
        assert!(env.errors.is_empty(), "{:?}", env.errors);
        let main = env.find_definition("main").unwrap();
        assert_eq!(main.kind, ObjectKind::Function);
        assert_eq!(main.state, DefinitionState::Resolved);
        let body = main.output.borrow();
        // Declaration reaches the header stream.
        assert_eq!(nonempty_texts(&body.header), vec!["int", "main"]);
        // The module stream got the splice in both streams.
        assert_eq!(output.source.len(), 1);
        assert!(output
            .source
            .iter()
            .any(|f| f.modifiers.contains(OutputModifierFlags::SPLICE)));
        assert!(output
            .header
            .iter()
            .any(|f| f.modifiers.contains(OutputModifierFlags::SPLICE)));
    }

    #[test]
    fn defun_without_return_type_defaults_to_void() {
        let (env, _) = evaluate_module("(defun go () (return))");
        let texts = definition_texts(&env, "go");
        assert_eq!(texts[0], "void");
    }

    #[test]
    fn defun_with_explicit_return_and_arguments() {
        let (env, _) = evaluate_module("(defun add (a int b int &return int) (return (+ a b)))");
        assert!(env.errors.is_empty(), "{:?}", env.errors);
        let texts = definition_texts(&env, "add");
        assert_eq!(texts[0], "int");
        assert!(texts.contains(&"a".to_string()));
        assert!(texts.contains(&"b".to_string()));
    }

    #[test]
    fn defun_duplicate_name_errors() {
        let (env, _) = evaluate_module("(defun f () (return)) (defun f () (return))");
        assert!(env
            .errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::DuplicateDefinition { .. })));
    }

    #[test]
    fn statements_forbidden_at_module_scope() {
        let (env, _) = evaluate_module("(return 0)");
        assert!(matches!(
            env.errors[0].kind,
            ErrorKind::ScopeViolation { .. }
        ));
    }

    #[test]
    fn set_requires_exactly_two_operands() {
        let (env, _) = evaluate_module("(defun f () (set x))");
        assert!(env
            .errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::ArityMismatch { .. })));
    }

    #[test]
    fn module_var_declares_extern_in_header() {
        let (env, _) = evaluate_module("(var counter int 0)");
        assert!(env.errors.is_empty(), "{:?}", env.errors);
        let counter = env.find_definition("counter").unwrap();
        assert_eq!(counter.kind, ObjectKind::Variable);
        let body = counter.output.borrow();
        assert_eq!(
            nonempty_texts(&body.header),
            vec!["extern", "int", "counter"]
        );
        assert_eq!(
            nonempty_texts(&body.source),
            vec!["int", "counter", "=", "0"]
        );
    }

    #[test]
    fn comparison_operators_are_strictly_binary() {
        let (env, _) = evaluate_module("(defun f () (if (< 1 2 3) (return)))");
        assert!(env
            .errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::ArityMismatch { .. })));
    }

    #[test]
    fn nested_expressions_stay_parenthesized() {
        let (env, _) = evaluate_module("(defun f (&return int) (return (* (+ 1 2) 3)))");
        assert!(env.errors.is_empty(), "{:?}", env.errors);
        let texts = definition_texts(&env, "f");
        let multiply_position = texts.iter().position(|t| t == "*").unwrap();
        let plus_position = texts.iter().position(|t| t == "+").unwrap();
        assert!(plus_position < multiply_position);
    }
}
