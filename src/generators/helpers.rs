//! Shared generator building blocks: argument and scope predicates, unique
//! symbol minting, C type-expression printing, and function-signature
//! parsing/emission.
//!
//! The predicates record a pinpointed diagnostic on failure and return a
//! success flag, so generator bodies read as straight-line chains of checks.

use crate::errors::ErrorKind;
use crate::evaluator::{EvaluatorContext, EvaluatorEnvironment, EvaluatorScope};
use crate::output::{
    add_lang_token_output, add_string_output, GeneratorOutput, OutputModifierFlags, StringOutput,
};
use crate::syntax::{find_close_paren, find_expression_end, get_argument, Token, TokenKind};

// ============================================================================
// PREDICATES
// ============================================================================

pub fn expect_evaluator_scope(
    env: &mut EvaluatorEnvironment,
    generator_name: &str,
    token: &Token,
    context: &EvaluatorContext,
    expected: EvaluatorScope,
) -> bool {
    if context.scope == expected {
        return true;
    }
    env.record_error(
        ErrorKind::ScopeViolation {
            invocation: generator_name.to_string(),
            message: format!(
                "only valid at {} scope, but invoked at {} scope",
                expected.describe(),
                context.scope.describe()
            ),
        },
        token,
    );
    false
}

pub fn is_forbidden_evaluator_scope(
    env: &mut EvaluatorEnvironment,
    generator_name: &str,
    token: &Token,
    context: &EvaluatorContext,
    forbidden: EvaluatorScope,
) -> bool {
    if context.scope != forbidden {
        return false;
    }
    env.record_error(
        ErrorKind::ScopeViolation {
            invocation: generator_name.to_string(),
            message: format!("not valid at {} scope", forbidden.describe()),
        },
        token,
    );
    true
}

pub fn expect_token_type(
    env: &mut EvaluatorEnvironment,
    generator_name: &str,
    token: &Token,
    expected: TokenKind,
) -> bool {
    if token.kind == expected {
        return true;
    }
    env.record_error(
        ErrorKind::TypeMismatch {
            expected: format!("{} ({})", expected.describe(), generator_name),
            actual: token.kind.describe().to_string(),
        },
        token,
    );
    false
}

/// Errors if `index_to_check` has run past the invocation's close paren.
pub fn expect_in_invocation(
    env: &mut EvaluatorEnvironment,
    message: &str,
    tokens: &[Token],
    index_to_check: usize,
    end_invocation_index: usize,
) -> bool {
    if index_to_check < end_invocation_index {
        return true;
    }
    let blame = &tokens[end_invocation_index];
    env.record_error(
        ErrorKind::TypeMismatch {
            expected: message.to_string(),
            actual: "end of invocation".to_string(),
        },
        blame,
    );
    false
}

/// `get_argument` that records an arity diagnostic when out of range.
pub fn get_expected_argument(
    env: &mut EvaluatorEnvironment,
    message: &str,
    tokens: &[Token],
    start_token_index: usize,
    desired_argument: usize,
    end_token_index: usize,
) -> Option<usize> {
    let found = get_argument(tokens, start_token_index, desired_argument, end_token_index);
    if found.is_none() {
        env.record_error(
            ErrorKind::ArityMismatch {
                invocation: tokens[start_token_index + 1].contents.clone(),
                expected: format!("{message} (argument {desired_argument})"),
                actual: crate::syntax::get_num_arguments(
                    tokens,
                    start_token_index,
                    end_token_index,
                ),
            },
            &tokens[start_token_index].clone(),
        );
    }
    found
}

/// Exact argument-count check, counting the invocation head.
pub fn expect_num_arguments(
    env: &mut EvaluatorEnvironment,
    tokens: &[Token],
    start_token_index: usize,
    end_token_index: usize,
    num_expected_arguments: usize,
) -> bool {
    let num_arguments =
        crate::syntax::get_num_arguments(tokens, start_token_index, end_token_index);
    if num_arguments == num_expected_arguments {
        return true;
    }
    env.record_error(
        ErrorKind::ArityMismatch {
            invocation: tokens[start_token_index + 1].contents.clone(),
            expected: num_expected_arguments.to_string(),
            actual: num_arguments,
        },
        &tokens[start_token_index].clone(),
    );
    false
}

// ============================================================================
// UNIQUE SYMBOLS
// ============================================================================

/// Mint a symbol name never produced before by this environment. The counter
/// is environment-global, so the result is not reproducible across
/// independent runs.
pub fn make_unique_symbol_name(env: &mut EvaluatorEnvironment, prefix: &str) -> String {
    format!("{}_{}", prefix, env.next_unique_symbol_num())
}

/// Mint a name derived from the context instead of the counter: the same
/// definition and invocation position yield the same string across runs, so
/// generated output diffs stay stable.
pub fn make_context_unique_symbol_name(
    _env: &EvaluatorEnvironment,
    context: &EvaluatorContext,
    prefix: &str,
    blame: &Token,
) -> String {
    let definition: String = context
        .definition_name
        .contents
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    format!(
        "{}_{}_{}_{}",
        prefix, definition, blame.line, blame.column_start
    )
}

// ============================================================================
// TYPE EXPRESSIONS
// ============================================================================

/// Print a C type expression. Surface forms: a bare symbol (`int`,
/// `MyStruct`), `(* T)` pointers, `(& T)` references, `(const T)`, and, in
/// argument/variable positions only, `([] T)` / `([] size T)` arrays.
/// Array suffixes go to `after_name_output` because C puts them after the
/// declared name.
pub fn tokenized_c_type_to_string_recursive(
    env: &mut EvaluatorEnvironment,
    tokens: &[Token],
    start_token_index: usize,
    allow_array: bool,
    type_output: &mut Vec<StringOutput>,
    after_name_output: &mut Vec<StringOutput>,
) -> bool {
    let token = &tokens[start_token_index];
    match token.kind {
        TokenKind::Symbol => {
            if token.is_special_symbol() {
                env.record_error(
                    ErrorKind::TypeMismatch {
                        expected: "a type name".to_string(),
                        actual: format!("special symbol '{}'", token.contents),
                    },
                    &token.clone(),
                );
                return false;
            }
            add_string_output(
                type_output,
                token.contents.clone(),
                OutputModifierFlags::CONVERT_TYPE_NAME,
                token,
            );
            true
        }
        TokenKind::OpenParen => {
            let end = find_close_paren(tokens, start_token_index);
            let head = &tokens[start_token_index + 1];
            match head.contents.as_str() {
                "*" | "&" => {
                    let Some(inner) = get_expected_argument(
                        env,
                        "expected pointed-to type",
                        tokens,
                        start_token_index,
                        1,
                        end,
                    ) else {
                        return false;
                    };
                    if !tokenized_c_type_to_string_recursive(
                        env,
                        tokens,
                        inner,
                        false,
                        type_output,
                        after_name_output,
                    ) {
                        return false;
                    }
                    add_string_output(
                        type_output,
                        head.contents.clone(),
                        OutputModifierFlags::empty(),
                        head,
                    );
                    true
                }
                "const" => {
                    let Some(inner) = get_expected_argument(
                        env,
                        "expected qualified type",
                        tokens,
                        start_token_index,
                        1,
                        end,
                    ) else {
                        return false;
                    };
                    add_string_output(
                        type_output,
                        "const",
                        OutputModifierFlags::SPACE_AFTER,
                        head,
                    );
                    tokenized_c_type_to_string_recursive(
                        env,
                        tokens,
                        inner,
                        allow_array,
                        type_output,
                        after_name_output,
                    )
                }
                "[]" => {
                    if !allow_array {
                        env.record_error(
                            ErrorKind::TypeMismatch {
                                expected: "a non-array type in this position".to_string(),
                                actual: "array type".to_string(),
                            },
                            &head.clone(),
                        );
                        return false;
                    }
                    output_array_type(env, tokens, start_token_index, end, type_output, after_name_output)
                }
                _ => {
                    env.record_error(
                        ErrorKind::TypeMismatch {
                            expected: "a type constructor (*, &, const, [])".to_string(),
                            actual: format!("'{}'", head.contents),
                        },
                        &head.clone(),
                    );
                    false
                }
            }
        }
        _ => {
            env.record_error(
                ErrorKind::TypeMismatch {
                    expected: "a type".to_string(),
                    actual: token.kind.describe().to_string(),
                },
                &token.clone(),
            );
            false
        }
    }
}

/// `([] T)` or `([] size T)`: element type first, bracket suffix after the
/// declared name.
fn output_array_type(
    env: &mut EvaluatorEnvironment,
    tokens: &[Token],
    start_token_index: usize,
    end: usize,
    type_output: &mut Vec<StringOutput>,
    after_name_output: &mut Vec<StringOutput>,
) -> bool {
    let num_arguments = crate::syntax::get_num_arguments(tokens, start_token_index, end);
    let head = tokens[start_token_index + 1].clone();
    let (size_text, element_index) = match num_arguments {
        2 => {
            let element = get_argument(tokens, start_token_index, 1, end)
                .expect("argument count already checked");
            (None, element)
        }
        3 => {
            let size = get_argument(tokens, start_token_index, 1, end)
                .expect("argument count already checked");
            let element = get_argument(tokens, start_token_index, 2, end)
                .expect("argument count already checked");
            (Some(tokens[size].contents.clone()), element)
        }
        actual => {
            env.record_error(
                ErrorKind::ArityMismatch {
                    invocation: "[]".to_string(),
                    expected: "2 or 3".to_string(),
                    actual,
                },
                &head,
            );
            return false;
        }
    };

    if !tokenized_c_type_to_string_recursive(
        env,
        tokens,
        element_index,
        false,
        type_output,
        after_name_output,
    ) {
        return false;
    }
    let suffix = match size_text {
        Some(size) => format!("[{size}]"),
        None => "[]".to_string(),
    };
    add_string_output(
        after_name_output,
        suffix,
        OutputModifierFlags::empty(),
        &head,
    );
    true
}

// ============================================================================
// FUNCTION SIGNATURES
// ============================================================================

/// Token indices for one parsed function argument.
#[derive(Debug, Clone, Copy)]
pub struct FunctionArgumentTokens {
    pub name_index: usize,
    pub start_type_index: usize,
}

/// Parse `(name type name type ... [&return type])` starting at the argument
/// list's open paren. `return_type_start` is left `None` when no `&return`
/// marker appears.
pub fn parse_function_signature(
    env: &mut EvaluatorEnvironment,
    tokens: &[Token],
    args_index: usize,
    arguments: &mut Vec<FunctionArgumentTokens>,
    return_type_start: &mut Option<usize>,
) -> bool {
    let end_args = find_close_paren(tokens, args_index);
    let mut at = args_index + 1;

    while at < end_args {
        let token = &tokens[at];
        if token.kind == TokenKind::Symbol && token.contents == "&return" {
            let type_index = at + 1;
            if !expect_in_invocation(
                env,
                "expected return type after &return",
                tokens,
                type_index,
                end_args,
            ) {
                return false;
            }
            *return_type_start = Some(type_index);
            let next = find_expression_end(tokens, type_index) + 1;
            if next < end_args {
                env.record_error(
                    ErrorKind::TypeMismatch {
                        expected: "end of signature after return type".to_string(),
                        actual: format!("'{}'", tokens[next].contents),
                    },
                    &tokens[next].clone(),
                );
                return false;
            }
            return true;
        }

        if !expect_token_type(env, "argument name", token, TokenKind::Symbol) {
            return false;
        }
        let name_index = at;
        let type_index = at + 1;
        if !expect_in_invocation(
            env,
            "expected type after argument name",
            tokens,
            type_index,
            end_args,
        ) {
            return false;
        }
        arguments.push(FunctionArgumentTokens {
            name_index,
            start_type_index: type_index,
        });
        at = find_expression_end(tokens, type_index) + 1;
    }

    true
}

/// Emit the function's return type to the selected streams. `default_type`
/// is used when the signature had no `&return` marker.
pub fn output_function_return_type(
    env: &mut EvaluatorEnvironment,
    tokens: &[Token],
    output: &mut GeneratorOutput,
    return_type_start: Option<usize>,
    blame: &Token,
    default_type: &str,
    to_source: bool,
    to_header: bool,
) -> bool {
    let mut type_output = Vec::new();
    let mut after_name_output = Vec::new();
    match return_type_start {
        Some(start) => {
            if !tokenized_c_type_to_string_recursive(
                env,
                tokens,
                start,
                false,
                &mut type_output,
                &mut after_name_output,
            ) {
                return false;
            }
        }
        None => add_string_output(
            &mut type_output,
            default_type,
            OutputModifierFlags::CONVERT_TYPE_NAME,
            blame,
        ),
    }

    if to_source {
        output.source.extend(type_output.iter().cloned());
    }
    if to_header {
        output.header.extend(type_output.iter().cloned());
    }
    true
}

/// Emit `(arg, arg, ...)` argument lists, declarations and definitions alike.
pub fn output_function_arguments(
    env: &mut EvaluatorEnvironment,
    tokens: &[Token],
    output: &mut GeneratorOutput,
    arguments: &[FunctionArgumentTokens],
    blame: &Token,
    to_source: bool,
    to_header: bool,
) -> bool {
    let mut rendered = Vec::new();
    add_lang_token_output(&mut rendered, OutputModifierFlags::OPEN_PAREN, blame);
    for (index, argument) in arguments.iter().enumerate() {
        let mut type_output = Vec::new();
        let mut after_name_output = Vec::new();
        if !tokenized_c_type_to_string_recursive(
            env,
            tokens,
            argument.start_type_index,
            true,
            &mut type_output,
            &mut after_name_output,
        ) {
            return false;
        }
        rendered.extend(type_output);
        let name_token = &tokens[argument.name_index];
        add_string_output(
            &mut rendered,
            name_token.contents.clone(),
            OutputModifierFlags::CONVERT_VARIABLE_NAME | OutputModifierFlags::SPACE_BEFORE,
            name_token,
        );
        rendered.extend(after_name_output);
        if index + 1 < arguments.len() {
            add_string_output(
                &mut rendered,
                ",",
                OutputModifierFlags::SPACE_AFTER,
                name_token,
            );
        }
    }
    add_lang_token_output(&mut rendered, OutputModifierFlags::CLOSE_PAREN, blame);

    if to_source {
        output.source.extend(rendered.iter().cloned());
    }
    if to_header {
        output.header.extend(rendered.iter().cloned());
    }
    true
}
