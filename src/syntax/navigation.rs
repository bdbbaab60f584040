//! Index-based expression navigation.
//!
//! An expression is a single non-paren token or a balanced paren
//! subsequence; either way it is identified by its start index. Arguments of
//! an invocation are numbered with the head symbol as argument 0. These
//! helpers do repeated linear walks instead of maintaining a tree; at typical
//! expression sizes that is cheaper than keeping a side structure in sync.
//!
//! All functions require parenthesis-validated sequences (see
//! [`super::validator`]) and panic on structurally impossible input, the same
//! way slice indexing does.

use crate::syntax::{Token, TokenKind};

/// Index of the close paren matching the open paren at `open_paren`.
///
/// Panics if `tokens[open_paren]` is not an open paren.
pub fn find_close_paren(tokens: &[Token], open_paren: usize) -> usize {
    assert!(
        tokens[open_paren].kind == TokenKind::OpenParen,
        "find_close_paren requires an open paren"
    );
    let mut depth = 0i32;
    for (index, token) in tokens.iter().enumerate().skip(open_paren) {
        match token.kind {
            TokenKind::OpenParen => depth += 1,
            TokenKind::CloseParen => {
                depth -= 1;
                if depth == 0 {
                    return index;
                }
            }
            _ => {}
        }
    }
    unreachable!("validated token sequence had no matching close paren")
}

/// Index of the last token of the expression starting at `start`: `start`
/// itself for an atom, the matching close paren for a paren expression.
pub fn find_expression_end(tokens: &[Token], start: usize) -> usize {
    match tokens[start].kind {
        TokenKind::OpenParen => find_close_paren(tokens, start),
        _ => start,
    }
}

/// Index of the first token of argument `desired` inside the invocation whose
/// open paren is at `open_paren`, or `None` if out of range. The invocation
/// head is argument 0. `end_token` is the invocation's close paren.
pub fn get_argument(
    tokens: &[Token],
    open_paren: usize,
    desired: usize,
    end_token: usize,
) -> Option<usize> {
    let mut at = open_paren + 1;
    let mut argument = 0usize;
    while at < end_token {
        if argument == desired {
            return Some(at);
        }
        at = find_expression_end(tokens, at) + 1;
        argument += 1;
    }
    None
}

/// Number of arguments in the invocation, counting the head. `(f a b)` has 3.
pub fn get_num_arguments(tokens: &[Token], open_paren: usize, end_token: usize) -> usize {
    let mut at = open_paren + 1;
    let mut count = 0usize;
    while at < end_token {
        at = find_expression_end(tokens, at) + 1;
        count += 1;
    }
    count
}

/// Whether the expression at `current` is the last argument before
/// `end_token`.
pub fn is_last_argument(tokens: &[Token], current: usize, end_token: usize) -> bool {
    find_expression_end(tokens, current) + 1 >= end_token
}

/// Index of the first token after the expression at `current`. Returns
/// `end_token` once there are no more arguments.
pub fn get_next_argument(tokens: &[Token], current: usize, end_token: usize) -> usize {
    let next = find_expression_end(tokens, current) + 1;
    next.min(end_token)
}

/// Narrow an invocation's (start, end) from its parens to the range of its
/// arguments: first token after the head through the token before the close.
/// Generators use this to walk a body.
pub fn strip_invocation(start: &mut usize, end: &mut usize) {
    *start += 2;
    *end -= 1;
}
