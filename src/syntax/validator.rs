//! Parenthesis validation.
//!
//! Runs once after tokenization. Every later phase assumes balanced
//! parentheses, so the navigation helpers can panic on malformed input
//! instead of threading errors through every walk.

use crate::errors::{ErrorKind, SourceContext, TranspileError};
use crate::syntax::{Token, TokenKind};

/// Check that every open paren has a matching close and vice versa. On
/// failure, blames the unmatched token: the innermost unclosed open, or the
/// first stray close.
pub fn validate_parentheses(
    tokens: &[Token],
    source: &SourceContext,
) -> Result<(), TranspileError> {
    let mut open_stack: Vec<&Token> = Vec::new();

    for token in tokens {
        match token.kind {
            TokenKind::OpenParen => open_stack.push(token),
            TokenKind::CloseParen => {
                if open_stack.pop().is_none() {
                    return Err(TranspileError::at_token(
                        ErrorKind::ParenBalance {
                            message: "closing parenthesis without a matching open".to_string(),
                        },
                        token,
                        source,
                    ));
                }
            }
            _ => {}
        }
    }

    if let Some(unclosed) = open_stack.last() {
        return Err(TranspileError::at_token(
            ErrorKind::ParenBalance {
                message: "unmatched open parenthesis".to_string(),
            },
            unclosed,
            source,
        )
        .with_help("every '(' must have a matching ')'"));
    }

    Ok(())
}
