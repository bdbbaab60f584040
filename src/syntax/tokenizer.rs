//! Character-level tokenizer.
//!
//! The surface syntax has four token kinds: `(`, `)`, double-quoted strings
//! (escapes: `\"`, `\\`, `\n`, `\t`), and symbols, a symbol being a maximal
//! run of non-whitespace, non-paren, non-quote characters. `;` comments run
//! to end of line. Strings may not span lines.

use std::rc::Rc;

use crate::errors::{ErrorKind, SourceContext, TranspileError};
use crate::syntax::{Token, TokenKind};

/// Tokenize a whole file. `line_number` starts at 1; offsets are byte offsets
/// into `source_text` so error spans label the original content.
pub fn tokenize(source_text: &str, filename: &str) -> Result<Vec<Token>, TranspileError> {
    let source: Rc<str> = Rc::from(filename);
    let mut tokens = Vec::new();
    let mut offset = 0usize;
    for (line_index, line) in source_text.split('\n').enumerate() {
        tokenize_line(
            line,
            &source,
            line_index as u32 + 1,
            offset,
            source_text,
            &mut tokens,
        )?;
        offset += line.len() + 1;
    }
    Ok(tokens)
}

/// Tokenize a single line, appending to `tokens`. `line_offset` is the byte
/// offset of the line start in the full file content.
pub fn tokenize_line(
    line: &str,
    source: &Rc<str>,
    line_number: u32,
    line_offset: usize,
    full_content: &str,
    tokens: &mut Vec<Token>,
) -> Result<(), TranspileError> {
    let bytes = line.as_bytes();
    let mut at = 0usize;

    while at < bytes.len() {
        let c = bytes[at];
        match c {
            b';' => break,
            b'(' | b')' => {
                tokens.push(make_token(
                    if c == b'(' {
                        TokenKind::OpenParen
                    } else {
                        TokenKind::CloseParen
                    },
                    String::new(),
                    source,
                    line_number,
                    line_offset,
                    at,
                    at + 1,
                ));
                at += 1;
            }
            b'"' => {
                at = tokenize_string(
                    line,
                    at,
                    source,
                    line_number,
                    line_offset,
                    full_content,
                    tokens,
                )?;
            }
            c if c.is_ascii_whitespace() => {
                at += 1;
            }
            _ => {
                let start = at;
                while at < bytes.len() && !is_symbol_terminator(bytes[at]) {
                    at += 1;
                }
                tokens.push(make_token(
                    TokenKind::Symbol,
                    line[start..at].to_string(),
                    source,
                    line_number,
                    line_offset,
                    start,
                    at,
                ));
            }
        }
    }

    Ok(())
}

fn is_symbol_terminator(c: u8) -> bool {
    c.is_ascii_whitespace() || matches!(c, b'(' | b')' | b'"' | b';')
}

/// Scan a string literal starting at the opening quote. Returns the column
/// just past the closing quote.
fn tokenize_string(
    line: &str,
    open_quote: usize,
    source: &Rc<str>,
    line_number: u32,
    line_offset: usize,
    full_content: &str,
    tokens: &mut Vec<Token>,
) -> Result<usize, TranspileError> {
    let bytes = line.as_bytes();
    let mut contents = String::new();
    let mut at = open_quote + 1;

    while at < bytes.len() {
        match bytes[at] {
            b'"' => {
                tokens.push(make_token(
                    TokenKind::String,
                    contents,
                    source,
                    line_number,
                    line_offset,
                    open_quote,
                    at + 1,
                ));
                return Ok(at + 1);
            }
            b'\\' => {
                let escape = bytes.get(at + 1).copied();
                match escape {
                    Some(b'"') => contents.push('"'),
                    Some(b'\\') => contents.push('\\'),
                    Some(b'n') => contents.push('\n'),
                    Some(b't') => contents.push('\t'),
                    other => {
                        let bad = make_token(
                            TokenKind::String,
                            String::new(),
                            source,
                            line_number,
                            line_offset,
                            at,
                            at + 2,
                        );
                        return Err(TranspileError::at_token(
                            ErrorKind::Tokenize {
                                message: match other {
                                    Some(c) => {
                                        format!("unrecognized escape '\\{}'", c as char)
                                    }
                                    None => "escape at end of line".to_string(),
                                },
                            },
                            &bad,
                            &SourceContext::from_file(source.as_ref(), full_content),
                        ));
                    }
                }
                at += 2;
            }
            _ => {
                contents.push(line[at..].chars().next().unwrap_or('\u{FFFD}'));
                at += line[at..].chars().next().map_or(1, char::len_utf8);
            }
        }
    }

    let bad = make_token(
        TokenKind::String,
        String::new(),
        source,
        line_number,
        line_offset,
        open_quote,
        bytes.len(),
    );
    Err(TranspileError::at_token(
        ErrorKind::Tokenize {
            message: "unterminated string".to_string(),
        },
        &bad,
        &SourceContext::from_file(source.as_ref(), full_content),
    ))
}

fn make_token(
    kind: TokenKind,
    contents: String,
    source: &Rc<str>,
    line: u32,
    line_offset: usize,
    column_start: usize,
    column_end: usize,
) -> Token {
    Token {
        kind,
        contents,
        source: Rc::clone(source),
        line,
        column_start: column_start as u32,
        column_end: column_end as u32,
        offset: line_offset + column_start,
        length: column_end - column_start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, "test.cdl")
            .unwrap()
            .iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn simple_invocation() {
        let tokens = tokenize("(defun main ())", "test.cdl").unwrap();
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![
                TokenKind::OpenParen,
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::OpenParen,
                TokenKind::CloseParen,
                TokenKind::CloseParen,
            ]
        );
        assert_eq!(tokens[1].contents, "defun");
        assert_eq!(tokens[2].contents, "main");
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("(a) ; trailing (ignored)\n; whole line\n(b)"),
            vec![
                TokenKind::OpenParen,
                TokenKind::Symbol,
                TokenKind::CloseParen,
                TokenKind::OpenParen,
                TokenKind::Symbol,
                TokenKind::CloseParen,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#"("hello \"world\"\n\t\\")"#, "test.cdl").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::String);
        assert_eq!(tokens[1].contents, "hello \"world\"\n\t\\");
    }

    #[test]
    fn unterminated_string_errors() {
        let result = tokenize("(\"oops)", "test.cdl");
        let err = result.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Tokenize { .. }));
        assert_eq!(err.source_info.line, 1);
    }

    #[test]
    fn unknown_escape_errors() {
        let err = tokenize(r#"("\q")"#, "test.cdl").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Tokenize { .. }));
    }

    #[test]
    fn coordinates_track_lines_and_columns() {
        let tokens = tokenize("(a\n  b)", "test.cdl").unwrap();
        let b = &tokens[2];
        assert_eq!(b.contents, "b");
        assert_eq!(b.line, 2);
        assert_eq!(b.column_start, 2);
        assert_eq!(b.offset, 5);
    }

    #[test]
    fn symbols_stop_at_parens_and_quotes() {
        let tokens = tokenize("a(b\"c\"", "test.cdl").unwrap();
        assert_eq!(tokens[0].contents, "a");
        assert_eq!(tokens[1].kind, TokenKind::OpenParen);
        assert_eq!(tokens[2].contents, "b");
        assert_eq!(tokens[3].kind, TokenKind::String);
    }
}
