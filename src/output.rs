//! Generated-output fragment model.
//!
//! Generators never build strings directly; they emit ordered fragments into
//! a [`GeneratorOutput`], which keeps separate source and header streams. A
//! fragment is literal text, a language token (empty text whose modifier
//! flags tell the writer what punctuation to produce), or a splice marker
//! standing in for another output that will be expanded in place at write
//! time. Fragment order within a stream is final: the writer never reorders.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;

use crate::syntax::Token;

bitflags! {
    /// Formatting and conversion instructions consumed by the writer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OutputModifierFlags: u32 {
        const SPACE_BEFORE = 1 << 0;
        const SPACE_AFTER = 1 << 1;
        const NEWLINE_AFTER = 1 << 2;
        /// ` {`, newline, and an indent level for everything until the close.
        const OPEN_BLOCK = 1 << 3;
        const CLOSE_BLOCK = 1 << 4;
        /// `{` / `}` without block indentation, for initializer lists.
        const OPEN_LIST = 1 << 5;
        const CLOSE_LIST = 1 << 6;
        const OPEN_PAREN = 1 << 7;
        const CLOSE_PAREN = 1 << 8;
        const SEMICOLON = 1 << 9;
        const CONVERT_TYPE_NAME = 1 << 10;
        const CONVERT_FUNCTION_NAME = 1 << 11;
        const CONVERT_VARIABLE_NAME = 1 << 12;
        const SPLICE = 1 << 13;
    }
}

/// Shared handle to an output. Splice slots hand one of these to both the
/// fragment stream and whoever will fill it later.
pub type OutputHandle = Rc<RefCell<GeneratorOutput>>;

#[derive(Debug, Clone)]
pub enum FragmentPayload {
    Text(String),
    Splice(OutputHandle),
}

/// One unit of output plus the token it blames and the writer instructions.
#[derive(Debug, Clone)]
pub struct StringOutput {
    pub payload: FragmentPayload,
    pub modifiers: OutputModifierFlags,
    pub origin: Option<Token>,
}

impl StringOutput {
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            FragmentPayload::Text(text) => Some(text),
            FragmentPayload::Splice(_) => None,
        }
    }
}

/// Ordered source and header fragment streams for one definition or module.
#[derive(Debug, Clone, Default)]
pub struct GeneratorOutput {
    pub source: Vec<StringOutput>,
    pub header: Vec<StringOutput>,
}

impl GeneratorOutput {
    pub fn new_handle() -> OutputHandle {
        Rc::new(RefCell::new(GeneratorOutput::default()))
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty() && self.header.is_empty()
    }
}

/// Append literal text to one stream.
pub fn add_string_output(
    stream: &mut Vec<StringOutput>,
    text: impl Into<String>,
    modifiers: OutputModifierFlags,
    origin: &Token,
) {
    stream.push(StringOutput {
        payload: FragmentPayload::Text(text.into()),
        modifiers,
        origin: Some(origin.clone()),
    });
}

/// Append a language token: no text, only punctuation/formatting flags.
pub fn add_lang_token_output(
    stream: &mut Vec<StringOutput>,
    modifiers: OutputModifierFlags,
    origin: &Token,
) {
    stream.push(StringOutput {
        payload: FragmentPayload::Text(String::new()),
        modifiers,
        origin: Some(origin.clone()),
    });
}

/// Append a splice marker for `splice` to **both** streams of `output`. The
/// marker must reach both so that when the spliced output contributes to both
/// files, cross-stream ordering is preserved.
pub fn add_splice_output(output: &mut GeneratorOutput, splice: &OutputHandle, origin: &Token) {
    for stream in [&mut output.source, &mut output.header] {
        stream.push(StringOutput {
            payload: FragmentPayload::Splice(Rc::clone(splice)),
            modifiers: OutputModifierFlags::SPLICE,
            origin: Some(origin.clone()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::tokenize;

    #[test]
    fn splice_markers_reach_both_streams() {
        let tokens = tokenize("x", "test.cdl").unwrap();
        let mut output = GeneratorOutput::default();
        let slot = GeneratorOutput::new_handle();
        add_splice_output(&mut output, &slot, &tokens[0]);

        assert_eq!(output.source.len(), 1);
        assert_eq!(output.header.len(), 1);
        assert!(output.source[0].modifiers.contains(OutputModifierFlags::SPLICE));
        let FragmentPayload::Splice(linked) = &output.header[0].payload else {
            panic!("expected splice payload");
        };
        assert!(Rc::ptr_eq(linked, &slot));
    }

    #[test]
    fn fragment_order_is_append_order() {
        let tokens = tokenize("a b c", "test.cdl").unwrap();
        let mut stream = Vec::new();
        for token in &tokens {
            add_string_output(
                &mut stream,
                token.contents.clone(),
                OutputModifierFlags::SPACE_AFTER,
                token,
            );
        }
        let texts: Vec<_> = stream.iter().filter_map(|f| f.text()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }
}
