//! Final serialization of generated output.
//!
//! The writer walks a root [`GeneratorOutput`], expanding splice fragments
//! recursively in place, and applies modifier flags to produce whitespace,
//! indentation, punctuation, and identifier case conversion. It never
//! reorders fragments; ordering is entirely the evaluator's responsibility.
//! Two files come out per module: `<stem>.cpp`, which starts with an
//! `#include` of the companion `<stem>.hpp`, and the header itself.

use std::path::{Path, PathBuf};

use crate::errors::{ErrorKind, TranspileError};
use crate::output::{FragmentPayload, GeneratorOutput, OutputModifierFlags, StringOutput};

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStyleMode {
    /// Leave as written, sanitized to a valid C identifier.
    None,
    SnakeCase,
    CamelCase,
    PascalCase,
    /// PascalCase only for lispy names (ones containing `-`); `int` stays
    /// `int` while `my-struct` becomes `MyStruct`.
    PascalCaseIfLispy,
}

/// Per-category identifier conversion. The surface language allows `-` in
/// names; C does not, so even `None` sanitizes.
#[derive(Debug, Clone, Copy)]
pub struct NameStyleSettings {
    pub type_name_mode: NameStyleMode,
    pub function_name_mode: NameStyleMode,
    pub variable_name_mode: NameStyleMode,
}

impl Default for NameStyleSettings {
    fn default() -> Self {
        Self {
            type_name_mode: NameStyleMode::PascalCaseIfLispy,
            function_name_mode: NameStyleMode::SnakeCase,
            variable_name_mode: NameStyleMode::SnakeCase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BraceStyle {
    /// `if (x) {` on one line.
    EndOfLine,
    /// Brace on its own line.
    OwnLine,
}

#[derive(Debug, Clone, Copy)]
pub struct WriterFormatSettings {
    pub indent_width: usize,
    pub brace_style: BraceStyle,
}

impl Default for WriterFormatSettings {
    fn default() -> Self {
        Self {
            indent_width: 4,
            brace_style: BraceStyle::EndOfLine,
        }
    }
}

/// Heading and footer strings are emitted verbatim. The source file always
/// begins with the companion-header include before its heading.
#[derive(Debug, Clone)]
pub struct WriterOutputSettings {
    /// The input filename; its stem names the emitted files.
    pub source_transpiler_filename: String,
    pub output_directory: PathBuf,
    pub source_heading: Option<String>,
    pub source_footer: Option<String>,
    pub header_heading: Option<String>,
    pub header_footer: Option<String>,
}

impl WriterOutputSettings {
    pub fn for_file(filename: impl Into<String>) -> Self {
        Self {
            source_transpiler_filename: filename.into(),
            output_directory: PathBuf::from("."),
            source_heading: None,
            source_footer: None,
            header_heading: Some("#pragma once\n".to_string()),
            header_footer: None,
        }
    }

    pub fn stem(&self) -> String {
        Path::new(&self.source_transpiler_filename)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_transpiler_filename.clone())
    }
}

/// Paths of the files a write produced.
#[derive(Debug, Clone)]
pub struct WrittenOutput {
    pub source_filename: PathBuf,
    pub header_filename: PathBuf,
}

// ============================================================================
// RENDERING
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Source,
    Header,
}

struct WriterState<'a> {
    buffer: String,
    indent_level: usize,
    at_line_start: bool,
    pending_space: bool,
    name_settings: &'a NameStyleSettings,
    format_settings: &'a WriterFormatSettings,
}

impl<'a> WriterState<'a> {
    fn new(name_settings: &'a NameStyleSettings, format_settings: &'a WriterFormatSettings) -> Self {
        Self {
            buffer: String::new(),
            indent_level: 0,
            at_line_start: true,
            pending_space: false,
            name_settings,
            format_settings,
        }
    }

    fn emit(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.at_line_start {
            for _ in 0..self.indent_level * self.format_settings.indent_width {
                self.buffer.push(' ');
            }
            self.at_line_start = false;
        } else if self.pending_space {
            self.buffer.push(' ');
        }
        self.pending_space = false;
        self.buffer.push_str(text);
    }

    fn newline(&mut self) {
        self.buffer.push('\n');
        self.at_line_start = true;
        self.pending_space = false;
    }
}

/// Render one stream (with splices expanded) to text.
fn render_fragments(fragments: &[StringOutput], stream: OutputStream, state: &mut WriterState) {
    for fragment in fragments {
        match &fragment.payload {
            FragmentPayload::Splice(spliced) => {
                let spliced = spliced.borrow();
                let inner = match stream {
                    OutputStream::Source => &spliced.source,
                    OutputStream::Header => &spliced.header,
                };
                render_fragments(inner, stream, state);
            }
            FragmentPayload::Text(text) => {
                render_text_fragment(text, fragment.modifiers, state);
            }
        }
    }
}

fn render_text_fragment(text: &str, modifiers: OutputModifierFlags, state: &mut WriterState) {
    if modifiers.contains(OutputModifierFlags::SPACE_BEFORE) {
        state.pending_space = true;
    }

    let converted = convert_fragment_name(text, modifiers, state.name_settings);
    state.emit(&converted);

    if modifiers.contains(OutputModifierFlags::OPEN_PAREN) {
        state.emit("(");
    }
    if modifiers.contains(OutputModifierFlags::CLOSE_PAREN) {
        state.emit(")");
    }
    if modifiers.contains(OutputModifierFlags::OPEN_LIST) {
        state.emit("{");
    }
    if modifiers.contains(OutputModifierFlags::CLOSE_LIST) {
        state.emit("}");
    }
    if modifiers.contains(OutputModifierFlags::OPEN_BLOCK) {
        match state.format_settings.brace_style {
            BraceStyle::EndOfLine => {
                state.pending_space = !state.at_line_start;
                state.emit("{");
            }
            BraceStyle::OwnLine => {
                if !state.at_line_start {
                    state.newline();
                }
                state.emit("{");
            }
        }
        state.newline();
        state.indent_level += 1;
    }
    if modifiers.contains(OutputModifierFlags::CLOSE_BLOCK) {
        state.indent_level = state.indent_level.saturating_sub(1);
        if !state.at_line_start {
            state.newline();
        }
        state.emit("}");
        state.newline();
    }
    if modifiers.contains(OutputModifierFlags::SEMICOLON) {
        state.emit(";");
        state.newline();
    }
    if modifiers.contains(OutputModifierFlags::SPACE_AFTER) {
        state.pending_space = true;
    }
    if modifiers.contains(OutputModifierFlags::NEWLINE_AFTER) {
        state.newline();
    }
}

fn convert_fragment_name(
    text: &str,
    modifiers: OutputModifierFlags,
    settings: &NameStyleSettings,
) -> String {
    let mode = if modifiers.contains(OutputModifierFlags::CONVERT_TYPE_NAME) {
        Some(settings.type_name_mode)
    } else if modifiers.contains(OutputModifierFlags::CONVERT_FUNCTION_NAME) {
        Some(settings.function_name_mode)
    } else if modifiers.contains(OutputModifierFlags::CONVERT_VARIABLE_NAME) {
        Some(settings.variable_name_mode)
    } else {
        None
    };
    match mode {
        Some(mode) => convert_name(text, mode),
        None => text.to_string(),
    }
}

/// Convert a surface-language name to the configured C identifier style.
/// Words are split on `-` and `_`; inner capitalization is preserved except
/// where the style capitalizes word heads. Single lowercase words come
/// through `SnakeCase` untouched, so `main` stays `main`.
pub fn convert_name(name: &str, mode: NameStyleMode) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let words: Vec<&str> = sanitized.split(['-', '_']).filter(|w| !w.is_empty()).collect();
    if words.is_empty() {
        return "_".to_string();
    }

    match mode {
        NameStyleMode::None => sanitized.replace('-', "_"),
        NameStyleMode::SnakeCase => words.join("_"),
        NameStyleMode::CamelCase => {
            let mut converted = words[0].to_string();
            for word in &words[1..] {
                converted.push_str(&capitalize_head(word));
            }
            converted
        }
        NameStyleMode::PascalCase => words.iter().map(|w| capitalize_head(w)).collect(),
        NameStyleMode::PascalCaseIfLispy => {
            if name.contains('-') {
                words.iter().map(|w| capitalize_head(w)).collect()
            } else {
                sanitized.replace('-', "_")
            }
        }
    }
}

fn capitalize_head(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Render both streams to strings, headings and footers included. The file
/// writer uses this; tests call it directly.
pub fn render_generator_output(
    output: &GeneratorOutput,
    name_settings: &NameStyleSettings,
    format_settings: &WriterFormatSettings,
    output_settings: &WriterOutputSettings,
) -> (String, String) {
    let stem = output_settings.stem();

    let mut source_state = WriterState::new(name_settings, format_settings);
    source_state
        .buffer
        .push_str(&format!("#include \"{stem}.hpp\"\n"));
    if let Some(heading) = &output_settings.source_heading {
        source_state.buffer.push_str(heading);
    }
    render_fragments(&output.source, OutputStream::Source, &mut source_state);
    if !source_state.at_line_start {
        source_state.newline();
    }
    if let Some(footer) = &output_settings.source_footer {
        source_state.buffer.push_str(footer);
    }

    let mut header_state = WriterState::new(name_settings, format_settings);
    if let Some(heading) = &output_settings.header_heading {
        header_state.buffer.push_str(heading);
    }
    render_fragments(&output.header, OutputStream::Header, &mut header_state);
    if !header_state.at_line_start {
        header_state.newline();
    }
    if let Some(footer) = &output_settings.header_footer {
        header_state.buffer.push_str(footer);
    }

    (source_state.buffer, header_state.buffer)
}

/// Write `<stem>.cpp` and `<stem>.hpp` into the configured directory.
pub fn write_generator_output(
    output: &GeneratorOutput,
    name_settings: &NameStyleSettings,
    format_settings: &WriterFormatSettings,
    output_settings: &WriterOutputSettings,
) -> Result<WrittenOutput, TranspileError> {
    let (source_text, header_text) =
        render_generator_output(output, name_settings, format_settings, output_settings);

    let stem = output_settings.stem();
    let source_filename = output_settings.output_directory.join(format!("{stem}.cpp"));
    let header_filename = output_settings.output_directory.join(format!("{stem}.hpp"));

    for (path, contents) in [(&source_filename, &source_text), (&header_filename, &header_text)]
    {
        std::fs::write(path, contents).map_err(|io_error| {
            TranspileError::at_file(
                ErrorKind::Write {
                    message: format!("could not write {}: {io_error}", path.display()),
                },
                &output_settings.source_transpiler_filename,
            )
        })?;
    }

    Ok(WrittenOutput {
        source_filename,
        header_filename,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{
        add_lang_token_output, add_splice_output, add_string_output,
    };
    use crate::syntax::tokenize;
    use pretty_assertions::assert_eq;

    fn blame() -> crate::syntax::Token {
        tokenize("x", "test.cdl").unwrap().remove(0)
    }

    fn render_source(output: &GeneratorOutput) -> String {
        let settings = WriterOutputSettings::for_file("test.cdl");
        let (source, _) = render_generator_output(
            output,
            &NameStyleSettings::default(),
            &WriterFormatSettings::default(),
            &settings,
        );
        source
    }

    #[test]
    fn name_conversion_styles() {
        assert_eq!(convert_name("my-func", NameStyleMode::SnakeCase), "my_func");
        assert_eq!(convert_name("my-func", NameStyleMode::CamelCase), "myFunc");
        assert_eq!(convert_name("my-func", NameStyleMode::PascalCase), "MyFunc");
        assert_eq!(convert_name("my-func", NameStyleMode::None), "my_func");
        assert_eq!(convert_name("main", NameStyleMode::SnakeCase), "main");
        assert_eq!(convert_name("int", NameStyleMode::PascalCase), "Int");
        assert_eq!(convert_name("int", NameStyleMode::PascalCaseIfLispy), "int");
        assert_eq!(
            convert_name("my-struct", NameStyleMode::PascalCaseIfLispy),
            "MyStruct"
        );
    }

    #[test]
    fn block_indentation_and_semicolons() {
        let token = blame();
        let mut output = GeneratorOutput::default();
        add_string_output(
            &mut output.source,
            "int",
            OutputModifierFlags::empty(),
            &token,
        );
        add_string_output(
            &mut output.source,
            "main",
            OutputModifierFlags::SPACE_BEFORE,
            &token,
        );
        add_lang_token_output(
            &mut output.source,
            OutputModifierFlags::OPEN_PAREN | OutputModifierFlags::CLOSE_PAREN,
            &token,
        );
        add_lang_token_output(&mut output.source, OutputModifierFlags::OPEN_BLOCK, &token);
        add_string_output(
            &mut output.source,
            "return",
            OutputModifierFlags::SPACE_AFTER,
            &token,
        );
        add_string_output(&mut output.source, "0", OutputModifierFlags::empty(), &token);
        add_lang_token_output(&mut output.source, OutputModifierFlags::SEMICOLON, &token);
        add_lang_token_output(&mut output.source, OutputModifierFlags::CLOSE_BLOCK, &token);

        let rendered = render_source(&output);
        assert_eq!(
            rendered,
            "#include \"test.hpp\"\nint main() {\n    return 0;\n}\n"
        );
    }

    #[test]
    fn splices_expand_in_place_per_stream() {
        let token = blame();
        let mut root = GeneratorOutput::default();
        add_string_output(&mut root.source, "before", OutputModifierFlags::NEWLINE_AFTER, &token);

        let spliced = GeneratorOutput::new_handle();
        add_string_output(
            &mut spliced.borrow_mut().source,
            "middle_source",
            OutputModifierFlags::NEWLINE_AFTER,
            &token,
        );
        add_string_output(
            &mut spliced.borrow_mut().header,
            "middle_header",
            OutputModifierFlags::NEWLINE_AFTER,
            &token,
        );
        add_splice_output(&mut root, &spliced, &token);

        add_string_output(&mut root.source, "after", OutputModifierFlags::NEWLINE_AFTER, &token);

        let settings = WriterOutputSettings::for_file("test.cdl");
        let (source, header) = render_generator_output(
            &root,
            &NameStyleSettings::default(),
            &WriterFormatSettings::default(),
            &settings,
        );
        assert_eq!(
            source,
            "#include \"test.hpp\"\nbefore\nmiddle_source\nafter\n"
        );
        assert_eq!(header, "#pragma once\nmiddle_header\n");
    }

    #[test]
    fn ordering_is_preserved_through_nested_splices() {
        let token = blame();
        let mut root = GeneratorOutput::default();
        let outer = GeneratorOutput::new_handle();
        let inner = GeneratorOutput::new_handle();

        add_string_output(
            &mut inner.borrow_mut().source,
            "b",
            OutputModifierFlags::NEWLINE_AFTER,
            &token,
        );
        {
            let mut outer_mut = outer.borrow_mut();
            add_string_output(&mut outer_mut.source, "a", OutputModifierFlags::NEWLINE_AFTER, &token);
            add_splice_output(&mut outer_mut, &inner, &token);
            add_string_output(&mut outer_mut.source, "c", OutputModifierFlags::NEWLINE_AFTER, &token);
        }
        add_splice_output(&mut root, &outer, &token);
        add_string_output(&mut root.source, "d", OutputModifierFlags::NEWLINE_AFTER, &token);

        let rendered = render_source(&root);
        assert_eq!(rendered, "#include \"test.hpp\"\na\nb\nc\nd\n");
    }

    #[test]
    fn own_line_braces() {
        let token = blame();
        let mut output = GeneratorOutput::default();
        add_string_output(&mut output.source, "void f()", OutputModifierFlags::empty(), &token);
        add_lang_token_output(&mut output.source, OutputModifierFlags::OPEN_BLOCK, &token);
        add_lang_token_output(&mut output.source, OutputModifierFlags::CLOSE_BLOCK, &token);

        let settings = WriterOutputSettings::for_file("test.cdl");
        let format = WriterFormatSettings {
            brace_style: BraceStyle::OwnLine,
            ..Default::default()
        };
        let (source, _) = render_generator_output(
            &output,
            &NameStyleSettings::default(),
            &format,
            &settings,
        );
        assert_eq!(source, "#include \"test.hpp\"\nvoid f()\n{\n}\n");
    }

    #[test]
    fn files_are_written_to_disk() {
        let directory = tempfile::tempdir().unwrap();
        let token = blame();
        let mut output = GeneratorOutput::default();
        add_string_output(
            &mut output.source,
            "int x",
            OutputModifierFlags::SEMICOLON,
            &token,
        );

        let mut settings = WriterOutputSettings::for_file("widget.cdl");
        settings.output_directory = directory.path().to_path_buf();
        let written = write_generator_output(
            &output,
            &NameStyleSettings::default(),
            &WriterFormatSettings::default(),
            &settings,
        )
        .unwrap();

        let source_text = std::fs::read_to_string(&written.source_filename).unwrap();
        assert!(source_text.starts_with("#include \"widget.hpp\"\n"));
        assert!(written.header_filename.ends_with("widget.hpp"));
        assert!(written.header_filename.exists());
    }
}
