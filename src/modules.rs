//! The module manager: per-file evaluation, cross-module resolution, output
//! writing, and the final target-language build with its command-CRC cache.
//!
//! All modules share one [`EvaluatorEnvironment`], so a definition in one
//! file resolves references from another. Top-level forms attach their
//! references to a single global pseudo-definition; each module keeps its own
//! generated output.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::build::{run_process, ProcessCommand};
use crate::cache::{
    artifact_needs_rebuild, command_crc, load_command_crcs, store_command_crcs, ArtifactCrcTable,
};
use crate::errors::{ErrorKind, SourceContext, TranspileError};
use crate::evaluator::{
    evaluate_generate_all_recursive, evaluate_resolve_references, make_module_pseudo_token,
    CompileTimeBuildDriver, DefinitionState, EvaluatorContext, EvaluatorEnvironment,
    EvaluatorScope, NullCompileTimeBuildDriver,
};
use crate::generators::import_fundamental_generators;
use crate::output::{FragmentPayload, GeneratorOutput, OutputHandle, OutputModifierFlags, StringOutput};
use crate::syntax::{tokenize, validate_parentheses, Token, TokenSeq};
use crate::writer::{
    write_generator_output, NameStyleSettings, WriterFormatSettings, WriterOutputSettings,
    WrittenOutput,
};

/// Published hook signature. Hooks registered with any other string fail
/// validation at registration time, catching drift between embedders and the
/// manager.
pub const MODULE_PRE_BUILD_HOOK_SIGNATURE: &str =
    "fn(manager: &mut ModuleManager, module_index: usize) -> bool";

pub type ModulePreBuildHook = fn(&mut ModuleManager, usize) -> bool;

const COMMAND_CACHE_FILENAME: &str = "command_cache.json";

/// One input file and everything derived from it.
pub struct Module {
    pub filename: String,
    pub tokens: TokenSeq,
    pub generated_output: OutputHandle,
    /// Set once the writer has produced the files.
    pub source_output_name: Option<PathBuf>,
    pub header_output_name: Option<PathBuf>,
    /// Skip compilation and linking, e.g. for declaration-only files.
    pub skip_build: bool,
    pub build_time_build_command: ProcessCommand,
    pub build_time_link_command: ProcessCommand,
    pub pre_build_hooks: Vec<ModulePreBuildHook>,
}

impl Module {
    pub fn stem(&self) -> String {
        Path::new(&self.filename)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.filename.clone())
    }

    /// Register a pre-build hook, validating the caller's idea of the
    /// signature against the published one.
    pub fn register_pre_build_hook(
        &mut self,
        hook: ModulePreBuildHook,
        claimed_signature: &str,
    ) -> Result<(), TranspileError> {
        if claimed_signature != MODULE_PRE_BUILD_HOOK_SIGNATURE {
            return Err(TranspileError::at_file(
                ErrorKind::CompileTimeBuild {
                    message: format!(
                        "pre-build hook signature mismatch: expected '{MODULE_PRE_BUILD_HOOK_SIGNATURE}', got '{claimed_signature}'"
                    ),
                },
                &self.filename,
            ));
        }
        self.pre_build_hooks.push(hook);
        Ok(())
    }
}

pub struct ModuleManager {
    pub environment: EvaluatorEnvironment,
    pub modules: Vec<Module>,
    pub build_output_dir: PathBuf,
    pub name_settings: NameStyleSettings,
    pub format_settings: WriterFormatSettings,
    global_pseudo_invocation_name: Rc<Token>,
    cached_command_crcs: ArtifactCrcTable,
    new_command_crcs: ArtifactCrcTable,
    build_driver: Box<dyn CompileTimeBuildDriver>,
}

impl ModuleManager {
    pub fn new(build_output_dir: impl Into<PathBuf>) -> Self {
        Self::with_build_driver(build_output_dir, Box::new(NullCompileTimeBuildDriver))
    }

    pub fn with_build_driver(
        build_output_dir: impl Into<PathBuf>,
        build_driver: Box<dyn CompileTimeBuildDriver>,
    ) -> Self {
        let build_output_dir = build_output_dir.into();
        let mut environment = EvaluatorEnvironment::new();
        import_fundamental_generators(&mut environment);
        let global_pseudo_invocation_name = make_module_pseudo_token("<global>");
        environment.ensure_module_definition(Rc::clone(&global_pseudo_invocation_name));
        let cached_command_crcs = load_command_crcs(&build_output_dir.join(COMMAND_CACHE_FILENAME));

        Self {
            environment,
            modules: Vec::new(),
            build_output_dir,
            name_settings: NameStyleSettings::default(),
            format_settings: WriterFormatSettings::default(),
            global_pseudo_invocation_name,
            cached_command_crcs,
            new_command_crcs: ArtifactCrcTable::new(),
            build_driver,
        }
    }

    /// Read, tokenize, and paren-validate a file, registering its content for
    /// diagnostics.
    pub fn module_load_tokenize_validate(
        &mut self,
        filename: &str,
    ) -> Result<TokenSeq, TranspileError> {
        let contents = std::fs::read_to_string(filename).map_err(|io_error| {
            TranspileError::at_file(
                ErrorKind::Tokenize {
                    message: format!("could not open {filename}: {io_error}"),
                },
                filename,
            )
        })?;
        let source = SourceContext::from_file(filename, contents.clone());
        self.environment.register_source(source.clone());

        let tokens = tokenize(&contents, filename)?;
        validate_parentheses(&tokens, &source)?;
        Ok(Rc::new(tokens))
    }

    /// Load a file and evaluate it into a new module. Tokenization and
    /// validation failures return `Err`; evaluation errors accumulate in the
    /// environment (so sibling definitions still report) and show up via
    /// [`ModuleManager::has_errors`].
    pub fn add_evaluate_file(&mut self, filename: &str) -> Result<usize, TranspileError> {
        let tokens = self.module_load_tokenize_validate(filename)?;

        let module = Module {
            filename: filename.to_string(),
            tokens: Rc::clone(&tokens),
            generated_output: GeneratorOutput::new_handle(),
            source_output_name: None,
            header_output_name: None,
            skip_build: false,
            build_time_build_command: ProcessCommand::default_build_command(),
            build_time_link_command: ProcessCommand::default_link_command(),
            pre_build_hooks: Vec::new(),
        };
        let module_index = self.modules.len();
        let output_handle = Rc::clone(&module.generated_output);
        self.modules.push(module);

        let context = EvaluatorContext {
            scope: EvaluatorScope::Module,
            definition_name: Rc::clone(&self.global_pseudo_invocation_name),
            is_required: true,
        };
        let body_delimiter = StringOutput {
            payload: FragmentPayload::Text(String::new()),
            modifiers: OutputModifierFlags::NEWLINE_AFTER,
            origin: None,
        };
        let end = tokens.len();
        evaluate_generate_all_recursive(
            &mut self.environment,
            &context,
            &tokens,
            0,
            end,
            Some(&body_delimiter),
            &mut output_handle.borrow_mut(),
        );
        Ok(module_index)
    }

    /// Run reference resolution to its fixed point across every module.
    pub fn evaluate_resolve_references(&mut self) -> bool {
        evaluate_resolve_references(&mut self.environment, self.build_driver.as_mut())
    }

    pub fn has_errors(&self) -> bool {
        !self.environment.errors.is_empty()
    }

    /// Write each module's `.cpp`/`.hpp` pair. Refuses to run while the
    /// environment holds errors.
    pub fn write_generated_output(&mut self) -> Result<Vec<WrittenOutput>, TranspileError> {
        if self.has_errors() {
            return Err(TranspileError::at_file(
                ErrorKind::Write {
                    message: format!(
                        "refusing to write output with {} error(s) outstanding",
                        self.environment.errors.len()
                    ),
                },
                "<output>",
            ));
        }
        std::fs::create_dir_all(&self.build_output_dir).map_err(|io_error| {
            TranspileError::at_file(
                ErrorKind::Write {
                    message: format!(
                        "could not create {}: {io_error}",
                        self.build_output_dir.display()
                    ),
                },
                "<output>",
            )
        })?;

        let mut written = Vec::with_capacity(self.modules.len());
        for module in &mut self.modules {
            let mut output_settings = WriterOutputSettings::for_file(&module.filename);
            output_settings.output_directory = self.build_output_dir.clone();
            let result = write_generator_output(
                &module.generated_output.borrow(),
                &self.name_settings,
                &self.format_settings,
                &output_settings,
            )?;
            module.source_output_name = Some(result.source_filename.clone());
            module.header_output_name = Some(result.header_filename.clone());
            written.push(result);
        }

        for name in self.environment.definition_order.clone() {
            if let Some(definition) = self.environment.find_definition_mut(&name) {
                if definition.state == DefinitionState::Resolved {
                    definition.state = DefinitionState::Emitted;
                }
            }
        }
        Ok(written)
    }

    /// Compile and link everything not marked `skip_build`, consulting the
    /// command-CRC cache to skip artifacts whose commands are unchanged.
    /// Successful final outputs are appended to `built_outputs`.
    pub fn build(&mut self, built_outputs: &mut Vec<PathBuf>) -> bool {
        for module_index in 0..self.modules.len() {
            let hooks = self.modules[module_index].pre_build_hooks.clone();
            for hook in hooks {
                if !hook(self, module_index) {
                    let filename = self.modules[module_index].filename.clone();
                    self.environment.errors.push(TranspileError::at_file(
                        ErrorKind::CompileTimeBuild {
                            message: "pre-build hook failed".to_string(),
                        },
                        &filename,
                    ));
                    return false;
                }
            }
        }

        let mut object_files: Vec<PathBuf> = Vec::new();
        let mut link_command: Option<ProcessCommand> = None;
        let mut executable_stem: Option<String> = None;

        for module in &self.modules {
            if module.skip_build {
                continue;
            }
            let Some(source_path) = module.source_output_name.clone() else {
                self.environment.errors.push(TranspileError::at_file(
                    ErrorKind::CompileTimeBuild {
                        message: "module has not been written; build must follow write".to_string(),
                    },
                    &module.filename,
                ));
                return false;
            };

            let object_path = self.build_output_dir.join(format!("{}.o", module.stem()));
            let source_text = source_path.display().to_string();
            let object_text = object_path.display().to_string();
            let command_line = module
                .build_time_build_command
                .command_line(&[source_text.as_str()], &object_text);
            let crc = command_crc(&command_line);
            self.new_command_crcs.insert(object_text.clone(), crc);

            if artifact_needs_rebuild(&self.cached_command_crcs, &object_text, crc)
                || !object_path.exists()
            {
                if let Err(build_error) = run_process(
                    &module.build_time_build_command,
                    &[source_text.as_str()],
                    &object_text,
                ) {
                    self.environment
                        .errors
                        .push(build_error.into_transpile_error(&module.filename));
                    return false;
                }
            }
            object_files.push(object_path);
            if link_command.is_none() {
                link_command = Some(module.build_time_link_command.clone());
                executable_stem = Some(module.stem());
            }
        }

        if let (Some(link_command), Some(stem)) = (link_command, executable_stem) {
            let executable_path = self.build_output_dir.join(stem);
            let object_texts: Vec<String> = object_files
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            let object_refs: Vec<&str> = object_texts.iter().map(String::as_str).collect();
            let executable_text = executable_path.display().to_string();
            let command_line = link_command.command_line(&object_refs, &executable_text);
            let crc = command_crc(&command_line);
            self.new_command_crcs.insert(executable_text.clone(), crc);

            if artifact_needs_rebuild(&self.cached_command_crcs, &executable_text, crc)
                || !executable_path.exists()
            {
                if let Err(build_error) = run_process(&link_command, &object_refs, &executable_text)
                {
                    self.environment
                        .errors
                        .push(build_error.into_transpile_error(&executable_text));
                    return false;
                }
            }
            built_outputs.push(executable_path);
        }

        self.cached_command_crcs
            .extend(self.new_command_crcs.drain());
        let cache_path = self.build_output_dir.join(COMMAND_CACHE_FILENAME);
        if let Err(error) = store_command_crcs(&cache_path, &self.cached_command_crcs) {
            self.environment.errors.push(error);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_source(directory: &Path, name: &str, contents: &str) -> String {
        let path = directory.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.display().to_string()
    }

    #[test]
    fn single_module_pipeline_writes_files() {
        let directory = tempfile::tempdir().unwrap();
        let input = write_source(directory.path(), "app.cdl", "(defun main () (return 0))");

        let mut manager = ModuleManager::new(directory.path().join("out"));
        manager.add_evaluate_file(&input).unwrap();
        assert!(!manager.has_errors());
        assert!(manager.evaluate_resolve_references());

        let written = manager.write_generated_output().unwrap();
        assert_eq!(written.len(), 1);
        let source_text = std::fs::read_to_string(&written[0].source_filename).unwrap();
        assert!(source_text.starts_with("#include \"app.hpp\"\n"));
        assert!(source_text.contains("int main()"));
        assert!(source_text.contains("return 0;"));
        let header_text = std::fs::read_to_string(&written[0].header_filename).unwrap();
        assert!(header_text.contains("int main();"));

        let main = manager.environment.find_definition("main").unwrap();
        assert_eq!(main.state, DefinitionState::Emitted);
    }

    #[test]
    fn cross_module_references_resolve() {
        let directory = tempfile::tempdir().unwrap();
        let first = write_source(directory.path(), "caller.cdl", "(defun main () (helper))");
        let second = write_source(
            directory.path(),
            "callee.cdl",
            "(defun helper () (return))",
        );

        let mut manager = ModuleManager::new(directory.path().join("out"));
        manager.add_evaluate_file(&first).unwrap();
        manager.add_evaluate_file(&second).unwrap();
        assert!(manager.evaluate_resolve_references());
        assert!(manager.write_generated_output().is_ok());
    }

    #[test]
    fn unresolved_reference_blocks_writing() {
        let directory = tempfile::tempdir().unwrap();
        let input = write_source(directory.path(), "bad.cdl", "(defun f () (h))");

        let mut manager = ModuleManager::new(directory.path().join("out"));
        manager.add_evaluate_file(&input).unwrap();
        assert!(!manager.evaluate_resolve_references());
        assert!(manager.has_errors());
        assert!(manager.write_generated_output().is_err());
    }

    #[test]
    fn hook_signature_is_validated() {
        fn skip_everything(manager: &mut ModuleManager, module_index: usize) -> bool {
            manager.modules[module_index].skip_build = true;
            true
        }

        let directory = tempfile::tempdir().unwrap();
        let input = write_source(directory.path(), "app.cdl", "(defun main () (return 0))");
        let mut manager = ModuleManager::new(directory.path().join("out"));
        let module_index = manager.add_evaluate_file(&input).unwrap();

        let module = &mut manager.modules[module_index];
        assert!(module
            .register_pre_build_hook(skip_everything, "fn(whatever) -> bool")
            .is_err());
        module
            .register_pre_build_hook(skip_everything, MODULE_PRE_BUILD_HOOK_SIGNATURE)
            .unwrap();

        assert!(manager.evaluate_resolve_references());
        manager.write_generated_output().unwrap();
        let mut built = Vec::new();
        assert!(manager.build(&mut built));
        // The hook marked the only module skip_build, so nothing was linked.
        assert!(built.is_empty());
    }

    #[test]
    fn build_with_stub_commands_populates_cache() {
        let directory = tempfile::tempdir().unwrap();
        let input = write_source(directory.path(), "app.cdl", "(defun main () (return 0))");
        let out_dir = directory.path().join("out");

        let mut manager = ModuleManager::new(&out_dir);
        let module_index = manager.add_evaluate_file(&input).unwrap();
        assert!(manager.evaluate_resolve_references());
        manager.write_generated_output().unwrap();

        // `true` accepts any arguments and creates nothing; the build then
        // re-runs every time (outputs never exist) but still succeeds.
        manager.modules[module_index].build_time_build_command =
            ProcessCommand::new("true", &[]);
        manager.modules[module_index].build_time_link_command = ProcessCommand::new("true", &[]);

        let mut built = Vec::new();
        assert!(manager.build(&mut built), "{:?}", manager.environment.errors);
        assert_eq!(built.len(), 1);
        assert!(out_dir.join(COMMAND_CACHE_FILENAME).exists());
        let cached = load_command_crcs(&out_dir.join(COMMAND_CACHE_FILENAME));
        assert_eq!(cached.len(), 2);
    }
}
