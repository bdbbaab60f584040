//! External process invocation for build commands.
//!
//! The evaluator never talks to a toolchain directly; the module manager runs
//! build-time commands through [`run_process`], and compile-time macro code is
//! requested through the [`CompileTimeBuildDriver`] seam in the resolver.
//! Commands run synchronously to completion; there is no mid-build
//! cancellation.

use std::process::Command;

use thiserror::Error;

use crate::errors::{ErrorKind, TranspileError};

/// Placeholder replaced by the input path when a command's arguments are
/// resolved.
pub const ARGUMENT_IN: &str = "{in}";
/// Placeholder replaced by the output path.
pub const ARGUMENT_OUT: &str = "{out}";

/// An executable plus argument templates. `{in}`/`{out}` placeholders are
/// substituted at run time so one command serves every module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub file_to_execute: String,
    pub arguments: Vec<String>,
}

impl ProcessCommand {
    pub fn new(file_to_execute: impl Into<String>, arguments: &[&str]) -> Self {
        Self {
            file_to_execute: file_to_execute.into(),
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Default compile command: one translation unit to one object file.
    pub fn default_build_command() -> Self {
        Self::new("c++", &["-c", ARGUMENT_IN, "-o", ARGUMENT_OUT])
    }

    /// Default link command. `{in}` expands to every object file.
    pub fn default_link_command() -> Self {
        Self::new("c++", &[ARGUMENT_IN, "-o", ARGUMENT_OUT])
    }

    /// Substitute placeholders. A `{in}` placeholder expands to all inputs in
    /// order; everything else passes through verbatim.
    pub fn resolve_arguments(&self, inputs: &[&str], output: &str) -> Vec<String> {
        let mut resolved = Vec::with_capacity(self.arguments.len() + inputs.len());
        for argument in &self.arguments {
            match argument.as_str() {
                ARGUMENT_IN => resolved.extend(inputs.iter().map(|i| i.to_string())),
                ARGUMENT_OUT => resolved.push(output.to_string()),
                _ => resolved.push(argument.clone()),
            }
        }
        resolved
    }

    /// The exact command line as one string. The artifact cache CRCs this, so
    /// any change to executable or arguments forces a rebuild.
    pub fn command_line(&self, inputs: &[&str], output: &str) -> String {
        let mut line = self.file_to_execute.clone();
        for argument in self.resolve_arguments(inputs, output) {
            line.push(' ');
            line.push_str(&argument);
        }
        line
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("could not run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' exited with {status}")]
    Failed { command: String, status: String },
}

impl BuildError {
    pub fn into_transpile_error(self, filename: &str) -> TranspileError {
        TranspileError::at_file(
            ErrorKind::CompileTimeBuild {
                message: self.to_string(),
            },
            filename,
        )
    }
}

/// Run a resolved command to completion, inheriting stdio so compiler
/// diagnostics reach the user unmodified.
pub fn run_process(
    command: &ProcessCommand,
    inputs: &[&str],
    output: &str,
) -> Result<(), BuildError> {
    let arguments = command.resolve_arguments(inputs, output);
    let status = Command::new(&command.file_to_execute)
        .args(&arguments)
        .status()
        .map_err(|source| BuildError::Spawn {
            command: command.command_line(inputs, output),
            source,
        })?;

    if !status.success() {
        return Err(BuildError::Failed {
            command: command.command_line(inputs, output),
            status: status.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_substitute() {
        let command = ProcessCommand::default_build_command();
        let resolved = command.resolve_arguments(&["widget.cpp"], "widget.o");
        assert_eq!(resolved, vec!["-c", "widget.cpp", "-o", "widget.o"]);
    }

    #[test]
    fn link_expands_all_inputs() {
        let command = ProcessCommand::default_link_command();
        let resolved = command.resolve_arguments(&["a.o", "b.o"], "app");
        assert_eq!(resolved, vec!["a.o", "b.o", "-o", "app"]);
    }

    #[test]
    fn command_line_includes_executable() {
        let command = ProcessCommand::new("true", &[ARGUMENT_IN]);
        assert_eq!(command.command_line(&["x"], ""), "true x");
    }

    #[test]
    fn failed_process_reports_status() {
        let command = ProcessCommand::new("false", &[]);
        let error = run_process(&command, &[], "").unwrap_err();
        assert!(matches!(error, BuildError::Failed { .. }));
    }

    #[test]
    fn missing_executable_reports_spawn_failure() {
        let command = ProcessCommand::new("cedilla-no-such-binary", &[]);
        let error = run_process(&command, &[], "").unwrap_err();
        assert!(matches!(error, BuildError::Spawn { .. }));
    }
}
