//! Command-line arguments, using clap's derive API.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "cedilla",
    version,
    about = "Transpile an S-expression surface syntax to C/C++."
)]
pub struct CedillaArgs {
    /// The file to transpile.
    #[arg(required_unless_present = "list_generators")]
    pub file: Option<PathBuf>,

    /// Directory generated files (and build artifacts) are written into.
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Print the token stream instead of transpiling.
    #[arg(long)]
    pub tokens: bool,

    /// List every registered generator and exit.
    #[arg(long)]
    pub list_generators: bool,

    /// Compile and link the generated C/C++ after writing it.
    #[arg(long)]
    pub build: bool,

    /// Render rich multi-line diagnostics instead of one-line errors.
    #[arg(long)]
    pub pretty: bool,
}
