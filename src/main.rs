use std::process;

fn main() {
    process::exit(cedilla::cli::run());
}
