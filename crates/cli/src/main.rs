use std::process::ExitCode;

fn main() -> ExitCode {
    navigator_cli::run()
}
