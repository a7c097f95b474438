use std::process::ExitCode;

fn main() -> ExitCode {
    replier_cli::run()
}
