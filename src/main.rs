use std::process::ExitCode;

fn main() -> ExitCode {
    dex_runtime::run_cli()
}
