use std::process::ExitCode;

fn main() -> ExitCode {
    page_narrator_lib::run()
}
