//! hivereg: edit Windows registry hive files from the command line.

use std::process::ExitCode;

fn main() -> ExitCode {
    match hivereg::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
