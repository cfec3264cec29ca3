mod test_citygen;
mod test_tensor_field;

use std::process::Output;

use assert_cmd::Command;

pub trait CommandExt {
    /// Same as [Command::output] except with hooks to print stdout/stderr in failed tests
    fn captured_output(&mut self) -> Output;
}

impl CommandExt for Command {
    fn captured_output(&mut self) -> Output {
        let output = self.output().expect("Failed to execute command");

        // libtest has hooks in the print! and eprint! macros to do output capturing in tests.
        print!("{}", String::from_utf8_lossy(&output.stdout));
        eprint!("{}", String::from_utf8_lossy(&output.stderr));

        output
    }
}

/// Get a command to run the given tool with Cargo
pub fn tool(name: &str) -> Command {
    // assert_cmd::cargo::cargo_bin is deprecated but cargo_bin! requires a string literal
    #[allow(deprecated)]
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin(name));
    cmd.arg("--log-level=DEBUG");
    cmd
}
