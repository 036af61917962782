// Execution and data-source backends used by the shaping controller

pub mod store;

#[cfg(test)]
pub mod mock;

use std::io;
use std::process::Command;

/// Exit status and captured text of one external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Non-empty stdout lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().filter(|line| !line.trim().is_empty())
    }
}

/// Runs external programs on behalf of the controller
///
/// The controller never spawns processes itself, so tests can swap in a
/// scripted runner and inspect exactly which commands were issued.
pub trait CommandRunner {
    /// Run `program` with `args`, blocking until it exits
    ///
    /// An `Err` means the program could not be started at all; a non-zero
    /// exit is reported through `CommandOutput::status`.
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;
}

/// Render a command line for logs and error messages
pub fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runs commands on the local host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        log::debug!("exec: {}", command_line(program, args));

        let output = Command::new(program).args(args).output()?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        if !result.success() {
            log::debug!("  -> exit {:?}: {}", result.status, result.stderr);
        }

        Ok(result)
    }
}
