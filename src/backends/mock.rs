// Scripted command runner for tests

use super::{CommandOutput, CommandRunner, command_line};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Mutex, Once};

static LOG_RECORDS: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if let Ok(mut records) = LOG_RECORDS.lock() {
            records.push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

/// Install a process-wide logger that keeps every message; returns all
/// messages recorded so far. Tests share it, so match on unique text.
pub fn captured_logs() -> Vec<String> {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });

    LOG_RECORDS
        .lock()
        .map(|records| records.clone())
        .unwrap_or_default()
}

/// Returns canned output per exact command line and records every call
///
/// Unscripted commands succeed with empty output, which is what `tc`
/// prints for an empty listing.
#[derive(Default)]
pub struct MockRunner {
    responses: RefCell<HashMap<String, CommandOutput>>,
    missing_programs: HashSet<String>,
    calls: RefCell<Vec<String>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host with the usual interfaces
    pub fn with_devices(devices: &[&str]) -> Self {
        let runner = Self::new();
        let listing: String = devices
            .iter()
            .enumerate()
            .map(|(i, dev)| {
                format!(
                    "{}: {}: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP mode DEFAULT group default qlen 1000\\    link/ether 52:54:00:12:34:{:02x} brd ff:ff:ff:ff:ff:ff\n",
                    i + 1,
                    dev,
                    i
                )
            })
            .collect();
        runner.respond("ip -o link show", &listing);
        runner
    }

    /// Script stdout for a successful command
    pub fn respond(&self, command: &str, stdout: &str) {
        self.responses.borrow_mut().insert(
            command.to_string(),
            CommandOutput {
                status: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    /// Script a non-zero exit for a command
    pub fn fail(&self, command: &str, stderr: &str) {
        self.responses.borrow_mut().insert(
            command.to_string(),
            CommandOutput {
                status: Some(2),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// Make every invocation of `program` fail to spawn
    pub fn without_program(mut self, program: &str) -> Self {
        self.missing_programs.insert(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Calls that change kernel state
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| {
                let words: Vec<&str> = call.split_whitespace().collect();
                match words.as_slice() {
                    ["tc", _, verb, ..] => matches!(*verb, "add" | "replace" | "change" | "del"),
                    ["ip", "link", verb, ..] => matches!(*verb, "set" | "add" | "del"),
                    _ => false,
                }
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let line = command_line(program, args);
        self.calls.borrow_mut().push(line.clone());

        if self.missing_programs.contains(program) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: not found", program),
            ));
        }

        Ok(self
            .responses
            .borrow()
            .get(&line)
            .cloned()
            .unwrap_or_else(|| CommandOutput {
                status: Some(0),
                ..Default::default()
            }))
    }
}
