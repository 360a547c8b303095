//! Heuristics that turn a remote test task into a test-case outcome.
//!
//! Test tasks are created by the in-cluster scheduler with display names of
//! the form `"<verb> <method> (<fully.qualified.ClassName>)"`. Everything here
//! is a pure function of that task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compute::CloudTask;
use crate::naming;

/// Class paths under this prefix carry the module one segment further in.
pub const COMMAND_MODULES_PREFIX: &str = "azure.cli.command_modules.";

pub const NOT_AVAILABLE: &str = "N/A";

/// Method and class names extracted from a task display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestName {
    pub method: String,
    /// Dotted class path without the surrounding parentheses.
    pub class_full: String,
    /// Last segment of the class path.
    pub class: String,
    pub full_name: String,
}

/// Parse `"<verb> <method> (<class path>)"`.
///
/// Returns `None` unless the name has exactly three space-separated parts.
pub fn parse_display_name(display_name: &str) -> Option<TestName> {
    let parts: Vec<&str> = display_name.split(' ').collect();
    let [_, method, class] = parts.as_slice() else {
        return None;
    };
    let class_full = class.trim_matches(|c| c == '(' || c == ')').to_string();
    let class = class_full
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_string();
    Some(TestName {
        method: method.to_string(),
        full_name: format!("{class_full}.{method}"),
        class,
        class_full,
    })
}

/// Upper-cased module segment of a dotted class path.
///
/// The module is the third segment, or the fourth under
/// [`COMMAND_MODULES_PREFIX`]. Too few segments yield `"N/A"`.
pub fn classify_module(class_full: &str) -> String {
    let index = if class_full.starts_with(COMMAND_MODULES_PREFIX) {
        3
    } else {
        2
    };
    class_full
        .split('.')
        .nth(index)
        .map(str::to_uppercase)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Whole seconds between task start and end, truncated. Zero when unknown.
pub fn duration_seconds(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> i32 {
    match (start, end) {
        (Some(start), Some(end)) => {
            let secs = (end - start).num_seconds();
            i32::try_from(secs).unwrap_or(if secs < 0 { i32::MIN } else { i32::MAX })
        }
        _ => 0,
    }
}

/// Leading and trailing lines of harness boilerplate dropped from stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTrim {
    pub head: usize,
    pub tail: usize,
}

impl Default for OutputTrim {
    fn default() -> Self {
        Self { head: 58, tail: 3 }
    }
}

impl OutputTrim {
    /// Drop `head` leading and `tail` trailing lines. An inverted window
    /// yields an empty string. `tail = 0` keeps every trailing line.
    pub fn apply(&self, text: &str) -> String {
        let lines: Vec<&str> = text.split('\n').collect();
        let end = lines.len().saturating_sub(self.tail);
        if self.head >= end {
            return String::new();
        }
        lines[self.head..end].join("\n")
    }
}

/// A test case derived from a completed remote task, before output is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseDraft {
    pub id: String,
    pub task_id: String,
    pub passed: bool,
    pub module: String,
    pub state: String,
    pub test_method: String,
    pub test_class: String,
    pub test_full_name: String,
    pub duration_seconds: i32,
}

impl TestCaseDraft {
    /// Derive a case from a task. Malformed display names fall back to the
    /// task id as method and `"N/A"` as class and module.
    pub fn from_task(test_run_id: &str, task: &CloudTask) -> Self {
        let display_name = task.display_name.as_deref().unwrap_or_default();
        let (test_method, test_class, module, test_full_name) =
            match parse_display_name(display_name) {
                Some(name) => {
                    let module = classify_module(&name.class_full);
                    (name.method, name.class, module, name.full_name)
                }
                None => (
                    task.id.clone(),
                    NOT_AVAILABLE.to_string(),
                    NOT_AVAILABLE.to_string(),
                    display_name.to_string(),
                ),
            };

        Self {
            id: naming::test_case_id(test_run_id, &task.id),
            task_id: task.id.clone(),
            passed: task.exit_code == Some(0),
            module,
            state: task.state.to_string(),
            test_method,
            test_class,
            test_full_name,
            duration_seconds: duration_seconds(task.start_time, task.end_time),
        }
    }
}
