//! Vendor CLI dialects.
//!
//! A dialect is pure data: prompts, the commands that move between exec and
//! configuration mode, how to abandon a configuration session, which output
//! means failure, and the commit family of commands.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DriverError, DriverResult};

/// Unit of the confirmed-commit timeout placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmUnit {
    Seconds,
    /// Rounded up, minimum one
    Minutes,
}

/// Confirmed-commit command with a `{}` placeholder for the timeout.
#[derive(Debug, Clone)]
pub struct ConfirmedCommit {
    pub template: String,
    pub unit: ConfirmUnit,
}

impl ConfirmedCommit {
    pub fn render(&self, window_secs: u64) -> String {
        let value = match self.unit {
            ConfirmUnit::Seconds => window_secs.max(1),
            ConfirmUnit::Minutes => window_secs.div_ceil(60).max(1),
        };
        self.template.replace("{}", &value.to_string())
    }
}

/// Behavior of one vendor's interactive CLI.
#[derive(Debug, Clone)]
pub struct Dialect {
    pub name: String,
    pub exec_prompt: Regex,
    pub config_prompt: Regex,
    /// Matches any prompt or the save prompt
    pub any_prompt: Regex,
    /// Sent once after login (paging off, wide terminal)
    pub on_open: Vec<String>,
    pub enter_config: String,
    pub exit_config: String,
    /// Abandons uncommitted changes; the last command returns to exec mode
    pub abort: Vec<String>,
    /// Question asked when leaving configuration mode with pending changes
    pub save_prompt: Option<Regex>,
    pub save_answer: String,
    pub error_patterns: Vec<Regex>,
    /// Output lines that look like errors but are benign
    pub allow_patterns: Vec<Regex>,
    pub show_config: String,
    pub commit: Option<String>,
    pub confirmed_commit: Option<ConfirmedCommit>,
    /// Confirms a pending confirmed commit
    pub confirm: Option<String>,
    pub rollback: Vec<String>,
    /// Rollback commands run inside configuration mode
    pub rollback_in_config: bool,
    /// Prefix stripped from a line before negating it (`set ` on Junos)
    pub positive_prefix: Option<String>,
    pub negation_prefix: String,
    pub validate: Option<String>,
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Invalid regex pattern")
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn any_prompt(exec: &str, config: &str, save: Option<&str>) -> Regex {
    match save {
        Some(save) => re(&format!("(?:{})|(?:{})|(?:{})", config, exec, save)),
        None => re(&format!("(?:{})|(?:{})", config, exec)),
    }
}

fn huawei_vrp() -> Dialect {
    let exec = r"(?m)^<[\w.\-/:]+>\s*$";
    let config = r"(?m)^\[~?\*?[\w.\-/: ]+\]\s*$";
    let save = r"(?i)\[Y\(yes\)/N\(no\)/C\(cancel\)\]:\s*$";
    Dialect {
        name: "huawei-vrp".to_string(),
        exec_prompt: re(exec),
        config_prompt: re(config),
        any_prompt: any_prompt(exec, config, Some(save)),
        on_open: strings(&["screen-length 0 temporary", "screen-width 512"]),
        enter_config: "system-view".to_string(),
        exit_config: "return".to_string(),
        abort: strings(&["abort"]),
        save_prompt: Some(re(save)),
        save_answer: "n".to_string(),
        error_patterns: vec![
            re(r"(?m)^\s*Error:"),
            re(r"(?mi)^\s*Unrecognized command"),
            re(r"(?mi)^\s*Incomplete command"),
        ],
        allow_patterns: vec![
            re(r"(?i)Error:.*already exists"),
            re(r"(?i)Error:.*does not exist"),
        ],
        show_config: "display current-configuration".to_string(),
        commit: Some("commit".to_string()),
        confirmed_commit: Some(ConfirmedCommit {
            template: "commit trial {}".to_string(),
            unit: ConfirmUnit::Seconds,
        }),
        confirm: Some("commit".to_string()),
        rollback: strings(&["cancel trial"]),
        rollback_in_config: true,
        positive_prefix: None,
        negation_prefix: "undo ".to_string(),
        validate: None,
    }
}

fn juniper_junos() -> Dialect {
    let exec = r"(?m)^[\w.\-]+@[\w.\-]+>\s*$";
    let config = r"(?m)^[\w.\-]+@[\w.\-]+#\s*$";
    let save = r"(?i)Exit with uncommitted changes\? \[yes,no\] \(yes\)\s*$";
    Dialect {
        name: "juniper-junos".to_string(),
        exec_prompt: re(exec),
        config_prompt: re(config),
        any_prompt: any_prompt(exec, config, Some(save)),
        on_open: strings(&["set cli screen-length 0", "set cli screen-width 511"]),
        enter_config: "configure private".to_string(),
        exit_config: "exit configuration-mode".to_string(),
        abort: strings(&["rollback 0", "exit configuration-mode"]),
        save_prompt: Some(re(save)),
        save_answer: "no".to_string(),
        error_patterns: vec![
            re(r"(?mi)^\s*error:"),
            re(r"(?mi)^\s*syntax error"),
            re(r"(?mi)^\s*unknown command"),
        ],
        allow_patterns: vec![re(r"(?i)statement not found")],
        show_config: "show configuration | display set".to_string(),
        commit: Some("commit".to_string()),
        confirmed_commit: Some(ConfirmedCommit {
            template: "commit confirmed {}".to_string(),
            unit: ConfirmUnit::Minutes,
        }),
        confirm: Some("commit".to_string()),
        rollback: strings(&["rollback 1", "commit"]),
        rollback_in_config: true,
        positive_prefix: Some("set ".to_string()),
        negation_prefix: "delete ".to_string(),
        validate: Some("commit check".to_string()),
    }
}

fn cisco_iosxr() -> Dialect {
    let exec = r"(?m)^RP/\d+/\w+/CPU\d+:[\w.\-]+#\s*$";
    let config = r"(?m)^RP/\d+/\w+/CPU\d+:[\w.\-]+\(config[\w.\-]*\)#\s*$";
    let save = r"(?i)Uncommitted changes found, commit them before exiting\(yes/no/cancel\)\?\s*\[cancel\]:\s*$";
    Dialect {
        name: "cisco-iosxr".to_string(),
        exec_prompt: re(exec),
        config_prompt: re(config),
        any_prompt: any_prompt(exec, config, Some(save)),
        on_open: strings(&["terminal length 0", "terminal width 512"]),
        enter_config: "configure terminal".to_string(),
        exit_config: "end".to_string(),
        abort: strings(&["abort"]),
        save_prompt: Some(re(save)),
        save_answer: "no".to_string(),
        error_patterns: vec![
            re(r"(?mi)^\s*% ?Invalid input"),
            re(r"(?mi)^\s*% ?Incomplete command"),
            re(r"(?mi)^\s*% ?Ambiguous command"),
            re(r"(?mi)^\s*% ?Failed to commit"),
        ],
        allow_patterns: vec![re(r"(?i)% ?No such configuration item")],
        show_config: "show running-config".to_string(),
        commit: Some("commit".to_string()),
        confirmed_commit: Some(ConfirmedCommit {
            template: "commit confirmed {}".to_string(),
            unit: ConfirmUnit::Seconds,
        }),
        confirm: Some("commit".to_string()),
        rollback: strings(&["rollback configuration last 1"]),
        rollback_in_config: false,
        positive_prefix: None,
        negation_prefix: "no ".to_string(),
        validate: Some("show configuration failed".to_string()),
    }
}

static BUILTIN: Lazy<HashMap<String, Dialect>> = Lazy::new(|| {
    [huawei_vrp(), juniper_junos(), cisco_iosxr()]
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect()
});

impl Dialect {
    /// Looks up a built-in dialect by name.
    pub fn by_name(name: &str) -> DriverResult<Dialect> {
        BUILTIN
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::InvalidParams {
                message: format!("unknown CLI dialect '{}'", name),
            })
    }

    pub fn builtin_names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = BUILTIN.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the first output line that matches an error pattern and no
    /// allow pattern.
    pub fn find_error<'a>(&self, output: &'a str) -> Option<&'a str> {
        output.lines().find(|line| {
            self.error_patterns.iter().any(|p| p.is_match(line))
                && !self.allow_patterns.iter().any(|p| p.is_match(line))
        })
    }

    pub fn is_config_prompt(&self, text: &str) -> bool {
        self.config_prompt.is_match(text)
    }

    pub fn is_save_prompt(&self, text: &str) -> bool {
        self.save_prompt.as_ref().is_some_and(|p| p.is_match(text))
    }

    /// Turns a configuration line into the line that removes it.
    pub fn negate(&self, line: &str) -> String {
        let line = line.trim();
        let body = self
            .positive_prefix
            .as_deref()
            .and_then(|prefix| line.strip_prefix(prefix))
            .unwrap_or(line);
        format!("{}{}", self.negation_prefix, body)
    }
}
