//! Relay doctor: environment diagnostics
//!
//! Checks that the configured Claude Code binary can be found, that the
//! working directory exists and that the configured storage locations are
//! usable. Returns a structured report with categories: errors (must fix),
//! warnings (should fix), info (suggestions).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::claude::permissions::PermissionMode;
use crate::config::{RelayConfig, BINARY_ENV_VAR};

/// Where Claude Code is commonly installed when it is not on `PATH`.
const COMMON_LOCATIONS: &[&str] = &[
    "/opt/homebrew/bin/claude",
    "/usr/local/bin/claude",
    "/usr/local/bin/claude-code",
];

/// Install locations relative to the home directory.
const HOME_LOCATIONS: &[&str] = &[".local/bin/claude", ".cargo/bin/claude"];

/// Severity level for a diagnostic finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    /// Must fix: relay cannot work
    Error,
    /// Should fix: works, but probably not as intended
    Warning,
    /// Suggestion
    Info,
}

/// A single diagnostic finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Severity of the finding
    pub severity: Severity,
    /// Short code for the finding (e.g., "D001")
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Suggested fix (optional)
    pub suggestion: Option<String>,
}

/// Diagnostic report from `relay doctor`
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    /// All findings, in order of severity (errors first)
    pub findings: Vec<Finding>,
}

impl DiagnosticReport {
    /// Returns true if the report has no findings at all
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Returns the number of errors
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(&Severity::Error)
    }

    /// Returns the number of warnings
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count(&Severity::Warning)
    }

    /// Returns the number of info items
    #[must_use]
    pub fn info_count(&self) -> usize {
        self.count(&Severity::Info)
    }

    fn count(&self, severity: &Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| &f.severity == severity)
            .count()
    }
}

/// How the binary was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySource {
    /// The configured value is a path that exists
    Explicit,
    /// Found by searching `PATH`
    SearchPath,
    /// Found in a well-known install location
    CommonLocation,
}

/// A resolved agent executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryLocation {
    /// Absolute or configured path
    pub path: PathBuf,
    /// How it was found
    pub source: BinarySource,
}

/// The parts of the environment binary resolution depends on.
#[derive(Debug, Clone, Default)]
pub struct BinaryProbe {
    /// Value of `PATH`
    pub path_var: Option<OsString>,
    /// Home directory
    pub home: Option<PathBuf>,
}

impl BinaryProbe {
    /// Probe the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            path_var: std::env::var_os("PATH"),
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    /// Find `binary`: a path is checked directly, a bare name is searched on
    /// `PATH` and then, for the default `claude`, in common install locations.
    #[must_use]
    pub fn resolve(&self, binary: &str) -> Option<BinaryLocation> {
        if binary.contains(std::path::MAIN_SEPARATOR) || binary.contains('/') {
            let path = PathBuf::from(binary);
            return path.is_file().then_some(BinaryLocation {
                path,
                source: BinarySource::Explicit,
            });
        }

        if let Some(path) = self.search_path(binary) {
            return Some(BinaryLocation {
                path,
                source: BinarySource::SearchPath,
            });
        }

        if binary != "claude" {
            return None;
        }

        self.common_locations()
            .into_iter()
            .find(|path| path.is_file())
            .map(|path| BinaryLocation {
                path,
                source: BinarySource::CommonLocation,
            })
    }

    fn search_path(&self, binary: &str) -> Option<PathBuf> {
        let path_var = self.path_var.as_ref()?;
        std::env::split_paths(path_var)
            .map(|dir| dir.join(binary))
            .find(|candidate| candidate.is_file())
    }

    fn common_locations(&self) -> Vec<PathBuf> {
        let mut locations: Vec<PathBuf> = COMMON_LOCATIONS.iter().map(PathBuf::from).collect();
        if let Some(home) = &self.home {
            locations.extend(HOME_LOCATIONS.iter().map(|rel| home.join(rel)));
        }
        locations
    }
}

/// Run all diagnostic checks and return a report.
#[must_use]
pub fn diagnose(config: &RelayConfig, probe: &BinaryProbe) -> DiagnosticReport {
    let mut findings = Vec::new();

    check_binary(config, probe, &mut findings);
    check_working_dir(&config.agent.working_dir, &mut findings);
    if let Some(dir) = &config.store.dir {
        check_directory("D003", "store", dir, &mut findings);
    }
    if let Some(dir) = &config.log.transcript_dir {
        check_directory("D004", "transcript", dir, &mut findings);
    }
    check_approval_settings(config, &mut findings);

    // Sort: errors first, then warnings, then info
    findings.sort_by_key(|f| match f.severity {
        Severity::Error => 0,
        Severity::Warning => 1,
        Severity::Info => 2,
    });

    DiagnosticReport { findings }
}

/// D001: The agent binary must be resolvable
fn check_binary(config: &RelayConfig, probe: &BinaryProbe, findings: &mut Vec<Finding>) {
    let binary = &config.agent.binary;
    match probe.resolve(binary) {
        None => findings.push(Finding {
            severity: Severity::Error,
            code: "D001".to_string(),
            message: format!("Claude Code binary '{binary}' not found"),
            suggestion: Some(format!(
                "Install Claude Code (npm install -g @anthropic-ai/claude-code) or set {BINARY_ENV_VAR} / [agent] binary"
            )),
        }),
        Some(location) if location.source == BinarySource::CommonLocation => {
            findings.push(Finding {
                severity: Severity::Info,
                code: "D001".to_string(),
                message: format!(
                    "Claude Code is not on PATH; using {}",
                    location.path.display()
                ),
                suggestion: Some(format!(
                    "Set [agent] binary = \"{}\" to make this explicit",
                    location.path.display()
                )),
            });
        }
        Some(_) => {}
    }
}

/// D002: The default working directory must exist
fn check_working_dir(dir: &Path, findings: &mut Vec<Finding>) {
    if dir.is_dir() {
        return;
    }
    let message = if dir.exists() {
        format!("Working directory '{}' is not a directory", dir.display())
    } else {
        format!("Working directory '{}' does not exist", dir.display())
    };
    findings.push(Finding {
        severity: Severity::Error,
        code: "D002".to_string(),
        message,
        suggestion: Some("Fix [agent] working_dir in relay.toml or pass --cwd".to_string()),
    });
}

/// D003/D004: A configured directory must be a directory or creatable
fn check_directory(code: &str, label: &str, dir: &Path, findings: &mut Vec<Finding>) {
    if dir.is_dir() {
        return;
    }

    if dir.exists() {
        findings.push(Finding {
            severity: Severity::Error,
            code: code.to_string(),
            message: format!("The {label} path '{}' is not a directory", dir.display()),
            suggestion: Some(format!("Remove the file or point the {label} setting elsewhere")),
        });
        return;
    }

    let blocked_by = dir
        .ancestors()
        .skip(1)
        .find(|ancestor| ancestor.exists())
        .filter(|ancestor| !ancestor.is_dir());

    match blocked_by {
        Some(file) => findings.push(Finding {
            severity: Severity::Error,
            code: code.to_string(),
            message: format!(
                "The {label} directory '{}' cannot be created: '{}' is a file",
                dir.display(),
                file.display()
            ),
            suggestion: None,
        }),
        None => findings.push(Finding {
            severity: Severity::Info,
            code: code.to_string(),
            message: format!(
                "The {label} directory '{}' will be created on first use",
                dir.display()
            ),
            suggestion: None,
        }),
    }
}

/// D005/D006: Approval settings worth a second look
fn check_approval_settings(config: &RelayConfig, findings: &mut Vec<Finding>) {
    if config.agent.permission_mode == PermissionMode::BypassPermissions {
        findings.push(Finding {
            severity: Severity::Warning,
            code: "D005".to_string(),
            message: "permission_mode is bypassPermissions: tools run without approval"
                .to_string(),
            suggestion: Some("Use \"default\" or \"acceptEdits\" to keep a human in the loop".to_string()),
        });
    }

    if config.permissions.approval_timeout_secs.is_none() {
        findings.push(Finding {
            severity: Severity::Info,
            code: "D006".to_string(),
            message: "No approval timeout: pending tool requests wait until answered".to_string(),
            suggestion: Some("Set [permissions] approval_timeout_secs to deny stale requests".to_string()),
        });
    }
}
