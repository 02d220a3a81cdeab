//! Executable Resolution
//!
//! Locates the external CLI once at startup. Candidates are tried in order:
//! environment override, settings override, packaged next to the running
//! binary, development checkout, then `PATH`. When nothing is found the
//! expected packaged path is still returned so every call fails with
//! `process-not-found` instead of resolving differently per call.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use super::launcher::verify_executable;

/// Environment variable that overrides the executable location.
pub const CLI_ENV_VAR: &str = "REELUP_CLI_PATH";

#[cfg(target_os = "windows")]
pub const CLI_BINARY_NAME: &str = "reelup-agent.exe";

#[cfg(not(target_os = "windows"))]
pub const CLI_BINARY_NAME: &str = "reelup-agent";

/// Where the resolved executable came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableSource {
    Environment,
    Settings,
    Packaged,
    Development,
    SystemPath,
    /// Nothing was found; the path is where a packaged build expects it.
    Fallback,
}

impl fmt::Display for ExecutableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Environment => "environment",
            Self::Settings => "settings",
            Self::Packaged => "packaged",
            Self::Development => "development",
            Self::SystemPath => "PATH",
            Self::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExecutable {
    pub path: PathBuf,
    pub source: ExecutableSource,
}

impl ResolvedExecutable {
    /// Whether the path currently points at something runnable.
    pub fn is_available(&self) -> bool {
        verify_executable(&self.path).is_ok()
    }
}

/// Inputs to resolution, separated from the process environment for tests.
#[derive(Debug, Clone, Default)]
pub struct ResolveInputs {
    pub env_override: Option<OsString>,
    pub settings_override: Option<String>,
    /// Directory containing the running binary.
    pub exe_dir: Option<PathBuf>,
    /// Root of a development checkout, if running from one.
    pub workspace_dir: Option<PathBuf>,
    /// Raw `PATH` value.
    pub path_var: Option<OsString>,
}

impl ResolveInputs {
    /// Captures the current process environment.
    pub fn from_env(settings_override: Option<&str>) -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        // Only debug builds look inside the source tree.
        let workspace_dir = if cfg!(debug_assertions) {
            Path::new(env!("CARGO_MANIFEST_DIR"))
                .ancestors()
                .nth(2)
                .map(Path::to_path_buf)
        } else {
            None
        };

        Self {
            env_override: std::env::var_os(CLI_ENV_VAR).filter(|v| !v.is_empty()),
            settings_override: settings_override
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            exe_dir,
            workspace_dir,
            path_var: std::env::var_os("PATH"),
        }
    }
}

/// Resolves the executable from the live process environment.
pub fn resolve_executable(settings_override: Option<&str>) -> ResolvedExecutable {
    let resolved = resolve_with(&ResolveInputs::from_env(settings_override));
    if resolved.source == ExecutableSource::Fallback {
        tracing::warn!(
            "CLI executable not found; expected at {}",
            resolved.path.display()
        );
    } else if !resolved.is_available() {
        tracing::warn!(
            "CLI executable from {} is not runnable: {}",
            resolved.source,
            resolved.path.display()
        );
    } else {
        tracing::info!(
            "Using CLI executable from {}: {}",
            resolved.source,
            resolved.path.display()
        );
    }
    resolved
}

/// Applies the resolution order to `inputs`.
///
/// Explicit overrides win even when they point at nothing, so a typo
/// surfaces as `process-not-found` rather than silently using another copy.
pub fn resolve_with(inputs: &ResolveInputs) -> ResolvedExecutable {
    if let Some(path) = &inputs.env_override {
        return ResolvedExecutable {
            path: PathBuf::from(path),
            source: ExecutableSource::Environment,
        };
    }

    if let Some(path) = &inputs.settings_override {
        return ResolvedExecutable {
            path: PathBuf::from(path),
            source: ExecutableSource::Settings,
        };
    }

    if let Some(exe_dir) = &inputs.exe_dir {
        for candidate in packaged_candidates(exe_dir) {
            if verify_executable(&candidate).is_ok() {
                return ResolvedExecutable {
                    path: candidate,
                    source: ExecutableSource::Packaged,
                };
            }
        }
    }

    if let Some(workspace) = &inputs.workspace_dir {
        let candidate = workspace.join("cli").join("bin").join(CLI_BINARY_NAME);
        if verify_executable(&candidate).is_ok() {
            return ResolvedExecutable {
                path: candidate,
                source: ExecutableSource::Development,
            };
        }
    }

    if let Some(path_var) = &inputs.path_var {
        let found = std::env::split_paths(path_var)
            .filter(|dir| dir.is_absolute())
            .map(|dir| dir.join(CLI_BINARY_NAME))
            .find(|candidate| verify_executable(candidate).is_ok());
        if let Some(path) = found {
            return ResolvedExecutable {
                path,
                source: ExecutableSource::SystemPath,
            };
        }
    }

    let path = inputs
        .exe_dir
        .as_ref()
        .and_then(|dir| packaged_candidates(dir).into_iter().next())
        .unwrap_or_else(|| PathBuf::from(CLI_BINARY_NAME));
    ResolvedExecutable {
        path,
        source: ExecutableSource::Fallback,
    }
}

fn packaged_candidates(exe_dir: &Path) -> [PathBuf; 2] {
    [
        exe_dir.join("binaries").join(CLI_BINARY_NAME),
        exe_dir.join(CLI_BINARY_NAME),
    ]
}
