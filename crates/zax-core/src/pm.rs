//! Package-manager detection and tool command assembly.
//!
//! Detection looks at the workspace root once and picks the first lockfile
//! present in priority order `bun > pnpm > yarn > npm`, falling back to npm.
//! Commands are built as argv vectors, never shell strings.

use std::path::Path;

/// A JavaScript package manager and its runner convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Bun,
    Pnpm,
    Yarn,
    Npm,
}

/// Detection priority with the lockfiles that select each manager.
const LOCKFILES: &[(PackageManager, &[&str])] = &[
    (PackageManager::Bun, &["bun.lockb", "bun.lock"]),
    (PackageManager::Pnpm, &["pnpm-lock.yaml"]),
    (PackageManager::Yarn, &["yarn.lock"]),
    (PackageManager::Npm, &["package-lock.json"]),
];

impl PackageManager {
    /// Detects the package manager from lockfiles at the workspace root.
    #[must_use]
    pub fn detect(workspace_root: &Path) -> Self {
        for (manager, names) in LOCKFILES {
            if names.iter().any(|n| workspace_root.join(n).is_file()) {
                return *manager;
            }
        }
        Self::Npm
    }

    /// Runner prefix used to execute workspace-local binaries.
    #[must_use]
    pub const fn runner_prefix(self) -> &'static [&'static str] {
        match self {
            Self::Bun => &["bun", "x"],
            Self::Pnpm => &["pnpm", "exec"],
            Self::Yarn => &["yarn", "exec"],
            Self::Npm => &["npx"],
        }
    }

    /// Install command named in `DEPS_NOT_INSTALLED` errors.
    #[must_use]
    pub const fn install_command(self) -> &'static str {
        match self {
            Self::Bun => "bun install",
            Self::Pnpm => "pnpm install",
            Self::Yarn => "yarn install",
            Self::Npm => "npm install",
        }
    }

    /// Short display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bun => "bun",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
            Self::Npm => "npm",
        }
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds the vitest invocation. `test_files` restricts the run when
/// present; `None` runs the whole suite.
#[must_use]
pub fn vitest_command(
    manager: PackageManager,
    output_file: &Path,
    test_files: Option<&[String]>,
) -> Vec<String> {
    let mut argv: Vec<String> = manager
        .runner_prefix()
        .iter()
        .map(ToString::to_string)
        .collect();
    argv.push("vitest".into());
    argv.push("run".into());
    argv.push("--reporter=json".into());
    argv.push(format!("--outputFile={}", output_file.display()));
    if let Some(files) = test_files {
        argv.extend(files.iter().cloned());
    }
    argv
}

/// Builds the eslint invocation. The target is the package scope when
/// present, `.` otherwise; it is always the final argument.
#[must_use]
pub fn eslint_command(manager: PackageManager, output_file: &Path, target: &str) -> Vec<String> {
    let mut argv: Vec<String> = manager
        .runner_prefix()
        .iter()
        .map(ToString::to_string)
        .collect();
    argv.push("eslint".into());
    argv.push("-f".into());
    argv.push("json".into());
    argv.push("-o".into());
    argv.push(output_file.display().to_string());
    argv.push(target.to_string());
    argv
}
