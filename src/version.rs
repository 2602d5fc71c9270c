//! Build information embedded by `build.rs`

use std::fmt;

/// Compile-time build metadata
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    git_dirty: &'static str,
    pub build_timestamp: &'static str,
    pub target: &'static str,
    pub host: &'static str,
    pub profile: &'static str,
    pub rustc_version: &'static str,
}

/// Metadata of the running binary
pub const BUILD: BuildInfo = BuildInfo {
    name: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
    git_hash: env!("TASK_SUPERVISOR_GIT_HASH"),
    git_branch: env!("TASK_SUPERVISOR_GIT_BRANCH"),
    git_dirty: env!("TASK_SUPERVISOR_GIT_DIRTY"),
    build_timestamp: env!("TASK_SUPERVISOR_BUILD_TIMESTAMP"),
    target: env!("TASK_SUPERVISOR_TARGET"),
    host: env!("TASK_SUPERVISOR_HOST"),
    profile: env!("TASK_SUPERVISOR_PROFILE"),
    rustc_version: env!("TASK_SUPERVISOR_RUSTC_VERSION"),
};

impl BuildInfo {
    pub fn is_dirty(&self) -> bool {
        self.git_dirty == "true"
    }

    /// `<version>-<hash>[-dirty]`
    pub fn full_version(&self) -> String {
        let dirty = if self.is_dirty() { "-dirty" } else { "" };
        format!("{}-{}{}", self.version, self.git_hash, dirty)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f)?;
        writeln!(f, "  Branch:   {}", self.git_branch)?;
        writeln!(f, "  Built:    {} ({})", self.build_timestamp, self.profile)?;
        writeln!(f, "  Target:   {}", self.target)?;
        writeln!(f, "  Host:     {}", self.host)?;
        writeln!(f, "  Compiler: {}", self.rustc_version)
    }
}

/// Print build information to stdout
pub fn print_version() {
    print!("{}", BUILD);
}
