//! # Launch specification.
//!
//! [`LaunchSpec`] is a plain description of the command to run. It is rebuilt
//! from the settings snapshot before every start, so memory changes apply on
//! the next launch.
//!
//! [`LaunchSpec::java_server`] produces the dedicated-server command line:
//! ```text
//! java -Xmx<memory> [-XX:AOTCache=<aot>] -jar <jar> --assets <assets>
//! env _JAVA_OPTIONS=-Xmx<memory>; cwd = server dir; stop command "stop"
//! ```
//! The AOT flag is only added when the cache file exists.

use std::path::{Path, PathBuf};

use crate::config::Layout;

/// What to run and how to stop it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Files that must exist before spawning (e.g. the server jar).
    pub requires: Vec<PathBuf>,
    /// Console line asking the server to shut down; `None` = signal only.
    pub stop_command: Option<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn require(mut self, path: impl Into<PathBuf>) -> Self {
        self.requires.push(path.into());
        self
    }

    pub fn stop_command(mut self, cmd: impl Into<String>) -> Self {
        self.stop_command = Some(cmd.into());
        self
    }

    /// Java dedicated-server command for `layout` with `memory` heap.
    pub fn java_server(layout: &Layout, memory: &str) -> Self {
        let heap = format!("-Xmx{memory}");
        let mut spec = LaunchSpec::new(&layout.java)
            .arg(heap.clone())
            .env("_JAVA_OPTIONS", heap)
            .current_dir(&layout.server_dir)
            .require(layout.jar_path());

        if layout.aot_path().exists() {
            spec = spec.arg(format!("-XX:AOTCache={}", layout.aot_cache));
        }
        spec = spec
            .args(["-jar".to_string(), layout.server_jar.clone()])
            .arg("--assets")
            .arg(display(&layout.assets_path()));

        match &layout.stop_command {
            Some(cmd) => spec.stop_command(cmd.clone()),
            None => spec,
        }
    }

    /// Shell-style rendering for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(display(&self.program))
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn display(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}
