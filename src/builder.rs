//! Builds a static plotnetcfg for one architecture on a cache miss.
//!
//! The sequence is best-effort: sub-process exit codes are logged but only
//! the presence of the expected artifacts gates progress.

use crate::cache::{BuildCache, DEPENDENCY_DIR, TOOL_DIR};
use crate::config::SourceRepos;
use crate::error::{Error, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Static library the dependency build must leave behind.
pub const DEPENDENCY_ARTIFACT: &str = "src/.libs/libjansson.a";

/// Executable the tool build must leave behind.
pub const TOOL_ARTIFACT: &str = "plotnetcfg";

/// Runs local build commands.
pub trait CommandRunner {
    /// Runs `program` in `cwd`. `Ok(false)` means it ran and exited non-zero.
    fn run(&self, program: &str, args: &[String], cwd: &Path) -> std::io::Result<bool>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    verbose: bool,
}

impl SystemRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], cwd: &Path) -> std::io::Result<bool> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd);

        if self.verbose {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::piped());
        }

        let output = cmd.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let start = lines.len().saturating_sub(20);
            if start < lines.len() {
                debug!("{} output (last lines):\n{}", program, lines[start..].join("\n"));
            }
        }
        Ok(output.status.success())
    }
}

pub struct ArtifactBuilder<'a, R: CommandRunner> {
    cache: &'a BuildCache,
    sources: &'a SourceRepos,
    runner: &'a R,
}

impl<'a, R: CommandRunner> ArtifactBuilder<'a, R> {
    pub fn new(cache: &'a BuildCache, sources: &'a SourceRepos, runner: &'a R) -> Self {
        Self {
            cache,
            sources,
            runner,
        }
    }

    /// Clones, builds and caches the binary for `arch` using `compiler`.
    ///
    /// Returns the path of the cached binary.
    pub fn build(&self, arch: &str, compiler: &Path) -> Result<PathBuf> {
        info!("Building plotnetcfg for {} with {}", arch, compiler.display());
        let build_dir = self.cache.ensure_dir(arch)?;

        self.clone_if_missing(&self.sources.tool, TOOL_DIR, &build_dir);
        self.clone_if_missing(&self.sources.dependency, DEPENDENCY_DIR, &build_dir);

        let tool_dir = build_dir.join(TOOL_DIR);
        let dep_dir = build_dir.join(DEPENDENCY_DIR);

        self.build_dependency(arch, &dep_dir)?;
        let tool_binary = self.build_tool(arch, compiler, &tool_dir)?;

        let cached = self.cache.binary_path(arch);
        fs::copy(&tool_binary, &cached)?;
        info!("Cached {}", cached.display());
        Ok(cached)
    }

    /// Clones `url` into `build_dir/name`; git resolves `name` against `build_dir`.
    fn clone_if_missing(&self, url: &str, name: &str, build_dir: &Path) {
        let dest = build_dir.join(name);
        if dest.exists() {
            debug!("{} already cloned", dest.display());
            return;
        }
        let args = vec!["clone".to_string(), url.to_string(), name.to_string()];
        self.step("git", &args, build_dir);
    }

    fn build_dependency(&self, arch: &str, dep_dir: &Path) -> Result<()> {
        self.step("autoreconf", &["-if".to_string()], dep_dir);
        let configure = dep_dir.join("configure");
        self.step(
            &configure.to_string_lossy(),
            &[
                format!("--host={}", arch),
                "--enable-static".to_string(),
                "--disable-shared".to_string(),
            ],
            dep_dir,
        );
        self.step("make", &[], dep_dir);

        let artifact = dep_dir.join(DEPENDENCY_ARTIFACT);
        if !artifact.exists() {
            return Err(Error::DependencyBuildFailed {
                arch: arch.to_string(),
                artifact: artifact.display().to_string(),
                cached: self.cache.binary_path(arch).display().to_string(),
            });
        }
        Ok(())
    }

    fn build_tool(&self, arch: &str, compiler: &Path, tool_dir: &Path) -> Result<PathBuf> {
        let args = vec![
            format!("jansson=../{}", DEPENDENCY_DIR),
            format!("CC={}", compiler.display()),
            "EXTRA_CFLAGS=-static".to_string(),
            "LDFLAGS=-static".to_string(),
        ];
        self.step("make", &args, tool_dir);

        let artifact = tool_dir.join(TOOL_ARTIFACT);
        if !artifact.is_file() {
            return Err(Error::ToolBuildFailed {
                arch: arch.to_string(),
                artifact: artifact.display().to_string(),
                cached: self.cache.binary_path(arch).display().to_string(),
            });
        }
        Ok(artifact)
    }

    fn step(&self, program: &str, args: &[String], cwd: &Path) {
        debug!("Running {} {} in {}", program, args.join(" "), cwd.display());
        match self.runner.run(program, args, cwd) {
            Ok(true) => {}
            Ok(false) => warn!("{} exited with a failure status in {}", program, cwd.display()),
            Err(e) => warn!("Failed to run {}: {}", program, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Records invocations and creates the files each step would produce.
    #[derive(Default)]
    struct FakeRunner {
        calls: RefCell<Vec<(String, Vec<String>, PathBuf)>>,
        skip_library: bool,
        skip_tool: bool,
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, program: &str, args: &[String], cwd: &Path) -> std::io::Result<bool> {
            self.calls
                .borrow_mut()
                .push((program.to_string(), args.to_vec(), cwd.to_path_buf()));

            match program {
                "git" => fs::create_dir_all(cwd.join(&args[2]))?,
                "make" if cwd.ends_with("jansson") && !self.skip_library => {
                    let lib = cwd.join(DEPENDENCY_ARTIFACT);
                    fs::create_dir_all(lib.parent().unwrap())?;
                    fs::write(lib, b"!<arch>\n")?;
                }
                "make" if cwd.ends_with("plotnetcfg") && !self.skip_tool => {
                    fs::write(cwd.join(TOOL_ARTIFACT), b"\x7fELF")?;
                }
                "autoreconf" => return Err(std::io::Error::from(std::io::ErrorKind::NotFound)),
                _ => {}
            }
            Ok(true)
        }
    }

    impl FakeRunner {
        fn programs(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(|(p, _, _)| {
                    Path::new(p)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default()
                })
                .collect()
        }
    }

    #[test]
    fn test_build_success() {
        let root = TempDir::new().unwrap();
        let cache = BuildCache::new(root.path());
        let sources = SourceRepos::default();
        let runner = FakeRunner::default();

        let builder = ArtifactBuilder::new(&cache, &sources, &runner);
        let cached = builder
            .build("arm", Path::new("/usr/bin/arm-linux-gnu-gcc"))
            .unwrap();

        assert_eq!(cached, cache.binary_path("arm"));
        assert_eq!(fs::read(&cached).unwrap(), b"\x7fELF");
        assert!(cache.tool_dir("arm").is_dir());
        assert!(cache.dependency_dir("arm").is_dir());
        assert_eq!(
            runner.programs(),
            vec!["git", "git", "autoreconf", "configure", "make", "make"]
        );

        let calls = runner.calls.borrow();
        assert_eq!(calls[0].1, vec!["clone", sources.tool.as_str(), "plotnetcfg"]);
        assert_eq!(calls[0].2, cache.arch_dir("arm"));
        assert_eq!(calls[1].1[1], sources.dependency);
        assert_eq!(calls[3].1[0], "--host=arm");
        assert!(calls[5]
            .1
            .contains(&"CC=/usr/bin/arm-linux-gnu-gcc".to_string()));
        assert!(calls[5].1.contains(&"LDFLAGS=-static".to_string()));
        assert_eq!(calls[5].2, cache.tool_dir("arm"));
    }

    #[test]
    fn test_existing_clones_are_reused() {
        let root = TempDir::new().unwrap();
        let cache = BuildCache::new(root.path());
        fs::create_dir_all(cache.tool_dir("i686")).unwrap();
        fs::create_dir_all(cache.dependency_dir("i686")).unwrap();
        let sources = SourceRepos::default();
        let runner = FakeRunner::default();

        ArtifactBuilder::new(&cache, &sources, &runner)
            .build("i686", Path::new("/usr/bin/i686-linux-gnu-gcc"))
            .unwrap();

        assert!(!runner.programs().contains(&"git".to_string()));
        assert!(cache.has_binary("i686"));
    }

    #[test]
    fn test_dependency_failure_stops_before_tool_build() {
        let root = TempDir::new().unwrap();
        let cache = BuildCache::new(root.path());
        let sources = SourceRepos::default();
        let runner = FakeRunner {
            skip_library: true,
            ..Default::default()
        };

        let err = ArtifactBuilder::new(&cache, &sources, &runner)
            .build("arm", Path::new("/usr/bin/arm-linux-gnu-gcc"))
            .unwrap_err();

        assert!(matches!(err, Error::DependencyBuildFailed { .. }));
        assert!(err.to_string().contains("plotnetcfg.bin"));
        assert_eq!(runner.programs().iter().filter(|p| *p == "make").count(), 1);
        assert!(!cache.has_binary("arm"));
    }

    #[test]
    fn test_tool_failure_leaves_no_binary() {
        let root = TempDir::new().unwrap();
        let cache = BuildCache::new(root.path());
        let sources = SourceRepos::default();
        let runner = FakeRunner {
            skip_tool: true,
            ..Default::default()
        };

        let err = ArtifactBuilder::new(&cache, &sources, &runner)
            .build("x86_64", Path::new("/usr/bin/x86_64-linux-gnu-gcc"))
            .unwrap_err();

        assert!(matches!(err, Error::ToolBuildFailed { .. }));
        assert!(!cache.has_binary("x86_64"));
    }

    #[test]
    fn test_relative_root_clones_into_cache() {
        let cache = BuildCache::new("target/plotfetch-test-cache");
        let _ = fs::remove_dir_all(cache.root());
        let sources = SourceRepos::default();
        let runner = FakeRunner::default();

        let cached = ArtifactBuilder::new(&cache, &sources, &runner)
            .build("i386", Path::new("/usr/bin/i386-linux-gnu-gcc"))
            .unwrap();

        assert!(cached.is_absolute());
        assert!(cache.tool_dir("i386").is_dir());
        assert!(cache.dependency_dir("i386").is_dir());
        assert!(!cache.arch_dir("i386").join("target").exists());
        assert!(cache.has_binary("i386"));
        fs::remove_dir_all(cache.root()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_reports_exit_status() {
        let dir = TempDir::new().unwrap();
        let runner = SystemRunner::new(false);

        assert!(runner.run("true", &[], dir.path()).unwrap());
        assert!(!runner.run("false", &[], dir.path()).unwrap());
        assert!(runner
            .run("plotfetch-no-such-program", &[], dir.path())
            .is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_uses_working_directory() {
        let dir = TempDir::new().unwrap();
        let runner = SystemRunner::new(false);

        let args = vec!["-c".to_string(), "touch marker".to_string()];
        assert!(runner.run("sh", &args, dir.path()).unwrap());
        assert!(dir.path().join("marker").is_file());
    }
}
