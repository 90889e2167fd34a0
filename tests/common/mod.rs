// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! `Harness` roots a cellar, prefix, cache, and build directory in a temp
//! dir and wires a kitchen to two fakes:
//! - `TarballServer` serves generated `.tar.gz` sources by URL
//! - `FakeToolchain` records every invocation and simulates autotools

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use formulary::hash::{HashAlgorithm, hash_bytes};
use formulary::kitchen::{Fetcher, Invocation, StepOutcome, StepOutput, ToolchainInvoker};
use formulary::{
    BuildPlan, CancelToken, Cellar, Checksum, Config, Error, InstallReport, Kitchen,
    KitchenConfig, MemorySource, OptionFlags, PlanRequest, Planner, Result, SilentObserver,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Build a gzipped tarball with every file under `<top>/`
pub fn tarball(top: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", top, path), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Fetcher serving in-memory tarballs by URL
#[derive(Default)]
pub struct TarballServer {
    root: PathBuf,
    files: Mutex<HashMap<String, PathBuf>>,
    requests: Mutex<Vec<String>>,
}

impl TarballServer {
    pub fn new(root: &Path) -> Self {
        std::fs::create_dir_all(root).unwrap();
        Self {
            root: root.to_path_buf(),
            ..Self::default()
        }
    }

    /// Serve `data` at `url`; returns its `sha256:` checksum
    pub fn serve(&self, url: &str, data: &[u8]) -> String {
        let mut files = self.files.lock().unwrap();
        let path = self.root.join(format!("{}-{}", files.len(), basename(url)));
        std::fs::write(&path, data).unwrap();
        files.insert(url.to_string(), path);
        format!("sha256:{}", hash_bytes(HashAlgorithm::Sha256, data))
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Fetcher for TarballServer {
    fn fetch(&self, url: &str, checksum: &Checksum) -> Result<PathBuf> {
        self.requests.lock().unwrap().push(url.to_string());
        let path = self
            .files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Fetch {
                url: url.to_string(),
                reason: "404 Not Found".to_string(),
            })?;
        if !checksum.matches_file(&path)? {
            return Err(Error::ChecksumMismatch {
                url: url.to_string(),
                expected: checksum.to_string(),
                actual: "something else".to_string(),
            });
        }
        Ok(path)
    }
}

fn basename(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// What the fake toolchain does for a matching step
#[derive(Clone)]
enum Script {
    Fail(i32),
    Cancel(CancelToken),
    TimeOut,
}

/// Toolchain that records invocations instead of running them
///
/// It simulates autotools: the `--prefix=` of a configure step is remembered
/// per working directory, and an install-phase step writes
/// `<prefix>/bin/<package>`.
#[derive(Default)]
pub struct FakeToolchain {
    invocations: Mutex<Vec<Invocation>>,
    prefixes: Mutex<HashMap<PathBuf, PathBuf>>,
    scripts: Mutex<Vec<(String, String, Script)>>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `package`'s first step of `phase` exit with `status`
    pub fn fail(&self, package: &str, phase: &str, status: i32) {
        self.script(package, phase, Script::Fail(status));
    }

    /// Trip `token` when `package` reaches `phase`
    pub fn cancel_at(&self, package: &str, phase: &str, token: &CancelToken) {
        self.script(package, phase, Script::Cancel(token.clone()));
    }

    pub fn time_out(&self, package: &str, phase: &str) {
        self.script(package, phase, Script::TimeOut);
    }

    fn script(&self, package: &str, phase: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .push((package.to_string(), phase.to_string(), script));
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Packages that reached each toolchain step, as `package:phase:command`
    pub fn transcript(&self) -> Vec<String> {
        let prefixes = self.prefixes.lock().unwrap();
        self.invocations()
            .iter()
            .map(|inv| {
                let package = prefixes
                    .get(&inv.workdir)
                    .and_then(|p| package_of(p))
                    .unwrap_or_default();
                format!("{}:{}:{}", package, inv.phase, inv.display())
            })
            .collect()
    }

    /// Packages whose configure step ran, in order
    pub fn configured(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .filter(|inv| inv.phase == "configure")
            .filter_map(|inv| prefix_arg(inv).and_then(|p| package_of(&p)))
            .collect()
    }
}

fn prefix_arg(invocation: &Invocation) -> Option<PathBuf> {
    invocation
        .args
        .iter()
        .find_map(|a| a.strip_prefix("--prefix=").map(PathBuf::from))
}

/// Package name of a keg path `<cellar>/<name>/<version>`
fn package_of(keg: &Path) -> Option<String> {
    keg.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
}

impl ToolchainInvoker for FakeToolchain {
    fn invoke(&self, invocation: &Invocation, _cancel: &CancelToken) -> io::Result<StepOutcome> {
        self.invocations.lock().unwrap().push(invocation.clone());

        let keg = {
            let mut prefixes = self.prefixes.lock().unwrap();
            if let Some(prefix) = prefix_arg(invocation) {
                prefixes.insert(invocation.workdir.clone(), prefix);
            }
            prefixes.get(&invocation.workdir).cloned()
        };
        let package = keg.as_deref().and_then(package_of);

        let scripted = {
            let mut scripts = self.scripts.lock().unwrap();
            let position = scripts.iter().position(|(p, phase, _)| {
                Some(p.as_str()) == package.as_deref() && *phase == invocation.phase
            });
            position.map(|i| scripts.remove(i).2)
        };
        match scripted {
            Some(Script::Fail(status)) => {
                return Ok(StepOutcome::Exited(StepOutput {
                    status,
                    stdout: String::new(),
                    stderr: format!("{}: simulated failure\n", invocation.program),
                }));
            }
            Some(Script::Cancel(token)) => {
                token.cancel();
                return Ok(StepOutcome::Cancelled);
            }
            Some(Script::TimeOut) => {
                return Ok(StepOutcome::TimedOut {
                    output: StepOutput::default(),
                });
            }
            None => {}
        }

        if invocation.phase == "install"
            && let (Some(keg), Some(package)) = (&keg, &package)
        {
            let bin = keg.join("bin");
            std::fs::create_dir_all(&bin)?;
            std::fs::write(bin.join(package), format!("#!/bin/sh\necho {}\n", package))?;
        }

        Ok(StepOutcome::Exited(StepOutput::default()))
    }
}

/// Isolated engine: temp dirs, recipes in memory, fake fetcher and toolchain
pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub source: MemorySource,
    pub server: Arc<TarballServer>,
    pub toolchain: Arc<FakeToolchain>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            fetch_retries: 1,
            retry_delay_ms: 0,
            jobs: 8,
            ..Config::rooted_at(dir.path())
        };
        let server = Arc::new(TarballServer::new(&dir.path().join("served")));
        Self {
            dir,
            config,
            source: MemorySource::new(),
            server,
            toolchain: Arc::new(FakeToolchain::new()),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn cellar(&self) -> Cellar {
        Cellar::from_config(&self.config)
    }

    pub fn kitchen(&self) -> Kitchen {
        Kitchen::new(
            KitchenConfig::from(&self.config),
            self.cellar(),
            self.server.clone(),
            self.toolchain.clone(),
        )
    }

    /// Add a package served at a generated URL
    ///
    /// `body` is appended after the `[package]` and `[source.stable]`
    /// sections.
    pub fn package(&mut self, name: &str, version: &str, body: &str) {
        self.package_with_files(name, version, &[("configure", "#!/bin/sh\n")], body);
    }

    pub fn package_with_files(
        &mut self,
        name: &str,
        version: &str,
        files: &[(&str, &str)],
        body: &str,
    ) {
        let top = format!("{}-{}", name, version);
        let url = format!("https://dl.example.org/{}/{}.tar.gz", name, top);
        let checksum = self.server.serve(&url, &tarball(&top, files));
        let toml = format!(
            "[package]\nname = \"{name}\"\n\n[source.stable]\nversion = \"{version}\"\nurl = \"{url}\"\nchecksum = \"{checksum}\"\n\n{body}\n"
        );
        self.source.insert_toml(&toml).unwrap();
    }

    pub fn plan(&self, root: &str, flags: &[&str]) -> Result<BuildPlan> {
        let cellar = self.cellar();
        Planner::new(&self.source, &cellar)
            .plan(&PlanRequest::new(root).with_root_flags(OptionFlags::parse(flags)))
    }

    pub fn install(&self, root: &str, flags: &[&str]) -> InstallReport {
        self.install_with(root, flags, &CancelToken::new())
    }

    pub fn install_with(&self, root: &str, flags: &[&str], cancel: &CancelToken) -> InstallReport {
        let plan = self.plan(root, flags).unwrap();
        self.kitchen().install(&plan, &SilentObserver, cancel)
    }
}

/// Every path under `dir` with file contents, for byte-level comparisons
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap().to_path_buf();
            let content = e.file_type().is_file().then(|| std::fs::read(e.path()).unwrap());
            (rel, content)
        })
        .collect()
}
