//! Installing the SDK through the official installer script.
//!
//! The flow for one install is a fixed sequence of [`InstallStage`]s:
//! ensure the install directory, fetch the script, make it executable (not on
//! Windows), run it through the platform shell and check its exit code.

mod config;

pub use config::{
    BootstrapConfig, ConfigFile, ConfigOverrides, DEFAULT_CHANNEL, DEFAULT_INSTALL_DIR_NAME,
    DEFAULT_INSTALL_SCRIPT_URL, normalize_version,
};

use anyhow::{Context, Result};
use log::{debug, info};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::download::ScriptFetcher;
use crate::http::HttpClient;
use crate::platform::{PlatformDescriptor, PlatformDetector};
use crate::process::{CommandRunner, RunOptions, SystemCommandRunner};
use crate::runtime::Runtime;

const SCRIPT_STEM: &str = "dotnet-install";
const SCRIPT_MODE: u32 = 0o755;

/// Everything needed for one install, derived right before running it.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallPlan {
    pub install_script_url: String,
    pub channel: String,
    pub version: Option<String>,
    pub install_directory: PathBuf,
}

impl InstallPlan {
    /// `dotnet-install.<ext>` for the given platform.
    pub fn script_name(descriptor: &PlatformDescriptor) -> String {
        format!("{}.{}", SCRIPT_STEM, descriptor.script_extension())
    }

    pub fn script_path(&self, descriptor: &PlatformDescriptor) -> PathBuf {
        self.install_directory.join(Self::script_name(descriptor))
    }

    pub fn script_url(&self, descriptor: &PlatformDescriptor) -> String {
        format!(
            "{}/{}",
            self.install_script_url.trim_end_matches('/'),
            Self::script_name(descriptor)
        )
    }

    /// Version for messages: the requested one, or `latest`.
    pub fn version_label(&self) -> &str {
        self.version.as_deref().unwrap_or("latest")
    }
}

/// Load the configuration and install the SDK with the real fetcher and runner.
#[tracing::instrument(skip(runtime, detector))]
pub async fn install<R: Runtime>(
    runtime: R,
    detector: &dyn PlatformDetector,
    overrides: ConfigOverrides,
) -> Result<()> {
    let descriptor = detector.detect();
    let config = BootstrapConfig::load(&runtime, &overrides)?;
    let plan = config.plan(overrides.version.as_deref());
    let installer = Installer::new(runtime, HttpClient::with_defaults()?, SystemCommandRunner::new());
    installer.install_sdk(&descriptor, &plan).await
}

/// Installer script arguments in their canonical order: channel, optional
/// version, install directory.
pub fn build_install_args(plan: &InstallPlan) -> Vec<String> {
    let mut args = vec!["-Channel".to_string(), plan.channel.clone()];
    if let Some(version) = &plan.version {
        args.push("-Version".to_string());
        args.push(version.clone());
    }
    args.push("-InstallDir".to_string());
    args.push(plan.install_directory.display().to_string());
    args
}

/// Steps of a single install, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    NotStarted,
    DirectoryEnsured,
    ScriptFetched,
    /// Windows: the script is run by the shell, no permission change needed.
    ScriptReady,
    ScriptMadeExecutable,
    Invoked,
    Succeeded,
    Failed,
}

/// Install failures that carry the requested version.
#[derive(Debug)]
pub enum InstallError {
    /// The installer script could not be downloaded.
    FetchFailed {
        version: String,
        url: String,
        source: anyhow::Error,
    },
    /// The installer ran and exited with a non-zero code.
    InstallationFailed { version: String, exit_code: i32 },
    /// The installer was killed after a timeout set by the runner.
    TimedOut { version: String },
}

impl InstallError {
    pub fn version(&self) -> &str {
        match self {
            InstallError::FetchFailed { version, .. }
            | InstallError::InstallationFailed { version, .. }
            | InstallError::TimedOut { version } => version,
        }
    }
}

impl fmt::Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallError::FetchFailed { version, url, .. } => {
                write!(
                    f,
                    "Failed to install SDK {}: could not download installer script from {}",
                    version, url
                )
            }
            InstallError::InstallationFailed { version, exit_code } => {
                write!(
                    f,
                    "Failed to install SDK {}: installer exited with code {}",
                    version, exit_code
                )
            }
            InstallError::TimedOut { version } => {
                write!(
                    f,
                    "Failed to install SDK {}: installer timed out and was killed",
                    version
                )
            }
        }
    }
}

impl std::error::Error for InstallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InstallError::FetchFailed { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

pub struct Installer<R: Runtime, F: ScriptFetcher, C: CommandRunner> {
    pub runtime: R,
    pub fetcher: F,
    pub runner: C,
}

impl<R: Runtime, F: ScriptFetcher, C: CommandRunner> Installer<R, F, C> {
    pub fn new(runtime: R, fetcher: F, runner: C) -> Self {
        Self {
            runtime,
            fetcher,
            runner,
        }
    }

    /// Install the SDK described by `plan` on the platform `descriptor`.
    #[tracing::instrument(skip(self, descriptor))]
    pub async fn install_sdk(
        &self,
        descriptor: &PlatformDescriptor,
        plan: &InstallPlan,
    ) -> Result<()> {
        let mut stages = Vec::new();
        self.install_sdk_tracked(descriptor, plan, &mut stages).await
    }

    /// Like [`install_sdk`](Self::install_sdk), recording every stage reached
    /// into `stages`. The last entry is always `Succeeded` or `Failed`.
    pub async fn install_sdk_tracked(
        &self,
        descriptor: &PlatformDescriptor,
        plan: &InstallPlan,
        stages: &mut Vec<InstallStage>,
    ) -> Result<()> {
        enter(stages, InstallStage::NotStarted);

        let result = self.run_stages(descriptor, plan, stages).await;
        match &result {
            Ok(()) => {
                enter(stages, InstallStage::Succeeded);
                info!(
                    "SDK {} installed to {}",
                    plan.version_label(),
                    plan.install_directory.display()
                );
            }
            Err(_) => enter(stages, InstallStage::Failed),
        }
        result
    }

    async fn run_stages(
        &self,
        descriptor: &PlatformDescriptor,
        plan: &InstallPlan,
        stages: &mut Vec<InstallStage>,
    ) -> Result<()> {
        let version = plan.version_label();
        let install_dir = &plan.install_directory;

        self.ensure_directory(install_dir).with_context(|| {
            format!(
                "Failed to install SDK {}: could not create install directory {}",
                version,
                install_dir.display()
            )
        })?;
        enter(stages, InstallStage::DirectoryEnsured);

        let script_path = plan.script_path(descriptor);
        let script_url = plan.script_url(descriptor);
        self.fetcher
            .fetch(&self.runtime, &script_url, &script_path)
            .await
            .map_err(|source| InstallError::FetchFailed {
                version: version.to_string(),
                url: script_url.clone(),
                source,
            })?;
        enter(stages, InstallStage::ScriptFetched);

        if descriptor.os_family().is_windows() {
            enter(stages, InstallStage::ScriptReady);
        } else {
            self.runtime
                .set_permissions(&script_path, SCRIPT_MODE)
                .with_context(|| {
                    format!(
                        "Failed to install SDK {}: could not make {} executable",
                        version,
                        script_path.display()
                    )
                })?;
            enter(stages, InstallStage::ScriptMadeExecutable);
        }

        let args = build_install_args(plan);
        let arguments = descriptor.inline_command(&script_path.display().to_string(), &args);
        let options = RunOptions::new().working_directory(install_dir);

        info!("Running installer for SDK {} (channel {})", version, plan.channel);
        let result = self
            .runner
            .run(descriptor.shell_command(), &arguments, &options)
            .await
            .with_context(|| {
                format!("Failed to install SDK {}: could not launch installer", version)
            })?;
        enter(stages, InstallStage::Invoked);

        if result.timed_out {
            return Err(InstallError::TimedOut {
                version: version.to_string(),
            }
            .into());
        }
        if result.exit_code != 0 {
            return Err(InstallError::InstallationFailed {
                version: version.to_string(),
                exit_code: result.exit_code,
            }
            .into());
        }
        Ok(())
    }

    /// Create `dir` if missing. Calling it again is a no-op.
    fn ensure_directory(&self, dir: &Path) -> Result<()> {
        if self.runtime.is_dir(dir) {
            return Ok(());
        }
        debug!("Creating install directory {}", dir.display());
        self.runtime.create_dir_all(dir)
    }
}

fn enter(stages: &mut Vec<InstallStage>, stage: InstallStage) {
    debug!("Install stage: {:?}", stage);
    stages.push(stage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::MockScriptFetcher;
    use crate::platform::OsFamily;
    use crate::process::{ExecutionResult, MockCommandRunner, RunError};
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    fn install_dir() -> PathBuf {
        #[cfg(not(windows))]
        {
            PathBuf::from("/x")
        }
        #[cfg(windows)]
        {
            PathBuf::from(r"C:\x")
        }
    }

    fn plan(version: Option<&str>) -> InstallPlan {
        InstallPlan {
            install_script_url: "https://dot.net/v1".into(),
            channel: "LTS".into(),
            version: version.map(String::from),
            install_directory: install_dir(),
        }
    }

    fn linux() -> PlatformDescriptor {
        PlatformDescriptor::new(OsFamily::Linux, true)
    }

    fn windows() -> PlatformDescriptor {
        PlatformDescriptor::new(OsFamily::Windows, true)
    }

    fn fetcher_ok() -> MockScriptFetcher {
        let mut fetcher = MockScriptFetcher::new();
        fetcher.expect_fetch().returning(|_, _, _| Ok(42));
        fetcher
    }

    fn runner_exiting(code: i32) -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(move |_, _, _| Ok(ExecutionResult::exited(code)));
        runner
    }

    fn runtime_with_dir() -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_dir().returning(|_| true);
        runtime.expect_set_permissions().returning(|_, _| Ok(()));
        runtime
    }

    #[test]
    fn test_args_without_version() {
        let p = InstallPlan {
            install_directory: PathBuf::from("/x"),
            ..plan(None)
        };
        assert_eq!(
            build_install_args(&p),
            vec!["-Channel", "LTS", "-InstallDir", "/x"]
        );
    }

    #[test]
    fn test_args_with_version() {
        let p = InstallPlan {
            install_directory: PathBuf::from("/x"),
            ..plan(Some("3.1.0"))
        };
        assert_eq!(
            build_install_args(&p),
            vec!["-Channel", "LTS", "-Version", "3.1.0", "-InstallDir", "/x"]
        );
    }

    #[test]
    fn test_script_location() {
        let p = InstallPlan {
            install_script_url: "https://mirror.example.com/v1/".into(),
            ..plan(None)
        };
        assert_eq!(
            p.script_url(&linux()),
            "https://mirror.example.com/v1/dotnet-install.sh"
        );
        assert_eq!(
            p.script_url(&windows()),
            "https://mirror.example.com/v1/dotnet-install.ps1"
        );
        assert_eq!(p.script_path(&linux()), install_dir().join("dotnet-install.sh"));
        assert_eq!(p.version_label(), "latest");
    }

    #[tokio::test]
    async fn test_install_success_on_linux() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_dir().returning(|_| false);
        runtime
            .expect_create_dir_all()
            .with(eq(install_dir()))
            .times(1)
            .returning(|_| Ok(()));
        runtime
            .expect_set_permissions()
            .with(eq(install_dir().join("dotnet-install.sh")), eq(0o755))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut fetcher = MockScriptFetcher::new();
        let expected_dest = install_dir().join("dotnet-install.sh");
        fetcher
            .expect_fetch()
            .withf(move |_, url, dest| {
                url == "https://dot.net/v1/dotnet-install.sh" && dest == expected_dest.as_path()
            })
            .times(1)
            .returning(|_, _, _| Ok(100));

        let mut runner = MockCommandRunner::new();
        let expected_args = linux().inline_command(
            &install_dir().join("dotnet-install.sh").display().to_string(),
            &build_install_args(&plan(Some("8.0.100"))),
        );
        runner
            .expect_run()
            .withf(move |command, arguments, options| {
                command == "/bin/sh"
                    && arguments == expected_args
                    && options.timeout_ms == 0
                    && options.output_sink.is_none()
                    && options.working_directory.as_deref() == Some(install_dir().as_path())
            })
            .times(1)
            .returning(|_, _, _| Ok(ExecutionResult::exited(0)));

        let installer = Installer::new(runtime, fetcher, runner);
        let mut stages = Vec::new();
        installer
            .install_sdk_tracked(&linux(), &plan(Some("8.0.100")), &mut stages)
            .await
            .unwrap();

        assert_eq!(
            stages,
            vec![
                InstallStage::NotStarted,
                InstallStage::DirectoryEnsured,
                InstallStage::ScriptFetched,
                InstallStage::ScriptMadeExecutable,
                InstallStage::Invoked,
                InstallStage::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn test_install_on_windows_skips_permissions() {
        // No set_permissions expectation: calling it would panic.
        let mut runtime = MockRuntime::new();
        runtime.expect_is_dir().returning(|_| true);

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|command, arguments, _| {
                command == "powershell.exe" && arguments.contains("dotnet-install.ps1")
            })
            .returning(|_, _, _| Ok(ExecutionResult::exited(0)));

        let installer = Installer::new(runtime, fetcher_ok(), runner);
        let mut stages = Vec::new();
        installer
            .install_sdk_tracked(&windows(), &plan(None), &mut stages)
            .await
            .unwrap();

        assert_eq!(
            stages,
            vec![
                InstallStage::NotStarted,
                InstallStage::DirectoryEnsured,
                InstallStage::ScriptFetched,
                InstallStage::ScriptReady,
                InstallStage::Invoked,
                InstallStage::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_installation_failed() {
        let installer = Installer::new(runtime_with_dir(), fetcher_ok(), runner_exiting(1));

        let err = installer
            .install_sdk(&linux(), &plan(Some("3.1.0")))
            .await
            .unwrap_err();

        match err.downcast_ref::<InstallError>() {
            Some(InstallError::InstallationFailed { version, exit_code }) => {
                assert_eq!(version, "3.1.0");
                assert_eq!(*exit_code, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.downcast_ref::<RunError>().is_none());
        assert_eq!(
            err.to_string(),
            "Failed to install SDK 3.1.0: installer exited with code 1"
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_stops_before_running() {
        let mut fetcher = MockScriptFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_, _, _| Err(anyhow::anyhow!("connection refused")));

        // No run expectation: the installer must not be launched.
        let runner = MockCommandRunner::new();
        let installer = Installer::new(runtime_with_dir(), fetcher, runner);

        let mut stages = Vec::new();
        let err = installer
            .install_sdk_tracked(&linux(), &plan(None), &mut stages)
            .await
            .unwrap_err();

        let install_err = err.downcast_ref::<InstallError>().unwrap();
        assert!(matches!(install_err, InstallError::FetchFailed { .. }));
        assert_eq!(install_err.version(), "latest");
        assert!(format!("{:#}", err).contains("connection refused"));
        assert_eq!(stages.last(), Some(&InstallStage::Failed));
        assert!(!stages.contains(&InstallStage::Invoked));
    }

    #[tokio::test]
    async fn test_launch_failure_names_version() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|command, _, _| {
            Err(RunError::Launch {
                command: command.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }
            .into())
        });
        let installer = Installer::new(runtime_with_dir(), fetcher_ok(), runner);

        let err = installer
            .install_sdk(&linux(), &plan(Some("9.0.100")))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("9.0.100"));
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::Launch { .. })
        ));
    }

    #[tokio::test]
    async fn test_timed_out_result_is_reported() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _, _| Ok(ExecutionResult::timed_out()));
        let installer = Installer::new(runtime_with_dir(), fetcher_ok(), runner);

        let err = installer
            .install_sdk(&linux(), &plan(Some("8.0.100")))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<InstallError>(),
            Some(InstallError::TimedOut { version }) if version == "8.0.100"
        ));
    }

    #[tokio::test]
    async fn test_directory_failure_stops_everything() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_dir().returning(|_| false);
        runtime
            .expect_create_dir_all()
            .returning(|_| Err(anyhow::anyhow!("permission denied")));

        let installer =
            Installer::new(runtime, MockScriptFetcher::new(), MockCommandRunner::new());
        let mut stages = Vec::new();
        let err = installer
            .install_sdk_tracked(&linux(), &plan(None), &mut stages)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("could not create install directory"));
        assert_eq!(stages, vec![InstallStage::NotStarted, InstallStage::Failed]);
    }

    #[tokio::test]
    async fn test_chmod_failure_is_propagated() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_dir().returning(|_| true);
        runtime
            .expect_set_permissions()
            .returning(|_, _| Err(anyhow::anyhow!("read-only file system")));

        let installer = Installer::new(runtime, fetcher_ok(), MockCommandRunner::new());
        let err = installer
            .install_sdk(&linux(), &plan(None))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("could not make"));
    }

    #[test]
    fn test_ensure_directory_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sdk");
        let installer = Installer::new(
            crate::runtime::RealRuntime,
            MockScriptFetcher::new(),
            MockCommandRunner::new(),
        );

        installer.ensure_directory(&target).unwrap();
        installer.ensure_directory(&target).unwrap();

        assert!(target.is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
