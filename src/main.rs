use anyhow::Result;
use clap::Parser;
use sdkboot::install::{ConfigOverrides, install};
use sdkboot::platform::{HostPlatformDetector, PlatformDetector};
use sdkboot::process::{CommandRunner, OutputSink, RunOptions, SystemCommandRunner};
use std::path::PathBuf;

/// Exit code reported when `exec` had to kill the command.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// sdkboot - make sure the .NET SDK is present before a build runs
///
/// Downloads the official dotnet-install script for this platform and runs it
/// with the configured channel, version and install directory.
///
/// Examples:
///   sdkboot install                      # Latest LTS into ./.dotnet
///   sdkboot install --version 8.0.100    # A specific SDK
///   sdkboot exec --timeout-ms 5000 ./build.sh
#[derive(Parser, Debug)]
#[command(author, version = env!("SDKBOOT_BUILD_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Download and run the SDK installer script
    Install(InstallArgs),

    /// Run a command with an optional timeout, killing its process tree on expiry
    Exec(ExecArgs),

    /// Show the detected platform and shell settings
    Platform,
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// SDK version to install (defaults to the latest on the channel)
    #[arg(long, env = "SDKBOOT_VERSION", value_name = "VERSION")]
    pub version: Option<String>,

    /// Release channel, e.g. LTS, STS or 8.0
    #[arg(long, env = "SDKBOOT_CHANNEL", value_name = "CHANNEL")]
    pub channel: Option<String>,

    /// Directory the SDK is installed into
    #[arg(long = "install-dir", env = "SDKBOOT_INSTALL_DIR", value_name = "PATH")]
    pub install_dir: Option<PathBuf>,

    /// Base URL the installer script is downloaded from
    #[arg(long = "script-url", env = "SDKBOOT_SCRIPT_URL", value_name = "URL")]
    pub script_url: Option<String>,

    /// JSON settings file (installScriptUrl, channel, version, installDirectory)
    #[arg(long, env = "SDKBOOT_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ExecArgs {
    /// Milliseconds to wait before killing the command; 0 waits forever
    #[arg(long = "timeout-ms", default_value_t = 0, allow_negative_numbers = true)]
    pub timeout_ms: i64,

    /// Working directory for the command
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable; must not already be set
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Capture stdout and print it after the command finishes
    #[arg(long)]
    pub capture: bool,

    /// Program to run
    #[arg(value_name = "COMMAND")]
    pub command: String,

    /// Argument string passed to the program as-is
    #[arg(value_name = "ARGUMENTS", default_value = "", allow_hyphen_values = true)]
    pub arguments: String,
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

async fn exec(args: ExecArgs) -> Result<i32> {
    let sink = args.capture.then(OutputSink::new);

    let mut options = RunOptions::new().timeout_ms(args.timeout_ms);
    if let Some(dir) = args.cwd {
        options = options.working_directory(dir);
    }
    for (key, value) in args.env {
        options = options.env(key, value);
    }
    if let Some(sink) = &sink {
        options = options.capture(sink.clone());
    }

    let result = SystemCommandRunner::new()
        .run(&args.command, &args.arguments, &options)
        .await?;

    if let Some(sink) = sink {
        for (index, line) in sink.lines().iter().enumerate() {
            println!("{:>4} {}", index + 1, line);
        }
    }

    if result.timed_out {
        eprintln!(
            "'{}' timed out after {}ms and was killed",
            args.command, args.timeout_ms
        );
        return Ok(TIMEOUT_EXIT_CODE);
    }
    Ok(result.exit_code)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let runtime = sdkboot::runtime::RealRuntime;

    match cli.command {
        Commands::Install(args) => {
            let overrides = ConfigOverrides {
                config_file: args.config,
                install_script_url: args.script_url,
                channel: args.channel,
                version: args.version,
                install_directory: args.install_dir,
            };
            install(runtime, &HostPlatformDetector, overrides).await?
        }
        Commands::Exec(args) => {
            let code = exec(args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Platform => {
            let descriptor = HostPlatformDetector.detect();
            println!("os:              {}", descriptor.os_family());
            println!("64-bit:          {}", descriptor.is_64_bit());
            println!("shell:           {}", descriptor.shell_command());
            println!("shell arguments: {}", descriptor.shell_argument_prefix());
            println!("script:          dotnet-install.{}", descriptor.script_extension());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from([
            "sdkboot",
            "install",
            "--version",
            "8.0.100",
            "--install-dir",
            "/tmp/sdk",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.version.as_deref(), Some("8.0.100"));
                assert_eq!(args.install_dir, Some(PathBuf::from("/tmp/sdk")));
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_exec_parsing() {
        let cli = Cli::try_parse_from([
            "sdkboot",
            "exec",
            "--timeout-ms",
            "250",
            "--env",
            "A=1",
            "--capture",
            "/bin/sh",
            "-c \"echo hi\"",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.timeout_ms, 250);
                assert_eq!(args.env, vec![("A".to_string(), "1".to_string())]);
                assert!(args.capture);
                assert_eq!(args.command, "/bin/sh");
                assert_eq!(args.arguments, "-c \"echo hi\"");
            }
            _ => panic!("Expected Exec command"),
        }
    }

    #[test]
    fn test_cli_exec_defaults() {
        let cli = Cli::try_parse_from(["sdkboot", "exec", "true"]).unwrap();
        match cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.timeout_ms, 0);
                assert_eq!(args.arguments, "");
                assert!(args.env.is_empty());
                assert!(!args.capture);
            }
            _ => panic!("Expected Exec command"),
        }
    }

    #[test]
    fn test_cli_verbose_is_global() {
        let cli = Cli::try_parse_from(["sdkboot", "platform", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("KEY=a=b").unwrap(),
            ("KEY".to_string(), "a=b".to_string())
        );
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=x").is_err());
    }

    #[test]
    fn test_build_version_is_stamped() {
        let version = env!("SDKBOOT_BUILD_VERSION");
        assert!(!version.is_empty());
        assert!(!version.starts_with('v'));
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        assert!(Cli::try_parse_from(["sdkboot"]).is_err());
    }
}
