//! Host platform detection and shell invocation parameters.
//!
//! A [`PlatformDescriptor`] is computed once per run and passed explicitly to
//! everything that needs to know how to launch a script on this host.

mod quote;

pub use quote::{quote_posix, quote_powershell};

use std::fmt;

/// Operating system family the bootstrapper distinguishes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    MacOs,
    Linux,
}

impl OsFamily {
    /// Detect the family of the running host.
    ///
    /// Unrecognized targets (BSDs, illumos, ...) degrade to [`OsFamily::Linux`]
    /// so callers always get a POSIX shell to work with.
    pub fn detect() -> Self {
        #[cfg(target_os = "windows")]
        {
            OsFamily::Windows
        }
        #[cfg(target_os = "macos")]
        {
            OsFamily::MacOs
        }
        #[cfg(target_os = "linux")]
        {
            OsFamily::Linux
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            log::debug!(
                "Unrecognized OS '{}', falling back to POSIX shell settings",
                std::env::consts::OS
            );
            OsFamily::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Windows => "windows",
            OsFamily::MacOs => "macos",
            OsFamily::Linux => "linux",
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, OsFamily::Windows)
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const POWERSHELL: &str = "powershell.exe";
const POWERSHELL_PREFIX: &str = "-NoProfile -NonInteractive -ExecutionPolicy Bypass -Command";
const POSIX_SHELL: &str = "/bin/sh";
const POSIX_PREFIX: &str = "-c";

/// Immutable description of the host and how to run scripts on it.
///
/// The shell fields are derived from `os_family` alone; there is no way to
/// change them after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDescriptor {
    os_family: OsFamily,
    is_64_bit: bool,
    shell_command: &'static str,
    shell_argument_prefix: &'static str,
    script_extension: &'static str,
}

impl PlatformDescriptor {
    /// Build the descriptor for a given family and bitness.
    pub fn new(os_family: OsFamily, is_64_bit: bool) -> Self {
        let (shell_command, shell_argument_prefix, script_extension) = match os_family {
            OsFamily::Windows => (POWERSHELL, POWERSHELL_PREFIX, "ps1"),
            OsFamily::MacOs | OsFamily::Linux => (POSIX_SHELL, POSIX_PREFIX, "sh"),
        };

        Self {
            os_family,
            is_64_bit,
            shell_command,
            shell_argument_prefix,
            script_extension,
        }
    }

    /// Resolve the descriptor for the running host.
    #[tracing::instrument]
    pub fn resolve() -> Self {
        let descriptor = Self::new(OsFamily::detect(), cfg!(target_pointer_width = "64"));
        log::debug!("Resolved platform: {}", descriptor);
        descriptor
    }

    pub fn os_family(&self) -> OsFamily {
        self.os_family
    }

    pub fn is_64_bit(&self) -> bool {
        self.is_64_bit
    }

    pub fn shell_command(&self) -> &str {
        self.shell_command
    }

    pub fn shell_argument_prefix(&self) -> &str {
        self.shell_argument_prefix
    }

    pub fn script_extension(&self) -> &str {
        self.script_extension
    }

    /// Quote a single token so the platform shell sees it as one literal word.
    pub fn quote(&self, token: &str) -> String {
        if self.os_family.is_windows() {
            quote_powershell(token)
        } else {
            quote_posix(token)
        }
    }

    /// Render the full argument string for running `script` with `args`
    /// through [`shell_command`](Self::shell_command).
    ///
    /// The result starts with the shell argument prefix followed by the inline
    /// command wrapped in double quotes.
    pub fn inline_command(&self, script: &str, args: &[String]) -> String {
        let mut words = Vec::with_capacity(args.len() + 1);
        words.push(self.quote(script));
        words.extend(args.iter().map(|a| self.quote(a)));
        let body = words.join(" ");

        if self.os_family.is_windows() {
            format!(
                "{} \"& {}\"",
                self.shell_argument_prefix,
                body.replace('"', "\\\"")
            )
        } else {
            let escaped = body.replace('\\', "\\\\").replace('"', "\\\"");
            format!("{} \"{}\"", self.shell_argument_prefix, escaped)
        }
    }
}

impl fmt::Display for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}-bit), shell: {} {}, scripts: *.{}",
            self.os_family,
            if self.is_64_bit { 64 } else { 32 },
            self.shell_command,
            self.shell_argument_prefix,
            self.script_extension
        )
    }
}

/// Trait for platform detection (useful for testing)
pub trait PlatformDetector: Send + Sync {
    fn detect(&self) -> PlatformDescriptor;
}

/// Detects the platform of the running host.
pub struct HostPlatformDetector;

impl PlatformDetector for HostPlatformDetector {
    fn detect(&self) -> PlatformDescriptor {
        PlatformDescriptor::resolve()
    }
}

/// Always reports the same descriptor.
pub struct FixedPlatformDetector(pub PlatformDescriptor);

impl PlatformDetector for FixedPlatformDetector {
    fn detect(&self) -> PlatformDescriptor {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_descriptor() {
        let d = PlatformDescriptor::new(OsFamily::Windows, true);
        assert_eq!(d.shell_command(), "powershell.exe");
        assert_eq!(
            d.shell_argument_prefix(),
            "-NoProfile -NonInteractive -ExecutionPolicy Bypass -Command"
        );
        assert_eq!(d.script_extension(), "ps1");
        assert!(d.is_64_bit());
    }

    #[test]
    fn test_posix_descriptors_share_shell_settings() {
        for os in [OsFamily::Linux, OsFamily::MacOs] {
            let d = PlatformDescriptor::new(os, false);
            assert_eq!(d.os_family(), os);
            assert_eq!(d.shell_command(), "/bin/sh");
            assert_eq!(d.shell_argument_prefix(), "-c");
            assert_eq!(d.script_extension(), "sh");
            assert!(!d.is_64_bit());
        }
    }

    #[test]
    fn test_descriptor_is_deterministic() {
        for os in [OsFamily::Windows, OsFamily::Linux, OsFamily::MacOs] {
            for bits in [true, false] {
                assert_eq!(
                    PlatformDescriptor::new(os, bits),
                    PlatformDescriptor::new(os, bits)
                );
            }
        }
    }

    #[test]
    fn test_resolve_matches_host() {
        let d = PlatformDescriptor::resolve();

        #[cfg(target_os = "windows")]
        assert_eq!(d.os_family(), OsFamily::Windows);

        #[cfg(target_os = "macos")]
        assert_eq!(d.os_family(), OsFamily::MacOs);

        #[cfg(target_os = "linux")]
        assert_eq!(d.os_family(), OsFamily::Linux);

        assert_eq!(d.is_64_bit(), cfg!(target_pointer_width = "64"));
        assert!(!d.shell_command().is_empty());
    }

    #[test]
    fn test_fixed_detector() {
        let d = PlatformDescriptor::new(OsFamily::MacOs, true);
        let detector = FixedPlatformDetector(d.clone());
        assert_eq!(detector.detect(), d);
        assert!(!HostPlatformDetector.detect().shell_command().is_empty());
    }

    #[test]
    fn test_inline_command_posix() {
        let d = PlatformDescriptor::new(OsFamily::Linux, true);
        let args = vec!["-Channel".to_string(), "LTS".to_string()];
        assert_eq!(
            d.inline_command("/opt/sdk/dotnet-install.sh", &args),
            r#"-c "/opt/sdk/dotnet-install.sh -Channel LTS""#
        );
    }

    #[test]
    fn test_inline_command_posix_escapes_for_splitter() {
        let d = PlatformDescriptor::new(OsFamily::Linux, true);
        assert_eq!(
            d.inline_command(r#"/tmp/a"b/x.sh"#, &[r"c\d".to_string()]),
            r#"-c "'/tmp/a\"b/x.sh' 'c\\d'""#
        );
    }

    #[test]
    fn test_inline_command_windows() {
        let d = PlatformDescriptor::new(OsFamily::Windows, true);
        let args = vec!["-InstallDir".to_string(), r"C:\My SDK".to_string()];
        assert_eq!(
            d.inline_command(r"C:\My SDK\dotnet-install.ps1", &args),
            r#"-NoProfile -NonInteractive -ExecutionPolicy Bypass -Command "& 'C:\My SDK\dotnet-install.ps1' -InstallDir 'C:\My SDK'""#
        );
    }

    #[test]
    fn test_display() {
        let d = PlatformDescriptor::new(OsFamily::Linux, true);
        assert_eq!(d.to_string(), "linux (64-bit), shell: /bin/sh -c, scripts: *.sh");
    }
}
