//! Stamps the binary with a version and gates tests that cannot run on the
//! build host.
//!
//! - `SDKBOOT_BUILD_VERSION`: `git describe` of the checkout without the
//!   leading `v`. Dirty trees and checkouts without git get a unix timestamp
//!   suffix so two local builds never report the same version.
//! - `sdkboot_skip_cross_windows_tests`: set when building Windows test
//!   binaries on a non-Windows host, where `powershell.exe` is not available.
//!   Set `SDKBOOT_RUN_CROSS_WINDOWS_TESTS` to run them anyway (e.g. under wine).

use std::env;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

const VERSION_ENV: &str = "SDKBOOT_BUILD_VERSION";
const CROSS_TESTS_CFG: &str = "sdkboot_skip_cross_windows_tests";
const CROSS_TESTS_OPT_IN: &str = "SDKBOOT_RUN_CROSS_WINDOWS_TESTS";

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-changed=.git/refs/tags");
    println!("cargo:rerun-if-env-changed={}", CROSS_TESTS_OPT_IN);
    println!("cargo::rustc-check-cfg=cfg({})", CROSS_TESTS_CFG);

    if skip_cross_windows_tests() {
        println!("cargo:rustc-cfg={}", CROSS_TESTS_CFG);
    }

    println!("cargo:rustc-env={}={}", VERSION_ENV, build_version());
}

fn skip_cross_windows_tests() -> bool {
    let host = env::var("HOST").unwrap_or_default();
    let target = env::var("TARGET").unwrap_or_default();
    let cross = target.contains("windows") && !host.contains("windows");
    cross && env::var_os(CROSS_TESTS_OPT_IN).is_none()
}

fn build_version() -> String {
    match git_describe() {
        Some(described) => {
            let version = described.strip_prefix('v').unwrap_or(&described);
            if version.ends_with("-dirty") {
                format!("{}-{}", version, timestamp())
            } else {
                version.to_string()
            }
        }
        None => format!("{}-unknown-{}", env!("CARGO_PKG_VERSION"), timestamp()),
    }
}

/// `None` outside a git checkout or when git is missing.
fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!described.is_empty()).then_some(described)
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
