//! Process information.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn current_dir_impl(&self) -> Result<PathBuf> {
        env::current_dir().context("Failed to get current directory")
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};

    #[test]
    fn test_current_dir_is_absolute() {
        let cwd = RealRuntime.current_dir().unwrap();
        assert!(cwd.is_absolute());
        assert_eq!(cwd, std::env::current_dir().unwrap());
    }
}
