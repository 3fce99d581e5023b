//! Forced termination of a child process together with everything it spawned.
//!
//! - Unix: the child is started as the leader of a new process group, and the
//!   whole group receives `SIGKILL`.
//! - Windows: the child is assigned to a job object right after spawning, and
//!   the job is terminated.
//!
//! The runner still kills the direct child afterwards, so a tree that could
//! not be set up degrades to killing only the immediate process.
//!
//! On Windows the job is assigned after the child is already running, and
//! tokio does not hand out the primary thread handle needed to spawn it
//! suspended and resume it later. A process the child starts in that short
//! window is not in the job and survives `terminate()`. The runner's output
//! deadline still bounds how long such a process can keep `run` waiting.

use anyhow::Result;
use tokio::process::Child;

#[cfg(unix)]
pub struct ProcessTree {
    pgid: Option<u32>,
}

#[cfg(unix)]
impl ProcessTree {
    /// Track the process group led by `child`.
    ///
    /// The child must have been spawned with `process_group(0)`.
    pub fn attach(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    /// Send `SIGKILL` to every process in the group.
    #[tracing::instrument(skip(self), fields(pgid = ?self.pgid))]
    pub fn terminate(&self) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid else {
            return Ok(());
        };

        match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            // The whole group is already gone.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(anyhow::anyhow!(
                "Failed to kill process group {}: {}",
                pgid,
                e
            )),
        }
    }
}

#[cfg(windows)]
pub struct ProcessTree {
    job: Option<windows_sys::Win32::Foundation::HANDLE>,
}

// The job handle is only used through thread-safe Win32 calls.
#[cfg(windows)]
unsafe impl Send for ProcessTree {}
#[cfg(windows)]
unsafe impl Sync for ProcessTree {}

#[cfg(windows)]
impl ProcessTree {
    /// Create a job object and put `child` in it. Processes the child starts
    /// afterwards inherit the job.
    pub fn attach(child: &Child) -> Self {
        match Self::create_job(child) {
            Ok(job) => Self { job: Some(job) },
            Err(e) => {
                log::warn!("Process tree tracking unavailable: {}", e);
                Self { job: None }
            }
        }
    }

    fn create_job(child: &Child) -> Result<windows_sys::Win32::Foundation::HANDLE> {
        use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
        use windows_sys::Win32::System::JobObjects::{AssignProcessToJobObject, CreateJobObjectW};

        let process = child
            .raw_handle()
            .ok_or_else(|| anyhow::anyhow!("child has no process handle"))?
            as HANDLE;

        unsafe {
            let job = CreateJobObjectW(std::ptr::null(), std::ptr::null());
            if job.is_null() {
                anyhow::bail!(
                    "CreateJobObjectW failed: {}",
                    std::io::Error::last_os_error()
                );
            }

            if AssignProcessToJobObject(job, process) == 0 {
                let err = std::io::Error::last_os_error();
                CloseHandle(job);
                anyhow::bail!("AssignProcessToJobObject failed: {}", err);
            }

            Ok(job)
        }
    }

    /// Terminate every process in the job.
    #[tracing::instrument(skip(self))]
    pub fn terminate(&self) -> Result<()> {
        use windows_sys::Win32::System::JobObjects::TerminateJobObject;

        let Some(job) = self.job else {
            return Ok(());
        };

        if unsafe { TerminateJobObject(job, 1) } == 0 {
            anyhow::bail!(
                "TerminateJobObject failed: {}",
                std::io::Error::last_os_error()
            );
        }
        Ok(())
    }
}

#[cfg(windows)]
impl Drop for ProcessTree {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            unsafe {
                windows_sys::Win32::Foundation::CloseHandle(job);
            }
        }
    }
}
