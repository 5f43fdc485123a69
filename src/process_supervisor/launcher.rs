//! Relay subprocess launching and signalling
//!
//! Each relay runs as its own process-group leader so teardown can signal the
//! whole group (the tool may fork helpers).

use crate::error::{Error, Result};
use crate::slot_allocator::StreamSlot;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Signal sent to a relay's process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl From<GroupSignal> for Signal {
    fn from(sig: GroupSignal) -> Self {
        match sig {
            GroupSignal::Terminate => Signal::SIGTERM,
            GroupSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// A running relay subprocess
#[async_trait]
pub trait RelayProcess: Send {
    fn pid(&self) -> u32;

    /// False once the process has exited
    fn is_alive(&mut self) -> bool;

    /// Signal the process group; a group that no longer exists is not an error
    fn signal_group(&mut self, signal: GroupSignal) -> Result<()>;

    /// Wait up to `timeout` for exit; true if the process is gone
    async fn wait_exit(&mut self, timeout: Duration) -> bool;
}

/// Starts relay subprocesses for slots
pub trait RelayLauncher: Send + Sync {
    fn launch(&self, slot: &StreamSlot) -> Result<Box<dyn RelayProcess>>;
}

/// Launches the configured command-line tool
pub struct CommandLauncher {
    program: String,
    args_template: String,
    rtp_host: String,
}

impl CommandLauncher {
    pub fn new(program: String, args_template: String, rtp_host: String) -> Self {
        Self {
            program,
            args_template,
            rtp_host,
        }
    }

    /// Expand `{ip}`, `{port}`, `{slot}`, `{mac}` and `{rtp_host}`
    pub fn render_args(&self, slot: &StreamSlot) -> Vec<String> {
        let port = slot.port().to_string();
        let slot_id = slot.slot_id.to_string();
        self.args_template
            .split_whitespace()
            .map(|arg| {
                arg.replace("{ip}", &slot.ip_address)
                    .replace("{port}", &port)
                    .replace("{slot}", &slot_id)
                    .replace("{mac}", &slot.mac_address)
                    .replace("{rtp_host}", &self.rtp_host)
            })
            .collect()
    }
}

impl RelayLauncher for CommandLauncher {
    fn launch(&self, slot: &StreamSlot) -> Result<Box<dyn RelayProcess>> {
        let args = self.render_args(slot);

        let child = Command::new(&self.program)
            .args(&args)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Process {
                slot_id: slot.slot_id,
                message: format!("{} spawn failed: {}", self.program, e),
            })?;

        let pid = child.id().ok_or_else(|| Error::Process {
            slot_id: slot.slot_id,
            message: "process exited before its pid was read".to_string(),
        })?;

        tracing::debug!(
            slot_id = slot.slot_id,
            pid = pid,
            program = %self.program,
            args = ?args,
            "Relay subprocess spawned"
        );

        Ok(Box::new(OsRelayProcess {
            child,
            pid,
            group_gone: false,
        }))
    }
}

/// Relay subprocess owned through its tokio `Child`
pub struct OsRelayProcess {
    child: Child,
    pid: u32,
    /// Set once the group was seen empty; its id may be reused after that
    group_gone: bool,
}

/// True while any process still belongs to group `pgid`
fn group_exists(pgid: u32) -> bool {
    !matches!(signal::killpg(Pid::from_raw(pgid as i32), None), Err(Errno::ESRCH))
}

#[async_trait]
impl RelayProcess for OsRelayProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(_) => signal::kill(Pid::from_raw(self.pid as i32), None).is_ok(),
        }
    }

    fn signal_group(&mut self, sig: GroupSignal) -> Result<()> {
        // a reaped leader's pid only stays reserved while its group has members
        if !self.group_gone && !self.is_alive() && !group_exists(self.pid) {
            self.group_gone = true;
        }
        if self.group_gone {
            return Ok(());
        }
        match signal::killpg(Pid::from_raw(self.pid as i32), Signal::from(sig)) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                self.group_gone = true;
                Ok(())
            }
            Err(errno) => Err(Error::Io(std::io::Error::from(errno))),
        }
    }

    async fn wait_exit(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.child.wait()).await,
            Ok(Ok(_))
        )
    }
}
