//! Guest readiness polling and in-guest program execution.
//!
//! Neither the guest state nor the tools status has a change feed, so
//! readiness is a fixed-interval poll with a soft timeout.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::{GuestCredentials, GuestOperations, GuestProbe, GuestStatus, RemoteObjectRef};
use crate::error::VmcliError;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct GuestReadinessWaiter<'a, P: GuestProbe> {
    probe: &'a P,
    interval: Duration,
    cancel: CancellationToken,
}

impl<'a, P: GuestProbe> GuestReadinessWaiter<'a, P> {
    pub fn new(probe: &'a P) -> Self {
        Self {
            probe,
            interval: POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop polling with [`VmcliError::Cancelled`] once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// `Ok(false)` when the guest OS did not report `running` in time.
    pub async fn wait_for_guest_os(
        &self,
        vm: &RemoteObjectRef,
        timeout: Duration,
    ) -> Result<bool, VmcliError> {
        tracing::info!(vm = %vm.name, timeout = timeout.as_secs(), "waiting for guest OS");
        self.poll(vm, timeout, "guest OS to boot", GuestStatus::os_running)
            .await
    }

    /// `Ok(false)` when VMware tools did not become ok/old in time.
    pub async fn wait_for_guest_tools(
        &self,
        vm: &RemoteObjectRef,
        timeout: Duration,
    ) -> Result<bool, VmcliError> {
        tracing::info!(vm = %vm.name, timeout = timeout.as_secs(), "waiting for guest tools");
        self.poll(vm, timeout, "guest tools", GuestStatus::tools_ready)
            .await
    }

    async fn poll(
        &self,
        vm: &RemoteObjectRef,
        timeout: Duration,
        what: &str,
        ready: impl Fn(&GuestStatus) -> bool,
    ) -> Result<bool, VmcliError> {
        let mut waited = Duration::ZERO;
        loop {
            let status = self.probe.guest_status(vm).await?;
            if ready(&status) {
                tracing::debug!(vm = %vm.name, waited = waited.as_secs(), "{what} ready");
                return Ok(true);
            }
            if waited > timeout {
                tracing::warn!(vm = %vm.name, timeout = timeout.as_secs(), "timed out waiting for {what}");
                return Ok(false);
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(VmcliError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
            waited += self.interval;
        }
    }
}

/// Split `"a arg; b arg"` into separate commands.
pub fn split_commands(cmd: &str) -> Vec<String> {
    cmd.split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Start every command in the guest in order, stopping at the first
/// failure or once `cancel` fires. Program output is not collected.
pub async fn exec_inside_vm<B>(
    backend: &B,
    vm: &RemoteObjectRef,
    commands: &[String],
    credentials: &GuestCredentials,
    wait_for_tools: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<(), VmcliError>
where
    B: GuestProbe + GuestOperations,
{
    if commands.is_empty() {
        return Err(VmcliError::Validation {
            message: "no command provided for execution".into(),
        });
    }

    if let Some(timeout) = wait_for_tools {
        GuestReadinessWaiter::new(backend)
            .with_cancellation(cancel.clone())
            .wait_for_guest_tools(vm, timeout)
            .await?;
    }

    let status = backend.guest_status(vm).await?;
    if status.tools_unavailable() {
        return Err(VmcliError::Guest {
            message: format!(
                "VMware tools are not installed or not running in {} ({})",
                vm.name, status.tools_status
            ),
        });
    }

    for command in commands {
        let mut words = command.split_whitespace();
        let Some(program) = words.next() else {
            continue;
        };
        let arguments = words.collect::<Vec<_>>().join(" ");
        if cancel.is_cancelled() {
            return Err(VmcliError::Cancelled);
        }

        tracing::info!(vm = %vm.name, program, arguments = %arguments, "running command in guest");
        let pid = backend
            .start_program(vm, credentials, program, &arguments)
            .await
            .map_err(guest_fault)?;
        tracing::debug!(pid, "guest process started");
    }
    Ok(())
}

fn guest_fault(err: VmcliError) -> VmcliError {
    match err.fault() {
        Some("FileNotFound") => VmcliError::Guest {
            message: format!("{err}. Try providing absolute path to the binary."),
        },
        Some("InvalidGuestLogin") => VmcliError::Guest {
            message: format!("{err}. Check --guest-user and --guest-pass."),
        },
        _ => err,
    }
}
