//! Subcommand handlers and the registry that dispatches to them.
//!
//! The registry is built once at startup with [`RegistryBuilder`];
//! registering two handlers under one name fails there, never at
//! dispatch time. Composite handlers call the operations exported by
//! their sibling modules directly, in order.

pub mod attach;
pub mod clone;
pub mod create;
pub mod create_empty;
pub mod devices;
pub mod exec;
pub mod list;
pub mod modify;
pub mod power;
pub mod snapshot;
pub mod tag;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::backend::vsphere::ConnectOptions;
use crate::backend::{Backend, GuestCredentials, ObjectKind, RemoteObjectRef, TaskRef};
use crate::cli::Command;
use crate::config::Settings;
use crate::error::{Family, VmcliError};
use crate::guest::GuestReadinessWaiter;
use crate::progress::OutputMode;
use crate::resolver::ObjectResolver;
use crate::tasks::{TaskWaiter, WaitSummary};

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), VmcliError>> + 'a>>;

/// One subcommand. Handlers are stateless; everything they touch comes
/// in through the [`Context`].
pub trait Handler<B: Backend> {
    /// Registry key, the subcommand name.
    fn name(&self) -> &'static str;
    /// Family whose exit code a failure maps to.
    fn family(&self) -> Family;
    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a>;
}

pub struct RegistryBuilder<B> {
    handlers: Vec<Box<dyn Handler<B>>>,
}

impl<B: Backend> Default for RegistryBuilder<B> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<B: Backend> RegistryBuilder<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: impl Handler<B> + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn build(self) -> Result<CommandRegistry<B>, VmcliError> {
        let mut handlers = BTreeMap::new();
        for handler in self.handlers {
            let name = handler.name();
            if handlers.insert(name, handler).is_some() {
                return Err(VmcliError::Configuration {
                    message: format!("command '{name}' registered twice"),
                });
            }
        }
        Ok(CommandRegistry { handlers })
    }
}

pub struct CommandRegistry<B> {
    handlers: BTreeMap<&'static str, Box<dyn Handler<B>>>,
}

impl<B: Backend> CommandRegistry<B> {
    /// Every handler this crate ships.
    pub fn standard() -> Result<Self, VmcliError> {
        RegistryBuilder::new()
            .register(list::ListHandler)
            .register(clone::CloneHandler)
            .register(create::CreateHandler)
            .register(create_empty::CreateEmptyHandler)
            .register(attach::AttachHandler)
            .register(modify::ModifyHandler)
            .register(exec::ExecHandler)
            .register(power::PowerHandler)
            .register(snapshot::SnapshotHandler)
            .register(tag::TagHandler)
            .build()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Run the handler registered for `command`. Failures come back
    /// tagged with the handler's family. A run that ends after the context
    /// was cancelled counts as cancelled even if the handler returned `Ok`.
    pub async fn dispatch(&self, ctx: &Context<'_, B>, command: &Command) -> Result<(), VmcliError> {
        let name = command.name();
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| VmcliError::Configuration {
                message: format!("no handler registered for '{name}'"),
            })?;
        tracing::debug!(command = name, "dispatching");
        let result = match ctx.check_cancelled() {
            Ok(()) => handler.run(ctx, command).await.and_then(|()| ctx.check_cancelled()),
            Err(e) => Err(e),
        };
        result.map_err(|e| e.in_family(handler.family()))
    }
}

/// Error for a handler invoked with another handler's command.
pub(crate) fn mismatch(handler: &str, command: &Command) -> VmcliError {
    VmcliError::Configuration {
        message: format!("handler '{handler}' cannot run '{}'", command.name()),
    }
}

/// Shared state for one invocation: the session, the settings and where
/// results are printed.
pub struct Context<'a, B> {
    pub backend: &'a B,
    pub settings: &'a Settings,
    pub connect: ConnectOptions,
    pub mode: OutputMode,
    pub cancel: CancellationToken,
    captured: RefCell<Option<Vec<String>>>,
}

impl<'a, B: Backend> Context<'a, B> {
    pub fn new(
        backend: &'a B,
        settings: &'a Settings,
        connect: ConnectOptions,
        mode: OutputMode,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            settings,
            connect,
            mode,
            cancel,
            captured: RefCell::new(None),
        }
    }

    pub fn resolver(&self) -> ObjectResolver<'a, B> {
        ObjectResolver::new(self.backend)
    }

    pub fn guest_waiter(&self) -> GuestReadinessWaiter<'a, B> {
        GuestReadinessWaiter::new(self.backend).with_cancellation(self.cancel.clone())
    }

    /// `Err(Cancelled)` once the user interrupted the run.
    pub fn check_cancelled(&self) -> Result<(), VmcliError> {
        if self.cancel.is_cancelled() {
            Err(VmcliError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait for `tasks` under the configured timeout and the process
    /// cancellation token.
    pub async fn wait(&self, tasks: &[TaskRef]) -> Result<WaitSummary, VmcliError> {
        TaskWaiter::new(self.backend)
            .with_timeout(self.settings.task_timeout)
            .with_cancellation(self.cancel.clone())
            .wait(tasks)
            .await
    }

    pub async fn vm(&self, name: &str) -> Result<RemoteObjectRef, VmcliError> {
        self.resolver().require(ObjectKind::Vm, Some(name), false).await
    }

    /// Guest login from the flags, falling back to the settings.
    pub fn guest_credentials(
        &self,
        user: Option<&str>,
        pass: Option<&str>,
    ) -> Result<GuestCredentials, VmcliError> {
        let username = user
            .map(str::to_string)
            .or_else(|| self.settings.guest_user.clone());
        let password = pass
            .map(str::to_string)
            .or_else(|| self.settings.guest_pass.clone());
        match (username, password) {
            (Some(username), Some(password)) => Ok(GuestCredentials { username, password }),
            _ => Err(VmcliError::Validation {
                message: "guest credentials missing (use --guest-user/--guest-pass or [guest] in the config)"
                    .into(),
            }),
        }
    }

    /// Print a result line on stdout.
    pub fn emit(&self, line: &str) {
        match self.captured.borrow_mut().as_mut() {
            Some(lines) => lines.push(line.to_string()),
            None => println!("{line}"),
        }
    }
}
