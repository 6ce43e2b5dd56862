use crate::backend::Backend;
use crate::cli::Command;
use crate::error::{Family, VmcliError};
use crate::guest;

use super::{Context, Handler, HandlerFuture, mismatch};

pub struct ExecHandler;

impl<B: Backend> Handler<B> for ExecHandler {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn family(&self) -> Family {
        Family::Exec
    }

    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Command::Exec {
                name,
                cmd,
                guest_user,
                guest_pass,
                wait_for_tools,
            } = command
            else {
                return Err(mismatch("exec", command));
            };
            let commands = guest::split_commands(cmd);
            let credentials = ctx.guest_credentials(guest_user.as_deref(), guest_pass.as_deref())?;
            let vm = ctx.vm(name).await?;
            let wait = wait_for_tools.then_some(ctx.settings.tools_timeout);
            guest::exec_inside_vm(ctx.backend, &vm, &commands, &credentials, wait, &ctx.cancel).await
        })
    }
}
