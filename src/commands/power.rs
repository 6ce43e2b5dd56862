use crate::backend::{Backend, PowerState, RemoteObjectRef};
use crate::cli::Command;
use crate::error::{Family, VmcliError};

use super::{Context, Handler, HandlerFuture, mismatch};

pub struct PowerHandler;

impl<B: Backend> Handler<B> for PowerHandler {
    fn name(&self) -> &'static str {
        "power"
    }

    fn family(&self) -> Family {
        Family::Power
    }

    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Command::Power {
                name,
                on,
                off,
                reboot,
                reset,
                show,
            } = command
            else {
                return Err(mismatch("power", command));
            };
            let vm = ctx.vm(name).await?;
            if *on {
                power_on(ctx, &vm).await
            } else if *off {
                power_off(ctx, &vm).await
            } else if *reboot {
                tracing::info!(vm = %vm.name, "requesting guest reboot");
                ctx.backend.reboot_guest(&vm).await
            } else if *reset {
                tracing::info!(vm = %vm.name, "resetting");
                let task = ctx.backend.reset(&vm).await?;
                ctx.wait(&[task]).await.map(|_| ())
            } else if *show {
                let state = ctx.backend.power_state(&vm).await?;
                ctx.emit(&state.to_string());
                Ok(())
            } else {
                Err(VmcliError::Validation {
                    message: "no power action given".into(),
                })
            }
        })
    }
}

/// Power on unless the VM already runs.
pub async fn power_on<B: Backend>(ctx: &Context<'_, B>, vm: &RemoteObjectRef) -> Result<(), VmcliError> {
    if ctx.backend.power_state(vm).await? == PowerState::PoweredOn {
        tracing::info!(vm = %vm.name, "already powered on");
        return Ok(());
    }
    tracing::info!(vm = %vm.name, "powering on");
    let task = ctx.backend.power_on(vm).await?;
    ctx.wait(&[task]).await?;
    Ok(())
}

/// Power off unless the VM is already off.
pub async fn power_off<B: Backend>(ctx: &Context<'_, B>, vm: &RemoteObjectRef) -> Result<(), VmcliError> {
    if ctx.backend.power_state(vm).await? == PowerState::PoweredOff {
        tracing::info!(vm = %vm.name, "already powered off");
        return Ok(());
    }
    tracing::info!(vm = %vm.name, "powering off");
    let task = ctx.backend.power_off(vm).await?;
    ctx.wait(&[task]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ObjectKind;
    use crate::backend::fake::{FakeBackend, object};
    use crate::commands::CommandRegistry;
    use crate::commands::testing::{context, output, parse};
    use crate::config::tests::empty_settings;

    fn vm(state: PowerState) -> FakeBackend {
        let fake = FakeBackend::with_objects(vec![object(ObjectKind::Vm, "web01", "vm-1")]);
        fake.power.set(Some(state));
        fake
    }

    async fn run(fake: &FakeBackend, args: &[&str]) -> Result<Vec<String>, VmcliError> {
        let settings = empty_settings();
        let ctx = context(fake, &settings);
        CommandRegistry::standard()
            .unwrap()
            .dispatch(&ctx, &parse(args))
            .await?;
        Ok(output(&ctx))
    }

    #[tokio::test]
    async fn on_and_off_are_noops_in_target_state() {
        let fake = vm(PowerState::PoweredOn);
        run(&fake, &["power", "--name", "web01", "--on"]).await.unwrap();
        let fake_off = vm(PowerState::PoweredOff);
        run(&fake_off, &["power", "--name", "web01", "--off"]).await.unwrap();
        assert!(fake.calls().is_empty());
        assert!(fake_off.calls().is_empty());
        assert_eq!(fake.polls.get(), 0);
    }

    #[tokio::test]
    async fn suspended_vm_can_be_powered_on() {
        let fake = vm(PowerState::Suspended);
        run(&fake, &["power", "--name", "web01", "--on"]).await.unwrap();
        assert_eq!(fake.calls(), ["power_on web01"]);
        assert_eq!(fake.filters_destroyed.get(), 1);
    }

    #[tokio::test]
    async fn reboot_is_not_a_task() {
        let fake = vm(PowerState::PoweredOn);
        run(&fake, &["power", "--name", "web01", "--reboot"]).await.unwrap();
        assert_eq!(fake.calls(), ["reboot_guest web01"]);
        assert_eq!(fake.filters_created.get(), 0);
    }

    #[tokio::test]
    async fn reset_waits_for_its_task() {
        let fake = vm(PowerState::PoweredOn);
        run(&fake, &["power", "--name", "web01", "--reset"]).await.unwrap();
        assert_eq!(fake.calls(), ["reset web01"]);
        assert_eq!(fake.polls.get(), 1);
    }

    #[tokio::test]
    async fn show_prints_server_state_name() {
        let fake = vm(PowerState::Suspended);
        let out = run(&fake, &["power", "--name", "web01", "--show"]).await.unwrap();
        assert_eq!(out, ["suspended"]);
    }

    #[tokio::test]
    async fn unknown_vm_is_general_failure() {
        let fake = FakeBackend::default();
        let err = run(&fake, &["power", "--name", "ghost", "--on"]).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
