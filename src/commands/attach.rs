use serde_json::Value;

use crate::backend::{Backend, RemoteObjectRef};
use crate::cli::{Command, DeviceKind};
use crate::error::{Family, VmcliError};
use crate::util;

use super::{Context, Handler, HandlerFuture, devices, mismatch, modify};

pub struct AttachHandler;

impl<B: Backend> Handler<B> for AttachHandler {
    fn name(&self) -> &'static str {
        "attach"
    }

    fn family(&self) -> Family {
        Family::Attach
    }

    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Command::Attach {
                device,
                name,
                size,
                net,
            } = command
            else {
                return Err(mismatch("attach", command));
            };
            match device {
                DeviceKind::Hdd => {
                    let size = size.ok_or_else(|| VmcliError::Validation {
                        message: "--size is required for a disk".into(),
                    })?;
                    util::check_hdd(size)?;
                    let vm = ctx.vm(name).await?;
                    attach_hdd(ctx, &vm, size).await
                }
                DeviceKind::Network => {
                    let net = net.as_deref().ok_or_else(|| VmcliError::Validation {
                        message: "--net is required for a network adapter".into(),
                    })?;
                    let vm = ctx.vm(name).await?;
                    attach_network(ctx, &vm, net).await
                }
                DeviceKind::Floppy => {
                    let vm = ctx.vm(name).await?;
                    let current = ctx.backend.devices(&vm).await?;
                    apply(ctx, &vm, "floppy", vec![devices::add_floppy(&current)?]).await
                }
                DeviceKind::Cdrom => {
                    let vm = ctx.vm(name).await?;
                    let current = ctx.backend.devices(&vm).await?;
                    apply(ctx, &vm, "cdrom", vec![devices::add_cdrom(&current)?]).await
                }
            }
        })
    }
}

async fn apply<B: Backend>(
    ctx: &Context<'_, B>,
    vm: &RemoteObjectRef,
    what: &str,
    changes: Vec<Value>,
) -> Result<(), VmcliError> {
    tracing::info!(vm = %vm.name, device = what, "attaching device");
    let task = ctx
        .backend
        .reconfigure(vm, devices::config_spec(changes))
        .await?;
    ctx.wait(&[task]).await?;
    Ok(())
}

/// Add a thin disk of `size_gb` gigabytes.
pub async fn attach_hdd<B: Backend>(
    ctx: &Context<'_, B>,
    vm: &RemoteObjectRef,
    size_gb: u32,
) -> Result<(), VmcliError> {
    util::check_hdd(size_gb)?;
    let current = ctx.backend.devices(vm).await?;
    apply(ctx, vm, "hdd", devices::disk_changes(&current, size_gb)?).await
}

/// Add a vmxnet3 adapter connected to `net`.
pub async fn attach_network<B: Backend>(
    ctx: &Context<'_, B>,
    vm: &RemoteObjectRef,
    net: &str,
) -> Result<(), VmcliError> {
    let backing = modify::network_backing(ctx, net).await?;
    apply(ctx, vm, "network", vec![devices::add_nic(backing)]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ObjectKind;
    use crate::backend::fake::{FakeBackend, object};
    use crate::commands::CommandRegistry;
    use crate::commands::devices::tests::device;
    use crate::commands::testing::{context, parse};
    use crate::config::tests::empty_settings;

    fn vm() -> FakeBackend {
        FakeBackend::with_objects(vec![
            object(ObjectKind::Vm, "web01", "vm-1"),
            object(ObjectKind::Network, "VM Network", "network-7"),
        ])
    }

    async fn run(fake: &FakeBackend, args: &[&str]) -> Result<(), VmcliError> {
        let settings = empty_settings();
        let ctx = context(fake, &settings);
        CommandRegistry::standard()
            .unwrap()
            .dispatch(&ctx, &parse(args))
            .await
    }

    #[tokio::test]
    async fn disk_is_added_and_awaited() {
        let fake = vm();
        *fake.devices.borrow_mut() = vec![device("ParaVirtualSCSIController", 1000, Some(100), Some(3))];
        run(&fake, &["attach", "hdd", "--name", "web01", "--size", "20"])
            .await
            .unwrap();

        assert_eq!(fake.calls(), ["reconfigure web01"]);
        assert_eq!(fake.filters_destroyed.get(), 1);
        let reconfigs = fake.reconfigs.borrow();
        let disk = &reconfigs[0]["deviceChange"][0]["device"];
        assert_eq!(disk["controllerKey"], 1000);
        assert_eq!(disk["unitNumber"], 0);
    }

    #[tokio::test]
    async fn disk_size_is_required_and_range_checked() {
        let fake = vm();
        let err = run(&fake, &["attach", "hdd", "--name", "web01"]).await.unwrap_err();
        assert_eq!(err.exit_code(), 5);
        let err = run(&fake, &["attach", "hdd", "--name", "web01", "--size", "4000"])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 5);
        assert_eq!(fake.views_created.get(), 0);
    }

    #[tokio::test]
    async fn network_adapter_is_vmxnet3() {
        let fake = vm();
        run(&fake, &["attach", "network", "--name", "web01", "--net", "VM Network"])
            .await
            .unwrap();
        let reconfigs = fake.reconfigs.borrow();
        let nic = &reconfigs[0]["deviceChange"][0];
        assert_eq!(nic["operation"], "add");
        assert_eq!(nic["device"]["_typeName"], "VirtualVmxnet3");
        assert_eq!(nic["device"]["connectable"]["startConnected"], true);
    }

    #[tokio::test]
    async fn unknown_vm_keeps_attach_code() {
        let fake = FakeBackend::default();
        let err = run(&fake, &["attach", "cdrom", "--name", "ghost"])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }

    #[tokio::test]
    async fn failed_reconfigure_task_is_attach_failure() {
        let fake = vm();
        fake.fail("ReconfigVM_Task", "InvalidDeviceSpec");
        *fake.devices.borrow_mut() = vec![device("VirtualSIOController", 400, None, None)];
        let err = run(&fake, &["attach", "floppy", "--name", "web01"])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 5);
        assert_eq!(err.fault(), Some("InvalidDeviceSpec"));
    }
}
