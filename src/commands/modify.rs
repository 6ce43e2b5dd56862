use serde_json::json;

use crate::backend::{Backend, DvsPort, ObjectKind, PowerState, RemoteObjectRef};
use crate::cli::{Command, ModifyArgs};
use crate::error::{Family, VmcliError};
use crate::util;

use super::{Context, Handler, HandlerFuture, devices, mismatch};

pub struct ModifyHandler;

impl<B: Backend> Handler<B> for ModifyHandler {
    fn name(&self) -> &'static str {
        "modify"
    }

    fn family(&self) -> Family {
        Family::Modify
    }

    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Command::Modify(args) = command else {
                return Err(mismatch("modify", command));
            };
            modify(ctx, args).await
        })
    }
}

async fn modify<B: Backend>(ctx: &Context<'_, B>, args: &ModifyArgs) -> Result<(), VmcliError> {
    if args.mem.is_some() || args.cpu.is_some() {
        let mem = args.mem.as_deref().map(util::normalize_memory).transpose()?;
        let cpu = args.cpu.map(util::check_cpu).transpose()?;
        let vm = ctx.vm(&args.name).await?;
        change_hw_resource(ctx, &vm, mem, cpu).await
    } else if let Some(net) = &args.net {
        let vm = ctx.vm(&args.name).await?;
        change_network(ctx, &vm, net, args.dev).await
    } else if let Some(version) = &args.hw_version {
        let version = parse_hw_version(version)?;
        let vm = ctx.vm(&args.name).await?;
        upgrade_hardware(ctx, &vm, version.as_deref()).await
    } else {
        Err(VmcliError::Validation {
            message: "too few arguments: give --mem/--cpu, --net or --vHWversion".into(),
        })
    }
}

pub async fn change_hw_resource<B: Backend>(
    ctx: &Context<'_, B>,
    vm: &RemoteObjectRef,
    memory_mb: Option<u64>,
    num_cpus: Option<u32>,
) -> Result<(), VmcliError> {
    let mut spec = json!({ "_typeName": "VirtualMachineConfigSpec" });
    if let Some(mb) = memory_mb {
        spec["memoryMB"] = json!(mb);
    }
    if let Some(cpus) = num_cpus {
        spec["numCPUs"] = json!(cpus);
    }
    tracing::info!(vm = %vm.name, ?memory_mb, ?num_cpus, "reconfiguring hardware");
    let task = ctx.backend.reconfigure(vm, spec).await?;
    ctx.wait(&[task]).await?;
    Ok(())
}

/// Backing for `net`, looking up the switch when it is a DVS port group.
pub async fn network_backing<B: Backend>(
    ctx: &Context<'_, B>,
    net: &str,
) -> Result<serde_json::Value, VmcliError> {
    let network = ctx
        .resolver()
        .require(ObjectKind::Network, Some(net), false)
        .await?;
    let port: Option<DvsPort> = if network.moref.kind == ObjectKind::DvsPortgroup.type_name() {
        Some(ctx.backend.dvs_port(&network).await?)
    } else {
        None
    };
    Ok(devices::nic_backing(&network, port.as_ref()))
}

/// Move the `dev`-th network adapter to `net`.
pub async fn change_network<B: Backend>(
    ctx: &Context<'_, B>,
    vm: &RemoteObjectRef,
    net: &str,
    dev: usize,
) -> Result<(), VmcliError> {
    let backing = network_backing(ctx, net).await?;
    let current = ctx.backend.devices(vm).await?;
    let edit = devices::edit_nic(&current, dev, backing)?;
    tracing::info!(vm = %vm.name, net, dev, "changing network");
    let task = ctx
        .backend
        .reconfigure(vm, devices::config_spec(vec![edit]))
        .await?;
    ctx.wait(&[task]).await?;
    Ok(())
}

/// `latest` becomes `None`, a number `n` becomes `vmx-nn`.
pub fn parse_hw_version(version: &str) -> Result<Option<String>, VmcliError> {
    if version.eq_ignore_ascii_case("latest") {
        return Ok(None);
    }
    let n: u32 = version.trim().parse().map_err(|_| VmcliError::Validation {
        message: format!("hardware version must be a number or 'latest' (got '{version}')"),
    })?;
    Ok(Some(format!("vmx-{n:02}")))
}

/// Upgrade virtual hardware. The VM must be powered off; a VM already at
/// the requested version is left alone.
pub async fn upgrade_hardware<B: Backend>(
    ctx: &Context<'_, B>,
    vm: &RemoteObjectRef,
    version: Option<&str>,
) -> Result<(), VmcliError> {
    let state = ctx.backend.power_state(vm).await?;
    if state != PowerState::PoweredOff {
        return Err(VmcliError::Validation {
            message: format!("VM '{}' must be powered off to upgrade hardware (is {state})", vm.name),
        });
    }

    tracing::info!(vm = %vm.name, version = version.unwrap_or("latest"), "upgrading hardware version");
    let result = match ctx.backend.upgrade_hardware(vm, version).await {
        Ok(task) => ctx.wait(&[task]).await.map(|_| ()),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.fault() == Some("AlreadyUpgraded") => {
            tracing::info!(vm = %vm.name, "hardware already at the requested version");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeBackend, object};
    use crate::commands::devices::tests::device;
    use crate::commands::testing::{context, parse};
    use crate::commands::CommandRegistry;
    use crate::config::tests::empty_settings;

    fn vm_with_nics() -> FakeBackend {
        let fake = FakeBackend::with_objects(vec![
            object(ObjectKind::Vm, "web01", "vm-1"),
            object(ObjectKind::Network, "VM Network", "network-7"),
            object(ObjectKind::Network, "dvPortGroup10", "dvportgroup-10"),
        ]);
        // A port group seen through the Network view keeps its own type.
        fake.objects.borrow_mut().get_mut(&ObjectKind::Network).unwrap()[1].moref.kind =
            "DistributedVirtualPortgroup".into();
        *fake.devices.borrow_mut() = vec![device("VirtualVmxnet3", 4000, Some(100), Some(7))];
        fake
    }

    async fn run(fake: &FakeBackend, args: &[&str]) -> Result<(), VmcliError> {
        let settings = empty_settings();
        let ctx = context(fake, &settings);
        CommandRegistry::standard()
            .unwrap()
            .dispatch(&ctx, &parse(args))
            .await
    }

    #[test]
    fn hw_version_names() {
        assert_eq!(parse_hw_version("latest").unwrap(), None);
        assert_eq!(parse_hw_version("9").unwrap().as_deref(), Some("vmx-09"));
        assert_eq!(parse_hw_version("13").unwrap().as_deref(), Some("vmx-13"));
        assert!(parse_hw_version("newest").is_err());
    }

    #[tokio::test]
    async fn memory_and_cpu_reconfigure() {
        let fake = vm_with_nics();
        run(&fake, &["modify", "--name", "web01", "--mem", "4G", "--cpu", "2"])
            .await
            .unwrap();
        let reconfigs = fake.reconfigs.borrow();
        let spec = &reconfigs[0];
        assert_eq!(spec["memoryMB"], 4096);
        assert_eq!(spec["numCPUs"], 2);
    }

    #[tokio::test]
    async fn network_change_uses_dvs_backing_for_port_groups() {
        let fake = vm_with_nics();
        run(&fake, &["modify", "--name", "web01", "--net", "dvPortGroup10"])
            .await
            .unwrap();
        let reconfigs = fake.reconfigs.borrow();
        let spec = &reconfigs[0];
        let change = &spec["deviceChange"][0];
        assert_eq!(change["operation"], "edit");
        assert_eq!(change["device"]["key"], 4000);
        assert_eq!(change["device"]["backing"]["port"]["portgroupKey"], "dvportgroup-10");
    }

    #[tokio::test]
    async fn network_change_on_standard_network() {
        let fake = vm_with_nics();
        run(&fake, &["modify", "--name", "web01", "--net", "VM Network"])
            .await
            .unwrap();
        let reconfigs = fake.reconfigs.borrow();
        let spec = &reconfigs[0];
        assert_eq!(spec["deviceChange"][0]["device"]["backing"]["deviceName"], "VM Network");
    }

    #[tokio::test]
    async fn upgrade_requires_powered_off_vm() {
        let fake = vm_with_nics();
        fake.power.set(Some(PowerState::PoweredOn));
        let err = run(&fake, &["modify", "--name", "web01", "--vHWversion", "latest"])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn already_upgraded_is_not_a_failure() {
        let fake = vm_with_nics();
        fake.fail("UpgradeVM_Task", "AlreadyUpgraded");
        run(&fake, &["modify", "--name", "web01", "--vHWversion", "latest"])
            .await
            .unwrap();
        assert_eq!(fake.calls(), ["upgrade_hardware web01 latest"]);
    }

    #[tokio::test]
    async fn nothing_to_change_is_rejected() {
        let fake = vm_with_nics();
        let err = run(&fake, &["modify", "--name", "web01"]).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
        let VmcliError::Command { source, .. } = &err else {
            panic!("expected a family-tagged error, got {err:?}");
        };
        assert!(source.to_string().contains("too few arguments"));
    }
}
