//! `create`: clone a template and bring the new VM up in one go.
//!
//! The steps run in a fixed order and the first failure ends the
//! command. Nothing already done is undone; each failure keeps the exit
//! code of the step that produced it.

use std::net::Ipv4Addr;

use crate::backend::{Backend, GuestCredentials, RemoteObjectRef};
use crate::cli::{Command, CreateArgs};
use crate::error::{Family, VmcliError};
use crate::guest;
use crate::progress::StepProgress;
use crate::util;

use super::{Context, Handler, HandlerFuture, attach, clone, mismatch, modify, power};

/// Script expected inside the template that configures the first interface.
pub const PROVISION_SCRIPT: &str = "/usr/share/vmcli/provision-interfaces.sh";
const DEFAULT_PREFIX: u8 = 24;
const STEPS: usize = 8;

pub struct CreateHandler;

impl<B: Backend> Handler<B> for CreateHandler {
    fn name(&self) -> &'static str {
        "create"
    }

    fn family(&self) -> Family {
        Family::Create
    }

    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Command::Create(args) = command else {
                return Err(mismatch("create", command));
            };
            create_vm(ctx, args).await
        })
    }
}

/// Address settings for one interface, derived from `ip[/prefix]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub network: Ipv4Addr,
    pub broadcast: Ipv4Addr,
}

impl InterfaceConfig {
    /// Parse `10.1.10.2/24`. The prefix defaults to /24 and the gateway
    /// is the first host of the network.
    pub fn parse(cfg: &str) -> Result<Self, String> {
        let (addr, prefix) = match cfg.trim().split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix
                    .parse()
                    .map_err(|_| format!("invalid prefix length in '{cfg}'"))?;
                (addr, prefix)
            }
            None => (cfg.trim(), DEFAULT_PREFIX),
        };
        if prefix > 30 {
            return Err(format!("prefix /{prefix} leaves no room for a gateway"));
        }
        let address: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("invalid IPv4 address '{addr}'"))?;

        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        };
        let network = u32::from(address) & mask;
        Ok(Self {
            address,
            netmask: Ipv4Addr::from(mask),
            gateway: Ipv4Addr::from(network + 1),
            network: Ipv4Addr::from(network),
            broadcast: Ipv4Addr::from(network | !mask),
        })
    }

    pub fn provision_command(&self) -> String {
        format!(
            "/bin/bash {PROVISION_SCRIPT} {} {} {} {} {}",
            self.address, self.netmask, self.gateway, self.network, self.broadcast
        )
    }
}

pub async fn create_vm<B: Backend>(ctx: &Context<'_, B>, args: &CreateArgs) -> Result<(), VmcliError> {
    let name = args.name.as_str();
    let deploy = ctx
        .settings
        .deploy(args.deploy(), args.placement.flavor.as_deref())?;
    if deploy.template.is_none() {
        return Err(VmcliError::Validation {
            message: "no template given (use --template, a flavor or [deploy] template)".into(),
        });
    }
    let hdd = deploy.hdd.map(util::check_hdd).transpose()?;

    let interface = deploy.net_cfg.as_deref().and_then(|cfg| {
        InterfaceConfig::parse(cfg)
            .inspect_err(|e| tracing::warn!(net_cfg = cfg, "{e}. Skipping network configuration"))
            .ok()
    });
    let additional = &ctx.settings.additional_commands;
    let credentials: Option<GuestCredentials> = if interface.is_some() || !additional.is_empty() {
        Some(ctx.guest_credentials(args.guest_user.as_deref(), args.guest_pass.as_deref())?)
    } else {
        None
    };

    let mut progress = StepProgress::new(STEPS, ctx.mode);

    let vm = progress
        .run(&format!("Cloning {name}"), |_| {
            clone::clone_vm(ctx, name, &deploy, false)
        })
        .await
        .map_err(|e| e.in_family(Family::Clone))?;
    ctx.check_cancelled()?;

    progress
        .run("Upgrading virtual hardware", |_| {
            modify::upgrade_hardware(ctx, &vm, None)
        })
        .await
        .map_err(|e| e.in_family(Family::Modify))?;

    match deploy.net.as_deref() {
        Some(net) => progress
            .run(&format!("Connecting first adapter to {net}"), |_| {
                modify::change_network(ctx, &vm, net, 1)
            })
            .await
            .map_err(|e| e.in_family(Family::Modify))?,
        None => progress.skip("Network change"),
    }

    match hdd {
        Some(size) => progress
            .run(&format!("Attaching {size} GB disk"), |_| {
                attach::attach_hdd(ctx, &vm, size)
            })
            .await
            .map_err(|e| e.in_family(Family::Attach))?,
        None => progress.skip("Additional disk"),
    }
    ctx.check_cancelled()?;

    progress
        .run("Powering on", |_| power::power_on(ctx, &vm))
        .await
        .map_err(|e| e.in_family(Family::Power))?;
    ctx.check_cancelled()?;

    progress
        .run("Waiting for guest OS", |step| {
            let vm = &vm;
            async move {
                let ready = ctx
                    .guest_waiter()
                    .wait_for_guest_os(vm, ctx.settings.os_timeout)
                    .await?;
                if !ready {
                    step.set_done_label("Guest OS not running yet, continuing");
                }
                Ok::<_, VmcliError>(())
            }
        })
        .await?;
    ctx.check_cancelled()?;

    let tools = Some(ctx.settings.tools_timeout);
    match (interface, &credentials) {
        (Some(interface), Some(credentials)) => {
            let script = [interface.provision_command()];
            progress
                .run(&format!("Configuring {}", interface.address), |_| {
                    guest::exec_inside_vm(
                        ctx.backend,
                        &vm,
                        &script,
                        credentials,
                        tools,
                        &ctx.cancel,
                    )
                })
                .await
                .map_err(|e| e.in_family(Family::Exec))?
        }
        _ => progress.skip("Interface configuration"),
    }

    match &credentials {
        Some(credentials) if !additional.is_empty() => progress
            .run("Running additional commands", |_| {
                guest::exec_inside_vm(
                    ctx.backend,
                    &vm,
                    additional,
                    credentials,
                    tools,
                    &ctx.cancel,
                )
            })
            .await
            .map_err(|e| e.in_family(Family::Exec))?,
        _ => progress.skip("Additional commands"),
    }

    deployed(&progress, &vm);
    Ok(())
}

fn deployed(progress: &StepProgress, vm: &RemoteObjectRef) {
    tracing::info!(vm = %vm.name, "deployed vm");
    progress.println(&format!("Deployed VM {}", vm.name));
}
