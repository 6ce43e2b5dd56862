use crate::backend::{Backend, CloneSpec, ObjectKind, RemoteObjectRef};
use crate::cli::Command;
use crate::config::Deploy;
use crate::error::{Family, VmcliError};
use crate::util;

use super::{Context, Handler, HandlerFuture, mismatch};

pub struct CloneHandler;

impl<B: Backend> Handler<B> for CloneHandler {
    fn name(&self) -> &'static str {
        "clone"
    }

    fn family(&self) -> Family {
        Family::Clone
    }

    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Command::Clone(args) = command else {
                return Err(mismatch("clone", command));
            };
            let deploy = ctx
                .settings
                .deploy(args.deploy(), args.placement.flavor.as_deref())?;
            // off unless --poweron, [deploy] poweron or VMCLI_VM_POWERON
            let power_on = deploy.poweron.unwrap_or(false);
            clone_vm(ctx, &args.name, &deploy, power_on).await?;
            Ok(())
        })
    }
}

/// Clone `deploy.template` into a new VM called `name` and return it.
///
/// Datacenter and cluster default to the first ones found; folder and
/// resource pool default to the datacenter's VM folder and the
/// cluster's root pool; the datastore defaults to the template's.
pub async fn clone_vm<B: Backend>(
    ctx: &Context<'_, B>,
    name: &str,
    deploy: &Deploy,
    power_on: bool,
) -> Result<RemoteObjectRef, VmcliError> {
    let memory_mb = deploy.mem.as_deref().map(util::normalize_memory).transpose()?;
    let num_cpus = deploy.cpu.map(util::check_cpu).transpose()?;

    let resolver = ctx.resolver();
    if resolver.resolve(ObjectKind::Vm, Some(name), false).await?.is_some() {
        return Err(VmcliError::Validation {
            message: format!("VM with name '{name}' already exists"),
        });
    }
    let template_name = deploy.template.as_deref().ok_or_else(|| VmcliError::Validation {
        message: "no template given (use --template, a flavor or [deploy] template)".into(),
    })?;
    let template = resolver
        .require(ObjectKind::Vm, Some(template_name), false)
        .await?;

    let datacenter = resolver
        .require(ObjectKind::Datacenter, deploy.datacenter.as_deref(), true)
        .await?;
    let cluster = resolver
        .require(ObjectKind::Cluster, deploy.cluster.as_deref(), true)
        .await?;

    let folder = match deploy.folder.as_deref() {
        Some(folder) => resolver.require(ObjectKind::Folder, Some(folder), false).await?,
        None => ctx.backend.vm_folder(&datacenter).await?,
    };
    let pool = match deploy.resource_pool.as_deref() {
        Some(pool) => {
            resolver
                .require(ObjectKind::ResourcePool, Some(pool), false)
                .await?
        }
        None => ctx.backend.root_pool(&cluster).await?,
    };

    let datastore_name = match &deploy.datastore {
        Some(ds) => ds.clone(),
        None => ctx
            .backend
            .first_datastore_name(&template)
            .await?
            .ok_or_else(|| VmcliError::Validation {
                message: format!("no datastore given and template '{template_name}' has none"),
            })?,
    };
    if resolver
        .resolve(ObjectKind::DatastoreCluster, Some(&datastore_name), false)
        .await?
        .is_some()
    {
        return Err(VmcliError::Validation {
            message: format!(
                "'{datastore_name}' is a datastore cluster; storage DRS placement is not supported, name a datastore instead"
            ),
        });
    }
    let datastore = resolver
        .require(ObjectKind::Datastore, Some(&datastore_name), false)
        .await?;

    tracing::info!(
        vm = name,
        template = %template.name,
        datacenter = %datacenter.name,
        cluster = %cluster.name,
        folder = %folder.name,
        pool = %pool.name,
        datastore = %datastore.name,
        "cloning"
    );

    let spec = CloneSpec {
        name: name.to_string(),
        folder: folder.moref,
        datastore: datastore.moref,
        pool: pool.moref,
        power_on,
        memory_mb,
        num_cpus,
    };
    let task = ctx.backend.clone_vm(&template, &spec).await?;
    ctx.wait(&[task]).await?;

    ctx.vm(name).await
}
