use serde_json::{Value, json};

use crate::backend::{Backend, ObjectKind};
use crate::cli::Command;
use crate::config::Deploy;
use crate::error::{Family, VmcliError};
use crate::util;

use super::{Context, Handler, HandlerFuture, mismatch};

const GUEST_ID: &str = "otherLinux64Guest";

pub struct CreateEmptyHandler;

impl<B: Backend> Handler<B> for CreateEmptyHandler {
    fn name(&self) -> &'static str {
        "create-empty"
    }

    fn family(&self) -> Family {
        Family::CreateEmpty
    }

    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Command::CreateEmpty(args) = command else {
                return Err(mismatch("create-empty", command));
            };
            let deploy = ctx.settings.deploy(args.deploy(), args.flavor.as_deref())?;
            create_empty_vm(ctx, &args.name, &deploy).await
        })
    }
}

fn required<'d>(value: &'d Option<String>, flag: &str) -> Result<&'d str, VmcliError> {
    value.as_deref().ok_or_else(|| VmcliError::Validation {
        message: format!("missing --{flag}: name, folder, resource pool and datastore are required"),
    })
}

/// Config spec for a VM with no devices. Files live under `[datastore]name`.
pub fn empty_vm_config(name: &str, datastore: &str, memory_mb: u64, num_cpus: u32) -> Value {
    json!({
        "_typeName": "VirtualMachineConfigSpec",
        "name": name,
        "memoryMB": memory_mb,
        "numCPUs": num_cpus,
        "guestId": GUEST_ID,
        "files": {
            "_typeName": "VirtualMachineFileInfo",
            "vmPathName": format!("[{datastore}]{name}"),
        },
    })
}

pub async fn create_empty_vm<B: Backend>(
    ctx: &Context<'_, B>,
    name: &str,
    deploy: &Deploy,
) -> Result<(), VmcliError> {
    let folder = required(&deploy.folder, "folder")?;
    let pool = required(&deploy.resource_pool, "resource-pool")?;
    let datastore = required(&deploy.datastore, "datastore")?;
    let memory_mb = match deploy.mem.as_deref() {
        Some(mem) => util::normalize_memory(mem)?,
        None => util::MIN_MEM_MB,
    };
    let num_cpus = util::check_cpu(deploy.cpu.unwrap_or(util::MIN_CPU))?;

    let resolver = ctx.resolver();
    let folder = resolver
        .require(ObjectKind::Folder, Some(folder), false)
        .await?;
    let pool = resolver
        .require(ObjectKind::ResourcePool, Some(pool), false)
        .await?;

    tracing::info!(vm = name, folder = %folder.name, pool = %pool.name, datastore, memory_mb, num_cpus, "creating empty VM");
    let config = empty_vm_config(name, datastore, memory_mb, num_cpus);
    let task = ctx.backend.create_vm(&folder, &pool, config).await?;
    ctx.wait(&[task]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeBackend, object};
    use crate::commands::CommandRegistry;
    use crate::commands::testing::{context, parse};
    use crate::config::tests::empty_settings;

    fn inventory() -> FakeBackend {
        FakeBackend::with_objects(vec![
            object(ObjectKind::Folder, "Production", "group-v5"),
            object(ObjectKind::ResourcePool, "rp01", "resgroup-9"),
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

    #[test]
    fn config_places_files_on_datastore() {
        let config = empty_vm_config("web01", "ds01", 512, 2);
        assert_eq!(config["files"]["vmPathName"], "[ds01]web01");
        assert_eq!(config["guestId"], GUEST_ID);
        assert_eq!(config["memoryMB"], 512);
    }

    #[tokio::test]
    async fn minimal_sizing_by_default() {
        let fake = inventory();
        run(
            &fake,
            &[
                "create-empty", "--name", "web01", "--folder", "Production", "--rpool", "rp01",
                "--ds", "ds01",
            ],
        )
        .await
        .unwrap();
        assert_eq!(fake.calls(), ["create_vm in Production"]);
        let created = fake.created.borrow();
        assert_eq!(created[0]["memoryMB"], 256);
        assert_eq!(created[0]["numCPUs"], 1);
    }

    #[tokio::test]
    async fn placement_is_required() {
        let fake = inventory();
        let err = run(&fake, &["create-empty", "--name", "web01", "--folder", "Production"])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert_eq!(fake.views_created.get(), 0);
    }

    #[tokio::test]
    async fn cpu_range_is_checked() {
        let fake = inventory();
        let err = run(
            &fake,
            &[
                "create-empty", "--name", "web01", "--folder", "Production", "--rpool", "rp01",
                "--ds", "ds01", "--cpu", "64",
            ],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VmcliError::Command { .. }));
        assert!(fake.calls().is_empty());
    }
}
