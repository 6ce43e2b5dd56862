use crate::backend::tagging::{self, Tagging, TaggingClient};
use crate::backend::{Backend, RemoteObjectRef};
use crate::cli::Command;
use crate::error::{Family, VmcliError};

use super::{Context, Handler, HandlerFuture, mismatch};

pub struct TagHandler;

impl<B: Backend> Handler<B> for TagHandler {
    fn name(&self) -> &'static str {
        "tag"
    }

    fn family(&self) -> Family {
        Family::Tag
    }

    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Command::Tag { name, tags } = command else {
                return Err(mismatch("tag", command));
            };

            let target = match name {
                Some(name) => {
                    let wanted = tags
                        .as_deref()
                        .map(tagging::split_tags)
                        .filter(|t| !t.is_empty())
                        .ok_or_else(|| VmcliError::Validation {
                            message: "--tags is required with --name".into(),
                        })?;
                    Some((ctx.vm(name).await?, wanted))
                }
                None => None,
            };

            let client = TaggingClient::connect(&ctx.connect).await?;
            let result = match &target {
                Some((vm, wanted)) => attach_tags(&client, vm, wanted).await,
                None => print_tags(ctx, &client).await,
            };
            if let Err(e) = client.logout().await {
                tracing::warn!(error = %e, "failed to close tagging session");
            }
            result
        })
    }
}

async fn print_tags<B: Backend>(ctx: &Context<'_, B>, service: &impl Tagging) -> Result<(), VmcliError> {
    for tag in service.list_tags().await? {
        ctx.emit(&tag.name);
    }
    Ok(())
}

/// Attach every tag in `wanted`; nothing is attached if one is unknown.
pub async fn attach_tags(
    service: &impl Tagging,
    vm: &RemoteObjectRef,
    wanted: &[String],
) -> Result<(), VmcliError> {
    tracing::info!(vm = %vm.name, "retrieving tags");
    let available = service.list_tags().await?;
    let selected = tagging::select_tags(&available, wanted)?;
    for tag in &selected {
        service.attach(tag, vm).await?;
    }
    tracing::info!(vm = %vm.name, count = selected.len(), "all tags attached");
    Ok(())
}
