use crate::backend::{Backend, ObjectKind};
use crate::cli::Command;
use crate::error::{Family, VmcliError};

use super::{Context, Handler, HandlerFuture, mismatch};

pub struct ListHandler;

impl<B: Backend> Handler<B> for ListHandler {
    fn name(&self) -> &'static str {
        "list"
    }

    fn family(&self) -> Family {
        Family::List
    }

    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Command::List { kind, name } = command else {
                return Err(mismatch("list", command));
            };
            match name {
                Some(name) => show(ctx, *kind, name).await,
                None => list(ctx, *kind).await,
            }
        })
    }
}

/// Print the name of every object of `kind`.
pub async fn list<B: Backend>(ctx: &Context<'_, B>, kind: ObjectKind) -> Result<(), VmcliError> {
    tracing::info!(%kind, "searching for requested category");
    for object in ctx.resolver().list(kind).await? {
        ctx.emit(&object.name);
    }
    Ok(())
}

/// Print the summary of one object as JSON.
pub async fn show<B: Backend>(ctx: &Context<'_, B>, kind: ObjectKind, name: &str) -> Result<(), VmcliError> {
    let object = ctx.resolver().require(kind, Some(name), false).await?;
    match ctx.backend.summary(&object).await? {
        Some(summary) => {
            let text = serde_json::to_string_pretty(&summary).map_err(|e| VmcliError::Protocol {
                method: "summary".into(),
                message: e.to_string(),
            })?;
            ctx.emit(&text);
        }
        None => tracing::warn!(%kind, name, "object has no summary"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeBackend, object};
    use crate::commands::testing::{context, output};
    use crate::config::tests::empty_settings;

    #[tokio::test]
    async fn lists_every_name_in_server_order() {
        let fake = FakeBackend::with_objects(vec![
            object(ObjectKind::Datastore, "ds02", "datastore-2"),
            object(ObjectKind::Datastore, "ds01", "datastore-1"),
        ]);
        let settings = empty_settings();
        let ctx = context(&fake, &settings);

        list(&ctx, ObjectKind::Datastore).await.unwrap();
        assert_eq!(output(&ctx), ["ds02", "ds01"]);
        assert_eq!(fake.views_destroyed.get(), 1);
    }

    #[tokio::test]
    async fn show_prints_summary_json() {
        let fake = FakeBackend::with_objects(vec![object(ObjectKind::Vm, "web01", "vm-1")]);
        let settings = empty_settings();
        let ctx = context(&fake, &settings);

        show(&ctx, ObjectKind::Vm, "web01").await.unwrap();
        let printed = output(&ctx).join("\n");
        assert!(printed.contains("\"name\": \"web01\""));
    }

    #[tokio::test]
    async fn show_unknown_object_is_not_found() {
        let fake = FakeBackend::default();
        let settings = empty_settings();
        let ctx = context(&fake, &settings);

        let err = show(&ctx, ObjectKind::Cluster, "cl09").await.unwrap_err();
        assert!(matches!(err, VmcliError::NotFound { kind: ObjectKind::Cluster, .. }));
    }
}
