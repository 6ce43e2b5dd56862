//! Name → object lookup over a flat server-side view.

use crate::backend::{Inventory, ObjectKind, RemoteObjectRef};
use crate::error::VmcliError;

pub struct ObjectResolver<'a, I: Inventory> {
    inventory: &'a I,
}

impl<'a, I: Inventory> ObjectResolver<'a, I> {
    pub fn new(inventory: &'a I) -> Self {
        Self { inventory }
    }

    /// Find the object of `kind` named exactly `name`.
    ///
    /// Without a name, `allow_default` picks the first object in server
    /// order; otherwise nothing is enumerated and `None` comes back.
    pub async fn resolve(
        &self,
        kind: ObjectKind,
        name: Option<&str>,
        allow_default: bool,
    ) -> Result<Option<RemoteObjectRef>, VmcliError> {
        match name {
            Some(name) => {
                tracing::info!(%kind, name, "loading object");
                self.enumerate(kind, |objects| {
                    objects.into_iter().find(|o| o.name == name)
                })
                .await
            }
            None if allow_default => {
                self.enumerate(kind, |objects| objects.into_iter().next())
                    .await
            }
            None => Ok(None),
        }
    }

    /// Like [`resolve`](Self::resolve) but a miss is a [`VmcliError::NotFound`].
    pub async fn require(
        &self,
        kind: ObjectKind,
        name: Option<&str>,
        allow_default: bool,
    ) -> Result<RemoteObjectRef, VmcliError> {
        self.resolve(kind, name, allow_default)
            .await?
            .ok_or_else(|| VmcliError::NotFound {
                kind,
                name: name.unwrap_or("<default>").to_string(),
            })
    }

    pub async fn list(&self, kind: ObjectKind) -> Result<Vec<RemoteObjectRef>, VmcliError> {
        self.enumerate(kind, |objects| objects).await
    }

    /// Run `pick` over every object of `kind`. The view is destroyed on
    /// every path; a failed release is only logged.
    async fn enumerate<T>(
        &self,
        kind: ObjectKind,
        pick: impl FnOnce(Vec<RemoteObjectRef>) -> T,
    ) -> Result<T, VmcliError> {
        let view = self.inventory.create_view(kind).await?;
        let objects = self.inventory.view_objects(&view, kind).await;
        if let Err(e) = self.inventory.destroy_view(view).await {
            tracing::warn!(%kind, error = %e, "failed to release container view");
        }
        let objects = objects?;
        tracing::debug!(%kind, count = objects.len(), "enumerated objects");
        Ok(pick(objects))
    }
}
