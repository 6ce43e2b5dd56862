use crate::backend::{Backend, RemoteObjectRef, SnapshotNode, SnapshotRequest};
use crate::cli::{Command, SnapshotAction};
use crate::error::{Family, VmcliError};

use super::{Context, Handler, HandlerFuture, mismatch};

pub struct SnapshotHandler;

impl<B: Backend> Handler<B> for SnapshotHandler {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn family(&self) -> Family {
        Family::Snapshot
    }

    fn run<'a>(&'a self, ctx: &'a Context<'a, B>, command: &'a Command) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Command::Snapshot {
                action,
                name,
                snapshot,
                desc,
                memory,
                no_quiesce,
            } = command
            else {
                return Err(mismatch("snapshot", command));
            };

            let snapshot = match (action, snapshot) {
                (SnapshotAction::List, _) => None,
                (_, Some(snapshot)) => Some(snapshot.as_str()),
                (_, None) => {
                    return Err(VmcliError::Validation {
                        message: "--snapshot is required".into(),
                    });
                }
            };
            let vm = ctx.vm(name).await?;

            match (action, snapshot) {
                (SnapshotAction::Create, Some(snapshot)) => {
                    let description = desc.clone().ok_or_else(|| VmcliError::Validation {
                        message: "--desc is required to create a snapshot".into(),
                    })?;
                    let request = SnapshotRequest {
                        name: snapshot.to_string(),
                        description,
                        memory: *memory,
                        quiesce: !*no_quiesce,
                    };
                    tracing::info!(vm = %vm.name, snapshot, "creating snapshot");
                    let task = ctx.backend.create_snapshot(&vm, &request).await?;
                    ctx.wait(&[task]).await.map(|_| ())
                }
                (SnapshotAction::Delete, Some(snapshot)) => {
                    let node = lookup(ctx, &vm, snapshot).await?;
                    tracing::info!(vm = %vm.name, snapshot, "removing snapshot");
                    let task = ctx.backend.remove_snapshot(&node.snapshot).await?;
                    ctx.wait(&[task]).await.map(|_| ())
                }
                (SnapshotAction::Revert, Some(snapshot)) => {
                    let node = lookup(ctx, &vm, snapshot).await?;
                    tracing::info!(vm = %vm.name, snapshot, "reverting to snapshot");
                    let task = ctx.backend.revert_snapshot(&node.snapshot).await?;
                    ctx.wait(&[task]).await.map(|_| ())
                }
                _ => {
                    let tree = ctx.backend.snapshots(&vm).await?;
                    if tree.is_empty() {
                        tracing::info!(vm = %vm.name, "VM has no snapshots");
                    }
                    for line in render_tree(&tree) {
                        ctx.emit(&line);
                    }
                    Ok(())
                }
            }
        })
    }
}

async fn lookup<B: Backend>(
    ctx: &Context<'_, B>,
    vm: &RemoteObjectRef,
    name: &str,
) -> Result<SnapshotNode, VmcliError> {
    let tree = ctx.backend.snapshots(vm).await?;
    find_snapshot(&tree, name)
        .cloned()
        .ok_or_else(|| VmcliError::Validation {
            message: format!("snapshot '{name}' not found on VM '{}'", vm.name),
        })
}

/// Depth-first search by name; the first match in tree order wins.
pub fn find_snapshot<'t>(nodes: &'t [SnapshotNode], name: &str) -> Option<&'t SnapshotNode> {
    nodes.iter().find_map(|node| {
        if node.name == name {
            Some(node)
        } else {
            find_snapshot(&node.children, name)
        }
    })
}

/// One line per snapshot, children indented under their parent.
pub fn render_tree(nodes: &[SnapshotNode]) -> Vec<String> {
    fn walk(nodes: &[SnapshotNode], depth: usize, out: &mut Vec<String>) {
        for node in nodes {
            let mut line = format!("{}{}", "  ".repeat(depth), node.name);
            if !node.description.is_empty() {
                line.push_str(&format!(" - {}", node.description));
            }
            if !node.create_time.is_empty() {
                line.push_str(&format!(" ({})", node.create_time));
            }
            out.push(line);
            walk(&node.children, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    walk(nodes, 0, &mut out);
    out
}
