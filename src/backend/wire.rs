//! VI/JSON encoding and decoding.
//!
//! Every data object on the wire carries a `_typeName` discriminator and
//! primitives inside `anyType` slots are boxed as `{"_typeName", "_value"}`.
//! These helpers keep that shape out of the client and the handlers.

use serde_json::{Value, json};

use super::{
    MoRef, ObjectKind, PropertyChange, RemoteObjectRef, SnapshotNode, TaskChange, TaskFault,
    TaskState, UpdateSet, VirtualDevice,
};

pub fn moref_json(moref: &MoRef) -> Value {
    json!({
        "_typeName": "ManagedObjectReference",
        "type": moref.kind,
        "value": moref.value,
    })
}

pub fn parse_moref(value: &Value) -> Option<MoRef> {
    let kind = value.get("type")?.as_str()?;
    let id = value.get("value")?.as_str()?;
    Some(MoRef::new(kind, id))
}

/// Unbox a primitive that may arrive as `"x"` or `{"_typeName": .., "_value": "x"}`.
pub fn unbox(value: &Value) -> &Value {
    match value.get("_value") {
        Some(inner) => inner,
        None => value,
    }
}

pub fn type_name(value: &Value) -> Option<&str> {
    value.get("_typeName").and_then(Value::as_str)
}

/// Best human-readable message in a fault or `LocalizedMethodFault`.
pub fn fault_message(value: &Value) -> String {
    for key in ["localizedMessage", "faultstring", "message", "msg"] {
        if let Some(msg) = value.get(key).and_then(Value::as_str)
            && !msg.is_empty()
        {
            return msg.to_string();
        }
    }
    if let Some(inner) = value.get("fault") {
        let msg = fault_message(inner);
        if !msg.is_empty() {
            return msg;
        }
    }
    type_name(value).unwrap_or("unknown fault").to_string()
}

/// Fault type of a method fault, unwrapping `LocalizedMethodFault`.
pub fn fault_type(value: &Value) -> Option<String> {
    match type_name(value) {
        Some("LocalizedMethodFault") | None => value
            .get("fault")
            .and_then(type_name)
            .map(str::to_string),
        Some(other) => Some(other.to_string()),
    }
}

pub fn parse_task_fault(value: &Value) -> TaskFault {
    TaskFault {
        fault: fault_type(value),
        message: fault_message(value),
    }
}

fn parse_task_info(value: &Value) -> Option<PropertyChange> {
    let state = TaskState::parse(unbox(value.get("state")?).as_str()?)?;
    let error = value
        .get("error")
        .filter(|e| !e.is_null())
        .map(parse_task_fault);
    Some(PropertyChange::Info { state, error })
}

/// Decode a `WaitForUpdatesEx` result. A null body means the server
/// returned without changes.
pub fn parse_update_set(value: &Value) -> Result<Option<UpdateSet>, String> {
    if value.is_null() {
        return Ok(None);
    }
    let version = value
        .get("version")
        .and_then(Value::as_str)
        .ok_or("update set without version")?
        .to_string();

    let mut changes = Vec::new();
    let filter_sets = value.get("filterSet").and_then(Value::as_array);
    for filter_set in filter_sets.into_iter().flatten() {
        let object_sets = filter_set.get("objectSet").and_then(Value::as_array);
        for object_set in object_sets.into_iter().flatten() {
            let Some(obj) = object_set.get("obj").and_then(parse_moref) else {
                continue;
            };
            let change_set = object_set.get("changeSet").and_then(Value::as_array);
            for change in change_set.into_iter().flatten() {
                let name = change.get("name").and_then(Value::as_str).unwrap_or_default();
                let val = change.get("val").unwrap_or(&Value::Null);
                let parsed = match name {
                    "info" => parse_task_info(val),
                    "info.state" => unbox(val)
                        .as_str()
                        .and_then(TaskState::parse)
                        .map(PropertyChange::State),
                    other => Some(PropertyChange::Other(other.to_string())),
                };
                let change = parsed.unwrap_or_else(|| PropertyChange::Other(name.to_string()));
                changes.push(TaskChange {
                    task: obj.value.clone(),
                    change,
                });
            }
        }
    }

    Ok(Some(UpdateSet { version, changes }))
}

/// Container-view traversal spec retrieving `name` for every object.
pub fn name_retrieval_spec(view: &MoRef, kind: ObjectKind) -> Value {
    json!({
        "specSet": [{
            "_typeName": "PropertyFilterSpec",
            "propSet": [{
                "_typeName": "PropertySpec",
                "type": kind.type_name(),
                "pathSet": ["name"],
            }],
            "objectSet": [{
                "_typeName": "ObjectSpec",
                "obj": moref_json(view),
                "skip": true,
                "selectSet": [{
                    "_typeName": "TraversalSpec",
                    "name": "traverseView",
                    "type": "ContainerView",
                    "path": "view",
                    "skip": false,
                }],
            }],
        }],
        "options": { "_typeName": "RetrieveOptions" },
    })
}

/// Filter spec watching every property of the given tasks.
pub fn task_filter_spec(tasks: &[MoRef]) -> Value {
    let object_set: Vec<Value> = tasks
        .iter()
        .map(|t| json!({ "_typeName": "ObjectSpec", "obj": moref_json(t) }))
        .collect();
    json!({
        "spec": {
            "_typeName": "PropertyFilterSpec",
            "objectSet": object_set,
            "propSet": [{ "_typeName": "PropertySpec", "type": "Task", "all": true }],
        },
        "partialUpdates": true,
    })
}

/// Decode a `RetrieveResult` into objects plus an optional continuation token.
pub fn parse_retrieve_result(
    value: &Value,
    kind: ObjectKind,
) -> (Vec<RemoteObjectRef>, Option<String>) {
    if value.is_null() {
        return (Vec::new(), None);
    }
    let objects = value
        .get("objects")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|content| {
            let moref = content.get("obj").and_then(parse_moref)?;
            let name = content
                .get("propSet")
                .and_then(Value::as_array)?
                .iter()
                .find(|p| p.get("name").and_then(Value::as_str) == Some("name"))
                .and_then(|p| p.get("val"))
                .map(unbox)
                .and_then(Value::as_str)?
                .to_string();
            Some(RemoteObjectRef { kind, name, moref })
        })
        .collect();
    let token = value
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string);
    (objects, token)
}

pub fn parse_devices(config: &Value) -> Vec<VirtualDevice> {
    config
        .pointer("/hardware/device")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|d| {
            Some(VirtualDevice {
                type_name: type_name(d)?.to_string(),
                key: d.get("key")?.as_i64()? as i32,
                controller_key: d
                    .get("controllerKey")
                    .and_then(Value::as_i64)
                    .map(|k| k as i32),
                unit_number: d.get("unitNumber").and_then(Value::as_i64).map(|u| u as i32),
                raw: d.clone(),
            })
        })
        .collect()
}

fn parse_snapshot_node(value: &Value) -> Option<SnapshotNode> {
    Some(SnapshotNode {
        name: value.get("name")?.as_str()?.to_string(),
        description: value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        create_time: value
            .get("createTime")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        snapshot: value.get("snapshot").and_then(parse_moref)?,
        children: parse_snapshot_list(value.get("childSnapshotList")),
    })
}

fn parse_snapshot_list(list: Option<&Value>) -> Vec<SnapshotNode> {
    list.and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(parse_snapshot_node)
        .collect()
}

/// Decode `VirtualMachineSnapshotInfo`; a VM without snapshots has none.
pub fn parse_snapshot_tree(info: &Value) -> Vec<SnapshotNode> {
    parse_snapshot_list(info.get("rootSnapshotList"))
}
