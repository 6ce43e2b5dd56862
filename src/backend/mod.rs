//! Remote virtualization API boundary.
//!
//! The traits here are the only way the rest of the crate talks to
//! vCenter. `vsphere::VsphereClient` implements all of them over the
//! VI/JSON API; tests use in-memory fakes.

#[cfg(test)]
pub mod fake;
pub mod tagging;
pub mod vsphere;
pub mod wire;

use std::fmt;

use serde_json::Value;

use crate::error::VmcliError;

// ── Object model ────────────────────────────────────────────────────

/// Categories of inventory objects the resolver can look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ObjectKind {
    Vm,
    Datacenter,
    Folder,
    Cluster,
    Datastore,
    #[value(name = "datastore_cluster")]
    DatastoreCluster,
    #[value(name = "resource_pool")]
    ResourcePool,
    Network,
    #[value(name = "dvs_portgroup")]
    DvsPortgroup,
}

impl ObjectKind {
    /// Managed object type name used by the API for this kind.
    pub fn type_name(self) -> &'static str {
        match self {
            ObjectKind::Vm => "VirtualMachine",
            ObjectKind::Datacenter => "Datacenter",
            ObjectKind::Folder => "Folder",
            ObjectKind::Cluster => "ClusterComputeResource",
            ObjectKind::Datastore => "Datastore",
            ObjectKind::DatastoreCluster => "StoragePod",
            ObjectKind::ResourcePool => "ResourcePool",
            ObjectKind::Network => "Network",
            ObjectKind::DvsPortgroup => "DistributedVirtualPortgroup",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Vm => "vm",
            ObjectKind::Datacenter => "datacenter",
            ObjectKind::Folder => "folder",
            ObjectKind::Cluster => "cluster",
            ObjectKind::Datastore => "datastore",
            ObjectKind::DatastoreCluster => "datastore_cluster",
            ObjectKind::ResourcePool => "resource_pool",
            ObjectKind::Network => "network",
            ObjectKind::DvsPortgroup => "dvs_portgroup",
        };
        f.write_str(name)
    }
}

/// Managed object reference: the server-side identity of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MoRef {
    /// Managed object type, e.g. `VirtualMachine` or `Task`.
    pub kind: String,
    /// Server-assigned id, e.g. `vm-42` or `task-1001`.
    pub value: String,
}

impl MoRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for MoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// A resolved inventory object. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectRef {
    pub kind: ObjectKind,
    pub name: String,
    pub moref: MoRef,
}

// ── Tasks ───────────────────────────────────────────────────────────

/// Handle to an outstanding asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef(pub MoRef);

impl TaskRef {
    pub fn new(id: impl Into<String>) -> Self {
        TaskRef(MoRef::new("Task", id))
    }

    /// Stable key used in wait sets.
    pub fn id(&self) -> &str {
        &self.0.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskState::Queued),
            "running" => Some(TaskState::Running),
            "success" => Some(TaskState::Success),
            "error" => Some(TaskState::Error),
            _ => None,
        }
    }
}

/// Error detail the server attaches to a failed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFault {
    /// Fault type, e.g. `DuplicateName`.
    pub fault: Option<String>,
    pub message: String,
}

/// One property change for one task inside an update batch.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyChange {
    /// Full `info` snapshot.
    Info {
        state: TaskState,
        error: Option<TaskFault>,
    },
    /// Incremental `info.state` change.
    State(TaskState),
    /// Any other property; carries the property path.
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskChange {
    pub task: String,
    pub change: PropertyChange,
}

/// One batch from the change-notification stream. `version` must be
/// presented on the next poll to receive only later changes.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSet {
    pub version: String,
    pub changes: Vec<TaskChange>,
}

// ── Guest ───────────────────────────────────────────────────────────

/// Transient view of a VM's guest state, re-fetched on every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestStatus {
    pub guest_state: String,
    pub tools_status: String,
}

impl GuestStatus {
    pub fn os_running(&self) -> bool {
        self.guest_state == "running"
    }

    pub fn tools_ready(&self) -> bool {
        matches!(self.tools_status.as_str(), "toolsOk" | "toolsOld")
    }

    pub fn tools_unavailable(&self) -> bool {
        matches!(
            self.tools_status.as_str(),
            "toolsNotInstalled" | "toolsNotRunning"
        )
    }
}

#[derive(Debug, Clone)]
pub struct GuestCredentials {
    pub username: String,
    pub password: String,
}

// ── VM model ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

impl PowerState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "poweredOn" => Some(PowerState::PoweredOn),
            "poweredOff" => Some(PowerState::PoweredOff),
            "suspended" => Some(PowerState::Suspended),
            _ => None,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PowerState::PoweredOn => "poweredOn",
            PowerState::PoweredOff => "poweredOff",
            PowerState::Suspended => "suspended",
        })
    }
}

/// A virtual hardware device as reported by the VM's config. `raw` keeps
/// the full JSON so edits can send the device back unchanged otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualDevice {
    pub type_name: String,
    pub key: i32,
    pub controller_key: Option<i32>,
    pub unit_number: Option<i32>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotNode {
    pub name: String,
    pub description: String,
    pub create_time: String,
    pub snapshot: MoRef,
    pub children: Vec<SnapshotNode>,
}

/// Clone request. Fields left `None` are copied from the template.
#[derive(Debug, Clone)]
pub struct CloneSpec {
    pub name: String,
    pub folder: MoRef,
    pub datastore: MoRef,
    pub pool: MoRef,
    pub power_on: bool,
    pub memory_mb: Option<u64>,
    pub num_cpus: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DvsPort {
    pub portgroup_key: String,
    pub switch_uuid: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub name: String,
    pub description: String,
    pub memory: bool,
    pub quiesce: bool,
}

// ── Traits ──────────────────────────────────────────────────────────

/// Flat enumeration of inventory objects through server-side views.
#[allow(async_fn_in_trait)] // trait is internal-only
pub trait Inventory {
    type View;

    async fn create_view(&self, kind: ObjectKind) -> Result<Self::View, VmcliError>;
    async fn view_objects(
        &self,
        view: &Self::View,
        kind: ObjectKind,
    ) -> Result<Vec<RemoteObjectRef>, VmcliError>;
    async fn destroy_view(&self, view: Self::View) -> Result<(), VmcliError>;
}

/// Change-notification stream over task objects.
#[allow(async_fn_in_trait)]
pub trait TaskCollector {
    type Filter;

    async fn create_filter(&self, tasks: &[TaskRef]) -> Result<Self::Filter, VmcliError>;
    /// Blocks server-side until changes after `version` exist. `None`
    /// means the server returned without changes.
    async fn wait_for_updates(&self, version: Option<&str>)
    -> Result<Option<UpdateSet>, VmcliError>;
    /// Current `info.error` of a task, for incremental `error` reports.
    async fn task_error(&self, task: &str) -> Result<Option<TaskFault>, VmcliError>;
    async fn destroy_filter(&self, filter: Self::Filter) -> Result<(), VmcliError>;
}

#[allow(async_fn_in_trait)]
pub trait GuestProbe {
    async fn guest_status(&self, vm: &RemoteObjectRef) -> Result<GuestStatus, VmcliError>;
}

#[allow(async_fn_in_trait)]
pub trait GuestOperations {
    /// Start a program in the guest, returning its pid.
    async fn start_program(
        &self,
        vm: &RemoteObjectRef,
        credentials: &GuestCredentials,
        program_path: &str,
        arguments: &str,
    ) -> Result<i64, VmcliError>;
}

#[allow(async_fn_in_trait)]
pub trait VmOperations {
    async fn clone_vm(&self, template: &RemoteObjectRef, spec: &CloneSpec)
    -> Result<TaskRef, VmcliError>;
    async fn create_vm(
        &self,
        folder: &RemoteObjectRef,
        pool: &RemoteObjectRef,
        config: Value,
    ) -> Result<TaskRef, VmcliError>;
    async fn reconfigure(&self, vm: &RemoteObjectRef, spec: Value) -> Result<TaskRef, VmcliError>;
    /// `None` upgrades to the latest supported hardware version.
    async fn upgrade_hardware(
        &self,
        vm: &RemoteObjectRef,
        version: Option<&str>,
    ) -> Result<TaskRef, VmcliError>;
    async fn power_on(&self, vm: &RemoteObjectRef) -> Result<TaskRef, VmcliError>;
    async fn power_off(&self, vm: &RemoteObjectRef) -> Result<TaskRef, VmcliError>;
    async fn reset(&self, vm: &RemoteObjectRef) -> Result<TaskRef, VmcliError>;
    async fn reboot_guest(&self, vm: &RemoteObjectRef) -> Result<(), VmcliError>;
    async fn power_state(&self, vm: &RemoteObjectRef) -> Result<PowerState, VmcliError>;
    async fn devices(&self, vm: &RemoteObjectRef) -> Result<Vec<VirtualDevice>, VmcliError>;
    async fn snapshots(&self, vm: &RemoteObjectRef) -> Result<Vec<SnapshotNode>, VmcliError>;
    async fn create_snapshot(
        &self,
        vm: &RemoteObjectRef,
        request: &SnapshotRequest,
    ) -> Result<TaskRef, VmcliError>;
    async fn remove_snapshot(&self, snapshot: &MoRef) -> Result<TaskRef, VmcliError>;
    async fn revert_snapshot(&self, snapshot: &MoRef) -> Result<TaskRef, VmcliError>;
    /// The VM folder of a datacenter.
    async fn vm_folder(&self, datacenter: &RemoteObjectRef) -> Result<RemoteObjectRef, VmcliError>;
    /// The root resource pool of a cluster.
    async fn root_pool(&self, cluster: &RemoteObjectRef) -> Result<RemoteObjectRef, VmcliError>;
    /// Name of the first datastore backing a VM.
    async fn first_datastore_name(&self, vm: &RemoteObjectRef)
    -> Result<Option<String>, VmcliError>;
    /// Port group key and switch uuid needed to back a NIC with a DVS port group.
    async fn dvs_port(&self, portgroup: &RemoteObjectRef) -> Result<DvsPort, VmcliError>;
    async fn summary(&self, object: &RemoteObjectRef) -> Result<Option<Value>, VmcliError>;
}

/// Everything a command handler needs from the remote side.
pub trait Backend: Inventory + TaskCollector + GuestProbe + GuestOperations + VmOperations {}

impl<T> Backend for T where T: Inventory + TaskCollector + GuestProbe + GuestOperations + VmOperations {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_parses_server_names() {
        assert_eq!(TaskState::parse("success"), Some(TaskState::Success));
        assert_eq!(TaskState::parse("error"), Some(TaskState::Error));
        assert_eq!(TaskState::parse("bogus"), None);
    }

    #[test]
    fn guest_tools_acceptance_set() {
        let mut status = GuestStatus {
            guest_state: "running".into(),
            tools_status: "toolsOld".into(),
        };
        assert!(status.tools_ready());
        status.tools_status = "toolsNotRunning".into();
        assert!(!status.tools_ready());
        assert!(status.tools_unavailable());
    }

    #[test]
    fn kind_names_match_cli_values() {
        use clap::ValueEnum;
        for kind in ObjectKind::value_variants() {
            let value = kind.to_possible_value().unwrap();
            assert_eq!(value.get_name(), kind.to_string());
        }
    }
}
