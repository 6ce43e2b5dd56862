//! In-memory backend for unit tests. Counts the calls the core
//! components make so tests can assert on them.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;

use super::{
    CloneSpec, DvsPort, GuestCredentials, GuestOperations, GuestProbe, GuestStatus, Inventory,
    MoRef, ObjectKind, PowerState, PropertyChange, RemoteObjectRef, SnapshotNode,
    SnapshotRequest, TaskChange, TaskCollector, TaskFault, TaskRef, TaskState, UpdateSet,
    VirtualDevice, VmOperations,
};
use crate::error::VmcliError;

pub fn object(kind: ObjectKind, name: &str, id: &str) -> RemoteObjectRef {
    RemoteObjectRef {
        kind,
        name: name.into(),
        moref: MoRef::new(kind.type_name(), id),
    }
}

pub fn info(task: &str, state: TaskState) -> TaskChange {
    TaskChange {
        task: task.into(),
        change: PropertyChange::Info { state, error: None },
    }
}

pub fn update(version: &str, changes: Vec<TaskChange>) -> UpdateSet {
    UpdateSet {
        version: version.into(),
        changes,
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub objects: RefCell<HashMap<ObjectKind, Vec<RemoteObjectRef>>>,
    pub views_created: Cell<usize>,
    pub views_destroyed: Cell<usize>,

    /// Scripted poll results. When empty, every task under the live
    /// filter is reported finished (successful unless its submitting
    /// method is in `failing`).
    pub updates: RefCell<VecDeque<Option<UpdateSet>>>,
    pub polls: Cell<usize>,
    /// Server-side block per poll, to exercise timeouts.
    pub poll_delay: Cell<Option<std::time::Duration>>,
    pub versions_seen: RefCell<Vec<Option<String>>>,
    pub filters_created: Cell<usize>,
    pub filters_destroyed: Cell<usize>,
    pub fail_destroy_filter: Cell<bool>,
    pub task_faults: RefCell<HashMap<String, TaskFault>>,
    watched: RefCell<Vec<String>>,

    /// Guest states handed out in order; the last one repeats.
    pub guest: RefCell<VecDeque<GuestStatus>>,
    pub guest_polls: Cell<usize>,
    pub programs: RefCell<Vec<(String, String)>>,
    pub program_fault: RefCell<Option<String>>,

    /// Every mutating call, e.g. `power_on web01`.
    pub calls: RefCell<Vec<String>>,
    pub reconfigs: RefCell<Vec<Value>>,
    pub created: RefCell<Vec<Value>>,
    pub clones: RefCell<Vec<CloneSpec>>,
    /// Methods whose tasks end in `error`, with the fault type to report.
    pub failing: RefCell<HashMap<String, String>>,
    task_methods: RefCell<HashMap<String, String>>,
    next_task: Cell<usize>,

    pub power: Cell<Option<PowerState>>,
    pub devices: RefCell<Vec<VirtualDevice>>,
    pub snapshots: RefCell<Vec<SnapshotNode>>,
    pub datastore_of_template: RefCell<Option<String>>,
}

impl FakeBackend {
    pub fn with_objects(objects: Vec<RemoteObjectRef>) -> Self {
        let fake = Self::default();
        for object in objects {
            fake.add(object);
        }
        fake
    }

    pub fn add(&self, object: RemoteObjectRef) {
        self.objects
            .borrow_mut()
            .entry(object.kind)
            .or_default()
            .push(object);
    }

    pub fn script(&self, updates: Vec<Option<UpdateSet>>) {
        self.updates.borrow_mut().extend(updates);
    }

    pub fn fail(&self, method: &str, fault: &str) {
        self.failing
            .borrow_mut()
            .insert(method.into(), fault.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn task(&self, method: &str) -> TaskRef {
        let n = self.next_task.get() + 1;
        self.next_task.set(n);
        let id = format!("task-{n}");
        self.task_methods
            .borrow_mut()
            .insert(id.clone(), method.into());
        TaskRef::new(id)
    }

    fn finish_watched(&self) -> UpdateSet {
        let failing = self.failing.borrow();
        let methods = self.task_methods.borrow();
        let changes = self
            .watched
            .borrow()
            .iter()
            .map(|task| {
                let fault = methods.get(task).and_then(|m| failing.get(m));
                let change = match fault {
                    Some(fault) => PropertyChange::Info {
                        state: TaskState::Error,
                        error: Some(TaskFault {
                            fault: Some(fault.clone()),
                            message: format!("{fault} raised by server"),
                        }),
                    },
                    None => PropertyChange::Info {
                        state: TaskState::Success,
                        error: None,
                    },
                };
                TaskChange {
                    task: task.clone(),
                    change,
                }
            })
            .collect();
        update(&format!("auto-{}", self.polls.get()), changes)
    }
}

impl Inventory for FakeBackend {
    type View = usize;

    async fn create_view(&self, _kind: ObjectKind) -> Result<usize, VmcliError> {
        self.views_created.set(self.views_created.get() + 1);
        Ok(self.views_created.get())
    }

    async fn view_objects(
        &self,
        _view: &usize,
        kind: ObjectKind,
    ) -> Result<Vec<RemoteObjectRef>, VmcliError> {
        Ok(self
            .objects
            .borrow()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn destroy_view(&self, _view: usize) -> Result<(), VmcliError> {
        self.views_destroyed.set(self.views_destroyed.get() + 1);
        Ok(())
    }
}

impl TaskCollector for FakeBackend {
    type Filter = Vec<String>;

    async fn create_filter(&self, tasks: &[TaskRef]) -> Result<Vec<String>, VmcliError> {
        self.filters_created.set(self.filters_created.get() + 1);
        let ids: Vec<String> = tasks.iter().map(|t| t.id().to_string()).collect();
        *self.watched.borrow_mut() = ids.clone();
        Ok(ids)
    }

    async fn wait_for_updates(&self, version: Option<&str>) -> Result<Option<UpdateSet>, VmcliError> {
        self.polls.set(self.polls.get() + 1);
        if let Some(delay) = self.poll_delay.get() {
            tokio::time::sleep(delay).await;
        }
        self.versions_seen
            .borrow_mut()
            .push(version.map(str::to_string));
        let scripted = self.updates.borrow_mut().pop_front();
        match scripted {
            Some(update) => Ok(update),
            None => Ok(Some(self.finish_watched())),
        }
    }

    async fn task_error(&self, task: &str) -> Result<Option<TaskFault>, VmcliError> {
        Ok(self.task_faults.borrow().get(task).cloned())
    }

    async fn destroy_filter(&self, filter: Vec<String>) -> Result<(), VmcliError> {
        self.filters_destroyed.set(self.filters_destroyed.get() + 1);
        let mut watched = self.watched.borrow_mut();
        let gone: HashSet<&String> = filter.iter().collect();
        watched.retain(|t| !gone.contains(t));
        if self.fail_destroy_filter.get() {
            return Err(VmcliError::Api {
                method: "DestroyPropertyFilter".into(),
                fault: Some("ManagedObjectNotFound".into()),
                message: "filter already gone".into(),
            });
        }
        Ok(())
    }
}

impl GuestProbe for FakeBackend {
    async fn guest_status(&self, _vm: &RemoteObjectRef) -> Result<GuestStatus, VmcliError> {
        self.guest_polls.set(self.guest_polls.get() + 1);
        let mut states = self.guest.borrow_mut();
        if states.len() > 1 {
            return Ok(states.pop_front().unwrap_or_default());
        }
        Ok(states.front().cloned().unwrap_or(GuestStatus {
            guest_state: "running".into(),
            tools_status: "toolsOk".into(),
        }))
    }
}

impl GuestOperations for FakeBackend {
    async fn start_program(
        &self,
        _vm: &RemoteObjectRef,
        _credentials: &GuestCredentials,
        program_path: &str,
        arguments: &str,
    ) -> Result<i64, VmcliError> {
        if let Some(fault) = self.program_fault.borrow().clone() {
            return Err(VmcliError::Api {
                method: "StartProgramInGuest".into(),
                fault: Some(fault.clone()),
                message: format!("{fault}: {program_path}"),
            });
        }
        let mut programs = self.programs.borrow_mut();
        programs.push((program_path.into(), arguments.into()));
        Ok(1000 + programs.len() as i64)
    }
}

impl VmOperations for FakeBackend {
    async fn clone_vm(&self, template: &RemoteObjectRef, spec: &CloneSpec) -> Result<TaskRef, VmcliError> {
        self.record(format!("clone_vm {} -> {}", template.name, spec.name));
        self.clones.borrow_mut().push(spec.clone());
        let id = format!("vm-{}", spec.name);
        self.add(object(ObjectKind::Vm, &spec.name, &id));
        Ok(self.task("CloneVM_Task"))
    }

    async fn create_vm(
        &self,
        folder: &RemoteObjectRef,
        _pool: &RemoteObjectRef,
        config: Value,
    ) -> Result<TaskRef, VmcliError> {
        self.record(format!("create_vm in {}", folder.name));
        self.created.borrow_mut().push(config);
        Ok(self.task("CreateVM_Task"))
    }

    async fn reconfigure(&self, vm: &RemoteObjectRef, spec: Value) -> Result<TaskRef, VmcliError> {
        self.record(format!("reconfigure {}", vm.name));
        self.reconfigs.borrow_mut().push(spec);
        Ok(self.task("ReconfigVM_Task"))
    }

    async fn upgrade_hardware(
        &self,
        vm: &RemoteObjectRef,
        version: Option<&str>,
    ) -> Result<TaskRef, VmcliError> {
        self.record(format!(
            "upgrade_hardware {} {}",
            vm.name,
            version.unwrap_or("latest")
        ));
        Ok(self.task("UpgradeVM_Task"))
    }

    async fn power_on(&self, vm: &RemoteObjectRef) -> Result<TaskRef, VmcliError> {
        self.record(format!("power_on {}", vm.name));
        Ok(self.task("PowerOnVM_Task"))
    }

    async fn power_off(&self, vm: &RemoteObjectRef) -> Result<TaskRef, VmcliError> {
        self.record(format!("power_off {}", vm.name));
        Ok(self.task("PowerOffVM_Task"))
    }

    async fn reset(&self, vm: &RemoteObjectRef) -> Result<TaskRef, VmcliError> {
        self.record(format!("reset {}", vm.name));
        Ok(self.task("ResetVM_Task"))
    }

    async fn reboot_guest(&self, vm: &RemoteObjectRef) -> Result<(), VmcliError> {
        self.record(format!("reboot_guest {}", vm.name));
        Ok(())
    }

    async fn power_state(&self, _vm: &RemoteObjectRef) -> Result<PowerState, VmcliError> {
        Ok(self.power.get().unwrap_or(PowerState::PoweredOff))
    }

    async fn devices(&self, _vm: &RemoteObjectRef) -> Result<Vec<VirtualDevice>, VmcliError> {
        Ok(self.devices.borrow().clone())
    }

    async fn snapshots(&self, _vm: &RemoteObjectRef) -> Result<Vec<SnapshotNode>, VmcliError> {
        Ok(self.snapshots.borrow().clone())
    }

    async fn create_snapshot(
        &self,
        vm: &RemoteObjectRef,
        request: &SnapshotRequest,
    ) -> Result<TaskRef, VmcliError> {
        self.record(format!(
            "create_snapshot {} {} memory={} quiesce={}",
            vm.name, request.name, request.memory, request.quiesce
        ));
        Ok(self.task("CreateSnapshot_Task"))
    }

    async fn remove_snapshot(&self, snapshot: &MoRef) -> Result<TaskRef, VmcliError> {
        self.record(format!("remove_snapshot {}", snapshot.value));
        Ok(self.task("RemoveSnapshot_Task"))
    }

    async fn revert_snapshot(&self, snapshot: &MoRef) -> Result<TaskRef, VmcliError> {
        self.record(format!("revert_snapshot {}", snapshot.value));
        Ok(self.task("RevertToSnapshot_Task"))
    }

    async fn vm_folder(&self, datacenter: &RemoteObjectRef) -> Result<RemoteObjectRef, VmcliError> {
        Ok(object(
            ObjectKind::Folder,
            "vm",
            &format!("group-v-{}", datacenter.moref.value),
        ))
    }

    async fn root_pool(&self, cluster: &RemoteObjectRef) -> Result<RemoteObjectRef, VmcliError> {
        Ok(object(
            ObjectKind::ResourcePool,
            "Resources",
            &format!("resgroup-{}", cluster.moref.value),
        ))
    }

    async fn first_datastore_name(&self, _vm: &RemoteObjectRef) -> Result<Option<String>, VmcliError> {
        Ok(self.datastore_of_template.borrow().clone())
    }

    async fn dvs_port(&self, portgroup: &RemoteObjectRef) -> Result<DvsPort, VmcliError> {
        Ok(DvsPort {
            portgroup_key: portgroup.moref.value.clone(),
            switch_uuid: "50 2a 7b".into(),
        })
    }

    async fn summary(&self, object: &RemoteObjectRef) -> Result<Option<Value>, VmcliError> {
        Ok(Some(serde_json::json!({ "name": object.name })))
    }
}
