//! vSphere VI/JSON client.
//!
//! Speaks `https://<host>/sdk/vim25/<release>/<Type>/<moid>/<Method>`
//! with the session id from `SessionManager.Login` in the
//! `vmware-api-session-id` header.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};

use super::wire;
use super::{
    CloneSpec, DvsPort, GuestCredentials, GuestOperations, GuestProbe, GuestStatus, Inventory,
    MoRef, ObjectKind, PowerState, RemoteObjectRef, SnapshotNode, SnapshotRequest, TaskCollector,
    TaskFault, TaskRef, UpdateSet, VirtualDevice, VmOperations,
};
use crate::error::VmcliError;

pub const SESSION_HEADER: &str = "vmware-api-session-id";
pub const DEFAULT_API_RELEASE: &str = "8.0.1.0";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Server-side bound for one WaitForUpdatesEx call; a `null` result
/// after this long just means "no changes yet".
const MAX_WAIT_SECONDS: u32 = 60;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub username: String,
    pub password: String,
    pub insecure: bool,
    pub api_release: String,
}

impl ConnectOptions {
    pub(crate) fn http_client(&self) -> Result<Client, VmcliError> {
        Client::builder()
            .danger_accept_invalid_certs(self.insecure)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| VmcliError::Connection {
                host: self.host.clone(),
                message: e.to_string(),
            })
    }
}

/// The service singletons this client uses.
#[derive(Debug, Clone)]
struct ServiceContent {
    root_folder: MoRef,
    property_collector: MoRef,
    view_manager: MoRef,
    session_manager: MoRef,
    guest_operations_manager: Option<MoRef>,
}

impl ServiceContent {
    fn parse(value: &Value) -> Result<Self, String> {
        let required = |key: &str| {
            value
                .get(key)
                .and_then(wire::parse_moref)
                .ok_or_else(|| format!("service content has no {key}"))
        };
        Ok(Self {
            root_folder: required("rootFolder")?,
            property_collector: required("propertyCollector")?,
            view_manager: required("viewManager")?,
            session_manager: required("sessionManager")?,
            guest_operations_manager: value
                .get("guestOperationsManager")
                .and_then(wire::parse_moref),
        })
    }
}

pub struct VsphereClient {
    http: Client,
    base: String,
    session: String,
    content: ServiceContent,
}

impl VsphereClient {
    /// Fetch the service content and log in.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, VmcliError> {
        let connection_error = |message: String| VmcliError::Connection {
            host: options.host.clone(),
            message,
        };

        let http = options.http_client()?;
        let base = format!("https://{}/sdk/vim25/{}", options.host, options.api_release);

        let response = http
            .get(format!("{base}/ServiceInstance/ServiceInstance/content"))
            .send()
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        let content = decode("RetrieveServiceContent", response)
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        let content = ServiceContent::parse(&content).map_err(connection_error)?;

        let login_url = format!(
            "{base}/SessionManager/{}/Login",
            content.session_manager.value
        );
        let response = http
            .post(login_url)
            .json(&json!({ "userName": options.username, "password": options.password }))
            .send()
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        let session = session_id(response.headers());
        decode("Login", response)
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        let session =
            session.ok_or_else(|| connection_error("login returned no session id".into()))?;

        tracing::info!(host = %options.host, user = %options.username, "connected to vCenter");
        Ok(Self {
            http,
            base,
            session,
            content,
        })
    }

    pub async fn logout(&self) -> Result<(), VmcliError> {
        let manager = self.content.session_manager.clone();
        self.invoke(&manager, "Logout", json!({})).await?;
        tracing::debug!("logged out");
        Ok(())
    }

    async fn invoke(&self, target: &MoRef, method: &str, body: Value) -> Result<Value, VmcliError> {
        let url = format!("{}/{}/{}/{}", self.base, target.kind, target.value, method);
        tracing::debug!(%target, method, "invoking");
        let response = self
            .http
            .post(url)
            .header(SESSION_HEADER, &self.session)
            .json(&body)
            .send()
            .await
            .map_err(|e| VmcliError::Http {
                context: method.to_string(),
                source: e,
            })?;
        decode(method, response).await
    }

    async fn property(&self, target: &MoRef, path: &str) -> Result<Value, VmcliError> {
        let url = format!("{}/{}/{}/{}", self.base, target.kind, target.value, path);
        let response = self
            .http
            .get(url)
            .header(SESSION_HEADER, &self.session)
            .send()
            .await
            .map_err(|e| VmcliError::Http {
                context: format!("{target}.{path}"),
                source: e,
            })?;
        decode(path, response).await
    }

    async fn moref_property(&self, target: &MoRef, path: &str) -> Result<MoRef, VmcliError> {
        let value = self.property(target, path).await?;
        wire::parse_moref(&value).ok_or_else(|| VmcliError::Protocol {
            method: path.to_string(),
            message: format!("{target} has no {path} reference"),
        })
    }

    async fn name_of(&self, target: &MoRef) -> Result<String, VmcliError> {
        let value = self.property(target, "name").await?;
        Ok(wire::unbox(&value).as_str().unwrap_or_default().to_string())
    }

    async fn submit(&self, target: &MoRef, method: &str, body: Value) -> Result<TaskRef, VmcliError> {
        let value = self.invoke(target, method, body).await?;
        let task = wire::parse_moref(&value).ok_or_else(|| VmcliError::Protocol {
            method: method.to_string(),
            message: "no task reference returned".into(),
        })?;
        tracing::debug!(task = %task.value, method, "task submitted");
        Ok(TaskRef(task))
    }
}

async fn decode(method: &str, response: Response) -> Result<Value, VmcliError> {
    let status = response.status();
    let text = response.text().await.map_err(|e| VmcliError::Http {
        context: method.to_string(),
        source: e,
    })?;
    decode_body(method, status, &text)
}

/// Map a response body to its JSON value, or to an API error carrying the
/// fault type when the server sent one.
fn decode_body(method: &str, status: StatusCode, text: &str) -> Result<Value, VmcliError> {
    if status.is_success() {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(text).map_err(|e| VmcliError::Protocol {
            method: method.to_string(),
            message: e.to_string(),
        });
    }

    Err(match serde_json::from_str::<Value>(text) {
        Ok(fault) => VmcliError::Api {
            method: method.to_string(),
            fault: wire::fault_type(&fault),
            message: wire::fault_message(&fault),
        },
        Err(_) => VmcliError::Api {
            method: method.to_string(),
            fault: None,
            message: format!("HTTP {status}: {}", text.trim()),
        },
    })
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Inventory for VsphereClient {
    type View = MoRef;

    async fn create_view(&self, kind: ObjectKind) -> Result<MoRef, VmcliError> {
        let body = json!({
            "container": wire::moref_json(&self.content.root_folder),
            "type": [kind.type_name()],
            "recursive": true,
        });
        let view = self
            .invoke(&self.content.view_manager, "CreateContainerView", body)
            .await?;
        wire::parse_moref(&view).ok_or_else(|| VmcliError::Protocol {
            method: "CreateContainerView".into(),
            message: "no view reference returned".into(),
        })
    }

    async fn view_objects(
        &self,
        view: &MoRef,
        kind: ObjectKind,
    ) -> Result<Vec<RemoteObjectRef>, VmcliError> {
        let collector = &self.content.property_collector;
        let result = self
            .invoke(
                collector,
                "RetrievePropertiesEx",
                wire::name_retrieval_spec(view, kind),
            )
            .await?;
        let (mut objects, mut token) = wire::parse_retrieve_result(&result, kind);

        while let Some(next) = token {
            let page = self
                .invoke(
                    collector,
                    "ContinueRetrievePropertiesEx",
                    json!({ "token": next }),
                )
                .await?;
            let (more, next_token) = wire::parse_retrieve_result(&page, kind);
            objects.extend(more);
            token = next_token;
        }

        Ok(objects)
    }

    async fn destroy_view(&self, view: MoRef) -> Result<(), VmcliError> {
        self.invoke(&view, "DestroyView", json!({})).await?;
        Ok(())
    }
}

impl TaskCollector for VsphereClient {
    type Filter = MoRef;

    async fn create_filter(&self, tasks: &[TaskRef]) -> Result<MoRef, VmcliError> {
        let morefs: Vec<MoRef> = tasks.iter().map(|t| t.0.clone()).collect();
        let filter = self
            .invoke(
                &self.content.property_collector,
                "CreateFilter",
                wire::task_filter_spec(&morefs),
            )
            .await?;
        wire::parse_moref(&filter).ok_or_else(|| VmcliError::Protocol {
            method: "CreateFilter".into(),
            message: "no filter reference returned".into(),
        })
    }

    async fn wait_for_updates(&self, version: Option<&str>) -> Result<Option<UpdateSet>, VmcliError> {
        let body = json!({
            "version": version.unwrap_or(""),
            "options": { "_typeName": "WaitOptions", "maxWaitSeconds": MAX_WAIT_SECONDS },
        });
        let result = self
            .invoke(&self.content.property_collector, "WaitForUpdatesEx", body)
            .await?;
        wire::parse_update_set(&result).map_err(|message| VmcliError::Protocol {
            method: "WaitForUpdatesEx".into(),
            message,
        })
    }

    async fn task_error(&self, task: &str) -> Result<Option<TaskFault>, VmcliError> {
        let info = self.property(&MoRef::new("Task", task), "info").await?;
        Ok(info
            .get("error")
            .filter(|e| !e.is_null())
            .map(wire::parse_task_fault))
    }

    async fn destroy_filter(&self, filter: MoRef) -> Result<(), VmcliError> {
        self.invoke(&filter, "DestroyPropertyFilter", json!({}))
            .await?;
        Ok(())
    }
}

impl GuestProbe for VsphereClient {
    async fn guest_status(&self, vm: &RemoteObjectRef) -> Result<GuestStatus, VmcliError> {
        let guest = self.property(&vm.moref, "guest").await?;
        let field = |key: &str| {
            guest
                .get(key)
                .map(wire::unbox)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Ok(GuestStatus {
            guest_state: field("guestState"),
            tools_status: field("toolsStatus"),
        })
    }
}

impl GuestOperations for VsphereClient {
    async fn start_program(
        &self,
        vm: &RemoteObjectRef,
        credentials: &GuestCredentials,
        program_path: &str,
        arguments: &str,
    ) -> Result<i64, VmcliError> {
        let manager = self
            .content
            .guest_operations_manager
            .as_ref()
            .ok_or_else(|| VmcliError::Guest {
                message: "this vCenter does not offer guest operations".into(),
            })?;
        let process_manager = self.moref_property(manager, "processManager").await?;

        let body = json!({
            "vm": wire::moref_json(&vm.moref),
            "auth": {
                "_typeName": "NamePasswordAuthentication",
                "username": credentials.username,
                "password": credentials.password,
                "interactiveSession": false,
            },
            "spec": {
                "_typeName": "GuestProgramSpec",
                "programPath": program_path,
                "arguments": arguments,
            },
        });
        let pid = self
            .invoke(&process_manager, "StartProgramInGuest", body)
            .await?;
        wire::unbox(&pid)
            .as_i64()
            .ok_or_else(|| VmcliError::Protocol {
                method: "StartProgramInGuest".into(),
                message: format!("expected a pid, got {pid}"),
            })
    }
}

impl VmOperations for VsphereClient {
    async fn clone_vm(&self, template: &RemoteObjectRef, spec: &CloneSpec) -> Result<TaskRef, VmcliError> {
        let mut config = json!({
            "_typeName": "VirtualMachineConfigSpec",
            "name": spec.name,
            "annotation": spec.name,
        });
        if let Some(mb) = spec.memory_mb {
            config["memoryMB"] = json!(mb);
        }
        if let Some(cpus) = spec.num_cpus {
            config["numCPUs"] = json!(cpus);
        }
        let body = json!({
            "folder": wire::moref_json(&spec.folder),
            "name": spec.name,
            "spec": {
                "_typeName": "VirtualMachineCloneSpec",
                "location": {
                    "_typeName": "VirtualMachineRelocateSpec",
                    "datastore": wire::moref_json(&spec.datastore),
                    "pool": wire::moref_json(&spec.pool),
                },
                "powerOn": spec.power_on,
                "template": false,
                "config": config,
            },
        });
        self.submit(&template.moref, "CloneVM_Task", body).await
    }

    async fn create_vm(
        &self,
        folder: &RemoteObjectRef,
        pool: &RemoteObjectRef,
        config: Value,
    ) -> Result<TaskRef, VmcliError> {
        let body = json!({ "config": config, "pool": wire::moref_json(&pool.moref) });
        self.submit(&folder.moref, "CreateVM_Task", body).await
    }

    async fn reconfigure(&self, vm: &RemoteObjectRef, spec: Value) -> Result<TaskRef, VmcliError> {
        self.submit(&vm.moref, "ReconfigVM_Task", json!({ "spec": spec }))
            .await
    }

    async fn upgrade_hardware(
        &self,
        vm: &RemoteObjectRef,
        version: Option<&str>,
    ) -> Result<TaskRef, VmcliError> {
        let body = match version {
            Some(v) => json!({ "version": v }),
            None => json!({}),
        };
        self.submit(&vm.moref, "UpgradeVM_Task", body).await
    }

    async fn power_on(&self, vm: &RemoteObjectRef) -> Result<TaskRef, VmcliError> {
        self.submit(&vm.moref, "PowerOnVM_Task", json!({})).await
    }

    async fn power_off(&self, vm: &RemoteObjectRef) -> Result<TaskRef, VmcliError> {
        self.submit(&vm.moref, "PowerOffVM_Task", json!({})).await
    }

    async fn reset(&self, vm: &RemoteObjectRef) -> Result<TaskRef, VmcliError> {
        self.submit(&vm.moref, "ResetVM_Task", json!({})).await
    }

    async fn reboot_guest(&self, vm: &RemoteObjectRef) -> Result<(), VmcliError> {
        self.invoke(&vm.moref, "RebootGuest", json!({})).await?;
        Ok(())
    }

    async fn power_state(&self, vm: &RemoteObjectRef) -> Result<PowerState, VmcliError> {
        let runtime = self.property(&vm.moref, "runtime").await?;
        runtime
            .get("powerState")
            .map(wire::unbox)
            .and_then(Value::as_str)
            .and_then(PowerState::parse)
            .ok_or_else(|| VmcliError::Protocol {
                method: "runtime".into(),
                message: format!("{} reports no power state", vm.name),
            })
    }

    async fn devices(&self, vm: &RemoteObjectRef) -> Result<Vec<VirtualDevice>, VmcliError> {
        let config = self.property(&vm.moref, "config").await?;
        Ok(wire::parse_devices(&config))
    }

    async fn snapshots(&self, vm: &RemoteObjectRef) -> Result<Vec<SnapshotNode>, VmcliError> {
        let info = self.property(&vm.moref, "snapshot").await?;
        Ok(wire::parse_snapshot_tree(&info))
    }

    async fn create_snapshot(
        &self,
        vm: &RemoteObjectRef,
        request: &SnapshotRequest,
    ) -> Result<TaskRef, VmcliError> {
        let body = json!({
            "name": request.name,
            "description": request.description,
            "memory": request.memory,
            "quiesce": request.quiesce,
        });
        self.submit(&vm.moref, "CreateSnapshot_Task", body).await
    }

    async fn remove_snapshot(&self, snapshot: &MoRef) -> Result<TaskRef, VmcliError> {
        self.submit(snapshot, "RemoveSnapshot_Task", json!({ "removeChildren": false }))
            .await
    }

    async fn revert_snapshot(&self, snapshot: &MoRef) -> Result<TaskRef, VmcliError> {
        self.submit(snapshot, "RevertToSnapshot_Task", json!({}))
            .await
    }

    async fn vm_folder(&self, datacenter: &RemoteObjectRef) -> Result<RemoteObjectRef, VmcliError> {
        let moref = self.moref_property(&datacenter.moref, "vmFolder").await?;
        let name = self.name_of(&moref).await?;
        Ok(RemoteObjectRef {
            kind: ObjectKind::Folder,
            name,
            moref,
        })
    }

    async fn root_pool(&self, cluster: &RemoteObjectRef) -> Result<RemoteObjectRef, VmcliError> {
        let moref = self.moref_property(&cluster.moref, "resourcePool").await?;
        let name = self.name_of(&moref).await?;
        Ok(RemoteObjectRef {
            kind: ObjectKind::ResourcePool,
            name,
            moref,
        })
    }

    async fn first_datastore_name(&self, vm: &RemoteObjectRef) -> Result<Option<String>, VmcliError> {
        let datastores = self.property(&vm.moref, "datastore").await?;
        let first = datastores
            .as_array()
            .and_then(|list| list.first())
            .and_then(wire::parse_moref);
        match first {
            Some(ds) => Ok(Some(self.name_of(&ds).await?)),
            None => Ok(None),
        }
    }

    async fn dvs_port(&self, portgroup: &RemoteObjectRef) -> Result<DvsPort, VmcliError> {
        let config = self.property(&portgroup.moref, "config").await?;
        let missing = |what: &str| VmcliError::Protocol {
            method: "config".into(),
            message: format!("port group {} has no {what}", portgroup.name),
        };
        let portgroup_key = config
            .get("key")
            .map(wire::unbox)
            .and_then(Value::as_str)
            .ok_or_else(|| missing("key"))?
            .to_string();
        let switch = config
            .get("distributedVirtualSwitch")
            .and_then(wire::parse_moref)
            .ok_or_else(|| missing("switch"))?;

        let uuid = self.property(&switch, "uuid").await?;
        Ok(DvsPort {
            portgroup_key,
            switch_uuid: wire::unbox(&uuid).as_str().unwrap_or_default().to_string(),
        })
    }

    async fn summary(&self, object: &RemoteObjectRef) -> Result<Option<Value>, VmcliError> {
        let summary = self.property(&object.moref, "summary").await?;
        Ok((!summary.is_null()).then_some(summary))
    }
}
