//! Builders for `VirtualDeviceConfigSpec` entries.
//!
//! These take the VM's current device list and return the JSON the
//! reconfigure call expects. New devices get negative temporary keys;
//! the server assigns the real ones.

use serde_json::{Value, json};

use crate::backend::{DvsPort, RemoteObjectRef, VirtualDevice, wire};
use crate::error::VmcliError;

/// SCSI unit reserved for the controller itself.
pub const SCSI_CONTROLLER_UNIT: i32 = 7;
/// Units per SCSI bus.
pub const SCSI_MAX_UNITS: i32 = 16;

/// Key of the PCI controller new SCSI controllers hang off.
const PCI_CONTROLLER_KEY: i32 = 100;
const NEW_CONTROLLER_KEY: i32 = -100;
const NEW_DISK_KEY: i32 = -101;
const NEW_NIC_KEY: i32 = -200;
const FIRST_FLOPPY_KEY: i32 = 8000;
const FIRST_CDROM_KEY: i32 = 3000;

const SCSI_CONTROLLERS: &[&str] = &[
    "ParaVirtualSCSIController",
    "VirtualLsiLogicController",
    "VirtualLsiLogicSASController",
    "VirtualBusLogicController",
];

const ETHERNET_CARDS: &[&str] = &[
    "VirtualVmxnet3",
    "VirtualVmxnet3Vrdma",
    "VirtualVmxnet2",
    "VirtualVmxnet",
    "VirtualE1000",
    "VirtualE1000e",
    "VirtualPCNet32",
    "VirtualSriovEthernetCard",
];

pub fn is_scsi_controller(device: &VirtualDevice) -> bool {
    SCSI_CONTROLLERS.contains(&device.type_name.as_str())
}

pub fn is_ethernet_card(device: &VirtualDevice) -> bool {
    ETHERNET_CARDS.contains(&device.type_name.as_str())
}

/// Wrap device changes into a `VirtualMachineConfigSpec`.
pub fn config_spec(changes: Vec<Value>) -> Value {
    json!({
        "_typeName": "VirtualMachineConfigSpec",
        "deviceChange": changes,
    })
}

fn change(operation: &str, device: Value) -> Value {
    json!({
        "_typeName": "VirtualDeviceConfigSpec",
        "operation": operation,
        "device": device,
    })
}

fn connectable(connected: bool) -> Value {
    json!({
        "_typeName": "VirtualDeviceConnectInfo",
        "connected": connected,
        "startConnected": true,
        "allowGuestControl": true,
    })
}

/// Next free unit on a SCSI bus, skipping the controller's own unit.
pub fn next_scsi_unit(used: impl IntoIterator<Item = i32>) -> Result<i32, VmcliError> {
    let mut unit = used.into_iter().max().map_or(0, |max| max + 1);
    if unit == SCSI_CONTROLLER_UNIT {
        unit += 1;
    }
    if unit >= SCSI_MAX_UNITS {
        return Err(VmcliError::Validation {
            message: format!("no free unit left on the SCSI controller (max {SCSI_MAX_UNITS})"),
        });
    }
    Ok(unit)
}

/// Changes adding a thin-provisioned disk of `size_gb`. Adds a
/// paravirtual controller first when the VM has no SCSI controller.
pub fn disk_changes(devices: &[VirtualDevice], size_gb: u32) -> Result<Vec<Value>, VmcliError> {
    let mut changes = Vec::new();

    let (controller_key, unit) = match devices.iter().find(|d| is_scsi_controller(d)) {
        Some(controller) => {
            let used = devices
                .iter()
                .filter(|d| d.type_name == "VirtualDisk" && d.controller_key == Some(controller.key))
                .filter_map(|d| d.unit_number);
            (controller.key, next_scsi_unit(used)?)
        }
        None => {
            changes.push(change(
                "add",
                json!({
                    "_typeName": "ParaVirtualSCSIController",
                    "key": NEW_CONTROLLER_KEY,
                    "controllerKey": PCI_CONTROLLER_KEY,
                    "busNumber": 0,
                    "sharedBus": "noSharing",
                    "hotAddRemove": true,
                    "scsiCtlrUnitNumber": SCSI_CONTROLLER_UNIT,
                }),
            ));
            (NEW_CONTROLLER_KEY, 0)
        }
    };

    let kb = u64::from(size_gb) * 1024 * 1024;
    let mut disk = change(
        "add",
        json!({
            "_typeName": "VirtualDisk",
            "key": NEW_DISK_KEY,
            "controllerKey": controller_key,
            "unitNumber": unit,
            "capacityInKB": kb,
            "capacityInBytes": kb * 1024,
            "backing": {
                "_typeName": "VirtualDiskFlatVer2BackingInfo",
                "fileName": "",
                "diskMode": "persistent",
                "thinProvisioned": true,
            },
        }),
    );
    disk["fileOperation"] = json!("create");
    changes.push(disk);
    Ok(changes)
}

/// NIC backing for a network. DVS port groups need the port group key
/// and the switch uuid; standard networks go by name.
pub fn nic_backing(network: &RemoteObjectRef, port: Option<&DvsPort>) -> Value {
    match port {
        Some(port) => json!({
            "_typeName": "VirtualEthernetCardDistributedVirtualPortBackingInfo",
            "port": {
                "_typeName": "DistributedVirtualSwitchPortConnection",
                "portgroupKey": port.portgroup_key,
                "switchUuid": port.switch_uuid,
            },
        }),
        None => json!({
            "_typeName": "VirtualEthernetCardNetworkBackingInfo",
            "deviceName": network.name,
            "useAutoDetect": false,
            "network": wire::moref_json(&network.moref),
        }),
    }
}

/// Add a vmxnet3 adapter.
pub fn add_nic(backing: Value) -> Value {
    change(
        "add",
        json!({
            "_typeName": "VirtualVmxnet3",
            "key": NEW_NIC_KEY,
            "backing": backing,
            "connectable": connectable(false),
        }),
    )
}

/// Point the `dev`-th ethernet card (counting from 1) at a new backing.
pub fn edit_nic(devices: &[VirtualDevice], dev: usize, backing: Value) -> Result<Value, VmcliError> {
    let card = dev
        .checked_sub(1)
        .and_then(|i| devices.iter().filter(|d| is_ethernet_card(d)).nth(i))
        .ok_or_else(|| VmcliError::Validation {
            message: format!("network adapter {dev} not found"),
        })?;

    let mut device = card.raw.clone();
    device["backing"] = backing;
    device["connectable"] = connectable(true);
    Ok(change("edit", device))
}

fn last_of<'d>(devices: &'d [VirtualDevice], type_name: &str) -> Option<&'d VirtualDevice> {
    devices.iter().filter(|d| d.type_name == type_name).last()
}

/// Add a floppy drive on the Super I/O controller.
pub fn add_floppy(devices: &[VirtualDevice]) -> Result<Value, VmcliError> {
    let controller = last_of(devices, "VirtualSIOController").ok_or_else(|| VmcliError::Validation {
        message: "VM has no Super I/O controller for a floppy drive".into(),
    })?;
    let key = last_of(devices, "VirtualFloppy").map_or(FIRST_FLOPPY_KEY, |f| f.key + 1);

    Ok(change(
        "add",
        json!({
            "_typeName": "VirtualFloppy",
            "key": key,
            "controllerKey": controller.key,
            "backing": {
                "_typeName": "VirtualFloppyRemoteDeviceBackingInfo",
                "deviceName": "",
                "useAutoDetect": false,
            },
            "connectable": {
                "_typeName": "VirtualDeviceConnectInfo",
                "connected": false,
                "startConnected": false,
                "allowGuestControl": true,
                "status": "untried",
            },
        }),
    ))
}

/// Add a passthrough CD-ROM drive on the last IDE controller.
pub fn add_cdrom(devices: &[VirtualDevice]) -> Result<Value, VmcliError> {
    let controller = last_of(devices, "VirtualIDEController").ok_or_else(|| VmcliError::Validation {
        message: "VM has no IDE controller for a CD-ROM drive".into(),
    })?;
    let key = last_of(devices, "VirtualCdrom").map_or(FIRST_CDROM_KEY, |c| c.key + 1);

    Ok(change(
        "add",
        json!({
            "_typeName": "VirtualCdrom",
            "key": key,
            "controllerKey": controller.key,
            "backing": {
                "_typeName": "VirtualCdromRemotePassthroughBackingInfo",
                "deviceName": "",
                "useAutoDetect": false,
                "exclusive": false,
            },
            "connectable": {
                "_typeName": "VirtualDeviceConnectInfo",
                "connected": false,
                "startConnected": false,
                "allowGuestControl": true,
            },
        }),
    ))
}
