use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::backend::ObjectKind;
use crate::config::Deploy;
use crate::logging::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "vmcli",
    version,
    about = "Command line utility to interact with the VMware vSphere API"
)]
pub struct Cli {
    /// Path to config file (default: ./vmcli.toml, then the user config dir)
    #[arg(short, long, global = true, env = "VMCLI_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Set log level
    #[arg(long, global = true, value_enum, ignore_case = true)]
    pub log_level: Option<LogLevel>,

    /// Quiet mode, no messages are shown
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Login name to use for vCenter
    #[arg(short, long, global = true)]
    pub username: Option<String>,

    /// Password for the login
    #[arg(short, long, global = true)]
    pub password: Option<String>,

    /// vCenter to connect to
    #[arg(short = 's', long, global = true)]
    pub vcenter: Option<String>,

    /// Skip TLS certificate verification
    #[arg(short, long, global = true)]
    pub insecure: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Display objects of a kind, or details of one object
    List {
        /// Kind of objects to list
        #[arg(value_enum)]
        kind: ObjectKind,

        /// Show the summary of this object instead
        #[arg(long)]
        name: Option<String>,
    },

    /// Clone a VM from a template
    Clone(CloneArgs),

    /// Clone, configure and boot a new VM
    Create(CreateArgs),

    /// Create an empty VM without disks, controllers or network adapters
    CreateEmpty(CreateEmptyArgs),

    /// Attach a new device to a VM
    Attach {
        #[arg(value_enum)]
        device: DeviceKind,

        /// VM to attach the device to
        #[arg(long)]
        name: String,

        /// Disk size in gigabytes
        #[arg(long)]
        size: Option<u32>,

        /// Network for the new adapter
        #[arg(long)]
        net: Option<String>,
    },

    /// Change hardware of a VM
    Modify(ModifyArgs),

    /// Run commands inside a VM through VMware tools
    Exec {
        #[arg(long)]
        name: String,

        /// Commands separated by ';', e.g. "/bin/touch /tmp/a; /sbin/reboot"
        #[arg(long)]
        cmd: String,

        #[arg(long, visible_alias = "gu")]
        guest_user: Option<String>,

        #[arg(long, visible_alias = "gp")]
        guest_pass: Option<String>,

        /// Wait for VMware tools before running
        #[arg(long)]
        wait_for_tools: bool,
    },

    /// Power actions on a VM
    #[command(group(ArgGroup::new("action").required(true)))]
    Power {
        #[arg(long)]
        name: String,

        #[arg(long, group = "action")]
        on: bool,

        #[arg(long, group = "action")]
        off: bool,

        /// Ask the guest OS to reboot
        #[arg(long, group = "action")]
        reboot: bool,

        /// Hard reset
        #[arg(long, group = "action")]
        reset: bool,

        /// Print the power state
        #[arg(long, group = "action")]
        show: bool,
    },

    /// Manage VM snapshots
    Snapshot {
        #[arg(value_enum)]
        action: SnapshotAction,

        #[arg(long)]
        name: String,

        /// Snapshot name
        #[arg(long)]
        snapshot: Option<String>,

        /// Snapshot description
        #[arg(long)]
        desc: Option<String>,

        /// Include VM memory in the snapshot
        #[arg(long)]
        memory: bool,

        /// Do not quiesce the guest file system
        #[arg(long)]
        no_quiesce: bool,
    },

    /// List tags or attach them to a VM
    Tag {
        /// VM to attach tags to
        #[arg(long)]
        name: Option<String>,

        /// Comma separated tag names, e.g. tag1,tag2
        #[arg(long)]
        tags: Option<String>,
    },
}

impl Command {
    /// Registry key of the handler for this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::List { .. } => "list",
            Command::Clone(_) => "clone",
            Command::Create(_) => "create",
            Command::CreateEmpty(_) => "create-empty",
            Command::Attach { .. } => "attach",
            Command::Modify(_) => "modify",
            Command::Exec { .. } => "exec",
            Command::Power { .. } => "power",
            Command::Snapshot { .. } => "snapshot",
            Command::Tag { .. } => "tag",
        }
    }

    /// Flavor requested on the command line, if the command takes one.
    pub fn flavor(&self) -> Option<&str> {
        match self {
            Command::Clone(args) => args.placement.flavor.as_deref(),
            Command::Create(args) => args.placement.flavor.as_deref(),
            Command::CreateEmpty(args) => args.flavor.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceKind {
    Hdd,
    Network,
    Floppy,
    Cdrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SnapshotAction {
    List,
    Create,
    Delete,
    Revert,
}

/// Where a cloned VM lands. Shared by `clone` and `create`.
#[derive(Args, Debug, Clone, Default)]
pub struct Placement {
    /// Template to clone from
    #[arg(long, visible_alias = "tem")]
    pub template: Option<String>,

    /// Flavor file from the flavors directory
    #[arg(long)]
    pub flavor: Option<String>,

    #[arg(long, visible_alias = "dc")]
    pub datacenter: Option<String>,

    #[arg(long)]
    pub folder: Option<String>,

    #[arg(long, visible_alias = "ds")]
    pub datastore: Option<String>,

    #[arg(long, visible_alias = "cl")]
    pub cluster: Option<String>,

    #[arg(long, visible_alias = "rpool")]
    pub resource_pool: Option<String>,

    /// Memory, e.g. 2G or 2048 (megabytes)
    #[arg(long)]
    pub mem: Option<String>,

    #[arg(long)]
    pub cpu: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct CloneArgs {
    /// Name for the new VM
    #[arg(long)]
    pub name: String,

    #[command(flatten)]
    pub placement: Placement,

    /// Power on after cloning
    #[arg(long)]
    pub poweron: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Name for the new VM
    #[arg(long)]
    pub name: String,

    #[command(flatten)]
    pub placement: Placement,

    /// Size of an additional disk in gigabytes
    #[arg(long)]
    pub hdd: Option<u32>,

    /// Network for the first adapter
    #[arg(long)]
    pub net: Option<String>,

    /// Address for the first interface, e.g. 10.1.10.2/24
    #[arg(long)]
    pub net_cfg: Option<String>,

    #[arg(long, visible_alias = "gu")]
    pub guest_user: Option<String>,

    #[arg(long, visible_alias = "gp")]
    pub guest_pass: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CreateEmptyArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub flavor: Option<String>,

    #[arg(long)]
    pub folder: Option<String>,

    #[arg(long, visible_alias = "rpool")]
    pub resource_pool: Option<String>,

    #[arg(long, visible_alias = "ds")]
    pub datastore: Option<String>,

    /// Memory, e.g. 512M (default: 256 MB)
    #[arg(long)]
    pub mem: Option<String>,

    /// CPU count (default: 1)
    #[arg(long)]
    pub cpu: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct ModifyArgs {
    #[arg(long)]
    pub name: String,

    /// Memory, e.g. 4G
    #[arg(long)]
    pub mem: Option<String>,

    #[arg(long)]
    pub cpu: Option<u32>,

    /// Network to switch an adapter to
    #[arg(long)]
    pub net: Option<String>,

    /// Adapter number for --net, counting from 1
    #[arg(long, default_value_t = 1)]
    pub dev: usize,

    /// Hardware version number, or "latest"
    #[arg(long = "vHWversion", value_name = "VERSION")]
    pub hw_version: Option<String>,
}

impl Placement {
    fn deploy(&self) -> Deploy {
        Deploy {
            template: self.template.clone(),
            datacenter: self.datacenter.clone(),
            folder: self.folder.clone(),
            datastore: self.datastore.clone(),
            cluster: self.cluster.clone(),
            resource_pool: self.resource_pool.clone(),
            mem: self.mem.clone(),
            cpu: self.cpu,
            ..Deploy::default()
        }
    }
}

impl CloneArgs {
    /// The command-line layer of the deploy parameters.
    pub fn deploy(&self) -> Deploy {
        Deploy {
            poweron: self.poweron.then_some(true),
            ..self.placement.deploy()
        }
    }
}

impl CreateArgs {
    pub fn deploy(&self) -> Deploy {
        Deploy {
            hdd: self.hdd,
            net: self.net.clone(),
            net_cfg: self.net_cfg.clone(),
            ..self.placement.deploy()
        }
    }
}

impl CreateEmptyArgs {
    pub fn deploy(&self) -> Deploy {
        Deploy {
            folder: self.folder.clone(),
            resource_pool: self.resource_pool.clone(),
            datastore: self.datastore.clone(),
            mem: self.mem.clone(),
            cpu: self.cpu,
            ..Deploy::default()
        }
    }
}
