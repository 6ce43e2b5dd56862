use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use facet::Facet;

use crate::backend::vsphere::{ConnectOptions, DEFAULT_API_RELEASE};
use crate::error::VmcliError;
use crate::logging::LogLevel;
use crate::paths;

pub const DEFAULT_OS_TIMEOUT_S: u64 = 120;
pub const DEFAULT_TOOLS_TIMEOUT_S: u64 = 20;

// ── file format ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct FileConfig {
    #[facet(default)]
    pub logging: LoggingConfig,
    #[facet(default)]
    pub authentication: AuthenticationConfig,
    #[facet(default)]
    pub timeouts: TimeoutsConfig,
    #[facet(default)]
    pub deploy: DeployConfig,
    #[facet(default)]
    pub guest: GuestConfig,
    #[facet(default)]
    pub flavors: FlavorsConfig,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct LoggingConfig {
    pub log_level: Option<String>,
    pub log_path: Option<String>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct AuthenticationConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub vcenter: Option<String>,
    pub insecure: Option<bool>,
    pub api_release: Option<String>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct TimeoutsConfig {
    pub os_timeout: Option<u64>,
    pub tools_timeout: Option<u64>,
    /// Unset means wait for tasks without bound.
    pub task_timeout: Option<u64>,
}

/// Deployment defaults. The same keys make up a flavor file, where
/// `name` is a display name.
#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct DeployConfig {
    pub name: Option<String>,
    pub template: Option<String>,
    pub datacenter: Option<String>,
    pub folder: Option<String>,
    pub datastore: Option<String>,
    pub cluster: Option<String>,
    pub resource_pool: Option<String>,
    /// Megabytes.
    pub mem: Option<u64>,
    pub cpu: Option<u32>,
    /// Gigabytes.
    pub hdd: Option<u32>,
    pub net: Option<String>,
    pub net_cfg: Option<String>,
    pub poweron: Option<bool>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct GuestConfig {
    pub guest_user: Option<String>,
    pub guest_pass: Option<String>,
    /// Run inside every VM deployed by `create`.
    #[facet(default)]
    pub additional_commands: Vec<String>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct FlavorsConfig {
    pub dir: Option<String>,
}

// ── Deploy layering ───────────────────────────────────────

/// One layer of deployment parameters. Layers combine field by field
/// with [`Deploy::or`], the receiver winning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deploy {
    pub template: Option<String>,
    pub datacenter: Option<String>,
    pub folder: Option<String>,
    pub datastore: Option<String>,
    pub cluster: Option<String>,
    pub resource_pool: Option<String>,
    /// Size string, `T/G/M/K` suffix or bare megabytes.
    pub mem: Option<String>,
    pub cpu: Option<u32>,
    pub hdd: Option<u32>,
    pub net: Option<String>,
    pub net_cfg: Option<String>,
    pub poweron: Option<bool>,
}

impl Deploy {
    pub fn or(self, lower: Deploy) -> Deploy {
        Deploy {
            template: self.template.or(lower.template),
            datacenter: self.datacenter.or(lower.datacenter),
            folder: self.folder.or(lower.folder),
            datastore: self.datastore.or(lower.datastore),
            cluster: self.cluster.or(lower.cluster),
            resource_pool: self.resource_pool.or(lower.resource_pool),
            mem: self.mem.or(lower.mem),
            cpu: self.cpu.or(lower.cpu),
            hdd: self.hdd.or(lower.hdd),
            net: self.net.or(lower.net),
            net_cfg: self.net_cfg.or(lower.net_cfg),
            poweron: self.poweron.or(lower.poweron),
        }
    }

    fn from_env(env: &Env<'_>) -> Result<Deploy, VmcliError> {
        Ok(Deploy {
            template: env.string("VMCLI_VM_TEMPLATE"),
            datacenter: env.string("VMCLI_VM_DATACENTER"),
            folder: env.string("VMCLI_VM_FOLDER"),
            datastore: env.string("VMCLI_VM_DATASTORE"),
            cluster: env.string("VMCLI_VM_CLUSTER"),
            resource_pool: env.string("VMCLI_VM_RESOURCE_POOL"),
            mem: env.string("VMCLI_VM_MEM"),
            cpu: env.number("VMCLI_VM_CPU")?,
            hdd: env.number("VMCLI_VM_HDD")?,
            net: env.string("VMCLI_VM_NETWORK"),
            net_cfg: env.string("VMCLI_VM_NETWORK_CFG"),
            poweron: env.boolean("VMCLI_VM_POWERON")?,
        })
    }
}

impl From<DeployConfig> for Deploy {
    fn from(c: DeployConfig) -> Self {
        Deploy {
            template: c.template,
            datacenter: c.datacenter,
            folder: c.folder,
            datastore: c.datastore,
            cluster: c.cluster,
            resource_pool: c.resource_pool,
            mem: c.mem.map(|mb| mb.to_string()),
            cpu: c.cpu,
            hdd: c.hdd,
            net: c.net,
            net_cfg: c.net_cfg,
            poweron: c.poweron,
        }
    }
}

// ── environment ───────────────────────────────────────────

/// Environment lookup; empty values count as unset.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn number<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, VmcliError> {
        self.string(key)
            .map(|v| {
                v.trim().parse().map_err(|_| VmcliError::Configuration {
                    message: format!("{key} must be a number (got '{v}')"),
                })
            })
            .transpose()
    }

    fn boolean(&self, key: &str) -> Result<Option<bool>, VmcliError> {
        self.string(key)
            .map(|v| {
                parse_bool(&v).ok_or_else(|| VmcliError::Configuration {
                    message: format!("{key} must be a boolean (got '{v}')"),
                })
            })
            .transpose()
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Settings ──────────────────────────────────────────────

/// Everything below the command line: env over config file over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// File the settings came from, if any.
    pub config_path: Option<PathBuf>,
    pub log_level: LogLevel,
    pub log_path: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub vcenter: Option<String>,
    pub insecure: bool,
    pub api_release: String,
    pub os_timeout: Duration,
    pub tools_timeout: Duration,
    pub task_timeout: Option<Duration>,
    /// Env layer over file layer.
    pub deploy: Deploy,
    pub flavors_dir: PathBuf,
    pub guest_user: Option<String>,
    pub guest_pass: Option<String>,
    pub additional_commands: Vec<String>,
}

impl Settings {
    /// Load `explicit` (which must exist) or the default config file
    /// (which may not), then apply the environment.
    pub fn load(
        explicit: Option<&Path>,
        cwd: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, VmcliError> {
        let (file, config_path) = match explicit {
            Some(path) => (load_file(path)?, Some(path.to_path_buf())),
            None => {
                let path = paths::default_config_file(cwd);
                if path.exists() {
                    (load_file(&path)?, Some(path))
                } else {
                    (FileConfig::default(), None)
                }
            }
        };
        Self::from_layers(file, config_path, &Env(&env))
    }

    fn from_layers(
        file: FileConfig,
        config_path: Option<PathBuf>,
        env: &Env<'_>,
    ) -> Result<Self, VmcliError> {
        let log_level = match env
            .string("VMCLI_LOG_LEVEL")
            .or(file.logging.log_level.clone())
        {
            Some(name) => LogLevel::parse(&name).ok_or_else(|| VmcliError::Configuration {
                message: format!(
                    "unknown log level '{name}' (use notset, debug, info, warning, error or critical)"
                ),
            })?,
            None => LogLevel::default(),
        };

        let auth = file.authentication;
        let timeouts = file.timeouts;
        let guest = file.guest;

        Ok(Settings {
            config_path,
            log_level,
            log_path: env
                .string("VMCLI_LOG_PATH")
                .or(file.logging.log_path)
                .map(PathBuf::from),
            username: env.string("VMCLI_USERNAME").or(auth.username),
            password: env.string("VMCLI_PASSWORD").or(auth.password),
            vcenter: env.string("VMCLI_VCENTER").or(auth.vcenter),
            insecure: env
                .boolean("VMCLI_INSECURE_CONNECTION")?
                .or(auth.insecure)
                .unwrap_or(false),
            api_release: auth
                .api_release
                .unwrap_or_else(|| DEFAULT_API_RELEASE.to_string()),
            os_timeout: Duration::from_secs(timeouts.os_timeout.unwrap_or(DEFAULT_OS_TIMEOUT_S)),
            tools_timeout: Duration::from_secs(
                timeouts.tools_timeout.unwrap_or(DEFAULT_TOOLS_TIMEOUT_S),
            ),
            task_timeout: timeouts.task_timeout.map(Duration::from_secs),
            deploy: Deploy::from_env(env)?.or(file.deploy.into()),
            flavors_dir: env
                .string("VMCLI_FLAVORS_DIR")
                .or(file.flavors.dir)
                .map(PathBuf::from)
                .unwrap_or_else(paths::flavors_dir),
            guest_user: env.string("VMCLI_GUEST_USER").or(guest.guest_user),
            guest_pass: env.string("VMCLI_GUEST_PASS").or(guest.guest_pass),
            additional_commands: guest.additional_commands,
        })
    }

    /// Final deploy parameters: CLI flags over the flavor over env over file.
    pub fn deploy(&self, cli: Deploy, flavor: Option<&str>) -> Result<Deploy, VmcliError> {
        let flavor = match flavor {
            Some(name) => load_flavor(&self.flavors_dir, name)?,
            None => Deploy::default(),
        };
        Ok(cli.or(flavor).or(self.deploy.clone()))
    }

    /// Credentials from CLI over env/file. `prompt` is asked for the
    /// password only when everything else is known.
    pub fn connect_options(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        vcenter: Option<&str>,
        insecure: bool,
        prompt: impl FnOnce(&str, &str) -> Result<String, VmcliError>,
    ) -> Result<ConnectOptions, VmcliError> {
        let vcenter = vcenter
            .map(str::to_string)
            .or_else(|| self.vcenter.clone())
            .ok_or_else(|| VmcliError::Configuration {
                message: "no vCenter given (use --vcenter, VMCLI_VCENTER or [authentication] vcenter)"
                    .into(),
            })?;
        let username = username
            .map(str::to_string)
            .or_else(|| self.username.clone())
            .ok_or_else(|| VmcliError::Configuration {
                message: "no username given (use --username, VMCLI_USERNAME or [authentication] username)"
                    .into(),
            })?;
        let password = match password.map(str::to_string).or_else(|| self.password.clone()) {
            Some(p) => p,
            None => prompt(&username, &vcenter)?,
        };

        Ok(ConnectOptions {
            host: vcenter,
            username,
            password,
            insecure: insecure || self.insecure,
            api_release: self.api_release.clone(),
        })
    }
}

// ── files ─────────────────────────────────────────────────

fn validate_name(name: &str) -> Result<(), VmcliError> {
    let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if !valid {
        return Err(VmcliError::Configuration {
            message: format!("flavor name must match [a-zA-Z0-9][a-zA-Z0-9._-]* (got '{name}')"),
        });
    }
    Ok(())
}

fn read(path: &Path) -> Result<String, VmcliError> {
    std::fs::read_to_string(path).map_err(|source| VmcliError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })
}

fn parse_error(path: &Path, e: impl std::fmt::Display) -> VmcliError {
    VmcliError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

pub fn load_file(path: &Path) -> Result<FileConfig, VmcliError> {
    let contents = read(path)?;
    let config: FileConfig = facet_toml::from_str(&contents).map_err(|e| parse_error(path, e))?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load `<dir>/<name>.toml`.
pub fn load_flavor(dir: &Path, name: &str) -> Result<Deploy, VmcliError> {
    validate_name(name)?;
    let path = paths::flavor_path(dir, name);
    if !path.exists() {
        return Err(VmcliError::Configuration {
            message: format!("no such flavor '{name}' in {}", dir.display()),
        });
    }
    let contents = read(&path)?;
    let flavor: DeployConfig =
        facet_toml::from_str(&contents).map_err(|e| parse_error(&path, e))?;
    tracing::info!(
        flavor = name,
        display_name = flavor.name.as_deref().unwrap_or(name),
        "using flavor"
    );
    Ok(flavor.into())
}

/// Environment captured from the process, for [`Settings::load`].
pub fn process_env() -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = std::env::vars()
        .filter(|(k, _)| k.starts_with("VMCLI_"))
        .collect();
    move |key| vars.get(key).cloned()
}
