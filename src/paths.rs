use std::path::{Path, PathBuf};

/// Config file name looked up in the working directory first.
pub const CONFIG_FILE_NAME: &str = "vmcli.toml";

/// User config directory: `~/.config/vmcli/`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("vmcli")
}

/// `./vmcli.toml` when it exists, else `~/.config/vmcli/vmcli.toml`.
pub fn default_config_file(cwd: &Path) -> PathBuf {
    let local = cwd.join(CONFIG_FILE_NAME);
    if local.exists() {
        local
    } else {
        config_dir().join(CONFIG_FILE_NAME)
    }
}

/// Flavor presets: `~/.config/vmcli/flavors/`
pub fn flavors_dir() -> PathBuf {
    config_dir().join("flavors")
}

/// Path to a flavor file inside `dir`.
pub fn flavor_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.toml"))
}
