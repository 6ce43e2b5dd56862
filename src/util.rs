use crate::error::VmcliError;

pub const MIN_MEM_MB: u64 = 256;
pub const MAX_MEM_MB: u64 = 66000;
pub const MIN_CPU: u32 = 1;
pub const MAX_CPU: u32 = 16;
pub const MIN_HDD_GB: u32 = 1;
pub const MAX_HDD_GB: u32 = 2000;

/// Parse a memory size into megabytes.
///
/// Accepts `"2G"`, `"512M"`, `"1T"`, `"524288K"` and bare numbers, which
/// are already megabytes. Binary units (1G = 1024M).
pub fn convert_to_mb(s: &str) -> Result<u64, VmcliError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(VmcliError::Validation {
            message: "memory size cannot be empty".into(),
        });
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (&s[..i], s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str.trim().parse().map_err(|_| VmcliError::Validation {
        message: format!("invalid memory size: '{s}'"),
    })?;

    let mb = match suffix.as_str() {
        "" | "M" | "MB" => Some(num),
        "K" | "KB" => Some(num / 1024),
        "G" | "GB" => num.checked_mul(1024),
        "T" | "TB" => num.checked_mul(1024 * 1024),
        _ => {
            return Err(VmcliError::Validation {
                message: format!("unknown memory suffix: '{suffix}' (use T, G, M or K)"),
            });
        }
    };

    mb.ok_or_else(|| VmcliError::Validation {
        message: format!("memory size overflows: '{s}'"),
    })
}

/// Convert to megabytes and check the supported range.
pub fn normalize_memory(s: &str) -> Result<u64, VmcliError> {
    let mb = convert_to_mb(s)?;
    if !(MIN_MEM_MB..=MAX_MEM_MB).contains(&mb) {
        return Err(VmcliError::Validation {
            message: format!("memory must be between {MIN_MEM_MB}-{MAX_MEM_MB} megabytes (got {mb})"),
        });
    }
    Ok(mb)
}

pub fn check_cpu(cpus: u32) -> Result<u32, VmcliError> {
    if !(MIN_CPU..=MAX_CPU).contains(&cpus) {
        return Err(VmcliError::Validation {
            message: format!("CPU count must be between {MIN_CPU}-{MAX_CPU} (got {cpus})"),
        });
    }
    Ok(cpus)
}

pub fn check_hdd(gb: u32) -> Result<u32, VmcliError> {
    if !(MIN_HDD_GB..=MAX_HDD_GB).contains(&gb) {
        return Err(VmcliError::Validation {
            message: format!("disk size must be between {MIN_HDD_GB}-{MAX_HDD_GB} gigabytes (got {gb})"),
        });
    }
    Ok(gb)
}
