use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use crate::backend::ObjectKind;

/// Command families with their own exit code, so scripts can tell a failed
/// clone from a failed disk attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    List,
    Clone,
    Create,
    CreateEmpty,
    Attach,
    Modify,
    Exec,
    Power,
    Snapshot,
    Tag,
}

impl Family {
    pub fn exit_code(self) -> i32 {
        match self {
            Family::Clone => 2,
            Family::Modify => 3,
            Family::Exec => 4,
            Family::Attach => 5,
            Family::List
            | Family::Create
            | Family::CreateEmpty
            | Family::Power
            | Family::Snapshot
            | Family::Tag => 1,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::List => "list",
            Family::Clone => "clone",
            Family::Create => "create",
            Family::CreateEmpty => "create-empty",
            Family::Attach => "attach",
            Family::Modify => "modify",
            Family::Exec => "exec",
            Family::Power => "power",
            Family::Snapshot => "snapshot",
            Family::Tag => "tag",
        };
        f.write_str(name)
    }
}

pub const EXIT_GENERAL: i32 = 1;
pub const EXIT_CONNECTION: i32 = 6;

#[derive(Debug, Error, Diagnostic)]
pub enum VmcliError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: ObjectKind, name: String },

    #[error("unable to connect to {host}: {message}")]
    #[diagnostic(help("check --vcenter, credentials and --insecure"))]
    Connection { host: String, message: String },

    #[error("task {task} failed: {message}")]
    Task {
        task: String,
        fault: Option<String>,
        message: String,
    },

    #[error("{method} failed: {message}")]
    Api {
        method: String,
        fault: Option<String>,
        message: String,
    },

    #[error("HTTP request for {context} failed")]
    Http {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {method}: {message}")]
    Protocol { method: String, message: String },

    #[error("timed out after {seconds}s waiting for {pending} task(s)")]
    WaitTimeout { seconds: u64, pending: usize },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("{message}")]
    Guest { message: String },

    #[error("prompt error: {message}")]
    Prompt { message: String },

    #[error("{family} failed")]
    Command {
        family: Family,
        #[source]
        source: Box<VmcliError>,
    },
}

impl VmcliError {
    /// Tag the error with the command family that produced it. An error
    /// that already carries a family keeps it.
    pub fn in_family(self, family: Family) -> Self {
        match self {
            VmcliError::Command { .. } => self,
            other => VmcliError::Command {
                family,
                source: Box::new(other),
            },
        }
    }

    /// Server fault type name (e.g. `FileNotFound`), when the error came
    /// from the remote API.
    pub fn fault(&self) -> Option<&str> {
        match self {
            VmcliError::Api { fault, .. } | VmcliError::Task { fault, .. } => fault.as_deref(),
            VmcliError::Command { source, .. } => source.fault(),
            _ => None,
        }
    }

    /// Connection failures keep their own code under any family tag.
    pub fn exit_code(&self) -> i32 {
        match self {
            VmcliError::Command { source, .. } if source.exit_code() == EXIT_CONNECTION => {
                EXIT_CONNECTION
            }
            VmcliError::Command { family, .. } => family.exit_code(),
            VmcliError::Connection { .. } => EXIT_CONNECTION,
            _ => EXIT_GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_codes_are_stable() {
        assert_eq!(Family::Clone.exit_code(), 2);
        assert_eq!(Family::Modify.exit_code(), 3);
        assert_eq!(Family::Exec.exit_code(), 4);
        assert_eq!(Family::Attach.exit_code(), 5);
        assert_eq!(Family::Power.exit_code(), 1);
    }

    #[test]
    fn innermost_family_wins() {
        let err = VmcliError::Validation {
            message: "bad".into(),
        }
        .in_family(Family::Attach)
        .in_family(Family::Create);
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn connection_errors_use_their_own_code() {
        let err = VmcliError::Connection {
            host: "vc".into(),
            message: "refused".into(),
        };
        assert_eq!(err.exit_code(), EXIT_CONNECTION);
    }

    #[test]
    fn connection_code_survives_family_wrapper() {
        let err = VmcliError::Connection {
            host: "vc".into(),
            message: "tagging endpoint refused".into(),
        };
        assert_eq!(err.in_family(Family::Tag).exit_code(), EXIT_CONNECTION);

        let err = VmcliError::Connection {
            host: "vc".into(),
            message: "refused".into(),
        };
        let nested = err.in_family(Family::Attach).in_family(Family::Create);
        assert_eq!(nested.exit_code(), EXIT_CONNECTION);
    }

    #[test]
    fn fault_is_visible_through_family_wrapper() {
        let err = VmcliError::Api {
            method: "StartProgramInGuest".into(),
            fault: Some("FileNotFound".into()),
            message: "not found".into(),
        }
        .in_family(Family::Exec);
        assert_eq!(err.fault(), Some("FileNotFound"));
    }
}
