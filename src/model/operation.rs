// src/model/operation.rs

//! Install/uninstall operations produced by the planner

use crate::version::Version;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Install,
    Uninstall,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Install => write!(f, "install"),
            OperationKind::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOperation {
    pub package: String,
    pub version: Version,
    pub kind: OperationKind,
}

impl InstallOperation {
    pub fn install(package: impl Into<String>, version: Version) -> Self {
        Self {
            package: package.into(),
            version,
            kind: OperationKind::Install,
        }
    }

    pub fn uninstall(package: impl Into<String>, version: Version) -> Self {
        Self {
            package: package.into(),
            version,
            kind: OperationKind::Uninstall,
        }
    }

    fn cancels(&self, other: &InstallOperation) -> bool {
        self.package == other.package
            && self.version == other.version
            && self.kind != other.kind
    }
}

impl fmt::Display for InstallOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.package, self.version)
    }
}

/// Remove redundant steps from a plan
///
/// Repeatedly drops exact duplicate adjacent operations and adjacent
/// install/uninstall pairs for the same package version. The relative order
/// of the surviving operations is preserved.
pub fn simplify(ops: &mut Vec<InstallOperation>) {
    loop {
        let mut removed = false;
        let mut i = 0;
        while i + 1 < ops.len() {
            if ops[i] == ops[i + 1] {
                ops.remove(i + 1);
                removed = true;
            } else if ops[i].cancels(&ops[i + 1]) {
                ops.remove(i + 1);
                ops.remove(i);
                removed = true;
            } else {
                i += 1;
            }
        }
        if !removed {
            break;
        }
    }
}
