//! USB Gadget Function definitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::hid::HidFunction;
use super::msd::MassStorageFunction;
use super::step::Steps;
use crate::error::{GadgetError, Result};

/// Function metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionMeta {
    /// Directory name (e.g., "hid.usb0")
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Whether the function is linked into its config
    pub enabled: bool,
}

/// USB Gadget Function trait
///
/// Implementations compile their own attribute writes relative to the
/// function directory; they never touch the filesystem themselves.
pub trait GadgetFunction {
    /// Kernel function driver name (e.g., "hid", "mass_storage")
    fn type_tag(&self) -> &'static str;

    /// Steps populating the function directory, relative to it
    fn create_steps(&self) -> Steps;

    /// Whether the function should be linked into its config
    fn is_enabled(&self) -> bool;

    fn description(&self) -> String;

    /// Directory name under `functions/` for an instance
    fn dir_name(&self, instance: &str) -> String {
        format!("{}.{}", self.type_tag(), instance)
    }

    fn meta(&self, instance: &str) -> FunctionMeta {
        FunctionMeta {
            name: self.dir_name(instance),
            description: self.description(),
            enabled: self.is_enabled(),
        }
    }
}

/// Known function types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Hid,
    MassStorage,
}

impl FunctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Hid => "hid",
            FunctionKind::MassStorage => "mass_storage",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunctionKind {
    type Err = GadgetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hid" => Ok(FunctionKind::Hid),
            "mass_storage" | "msd" => Ok(FunctionKind::MassStorage),
            other => Err(GadgetError::InvalidInput(format!(
                "unsupported function type: {}",
                other
            ))),
        }
    }
}

/// A gadget function of any supported type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Function {
    Hid(HidFunction),
    MassStorage(MassStorageFunction),
}

impl Function {
    /// Default instance of a function type
    pub fn from_kind(kind: FunctionKind) -> Self {
        match kind {
            FunctionKind::Hid => Function::Hid(HidFunction::default()),
            FunctionKind::MassStorage => Function::MassStorage(MassStorageFunction::default()),
        }
    }

    pub fn kind(&self) -> FunctionKind {
        match self {
            Function::Hid(_) => FunctionKind::Hid,
            Function::MassStorage(_) => FunctionKind::MassStorage,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match self {
            Function::Hid(f) => f.enabled = enabled,
            Function::MassStorage(f) => f.enabled = enabled,
        }
    }

    fn inner(&self) -> &dyn GadgetFunction {
        match self {
            Function::Hid(f) => f,
            Function::MassStorage(f) => f,
        }
    }
}

impl GadgetFunction for Function {
    fn type_tag(&self) -> &'static str {
        self.inner().type_tag()
    }

    fn create_steps(&self) -> Steps {
        self.inner().create_steps()
    }

    fn is_enabled(&self) -> bool {
        self.inner().is_enabled()
    }

    fn description(&self) -> String {
        self.inner().description()
    }
}

impl From<HidFunction> for Function {
    fn from(f: HidFunction) -> Self {
        Function::Hid(f)
    }
}

impl From<MassStorageFunction> for Function {
    fn from(f: MassStorageFunction) -> Self {
        Function::MassStorage(f)
    }
}

/// Check that a name can be used as a single configfs path component
pub fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(GadgetError::InvalidInput(format!(
            "invalid {} name: {:?}",
            what, name
        )));
    }
    Ok(())
}
