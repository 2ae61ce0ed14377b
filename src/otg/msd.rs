//! MSD (Mass Storage Device) Function implementation for USB Gadget

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::function::GadgetFunction;
use super::step::{Step, Steps};

/// LUN created by the kernel together with the function directory
pub const DEFAULT_LUN: &str = "0";

fn bool_attr(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// MSD LUN configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MsdLunConfig {
    /// File/image path to expose
    pub file: PathBuf,
    /// Removable media
    pub removable: bool,
    /// Mount as CD-ROM
    pub cdrom: bool,
    /// Read-only mode
    pub ro: bool,
    /// Disable Force Unit Access
    pub nofua: bool,
    /// SCSI inquiry string, passed through untouched
    pub inquiry_string: String,
}

impl Default for MsdLunConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::new(),
            removable: true,
            cdrom: false,
            ro: false,
            nofua: true,
            inquiry_string: String::new(),
        }
    }
}

impl MsdLunConfig {
    /// Create CD-ROM configuration
    pub fn cdrom(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            cdrom: true,
            ro: true,
            ..Self::default()
        }
    }

    /// Create disk configuration
    pub fn disk(file: impl Into<PathBuf>, read_only: bool) -> Self {
        Self {
            file: file.into(),
            ro: read_only,
            ..Self::default()
        }
    }

    fn create_steps(&self) -> Steps {
        let mut steps = Steps::new();
        // `file` opens the backing store, after which ro and cdrom are locked
        steps
            .append(Step::write("removable", bool_attr(self.removable)))
            .append(Step::write("cdrom", bool_attr(self.cdrom)))
            .append(Step::write("ro", bool_attr(self.ro)))
            .append(Step::write("nofua", bool_attr(self.nofua)))
            .append(Step::write("inquiry_string", self.inquiry_string.as_str()))
            .append(Step::write("file", self.file.to_string_lossy().into_owned()));
        steps
    }
}

/// LUN attribute set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LunAttributes {
    Fixed(MsdLunConfig),
    Generic(BTreeMap<String, String>),
}

/// Logical unit of a mass storage function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsdLun {
    /// Suffix of the `lun.<name>` directory
    pub name: String,
    pub attrs: LunAttributes,
}

impl MsdLun {
    pub fn new(name: impl Into<String>, config: MsdLunConfig) -> Self {
        Self {
            name: name.into(),
            attrs: LunAttributes::Fixed(config),
        }
    }

    pub fn generic(name: impl Into<String>, attrs: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            attrs: LunAttributes::Generic(attrs),
        }
    }

    pub fn dir_name(&self) -> String {
        format!("lun.{}", self.name)
    }

    /// Steps creating this LUN, relative to its own directory
    fn create_steps(&self) -> Steps {
        let mut steps = Steps::new();
        if self.name != DEFAULT_LUN {
            steps.append(Step::mkdir_create_only(""));
        }
        match &self.attrs {
            LunAttributes::Fixed(config) => {
                steps.extend(config.create_steps());
            }
            LunAttributes::Generic(attrs) => {
                for (key, value) in attrs {
                    steps.append(Step::write(key.as_str(), value.as_str()));
                }
            }
        }
        steps
    }
}

/// MSD Function for USB Gadget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MassStorageFunction {
    pub stall: bool,
    pub luns: Vec<MsdLun>,
    pub enabled: bool,
}

impl Default for MassStorageFunction {
    fn default() -> Self {
        Self {
            stall: false,
            luns: vec![MsdLun::new(DEFAULT_LUN, MsdLunConfig::default())],
            enabled: true,
        }
    }
}

impl MassStorageFunction {
    pub fn new(stall: bool, luns: Vec<MsdLun>) -> Self {
        Self {
            stall,
            luns,
            enabled: true,
        }
    }
}

impl GadgetFunction for MassStorageFunction {
    fn type_tag(&self) -> &'static str {
        "mass_storage"
    }

    fn create_steps(&self) -> Steps {
        let mut steps = Steps::new();
        steps.append(Step::write("stall", bool_attr(self.stall)));
        for lun in &self.luns {
            steps.extend(lun.create_steps().prepend_path(lun.dir_name()));
        }
        steps
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn description(&self) -> String {
        match self.luns.len() {
            1 => "Mass Storage Drive".to_string(),
            n => format!("Mass Storage ({} LUNs)", n),
        }
    }
}
