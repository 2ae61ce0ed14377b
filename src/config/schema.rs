use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::otg::configfs::{CONFIGFS_PATH, LANG_ENGLISH, UDC_CLASS_PATH};
use crate::otg::gadget::Gadget;

/// Environment a gadget is compiled against
///
/// Nothing here is global: tests and tools can point several gadgets at
/// different roots at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GadgetEnv {
    /// Directory holding gadget directories (configfs `usb_gadget`)
    pub configfs_root: PathBuf,
    /// Directory listing available UDCs
    pub udc_class_path: PathBuf,
    /// String table locale; only English (0x409) is used in practice
    pub locale: String,
}

impl Default for GadgetEnv {
    fn default() -> Self {
        Self {
            configfs_root: PathBuf::from(CONFIGFS_PATH),
            udc_class_path: PathBuf::from(UDC_CLASS_PATH),
            locale: LANG_ENGLISH.to_string(),
        }
    }
}

impl GadgetEnv {
    /// Default environment with a different configfs root
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            configfs_root: root.into(),
            ..Self::default()
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Paths and locale
    pub env: GadgetEnv,
    /// Gadget model to materialize
    pub gadget: Gadget,
}
