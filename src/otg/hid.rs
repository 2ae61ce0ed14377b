//! HID Function implementation for USB Gadget

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::function::GadgetFunction;
use super::report_desc::{KEYBOARD, MOUSE_ABSOLUTE, MOUSE_RELATIVE};
use super::step::{Step, Steps};

/// HID preset type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidFunctionType {
    Keyboard,
    /// Relative mouse (traditional mouse movement)
    MouseRelative,
    /// Absolute mouse (touchscreen-like positioning)
    MouseAbsolute,
}

impl HidFunctionType {
    /// Get HID protocol
    pub fn protocol(&self) -> u8 {
        match self {
            HidFunctionType::Keyboard => 1,
            HidFunctionType::MouseRelative | HidFunctionType::MouseAbsolute => 2,
        }
    }

    /// Get HID subclass (1 = boot interface)
    pub fn subclass(&self) -> u8 {
        match self {
            HidFunctionType::Keyboard | HidFunctionType::MouseRelative => 1,
            HidFunctionType::MouseAbsolute => 0,
        }
    }

    /// Get report length in bytes
    pub fn report_length(&self) -> u16 {
        match self {
            HidFunctionType::Keyboard => 8,
            HidFunctionType::MouseRelative => 4,
            HidFunctionType::MouseAbsolute => 6,
        }
    }

    pub fn report_desc(&self) -> &'static [u8] {
        match self {
            HidFunctionType::Keyboard => KEYBOARD,
            HidFunctionType::MouseRelative => MOUSE_RELATIVE,
            HidFunctionType::MouseAbsolute => MOUSE_ABSOLUTE,
        }
    }
}

/// HID attribute set
///
/// Generic attributes are written in key order; anything order-sensitive
/// belongs in `Fixed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HidAttributes {
    Fixed {
        protocol: u8,
        subclass: u8,
        report_length: u16,
    },
    Generic(BTreeMap<String, String>),
}

impl Default for HidAttributes {
    fn default() -> Self {
        HidAttributes::Generic(BTreeMap::new())
    }
}

/// HID Function for USB Gadget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HidFunction {
    pub attrs: HidAttributes,
    /// Raw report descriptor, written verbatim to `report_desc`
    pub report_desc: Vec<u8>,
    pub enabled: bool,
}

impl Default for HidFunction {
    fn default() -> Self {
        Self {
            attrs: HidAttributes::default(),
            report_desc: Vec::new(),
            enabled: true,
        }
    }
}

impl HidFunction {
    pub fn new(attrs: HidAttributes, report_desc: impl Into<Vec<u8>>) -> Self {
        Self {
            attrs,
            report_desc: report_desc.into(),
            enabled: true,
        }
    }

    /// Function for a built-in preset
    pub fn preset(func_type: HidFunctionType) -> Self {
        Self::new(
            HidAttributes::Fixed {
                protocol: func_type.protocol(),
                subclass: func_type.subclass(),
                report_length: func_type.report_length(),
            },
            func_type.report_desc(),
        )
    }

    pub fn keyboard() -> Self {
        Self::preset(HidFunctionType::Keyboard)
    }

    pub fn mouse_relative() -> Self {
        Self::preset(HidFunctionType::MouseRelative)
    }

    pub fn mouse_absolute() -> Self {
        Self::preset(HidFunctionType::MouseAbsolute)
    }
}

impl GadgetFunction for HidFunction {
    fn type_tag(&self) -> &'static str {
        "hid"
    }

    fn create_steps(&self) -> Steps {
        let mut steps = Steps::new();
        match &self.attrs {
            HidAttributes::Fixed {
                protocol,
                subclass,
                report_length,
            } => {
                steps
                    .append(Step::write("protocol", protocol.to_string()))
                    .append(Step::write("subclass", subclass.to_string()))
                    .append(Step::write("report_length", report_length.to_string()));
            }
            HidAttributes::Generic(attrs) => {
                for (key, value) in attrs {
                    steps.append(Step::write(key.as_str(), value.as_str()));
                }
            }
        }
        steps.append(Step::write_binary("report_desc", self.report_desc.clone()));
        steps
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn description(&self) -> String {
        match &self.attrs {
            HidAttributes::Fixed { protocol: 1, .. } => "HID Keyboard".to_string(),
            HidAttributes::Fixed { protocol: 2, .. } => "HID Mouse".to_string(),
            _ => "HID".to_string(),
        }
    }
}
