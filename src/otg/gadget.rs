//! Gadget and configuration model, compiled into step sequences
//!
//! Compilation is pure: nothing here touches the filesystem. Each level
//! compiles relative to its own directory and is relocated by its parent,
//! and the whole sequence becomes absolute only at the gadget root.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::function::{validate_name, Function, GadgetFunction};
use super::step::{Step, Steps};
use crate::config::GadgetEnv;
use crate::error::{GadgetError, Result};

/// Default gadget name
pub const DEFAULT_GADGET_NAME: &str = "g1";

/// USB Vendor ID (Linux Foundation) - default value
pub const DEFAULT_USB_VENDOR_ID: u16 = 0x1d6b;

/// USB Product ID (Multifunction Composite Gadget) - default value
pub const DEFAULT_USB_PRODUCT_ID: u16 = 0x0104;

/// USB device version - default value
pub const DEFAULT_USB_BCD_DEVICE: u16 = 0x0100;

/// bcdUSB (USB 2.0)
pub const DEFAULT_USB_BCD_USB: u16 = 0x0200;

fn hex_u16(value: u16) -> String {
    format!("0x{:04x}", value)
}

/// Gadget string descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GadgetStrings {
    pub serial_number: String,
    pub manufacturer: String,
    pub product: String,
}

/// One configuration of a gadget, keyed by name in [`Gadget::configs`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Written to `strings/<locale>/configuration`
    pub description: String,
    /// `MaxPower` in mA; left to the kernel default when unset
    pub max_power: Option<u16>,
    /// Functions keyed by instance name
    pub functions: BTreeMap<String, Function>,
}

impl Config {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_function(
        mut self,
        instance: impl Into<String>,
        function: impl Into<Function>,
    ) -> Self {
        self.functions.insert(instance.into(), function.into());
        self
    }

    /// Steps creating this config, relative to `configs/<name>`
    fn create_steps(&self, name: &str, env: &GadgetEnv) -> Steps {
        let strings = PathBuf::from("strings").join(&env.locale);
        let mut steps = Steps::new();
        steps
            .append(Step::comment(format!("config `{}`", name)))
            .append(Step::mkdir(""))
            .append(Step::mkdir(&strings))
            .append(Step::write(strings.join("configuration"), self.description.as_str()));
        if let Some(power) = self.max_power {
            steps.append(Step::write("MaxPower", power.to_string()));
        }
        steps
    }
}

/// USB Gadget model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gadget {
    /// Directory name under the configfs root
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_usb: u16,
    pub bcd_device: u16,
    /// Extra device attributes (e.g. `bDeviceClass`), written after the IDs
    pub attrs: BTreeMap<String, String>,
    pub strings: GadgetStrings,
    /// Controller to bind to on create; `None` leaves the gadget inactive
    pub udc: Option<String>,
    pub configs: BTreeMap<String, Config>,
}

impl Default for Gadget {
    fn default() -> Self {
        Self {
            name: DEFAULT_GADGET_NAME.to_string(),
            vendor_id: DEFAULT_USB_VENDOR_ID,
            product_id: DEFAULT_USB_PRODUCT_ID,
            bcd_usb: DEFAULT_USB_BCD_USB,
            bcd_device: DEFAULT_USB_BCD_DEVICE,
            attrs: BTreeMap::new(),
            strings: GadgetStrings::default(),
            udc: None,
            configs: BTreeMap::new(),
        }
    }
}

impl Gadget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_config(mut self, name: impl Into<String>, config: Config) -> Self {
        self.configs.insert(name.into(), config);
        self
    }

    /// Absolute gadget directory
    pub fn path(&self, env: &GadgetEnv) -> PathBuf {
        env.configfs_root.join(&self.name)
    }

    /// Check names are path-safe and function directories don't collide
    pub fn validate(&self) -> Result<()> {
        validate_name("gadget", &self.name)?;

        let mut seen: BTreeMap<String, &Function> = BTreeMap::new();
        for (config_name, config) in &self.configs {
            validate_name("config", config_name)?;
            for (instance, function) in &config.functions {
                validate_name("function", instance)?;
                match seen.entry(function.dir_name(instance)) {
                    // Same function linked into several configs
                    Entry::Occupied(e) if *e.get() == function => {}
                    Entry::Occupied(e) => {
                        return Err(GadgetError::AlreadyExists(format!(
                            "function {} defined differently in config {}",
                            e.key(),
                            config_name
                        )))
                    }
                    Entry::Vacant(e) => {
                        e.insert(function);
                    }
                }
            }
        }
        Ok(())
    }

    /// Compile the full creation sequence, absolute under the gadget root
    pub fn create_steps(&self, env: &GadgetEnv) -> Steps {
        let strings = PathBuf::from("strings").join(&env.locale);
        let mut steps = Steps::new();
        steps
            .append(Step::mkdir(""))
            .append(Step::write("idVendor", hex_u16(self.vendor_id)))
            .append(Step::write("idProduct", hex_u16(self.product_id)))
            .append(Step::write("bcdUSB", hex_u16(self.bcd_usb)))
            .append(Step::write("bcdDevice", hex_u16(self.bcd_device)));
        for (key, value) in &self.attrs {
            steps.append(Step::write(key.as_str(), value.as_str()));
        }
        let GadgetStrings {
            serial_number,
            manufacturer,
            product,
        } = &self.strings;
        steps
            .append(Step::mkdir(&strings))
            .append(Step::write(strings.join("serialnumber"), serial_number.as_str()))
            .append(Step::write(strings.join("manufacturer"), manufacturer.as_str()))
            .append(Step::write(strings.join("product"), product.as_str()));

        for (config_name, config) in &self.configs {
            steps.extend(
                config
                    .create_steps(config_name, env)
                    .prepend_path(config_path(config_name)),
            );
            for (instance, function) in &config.functions {
                steps.extend(self.function_steps(env, config_name, instance, function));
            }
        }

        if let Some(udc) = self.udc.as_deref().filter(|u| !u.is_empty()) {
            steps.append(Step::write("UDC", udc));
        }

        steps.prepend_path(self.path(env))
    }

    /// Steps removing everything [`Gadget::create_steps`] creates
    ///
    /// Every config link goes first, then each function directory once
    /// (disabled ones included), then the configs, strings and the root.
    /// Does not unbind: an empty write is a no-op step.
    pub fn removal_steps(&self, env: &GadgetEnv) -> Steps {
        let mut steps = Steps::new();
        for (config_name, config) in &self.configs {
            for (instance, function) in &config.functions {
                let link = config_path(config_name).join(function.dir_name(instance));
                steps.append(Step::remove(link));
            }
        }

        let mut removed = BTreeSet::new();
        for config in self.configs.values() {
            for (instance, function) in &config.functions {
                let dir = function.dir_name(instance);
                if removed.insert(dir.clone()) {
                    steps.extend(function_dir_steps(&dir, function).teardown());
                }
            }
        }

        for (config_name, config) in &self.configs {
            let config_steps = config
                .create_steps(config_name, env)
                .prepend_path(config_path(config_name));
            steps.extend(config_steps.teardown());
        }

        steps
            .append(Step::rmdir(PathBuf::from("strings").join(&env.locale)))
            .append(Step::rmdir(""));
        steps.prepend_path(self.path(env))
    }

    /// Steps materializing one function, relative to the gadget root
    ///
    /// A disabled function only loses its config link; its directory stays.
    pub(crate) fn function_steps(
        &self,
        env: &GadgetEnv,
        config_name: &str,
        instance: &str,
        function: &Function,
    ) -> Steps {
        let dir = function.dir_name(instance);
        let link = config_path(config_name).join(&dir);

        let mut steps = Steps::new();
        if !function.is_enabled() {
            steps.append(Step::remove(link));
            return steps;
        }

        let target = self.path(env).join("functions").join(&dir);
        steps
            .extend(function_dir_steps(&dir, function))
            .append(Step::symlink(target, link));
        steps
    }

    /// Steps detaching a function from every config holding it and
    /// removing its directory tree, relative to the gadget root
    pub(crate) fn function_removal_steps(&self, instance: &str, function: &Function) -> Steps {
        let dir = function.dir_name(instance);
        let mut steps = Steps::new();
        for (config_name, _) in self.function_holders(&dir) {
            steps.append(Step::remove(config_path(config_name).join(&dir)));
        }
        steps.extend(function_dir_steps(&dir, function).teardown());
        steps
    }

    /// Every (config, instance) pair whose function lives in `functions/<dir>`
    pub(crate) fn function_holders(&self, dir: &str) -> Vec<(&str, &str)> {
        self.configs
            .iter()
            .flat_map(|(config_name, config)| {
                config
                    .functions
                    .iter()
                    .filter(|(instance, function)| function.dir_name(instance) == dir)
                    .map(move |(instance, _)| (config_name.as_str(), instance.as_str()))
            })
            .collect()
    }

    /// Find a function by instance name or directory name
    ///
    /// Returns the owning config name and the instance key.
    pub fn find_function(&self, name: &str) -> Option<(&str, &str, &Function)> {
        self.configs.iter().find_map(|(config_name, config)| {
            config
                .functions
                .iter()
                .find(|(instance, function)| {
                    instance.as_str() == name || function.dir_name(instance) == name
                })
                .map(|(instance, function)| (config_name.as_str(), instance.as_str(), function))
        })
    }
}

fn config_path(config_name: &str) -> PathBuf {
    PathBuf::from("configs").join(config_name)
}

/// Steps creating `functions/<dir>` and its attributes
fn function_dir_steps(dir: &str, function: &Function) -> Steps {
    let mut steps = Steps::new();
    steps
        .append(Step::mkdir(""))
        .extend(function.create_steps());
    steps.prepend_path(PathBuf::from("functions").join(dir))
}
