//! Gadget Manager - lifecycle of one gadget on a filesystem

use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::configfs::{list_udcs, Filesystem, HostFs};
use super::function::{validate_name, Function, FunctionMeta, GadgetFunction};
use super::gadget::Gadget;
use super::step::{Step, Steps};
use crate::config::GadgetEnv;
use crate::error::{GadgetError, Result};

/// Gadget Manager
///
/// Owns the gadget model and executes compiled steps against a filesystem.
/// Nothing is locked: callers serialize access to a given gadget name.
pub struct GadgetManager<F: Filesystem = HostFs> {
    env: GadgetEnv,
    fs: F,
    gadget: Gadget,
}

impl GadgetManager<HostFs> {
    /// Create a manager operating on the host filesystem
    pub fn new(env: GadgetEnv, gadget: Gadget) -> Self {
        Self::with_fs(env, gadget, HostFs)
    }
}

impl<F: Filesystem> GadgetManager<F> {
    pub fn with_fs(env: GadgetEnv, gadget: Gadget, fs: F) -> Self {
        Self { env, fs, gadget }
    }

    pub fn gadget(&self) -> &Gadget {
        &self.gadget
    }

    pub fn env(&self) -> &GadgetEnv {
        &self.env
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Get gadget path
    pub fn gadget_path(&self) -> PathBuf {
        self.gadget.path(&self.env)
    }

    /// Check if gadget exists
    pub fn exists(&self) -> bool {
        self.fs.exists(&self.gadget_path())
    }

    /// Read a gadget attribute relative to the gadget directory
    pub fn read_attr(&self, rel: &str) -> Result<String> {
        self.fs.read_text(&self.gadget_path().join(rel))
    }

    /// Check if gadget is bound to UDC
    pub fn is_bound(&self) -> bool {
        self.read_attr("UDC")
            .map(|udc| !udc.is_empty())
            .unwrap_or(false)
    }

    /// Compiled creation sequence
    pub fn create_steps(&self) -> Steps {
        self.gadget.create_steps(&self.env)
    }

    /// Create the gadget tree (and bind it if a UDC is set)
    ///
    /// A failure leaves whatever was already created in place.
    pub fn create(&self) -> Result<()> {
        self.gadget.validate()?;
        info!("Creating USB gadget: {}", self.gadget.name);

        self.create_steps().run(&self.fs)?;

        info!("USB gadget {} created", self.gadget.name);
        Ok(())
    }

    /// Unbind, then remove the gadget tree children first
    pub fn remove(&mut self) -> Result<()> {
        if !self.exists() {
            debug!("Gadget {} does not exist, nothing to remove", self.gadget.name);
            return Ok(());
        }

        info!("Removing USB gadget: {}", self.gadget.name);
        self.unbind()?;
        self.gadget.removal_steps(&self.env).run(&self.fs)?;

        info!("USB gadget {} removed", self.gadget.name);
        Ok(())
    }

    /// Bind gadget to a UDC
    ///
    /// With an empty name the first available controller is used.
    pub fn bind(&mut self, udc: &str) -> Result<()> {
        let udc = if udc.is_empty() {
            list_udcs(&self.env.udc_class_path)?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    GadgetError::NoResource("No USB Device Controller (UDC) found".to_string())
                })?
        } else {
            udc.to_string()
        };

        info!("Binding gadget {} to UDC: {}", self.gadget.name, udc);
        self.fs.write_text(&self.gadget_path().join("UDC"), &udc)?;
        self.gadget.udc = Some(udc);
        Ok(())
    }

    /// Unbind gadget from UDC
    pub fn unbind(&mut self) -> Result<()> {
        if !self.is_bound() {
            debug!("Gadget {} is not bound", self.gadget.name);
            self.gadget.udc = None;
            return Ok(());
        }

        // Written directly: an empty Write step is a no-op
        self.fs.write_text(&self.gadget_path().join("UDC"), "")?;
        self.gadget.udc = None;
        info!("Unbound gadget {} from UDC", self.gadget.name);
        Ok(())
    }

    /// Add a function to a config of a live gadget
    ///
    /// Only the function's own steps and its config link are executed. The
    /// function is recorded in the model before they run, so a partial
    /// failure can be cleaned up with [`GadgetManager::remove_function`].
    pub fn add_function(
        &mut self,
        config_name: &str,
        name: &str,
        function: Function,
    ) -> Result<()> {
        validate_name("function", name)?;
        let dir = function.dir_name(name);
        if self.gadget.find_function(&dir).is_some() {
            return Err(GadgetError::AlreadyExists(format!("function {}", dir)));
        }

        let config = self
            .gadget
            .configs
            .get_mut(config_name)
            .ok_or_else(|| GadgetError::NotFound(format!("config {}", config_name)))?;
        if config.functions.contains_key(name) {
            return Err(GadgetError::AlreadyExists(format!(
                "function {} in config {}",
                name, config_name
            )));
        }
        config.functions.insert(name.to_string(), function.clone());

        let steps = self
            .gadget
            .function_steps(&self.env, config_name, name, &function)
            .prepend_path(self.gadget_path());
        steps.run(&self.fs)?;

        info!("Added function {} to config {}", dir, config_name);
        Ok(())
    }

    /// Detach a function and remove its directory tree
    ///
    /// `name` is the instance name or the directory name. A function linked
    /// into several configs is detached from all of them.
    pub fn remove_function(&mut self, name: &str) -> Result<()> {
        let (instance, function) = self
            .gadget
            .find_function(name)
            .map(|(_, i, f)| (i.to_string(), f.clone()))
            .ok_or_else(|| GadgetError::NotFound(format!("function {}", name)))?;
        let dir = function.dir_name(&instance);

        self.gadget
            .function_removal_steps(&instance, &function)
            .prepend_path(self.gadget_path())
            .run(&self.fs)?;

        let holders: Vec<(String, String)> = self
            .gadget
            .function_holders(&dir)
            .into_iter()
            .map(|(c, i)| (c.to_string(), i.to_string()))
            .collect();
        for (config_name, instance) in &holders {
            if let Some(config) = self.gadget.configs.get_mut(config_name) {
                config.functions.remove(instance);
            }
            info!("Removed function {} from config {}", dir, config_name);
        }
        Ok(())
    }

    /// Remove every function of every config
    ///
    /// Stops at the first failure; functions not reached stay in place.
    pub fn remove_all_functions(&mut self) -> Result<()> {
        let mut names: Vec<String> = Vec::new();
        for config in self.gadget.configs.values() {
            for (instance, function) in &config.functions {
                let dir = function.dir_name(instance);
                if !names.contains(&dir) {
                    names.push(dir);
                }
            }
        }
        for name in names {
            self.remove_function(&name)?;
        }
        Ok(())
    }

    /// Enable or disable a function's config links
    ///
    /// The function directory is kept either way. A function linked into
    /// several configs changes in all of them.
    pub fn set_function_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let dir = self
            .gadget
            .find_function(name)
            .map(|(_, instance, function)| function.dir_name(instance))
            .ok_or_else(|| GadgetError::NotFound(format!("function {}", name)))?;
        let holders: Vec<(String, String)> = self
            .gadget
            .function_holders(&dir)
            .into_iter()
            .map(|(c, i)| (c.to_string(), i.to_string()))
            .collect();

        let gadget_path = self.gadget_path();
        let dir_exists = self.fs.exists(&gadget_path.join("functions").join(&dir));
        let mut steps = Steps::new();
        for (config_name, instance) in &holders {
            let Some(function) = self
                .gadget
                .configs
                .get_mut(config_name)
                .and_then(|c| c.functions.get_mut(instance))
            else {
                continue;
            };
            if function.is_enabled() == enabled {
                continue;
            }
            function.set_enabled(enabled);
            let function = function.clone();

            let link = gadget_path.join("configs").join(config_name).join(&dir);
            if enabled && self.fs.exists(&link) {
                warn!("Config link {} already present, replacing", link.display());
                steps.append(Step::remove(link));
            }
            let mut function_steps = self
                .gadget
                .function_steps(&self.env, config_name, instance, &function)
                .prepend_path(&gadget_path);
            if enabled && dir_exists {
                // Directory kept while disabled: only the link is missing
                function_steps = function_steps
                    .into_iter()
                    .filter(|s| matches!(s, Step::Symlink { .. }))
                    .collect();
            }
            steps.extend(function_steps);
        }
        steps.run(&self.fs)
    }

    /// Absolute directory of a function in the model, enabled or not
    pub fn function_path(&self, name: &str) -> Option<PathBuf> {
        self.gadget.find_function(name).map(|(_, instance, function)| {
            self.gadget_path()
                .join("functions")
                .join(function.dir_name(instance))
        })
    }

    /// Metadata of enabled functions, as (config, function) pairs
    pub fn active_functions(&self) -> Vec<(String, FunctionMeta)> {
        self.gadget
            .configs
            .iter()
            .flat_map(|(config_name, config)| {
                config
                    .functions
                    .iter()
                    .filter(|(_, f)| f.is_enabled())
                    .map(move |(instance, f)| (config_name.clone(), f.meta(instance)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::gadget::Config;
    use crate::otg::hid::HidFunction;
    use crate::otg::memfs::MemFs;
    use crate::otg::msd::{MassStorageFunction, MsdLun, MsdLunConfig};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    const ROOT: &str = "/cfg/usb_gadget";
    const SHARED_LINK_1: &str = "/cfg/usb_gadget/g0/configs/c.1/hid.kbd";
    const SHARED_LINK_2: &str = "/cfg/usb_gadget/g0/configs/c.2/hid.kbd";

    fn mem_manager(gadget: Gadget) -> GadgetManager<MemFs> {
        GadgetManager::with_fs(GadgetEnv::with_root(ROOT), gadget, MemFs::new(ROOT))
    }

    fn composite() -> Gadget {
        let mut gadget = Gadget::new("g0").with_config(
            "c.1",
            Config::new("HID + MSD")
                .with_function("kbd", HidFunction::keyboard())
                .with_function("mouse", HidFunction::mouse_absolute())
                .with_function(
                    "usb0",
                    MassStorageFunction::new(
                        false,
                        vec![
                            MsdLun::new("0", MsdLunConfig::cdrom("/srv/boot.iso")),
                            MsdLun::new("1", MsdLunConfig::disk("/srv/data.img", false)),
                        ],
                    ),
                ),
        );
        gadget.strings.product = "Composite".to_string();
        let hid_only = Config::new("HID only").with_function("kbd2", HidFunction::keyboard());
        gadget.configs.insert("c.2".to_string(), hid_only);
        gadget
    }

    fn shared_keyboard() -> Gadget {
        Gadget::new("g0")
            .with_config("c.1", Config::new("first").with_function("kbd", HidFunction::keyboard()))
            .with_config("c.2", Config::new("second").with_function("kbd", HidFunction::keyboard()))
    }

    #[test]
    fn test_create_then_remove_leaves_nothing() {
        let mut manager = mem_manager(composite());
        manager.create().unwrap();
        assert!(manager.exists());
        assert_eq!(manager.read_attr("idVendor").unwrap(), "0x1d6b");
        assert_eq!(manager.read_attr("strings/0x409/product").unwrap(), "Composite");
        assert!(manager
            .fs()
            .is_symlink(Path::new("/cfg/usb_gadget/g0/configs/c.1/mass_storage.usb0")));
        assert_eq!(
            manager
                .read_attr("functions/mass_storage.usb0/lun.1/file")
                .unwrap(),
            "/srv/data.img"
        );

        manager.remove().unwrap();
        assert!(!manager.exists());
        assert!(manager.fs().paths_under(Path::new(ROOT)).is_empty());
    }

    #[test]
    fn test_removal_of_bound_gadget_unbinds_first() {
        let mut gadget = composite();
        gadget.udc = Some("dummy_udc.0".to_string());
        let mut manager = mem_manager(gadget);
        manager.create().unwrap();
        assert!(manager.is_bound());

        manager.remove().unwrap();
        assert!(!manager.exists());
        assert_eq!(manager.gadget().udc, None);
    }

    #[test]
    fn test_teardown_never_hits_non_empty_directory() {
        let manager = mem_manager(composite());
        manager.create_steps().run(manager.fs()).unwrap();

        let removal = manager.gadget().removal_steps(manager.env());
        for (index, step) in removal.iter().enumerate() {
            step.run(manager.fs())
                .unwrap_or_else(|e| panic!("teardown step {index} ({step}) failed: {e}"));
        }
        assert!(!manager.exists());
    }

    #[test]
    fn test_remove_missing_gadget_is_ok() {
        let mut manager = mem_manager(composite());
        manager.remove().unwrap();
    }

    #[test]
    fn test_disable_without_link_is_silent() {
        let mut gadget = composite();
        for config in gadget.configs.values_mut() {
            for f in config.functions.values_mut() {
                f.set_enabled(false);
            }
        }
        let manager = mem_manager(gadget);
        manager.create().unwrap();
        assert!(!manager.fs().exists(Path::new("/cfg/usb_gadget/g0/configs/c.1/hid.kbd")));
        assert!(!manager.fs().exists(Path::new("/cfg/usb_gadget/g0/functions/hid.kbd")));
        assert!(manager.active_functions().is_empty());
        // Still part of the model
        assert!(manager.function_path("kbd").is_some());
    }

    #[test]
    fn test_disable_removes_existing_link_and_keeps_directory() {
        let mut manager = mem_manager(composite());
        manager.create().unwrap();
        let link = Path::new("/cfg/usb_gadget/g0/configs/c.1/hid.kbd");
        let dir = Path::new("/cfg/usb_gadget/g0/functions/hid.kbd");

        let mut gadget = manager.gadget().clone();
        gadget
            .configs
            .get_mut("c.1")
            .unwrap()
            .functions
            .get_mut("kbd")
            .unwrap()
            .set_enabled(false);
        let steps = gadget.create_steps(manager.env());
        assert!(!steps.iter().any(|s| matches!(s, Step::Symlink { link: l, .. } if l == link)));
        assert!(steps.contains(&Step::remove(link)));

        let (_, _, kbd) = gadget.find_function("kbd").unwrap();
        gadget
            .function_steps(manager.env(), "c.1", "kbd", kbd)
            .prepend_path(manager.gadget_path())
            .run(manager.fs())
            .unwrap();

        assert!(!manager.fs().exists(link));
        assert!(manager.fs().is_dir(dir));
        assert_eq!(manager.read_attr("functions/hid.kbd/protocol").unwrap(), "1");

        // Disabling again with the link already gone is harmless
        manager.set_function_enabled("kbd", false).unwrap();
        manager.set_function_enabled("kbd", true).unwrap();
        assert!(manager.fs().is_symlink(link));
    }

    #[test]
    fn test_remove_after_disable_leaves_nothing() {
        let mut manager = mem_manager(composite());
        manager.create().unwrap();
        manager.set_function_enabled("kbd", false).unwrap();
        manager.set_function_enabled("usb0", false).unwrap();
        let kbd_dir = Path::new("/cfg/usb_gadget/g0/functions/hid.kbd");
        assert!(manager.fs().is_dir(kbd_dir));

        manager.remove().unwrap();
        assert!(!manager.exists());
        assert!(manager.fs().paths_under(Path::new(ROOT)).is_empty());
    }

    #[test]
    fn test_remove_with_stale_disabled_directory() {
        let manager = mem_manager(composite());
        manager.create().unwrap();

        // Same tree, reloaded from a model where kbd is disabled
        let mut gadget = manager.gadget().clone();
        gadget
            .configs
            .get_mut("c.1")
            .unwrap()
            .functions
            .get_mut("kbd")
            .unwrap()
            .set_enabled(false);
        let mut reloaded = GadgetManager::with_fs(manager.env().clone(), gadget, manager.fs);
        reloaded.remove().unwrap();
        assert!(!reloaded.exists());
    }

    #[test]
    fn test_shared_function_round_trip() {
        let mut manager = mem_manager(shared_keyboard());
        manager.create().unwrap();
        for link in [SHARED_LINK_1, SHARED_LINK_2] {
            assert!(manager.fs().is_symlink(Path::new(link)));
        }

        manager.remove().unwrap();
        assert!(!manager.exists());
    }

    #[test]
    fn test_remove_shared_function_from_every_config() {
        let mut manager = mem_manager(shared_keyboard());
        manager.create().unwrap();

        manager.remove_function("kbd").unwrap();
        for path in [SHARED_LINK_1, SHARED_LINK_2, "/cfg/usb_gadget/g0/functions/hid.kbd"] {
            assert!(!manager.fs().exists(Path::new(path)));
        }
        assert_eq!(manager.function_path("kbd"), None);
        assert!(manager.gadget().configs.values().all(|c| c.functions.is_empty()));

        manager.remove().unwrap();
        assert!(!manager.exists());
    }

    #[test]
    fn test_remove_all_functions_shared() {
        let mut manager = mem_manager(shared_keyboard());
        manager.create().unwrap();
        manager.remove_all_functions().unwrap();
        assert!(manager
            .fs()
            .paths_under(Path::new("/cfg/usb_gadget/g0/functions"))
            .is_empty());
    }

    #[test]
    fn test_disable_shared_function() {
        let mut manager = mem_manager(shared_keyboard());
        manager.create().unwrap();

        manager.set_function_enabled("kbd", false).unwrap();
        assert!(manager.active_functions().is_empty());
        assert!(manager.gadget().validate().is_ok());
        assert!(!manager.fs().exists(Path::new(SHARED_LINK_2)));

        manager.set_function_enabled("kbd", true).unwrap();
        assert_eq!(manager.active_functions().len(), 2);
        assert!(manager.fs().is_symlink(Path::new(SHARED_LINK_2)));
    }

    #[test]
    fn test_set_function_enabled_round_trip() {
        let mut manager = mem_manager(composite());
        manager.create().unwrap();
        let link = Path::new("/cfg/usb_gadget/g0/configs/c.1/hid.mouse");

        manager.set_function_enabled("hid.mouse", false).unwrap();
        assert!(!manager.fs().exists(link));
        assert_eq!(manager.active_functions().len(), 3);

        manager.set_function_enabled("mouse", true).unwrap();
        assert!(manager.fs().is_symlink(link));
        assert_eq!(manager.active_functions().len(), 4);
    }

    #[test]
    fn test_add_function_runs_only_delta() {
        let mut manager = mem_manager(Gadget::new("g0").with_config("c.1", Config::new("Base")));
        manager.create().unwrap();
        manager.fs().write_text(Path::new("/cfg/usb_gadget/g0/idVendor"), "0xdead").unwrap();

        manager
            .add_function("c.1", "kbd", HidFunction::keyboard().into())
            .unwrap();

        let link = Path::new("/cfg/usb_gadget/g0/configs/c.1/hid.kbd");
        assert!(manager.fs().is_symlink(link));
        assert_eq!(
            manager.fs().read_link(link).unwrap(),
            PathBuf::from("/cfg/usb_gadget/g0/functions/hid.kbd")
        );
        assert_eq!(manager.read_attr("functions/hid.kbd/protocol").unwrap(), "1");
        // Gadget attributes were not rewritten
        assert_eq!(manager.read_attr("idVendor").unwrap(), "0xdead");
        assert!(manager.gadget().configs["c.1"].functions.contains_key("kbd"));
    }

    #[test]
    fn test_add_function_name_collision() {
        let mut manager = mem_manager(composite());
        manager.create().unwrap();
        let before_model = manager.gadget().clone();
        let before_fs = manager.fs().paths_under(Path::new(ROOT));

        let err = manager
            .add_function("c.1", "kbd", HidFunction::mouse_relative().into())
            .unwrap_err();
        assert!(matches!(err, GadgetError::AlreadyExists(_)));
        assert_eq!(manager.gadget(), &before_model);
        assert_eq!(manager.fs().paths_under(Path::new(ROOT)), before_fs);
    }

    #[test]
    fn test_add_function_unknown_config() {
        let mut manager = mem_manager(composite());
        manager.create().unwrap();
        let err = manager
            .add_function("c.9", "kbd9", HidFunction::keyboard().into())
            .unwrap_err();
        assert!(matches!(err, GadgetError::NotFound(_)));
    }

    #[test]
    fn test_remove_function_by_scan() {
        let mut manager = mem_manager(composite());
        manager.create().unwrap();

        manager.remove_function("kbd").unwrap();
        assert!(!manager.fs().exists(Path::new("/cfg/usb_gadget/g0/configs/c.1/hid.kbd")));
        assert!(!manager.fs().exists(Path::new("/cfg/usb_gadget/g0/functions/hid.kbd")));

        let err = manager.remove_function("kbd").unwrap_err();
        assert!(matches!(err, GadgetError::NotFound(_)));
    }

    #[test]
    fn test_remove_function_msd_tree() {
        let mut manager = mem_manager(composite());
        manager.create().unwrap();

        manager.remove_function("mass_storage.usb0").unwrap();
        assert!(!manager
            .fs()
            .exists(Path::new("/cfg/usb_gadget/g0/functions/mass_storage.usb0")));
        assert_eq!(manager.function_path("usb0"), None);
    }

    #[test]
    fn test_remove_all_functions() {
        let mut manager = mem_manager(composite());
        manager.create().unwrap();

        manager.remove_all_functions().unwrap();
        assert!(manager.active_functions().is_empty());
        assert!(manager
            .fs()
            .paths_under(Path::new("/cfg/usb_gadget/g0/functions"))
            .is_empty());

        manager.remove().unwrap();
        assert!(!manager.exists());
    }

    #[test]
    fn test_remove_all_functions_stops_at_failure() {
        let mut manager = mem_manager(composite());
        manager.create().unwrap();
        // A stray user directory makes the first function's rmdir fail
        manager
            .fs()
            .create_dir(Path::new("/cfg/usb_gadget/g0/functions/hid.kbd/stray"))
            .unwrap();

        assert!(manager.remove_all_functions().is_err());
        assert!(manager.fs().is_dir(Path::new("/cfg/usb_gadget/g0/functions/hid.mouse")));
        assert!(manager.fs().is_symlink(Path::new("/cfg/usb_gadget/g0/configs/c.1/hid.mouse")));
    }

    #[test]
    fn test_bind_without_controllers() {
        let dir = tempdir().unwrap();
        let mut env = GadgetEnv::with_root(ROOT);
        env.udc_class_path = dir.path().to_path_buf();
        let mut manager = GadgetManager::with_fs(env, composite(), MemFs::new(ROOT));
        manager.create().unwrap();

        let err = manager.bind("").unwrap_err();
        assert!(matches!(err, GadgetError::NoResource(_)));
        assert!(!manager.fs().exists(Path::new("/cfg/usb_gadget/g0/UDC")));
        assert!(!manager.is_bound());
    }

    #[test]
    fn test_bind_picks_first_controller() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("musb-hdrc.1")).unwrap();
        fs::create_dir(dir.path().join("dummy_udc.0")).unwrap();
        let mut env = GadgetEnv::with_root(ROOT);
        env.udc_class_path = dir.path().to_path_buf();
        let mut manager = GadgetManager::with_fs(env, composite(), MemFs::new(ROOT));
        manager.create().unwrap();

        manager.bind("").unwrap();
        assert_eq!(manager.read_attr("UDC").unwrap(), "dummy_udc.0");
        assert_eq!(manager.gadget().udc.as_deref(), Some("dummy_udc.0"));

        manager.unbind().unwrap();
        assert!(!manager.is_bound());

        manager.bind("musb-hdrc.1").unwrap();
        assert_eq!(manager.read_attr("UDC").unwrap(), "musb-hdrc.1");
    }

    #[test]
    fn test_host_fs_add_function_links_absolute_target() {
        let dir = tempdir().unwrap();
        let env = GadgetEnv::with_root(dir.path());
        let gadget = Gadget::new("g0").with_config("c.1", Config::new("Mass Storage Config"));
        let mut manager = GadgetManager::new(env, gadget);
        manager.create().unwrap();
        assert!(manager.exists());

        manager
            .add_function("c.1", "usb0", HidFunction::keyboard().into())
            .unwrap();

        let func = dir.path().join("g0/functions/hid.usb0");
        let link = dir.path().join("g0/configs/c.1/hid.usb0");
        assert_eq!(fs::read_link(&link).unwrap(), func);
        let report_desc = fs::read(func.join("report_desc")).unwrap();
        assert_eq!(report_desc, HidFunction::keyboard().report_desc);
        assert_eq!(manager.function_path("usb0"), Some(func));
    }
}
