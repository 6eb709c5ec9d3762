//! Process-wide module factory: a module registers exactly once,
//! process-wide, and registration failures are reported rather than
//! silently ignored.

use crate::error::{OmniError, OmniResult};
use crate::module::module::Module;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;

pub type CreateFn = fn() -> Box<dyn Module>;

static REGISTRY: Lazy<Mutex<HashMap<&'static str, CreateFn>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub struct ModuleFactory;

impl ModuleFactory {
    /// Register a module constructor under `name`. Errors if that name is
    /// already registered, per the "module name registers exactly once
    /// process-wide" invariant.
    pub fn register(name: &'static str, constructor: CreateFn) -> OmniResult<()> {
        let mut registry = REGISTRY.lock().unwrap();
        if registry.contains_key(name) {
            return Err(OmniError::Contract(format!(
                "module '{}' already registered",
                name
            )));
        }
        registry.insert(name, constructor);
        Ok(())
    }

    pub fn create(name: &str) -> OmniResult<Box<dyn Module>> {
        let registry = REGISTRY.lock().unwrap();
        match registry.get(name) {
            Some(ctor) => Ok(ctor()),
            None => Err(OmniError::Contract(format!("unknown module '{}'", name))),
        }
    }

    pub fn is_registered(name: &str) -> bool {
        REGISTRY.lock().unwrap().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Module for Noop {
        fn name(&self) -> &'static str {
            "test.noop"
        }
    }

    fn make_noop() -> Box<dyn Module> {
        Box::new(Noop)
    }

    #[test]
    fn double_registration_is_rejected() {
        let _ = ModuleFactory::register("registry-test.a", make_noop);
        let err = ModuleFactory::register("registry-test.a", make_noop).unwrap_err();
        assert!(matches!(err, OmniError::Contract(_)));
    }

    #[test]
    fn unknown_module_name_errors() {
        let err = ModuleFactory::create("registry-test.does-not-exist").unwrap_err();
        assert!(matches!(err, OmniError::Contract(_)));
    }

    #[test]
    fn registered_module_can_be_created_by_name() {
        ModuleFactory::register("registry-test.b", make_noop).ok();
        let module = ModuleFactory::create("registry-test.b").unwrap();
        assert_eq!(module.name(), "test.noop");
    }
}
