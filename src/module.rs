//! Registration of loadable units that drive the graphics layer.
//!
//! A unit hands the host a [`ModuleDescriptor`] built by a plain
//! registration function. The host checks its API version, runs `load`
//! once, then `post_load`, and runs `unload` when the unit is removed or
//! the host is dropped.

use std::fmt;

use crate::error::{GraphicsError, GraphicsResult};
use crate::exports::{GRAPHICS_API_MAJOR, GRAPHICS_API_VERSION, version_major};

type LifecycleHook = Box<dyn FnOnce() -> GraphicsResult<()> + Send>;
type FinalHook = Box<dyn FnOnce() + Send>;
type LocaleHook = Box<dyn FnMut(&str) + Send>;
type FreeLocaleHook = Box<dyn FnMut() + Send>;
type LookupHook = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub const DEFAULT_LOCALE: &str = "en-US";

/// Everything a loadable unit exposes to its host.
pub struct ModuleDescriptor {
    name: String,
    description: String,
    author: String,
    api_version: u32,
    load: LifecycleHook,
    unload: Option<FinalHook>,
    post_load: Option<FinalHook>,
    set_locale: Option<LocaleHook>,
    free_locale: Option<FreeLocaleHook>,
    text: Option<LookupHook>,
    get_string: Option<LookupHook>,
}

impl ModuleDescriptor {
    /// A descriptor built against this crate's API version.
    pub fn new(
        name: impl Into<String>,
        load: impl FnOnce() -> GraphicsResult<()> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            author: String::new(),
            api_version: GRAPHICS_API_VERSION,
            load: Box::new(load),
            unload: None,
            post_load: None,
            set_locale: None,
            free_locale: None,
            text: None,
            get_string: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn api_version(mut self, api_version: u32) -> Self {
        self.api_version = api_version;
        self
    }

    pub fn on_unload(mut self, unload: impl FnOnce() + Send + 'static) -> Self {
        self.unload = Some(Box::new(unload));
        self
    }

    pub fn on_post_load(mut self, post_load: impl FnOnce() + Send + 'static) -> Self {
        self.post_load = Some(Box::new(post_load));
        self
    }

    pub fn on_set_locale(mut self, set_locale: impl FnMut(&str) + Send + 'static) -> Self {
        self.set_locale = Some(Box::new(set_locale));
        self
    }

    pub fn on_free_locale(mut self, free_locale: impl FnMut() + Send + 'static) -> Self {
        self.free_locale = Some(Box::new(free_locale));
        self
    }

    pub fn with_text(
        mut self,
        text: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.text = Some(Box::new(text));
        self
    }

    pub fn with_get_string(
        mut self,
        get_string: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.get_string = Some(Box::new(get_string));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn describe(&self) -> &str {
        &self.description
    }

    pub fn author_name(&self) -> &str {
        &self.author
    }

    pub fn version(&self) -> u32 {
        self.api_version
    }

    /// Localised text for `key`, or `key` itself.
    pub fn text(&self, key: &str) -> String {
        self.text
            .as_ref()
            .and_then(|lookup| lookup(key))
            .unwrap_or_else(|| key.to_string())
    }

    /// Like [`Self::text`] but reports a missing translation.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_string.as_ref().and_then(|lookup| lookup(key))
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("author", &self.author)
            .field("api_version", &format_args!("{:#010x}", self.api_version))
            .finish_non_exhaustive()
    }
}

/// A loaded unit. `unload` and `free_locale` run when it is dropped.
struct LoadedModule {
    descriptor: ModuleDescriptor,
}

impl LoadedModule {
    fn set_locale(&mut self, locale: &str) {
        if let Some(set_locale) = self.descriptor.set_locale.as_mut() {
            set_locale(locale);
        }
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        if let Some(unload) = self.descriptor.unload.take() {
            unload();
        }
        if let Some(free_locale) = self.descriptor.free_locale.as_mut() {
            free_locale();
        }
        log::debug!("module '{}' unloaded", self.descriptor.name);
    }
}

/// Holds loaded units in registration order; they unload in reverse.
pub struct ModuleHost {
    modules: Vec<LoadedModule>,
    locale: String,
}

impl Default for ModuleHost {
    fn default() -> Self {
        Self::new(DEFAULT_LOCALE)
    }
}

impl ModuleHost {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            modules: Vec::new(),
            locale: locale.into(),
        }
    }

    /// Loads a unit. A version mismatch or a failing `load` leaves the host
    /// unchanged and `unload` is never called for that unit.
    pub fn register(&mut self, mut descriptor: ModuleDescriptor) -> GraphicsResult<()> {
        if version_major(descriptor.api_version) != GRAPHICS_API_MAJOR {
            log::warn!(
                "module '{}' targets API {:#010x}; host provides {GRAPHICS_API_VERSION:#010x}",
                descriptor.name,
                descriptor.api_version
            );
            return Err(GraphicsError::VersionMismatch {
                expected: GRAPHICS_API_VERSION,
                found: descriptor.api_version,
            });
        }
        if self.get(&descriptor.name).is_some() {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "module '{}' is already registered",
                descriptor.name
            )));
        }

        if let Some(set_locale) = descriptor.set_locale.as_mut() {
            set_locale(&self.locale);
        }
        let load = std::mem::replace(&mut descriptor.load, Box::new(|| Ok(())));
        if let Err(err) = load() {
            log::warn!("module '{}' failed to load: {err}", descriptor.name);
            if let Some(free_locale) = descriptor.free_locale.as_mut() {
                free_locale();
            }
            return Err(err);
        }
        if let Some(post_load) = descriptor.post_load.take() {
            post_load();
        }
        log::debug!("module '{}' loaded", descriptor.name);
        self.modules.push(LoadedModule { descriptor });
        Ok(())
    }

    /// Unloads `name`; false when no such unit is loaded.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.modules.iter().position(|m| m.descriptor.name == name) {
            Some(index) => {
                drop(self.modules.remove(index));
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules
            .iter()
            .map(|m| &m.descriptor)
            .find(|d| d.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|m| m.descriptor.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Switches every loaded unit to `locale`.
    pub fn set_locale(&mut self, locale: impl Into<String>) {
        self.locale = locale.into();
        for module in &mut self.modules {
            module.set_locale(&self.locale);
        }
    }

    /// Text from `module`, falling back to `key`.
    pub fn text(&self, module: &str, key: &str) -> String {
        self.get(module)
            .map_or_else(|| key.to_string(), |descriptor| descriptor.text(key))
    }
}

impl Drop for ModuleHost {
    fn drop(&mut self) {
        while let Some(module) = self.modules.pop() {
            drop(module);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exports::make_version;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    fn traced(name: &'static str, log: &Log) -> ModuleDescriptor {
        let (load, post, unload, locale, free) =
            (log.clone(), log.clone(), log.clone(), log.clone(), log.clone());
        ModuleDescriptor::new(name, move || {
            record(&load, format!("load {name}"));
            Ok(())
        })
        .on_post_load(move || record(&post, format!("post_load {name}")))
        .on_unload(move || record(&unload, format!("unload {name}")))
        .on_set_locale(move |l| record(&locale, format!("locale {name} {l}")))
        .on_free_locale(move || record(&free, format!("free_locale {name}")))
    }

    #[test]
    fn register_runs_load_then_post_load_and_drop_unloads_in_reverse() {
        let log: Log = Arc::default();
        {
            let mut host = ModuleHost::new("de-DE");
            host.register(traced("a", &log)).unwrap();
            host.register(traced("b", &log)).unwrap();
            assert_eq!(host.names().collect::<Vec<_>>(), ["a", "b"]);
        }
        assert_eq!(
            *log.lock().unwrap(),
            [
                "locale a de-DE",
                "load a",
                "post_load a",
                "locale b de-DE",
                "load b",
                "post_load b",
                "unload b",
                "free_locale b",
                "unload a",
                "free_locale a",
            ]
        );
    }

    #[test]
    fn version_mismatch_is_rejected_without_loading() {
        let log: Log = Arc::default();
        let mut host = ModuleHost::default();
        let stale = traced("old", &log).api_version(make_version(GRAPHICS_API_MAJOR + 1, 0, 0));
        assert!(matches!(
            host.register(stale),
            Err(GraphicsError::VersionMismatch { .. })
        ));
        assert!(host.is_empty());
        assert!(log.lock().unwrap().is_empty());

        let newer_minor = traced("minor", &log).api_version(make_version(GRAPHICS_API_MAJOR, 9, 0));
        host.register(newer_minor).unwrap();
        assert_eq!(host.len(), 1);
    }

    #[test]
    fn failed_load_never_unloads() {
        let log: Log = Arc::default();
        let unload = log.clone();
        let mut host = ModuleHost::default();
        let failing = ModuleDescriptor::new("broken", || {
            Err(GraphicsError::Unsupported("no adapter".into()))
        })
        .on_unload(move || record(&unload, "unload broken"));
        assert!(host.register(failing).is_err());
        assert!(host.get("broken").is_none());
        drop(host);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn remove_unloads_and_duplicates_are_rejected() {
        let log: Log = Arc::default();
        let mut host = ModuleHost::default();
        host.register(traced("a", &log)).unwrap();
        assert!(host.register(traced("a", &log)).is_err());
        assert!(host.remove("a"));
        assert!(!host.remove("a"));
        assert!(log.lock().unwrap().iter().any(|e| e == "unload a"));
    }

    #[test]
    fn text_falls_back_to_the_key() {
        let mut host = ModuleHost::default();
        let descriptor = ModuleDescriptor::new("capture", || Ok(()))
            .description("Screen capture")
            .author("snow")
            .with_text(|key| (key == "Monitor").then(|| "Bildschirm".to_string()))
            .with_get_string(|key| (key == "Monitor").then(|| "Bildschirm".to_string()));
        host.register(descriptor).unwrap();

        assert_eq!(host.text("capture", "Monitor"), "Bildschirm");
        assert_eq!(host.text("capture", "Window"), "Window");
        assert_eq!(host.text("missing", "Window"), "Window");
        let capture = host.get("capture").unwrap();
        assert_eq!(capture.get_string("Window"), None);
        assert_eq!(capture.describe(), "Screen capture");
        assert_eq!(capture.author_name(), "snow");
    }

    #[test]
    fn set_locale_reaches_loaded_modules() {
        let log: Log = Arc::default();
        let mut host = ModuleHost::default();
        host.register(traced("a", &log)).unwrap();
        host.set_locale("fr-FR");
        assert_eq!(host.locale(), "fr-FR");
        assert!(log.lock().unwrap().iter().any(|e| e == "locale a fr-FR"));
    }
}
