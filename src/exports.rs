//! Backend resolution: maps a backend name to a populated export table.

use std::fmt;
use std::sync::Arc;

use crate::backend::{DeviceType, GraphicsModule};
use crate::error::{GraphicsError, GraphicsResult};
use crate::resource::AdapterInfo;
use crate::soft::SoftModule;

pub const GRAPHICS_API_MAJOR: u32 = 1;
pub const GRAPHICS_API_MINOR: u32 = 2;

/// `major << 24 | minor << 16`; only the major part must match.
pub const GRAPHICS_API_VERSION: u32 = make_version(GRAPHICS_API_MAJOR, GRAPHICS_API_MINOR, 0);

pub const fn make_version(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 24) | ((minor & 0xff) << 16) | (patch & 0xffff)
}

pub const fn version_major(version: u32) -> u32 {
    version >> 24
}

/// Name of the CPU reference backend.
pub const SOFT_BACKEND: &str = "soft";

/// Platform-conditional interop group of an export table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlatformGroup {
    Win32,
    IoSurface,
    DmaBuf,
}

impl PlatformGroup {
    /// The group matching the build target.
    pub const fn native() -> Self {
        if cfg!(windows) {
            Self::Win32
        } else if cfg!(target_os = "macos") {
            Self::IoSurface
        } else {
            Self::DmaBuf
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Win32 => "win32",
            Self::IoSurface => "iosurface",
            Self::DmaBuf => "dmabuf",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "win32" | "windows" => Some(Self::Win32),
            "iosurface" | "macos" => Some(Self::IoSurface),
            "dmabuf" | "linux" => Some(Self::DmaBuf),
            _ => None,
        }
    }
}

impl fmt::Display for PlatformGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry of the export table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Device lifecycle plus every resource type.
    Base,
    GdiTextures,
    SharedTextures,
    KeyedMutex,
    DesktopDuplication,
    DeviceLossCallbacks,
    PlanarStageSurfaces,
    FastClearQuery,
    IoSurfaceImport,
    IoSurfaceRebind,
    DmaBufImport,
    DmaBufQueries,
    PixmapImport,
}

impl Capability {
    pub const ALL: [Self; 13] = [
        Self::Base,
        Self::GdiTextures,
        Self::SharedTextures,
        Self::KeyedMutex,
        Self::DesktopDuplication,
        Self::DeviceLossCallbacks,
        Self::PlanarStageSurfaces,
        Self::FastClearQuery,
        Self::IoSurfaceImport,
        Self::IoSurfaceRebind,
        Self::DmaBufImport,
        Self::DmaBufQueries,
        Self::PixmapImport,
    ];

    /// Group the entry belongs to; `None` for base entries.
    pub const fn group(self) -> Option<PlatformGroup> {
        match self {
            Self::Base => None,
            Self::GdiTextures
            | Self::SharedTextures
            | Self::KeyedMutex
            | Self::DesktopDuplication
            | Self::DeviceLossCallbacks
            | Self::PlanarStageSurfaces
            | Self::FastClearQuery => Some(PlatformGroup::Win32),
            Self::IoSurfaceImport | Self::IoSurfaceRebind => Some(PlatformGroup::IoSurface),
            Self::DmaBufImport | Self::DmaBufQueries | Self::PixmapImport => {
                Some(PlatformGroup::DmaBuf)
            }
        }
    }
}

/// Export table of one backend. An empty table (unknown backend) reports
/// no capability and cannot create devices.
#[derive(Clone)]
pub struct GraphicsExports {
    api_version: u32,
    module: Option<Arc<dyn GraphicsModule>>,
    platform: Option<PlatformGroup>,
}

impl GraphicsExports {
    pub fn empty() -> Self {
        Self {
            api_version: 0,
            module: None,
            platform: None,
        }
    }

    /// Binds `module` with `group` active. The group is dropped when the
    /// module cannot serve it; the table then carries base entries only.
    pub fn from_module(
        module: Arc<dyn GraphicsModule>,
        group: PlatformGroup,
    ) -> GraphicsResult<Self> {
        let api_version = module.api_version();
        if version_major(api_version) != GRAPHICS_API_MAJOR {
            return Err(GraphicsError::VersionMismatch {
                expected: GRAPHICS_API_VERSION,
                found: api_version,
            });
        }
        let platform = module.platform_groups().contains(&group).then_some(group);
        if platform.is_none() {
            log::debug!(
                "backend '{}' has no {group} group; exporting base entries only",
                module.name()
            );
        }
        Ok(Self {
            api_version,
            module: Some(module),
            platform,
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.module.is_some()
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn platform_group(&self) -> Option<PlatformGroup> {
        self.platform
    }

    pub fn supports(&self, capability: Capability) -> bool {
        if !self.is_loaded() {
            return false;
        }
        match capability.group() {
            None => true,
            Some(group) => self.platform == Some(group),
        }
    }

    pub(crate) fn check_version(&self) -> GraphicsResult<()> {
        if !self.is_loaded() {
            return Err(GraphicsError::BackendNotFound(
                "export table is empty".into(),
            ));
        }
        if version_major(self.api_version) != GRAPHICS_API_MAJOR {
            return Err(GraphicsError::VersionMismatch {
                expected: GRAPHICS_API_VERSION,
                found: self.api_version,
            });
        }
        Ok(())
    }

    pub(crate) fn module(&self) -> GraphicsResult<&Arc<dyn GraphicsModule>> {
        self.module
            .as_ref()
            .ok_or_else(|| GraphicsError::BackendNotFound("export table is empty".into()))
    }

    pub fn name(&self) -> Option<&'static str> {
        self.module.as_ref().map(|m| m.name())
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        self.module.as_ref().map(|m| m.device_type())
    }

    pub fn preprocessor_name(&self) -> Option<&'static str> {
        self.module.as_ref().map(|m| m.preprocessor_name())
    }

    pub fn adapter_count(&self) -> GraphicsResult<u32> {
        self.module()?.adapter_count()
    }

    pub fn enum_adapters(
        &self,
        mut callback: impl FnMut(&AdapterInfo) -> bool,
    ) -> GraphicsResult<()> {
        self.module()?.enum_adapters(&mut callback)
    }
}

impl fmt::Debug for GraphicsExports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsExports")
            .field("module", &self.name())
            .field("api_version", &format_args!("{:#010x}", self.api_version))
            .field("platform", &self.platform)
            .finish()
    }
}

/// Resolves `name` with the build target's platform group.
pub fn load_graphics_imports(name: &str) -> GraphicsExports {
    load_graphics_imports_for(name, PlatformGroup::native())
}

/// Resolves `name` with an explicit platform group. Unknown names yield
/// an empty table.
pub fn load_graphics_imports_for(name: &str, group: PlatformGroup) -> GraphicsExports {
    let module: Arc<dyn GraphicsModule> = match name {
        SOFT_BACKEND => Arc::new(SoftModule::new()),
        _ => {
            log::warn!("unknown graphics backend '{name}'");
            return GraphicsExports::empty();
        }
    };
    match GraphicsExports::from_module(module, group) {
        Ok(exports) => exports,
        Err(err) => {
            log::warn!("graphics backend '{name}' rejected: {err}");
            GraphicsExports::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceBackend;

    struct FutureModule;

    impl GraphicsModule for FutureModule {
        fn name(&self) -> &'static str {
            "future"
        }

        fn device_type(&self) -> DeviceType {
            DeviceType::Software
        }

        fn preprocessor_name(&self) -> &'static str {
            "_FUTURE"
        }

        fn api_version(&self) -> u32 {
            make_version(GRAPHICS_API_MAJOR + 1, 0, 0)
        }

        fn platform_groups(&self) -> &[PlatformGroup] {
            &[]
        }

        fn adapter_count(&self) -> GraphicsResult<u32> {
            Ok(0)
        }

        fn enum_adapters(
            &self,
            _callback: &mut dyn FnMut(&AdapterInfo) -> bool,
        ) -> GraphicsResult<()> {
            Ok(())
        }

        fn create_device(
            &self,
            _adapter: u32,
            _group: Option<PlatformGroup>,
        ) -> GraphicsResult<Box<dyn DeviceBackend>> {
            Err(GraphicsError::Unsupported("future".into()))
        }
    }

    #[test]
    fn unknown_backend_yields_empty_table() {
        let exports = load_graphics_imports("vulkan-but-not-really");
        assert!(!exports.is_loaded());
        assert!(Capability::ALL.iter().all(|c| !exports.supports(*c)));
        assert!(matches!(
            exports.adapter_count(),
            Err(GraphicsError::BackendNotFound(_))
        ));
    }

    #[test]
    fn known_backend_reports_only_selected_group() {
        for group in [
            PlatformGroup::Win32,
            PlatformGroup::IoSurface,
            PlatformGroup::DmaBuf,
        ] {
            let exports = load_graphics_imports_for(SOFT_BACKEND, group);
            assert!(exports.is_loaded());
            assert_eq!(exports.platform_group(), Some(group));
            for capability in Capability::ALL {
                let expected = capability.group().is_none_or(|g| g == group);
                assert_eq!(exports.supports(capability), expected, "{capability:?}");
            }
        }
    }

    #[test]
    fn major_version_mismatch_is_rejected() {
        assert!(matches!(
            GraphicsExports::from_module(Arc::new(FutureModule), PlatformGroup::native()),
            Err(GraphicsError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn version_packing_keeps_major_in_top_byte() {
        assert_eq!(version_major(GRAPHICS_API_VERSION), GRAPHICS_API_MAJOR);
        assert_eq!(make_version(2, 3, 4), 0x0203_0004);
        assert_eq!(PlatformGroup::parse(" Linux "), Some(PlatformGroup::DmaBuf));
    }

    #[test]
    fn soft_backend_enumerates_one_adapter() -> GraphicsResult<()> {
        let exports = load_graphics_imports(SOFT_BACKEND);
        assert_eq!(exports.adapter_count()?, 1);
        let mut names = Vec::new();
        exports.enum_adapters(|adapter| {
            names.push(adapter.name.clone());
            true
        })?;
        assert_eq!(names, ["Software Rasterizer"]);
        assert_eq!(exports.device_type(), Some(DeviceType::Software));
        Ok(())
    }
}
