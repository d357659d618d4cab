use std::sync::Arc;

use crate::error::{GraphicsError, GraphicsResult};
use crate::format::{ColorFormat, PlanarFormat, TextureFlags};
use crate::resource::{IoSurfaceRef, NativeObject, TextureDesc, TextureId, TextureInfo};

use super::AllocationToken;
use super::parallel;
use super::shared::SharedSurface;

pub(crate) enum Storage {
    Local(Vec<Vec<u8>>),
    Shared(Arc<SharedSurface>),
}

pub(crate) struct SoftTexture {
    pub(crate) desc: TextureDesc,
    storage: Storage,
    pub(crate) object: NativeObject,
    pub(crate) mapped: bool,
    pub(crate) gdi: bool,
    pub(crate) dc_held: bool,
    /// Key this texture acquired its surface's keyed mutex with.
    pub(crate) held_key: Option<u64>,
    /// Chroma plane paired with this luma plane.
    pub(crate) planar: Option<(PlanarFormat, TextureId)>,
    pub(crate) iosurface: Option<IoSurfaceRef>,
    _token: AllocationToken,
}

impl SoftTexture {
    /// Allocates storage for `desc` (levels already resolved) and uploads
    /// `data`.
    pub(crate) fn new(
        desc: TextureDesc,
        data: &[&[u8]],
        token: AllocationToken,
    ) -> GraphicsResult<Self> {
        let levels = desc.resolved_levels();
        let desc = desc.with_levels(levels);
        if data.len() > levels as usize {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "{} data levels supplied for a texture with {levels}",
                data.len()
            )));
        }

        let mut storage = Vec::with_capacity(levels as usize);
        for level in 0..levels {
            let expected = desc.level_bytes(level)?;
            match data.get(level as usize) {
                Some(bytes) if bytes.len() != expected => {
                    return Err(GraphicsError::InvalidDescriptor(format!(
                        "level {level} data is {} bytes, expected {expected}",
                        bytes.len()
                    )));
                }
                Some(bytes) => storage.push(bytes.to_vec()),
                None => storage.push(vec![0; expected]),
            }
        }
        if desc.flags.contains(TextureFlags::BUILD_MIPMAPS) && data.len() == 1 {
            generate_mips(&desc, &mut storage);
        }

        let storage = if desc.flags.is_shared() {
            let keyed = desc.flags.contains(TextureFlags::SHARED_KM_TEX);
            Storage::Shared(SharedSurface::publish(desc, storage, keyed))
        } else {
            Storage::Local(storage)
        };
        Ok(Self::with_storage(desc, storage, token))
    }

    pub(crate) fn open_shared(surface: Arc<SharedSurface>, token: AllocationToken) -> Self {
        Self::with_storage(surface.desc, Storage::Shared(surface), token)
    }

    fn with_storage(desc: TextureDesc, storage: Storage, token: AllocationToken) -> Self {
        Self {
            desc,
            storage,
            object: super::next_native_object(),
            mapped: false,
            gdi: false,
            dc_held: false,
            held_key: None,
            planar: None,
            iosurface: None,
            _token: token,
        }
    }

    pub(crate) fn info(&self) -> TextureInfo {
        let (width, height, depth) = self.desc.kind.extent();
        TextureInfo {
            texture_type: self.desc.kind.texture_type(),
            width,
            height,
            depth,
            format: self.desc.format,
            levels: self.desc.levels,
            flags: self.desc.flags,
        }
    }

    pub(crate) fn shared_surface(&self) -> Option<&Arc<SharedSurface>> {
        match &self.storage {
            Storage::Shared(surface) => Some(surface),
            Storage::Local(_) => None,
        }
    }

    /// Linesize of level 0.
    pub(crate) fn linesize(&self) -> GraphicsResult<usize> {
        let (w, _) = self.desc.level_extent(0);
        self.desc.format.row_bytes(w)
    }

    pub(crate) fn with_level<R>(
        &self,
        level: u32,
        f: impl FnOnce(&[u8]) -> R,
    ) -> GraphicsResult<R> {
        match &self.storage {
            Storage::Local(levels) => levels.get(level as usize).map(|l| f(l)),
            Storage::Shared(surface) => surface.levels().get(level as usize).map(|l| f(l)),
        }
        .ok_or_else(|| GraphicsError::InvalidDescriptor(format!("texture has no level {level}")))
    }

    pub(crate) fn with_level_mut<R>(
        &mut self,
        level: u32,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> GraphicsResult<R> {
        match &mut self.storage {
            Storage::Local(levels) => levels.get_mut(level as usize).map(|l| f(l)),
            Storage::Shared(surface) => surface
                .levels()
                .get_mut(level as usize)
                .map(|l| f(l)),
        }
        .ok_or_else(|| GraphicsError::InvalidDescriptor(format!("texture has no level {level}")))
    }

    /// Level 0 bytes of a local texture, for mapping.
    pub(crate) fn local_level0_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            Storage::Local(levels) => levels.first_mut().map(Vec::as_mut_slice),
            Storage::Shared(_) => None,
        }
    }

    /// Fills one layer of `level` with a repeated texel.
    pub(crate) fn fill_layer(&mut self, level: u32, layer: u32, texel: &[u8]) -> GraphicsResult<()> {
        let (w, h) = self.desc.level_extent(level);
        let layer_bytes = self.desc.format.surface_bytes(w, h)?;
        let start = layer_bytes * layer as usize;
        self.with_level_mut(level, |bytes| {
            if let Some(dst) = bytes.get_mut(start..start + layer_bytes) {
                parallel::fill_texels(dst, texel);
            }
        })
    }

    /// Copies a rectangle of level 0, layer 0 into a packed buffer.
    pub(crate) fn read_region(&self, x: u32, y: u32, w: u32, h: u32) -> GraphicsResult<Vec<u8>> {
        self.check_region(x, y, w, h)?;
        let format = self.desc.format;
        let pitch = self.linesize()?;
        let row = format.row_bytes(w)?;
        let rows = format.row_count(h);
        let offset = format.row_count(y) * pitch + format.row_bytes(x)?;
        let mut out = vec![0u8; row * rows];
        self.with_level(0, |src| {
            parallel::copy_rows(&mut out, row, &src[offset..], pitch, row, rows)
        })?;
        Ok(out)
    }

    /// Writes a packed buffer produced by [`Self::read_region`].
    pub(crate) fn write_region(
        &mut self,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        data: &[u8],
    ) -> GraphicsResult<()> {
        self.check_region(x, y, w, h)?;
        let format = self.desc.format;
        let pitch = self.linesize()?;
        let row = format.row_bytes(w)?;
        let rows = format.row_count(h);
        let offset = format.row_count(y) * pitch + format.row_bytes(x)?;
        self.with_level_mut(0, |dst| {
            parallel::copy_rows(&mut dst[offset..], pitch, data, row, row, rows)
        })
    }

    fn check_region(&self, x: u32, y: u32, w: u32, h: u32) -> GraphicsResult<()> {
        let (width, height) = self.desc.level_extent(0);
        let fits = x.checked_add(w).is_some_and(|r| r <= width)
            && y.checked_add(h).is_some_and(|b| b <= height);
        if !fits {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "region {x},{y} {w}x{h} exceeds {width}x{height} texture"
            )));
        }
        if self.desc.format.is_compressed() && (x % 4 != 0 || y % 4 != 0) {
            return Err(GraphicsError::InvalidDescriptor(
                "block-compressed regions must start on a 4x4 block".into(),
            ));
        }
        Ok(())
    }
}

/// Box-filters level 0 down the chain for 8-bit four-channel formats.
/// Other formats keep zeroed lower levels.
fn generate_mips(desc: &TextureDesc, levels: &mut [Vec<u8>]) {
    if !matches!(
        desc.format,
        ColorFormat::Rgba
            | ColorFormat::Bgra
            | ColorFormat::Bgrx
            | ColorFormat::RgbaUnorm
            | ColorFormat::BgraUnorm
            | ColorFormat::BgrxUnorm
    ) {
        return;
    }
    for level in 1..levels.len() {
        let (sw, sh) = desc.level_extent(level as u32 - 1);
        let (dw, dh) = desc.level_extent(level as u32);
        let layers = desc.level_layers(level as u32) as usize;
        let (upper, lower) = levels.split_at_mut(level);
        let src = &upper[level - 1];
        let dst = &mut lower[0];
        let src_layer = sw as usize * sh as usize * 4;
        let dst_layer = dw as usize * dh as usize * 4;
        for layer in 0..layers {
            for y in 0..dh as usize {
                for x in 0..dw as usize {
                    for c in 0..4 {
                        let mut sum = 0u32;
                        for (ox, oy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                            let sx = (x * 2 + ox).min(sw as usize - 1);
                            let sy = (y * 2 + oy).min(sh as usize - 1);
                            sum += u32::from(src[layer * src_layer + (sy * sw as usize + sx) * 4 + c]);
                        }
                        dst[layer * dst_layer + (y * dw as usize + x) * 4 + c] = ((sum + 2) / 4) as u8;
                    }
                }
            }
        }
    }
}
