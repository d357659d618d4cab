use crate::error::{GraphicsError, GraphicsResult};
use crate::math::{Matrix3, Matrix4, Vec2, Vec3, Vec4};
use crate::resource::{SamplerId, ShaderId, ShaderParamId, TextureId};
use crate::shader::{
    ShaderParamInfo, ShaderParams, ShaderType, ShaderValue, TextureBinding, VIEW_PROJ_PARAM,
    WORLD_PARAM,
};

use super::GraphicsContext;

impl GraphicsContext<'_> {
    pub fn vertexshader_create(&mut self, source: &str, file: &str) -> GraphicsResult<ShaderId> {
        self.shader_create(ShaderType::Vertex, source, file)
    }

    pub fn pixelshader_create(&mut self, source: &str, file: &str) -> GraphicsResult<ShaderId> {
        self.shader_create(ShaderType::Pixel, source, file)
    }

    fn shader_create(
        &mut self,
        shader_type: ShaderType,
        source: &str,
        file: &str,
    ) -> GraphicsResult<ShaderId> {
        let id = self
            .device
            .backend
            .create_shader(shader_type, source, file)
            .inspect_err(|err| log::warn!("{shader_type:?} shader {file} failed: {err}"))?;
        self.device.track(ShaderId::KIND, 1);
        Ok(id)
    }

    /// Destroys a shader, unloading it first when bound.
    pub fn shader_destroy(&mut self, shader: ShaderId) -> GraphicsResult<()> {
        self.device.backend.destroy_shader(shader)?;
        let state = &mut self.device.state;
        if state.vertex_shader == Some(shader) {
            state.vertex_shader = None;
        }
        if state.pixel_shader == Some(shader) {
            state.pixel_shader = None;
        }
        self.device.track(ShaderId::KIND, -1);
        Ok(())
    }

    fn params(&self, shader: ShaderId) -> GraphicsResult<&ShaderParams> {
        self.device.backend.shader_params(shader)
    }

    fn params_mut(&mut self, shader: ShaderId) -> GraphicsResult<&mut ShaderParams> {
        self.device.backend.shader_params_mut(shader)
    }

    pub fn shader_num_params(&self, shader: ShaderId) -> GraphicsResult<usize> {
        self.params(shader).map(ShaderParams::len)
    }

    pub fn shader_param_by_idx(&self, shader: ShaderId, index: usize) -> GraphicsResult<ShaderParamId> {
        if index >= self.shader_num_params(shader)? {
            return Err(GraphicsError::InvalidHandle("shader parameter"));
        }
        Ok(ShaderParamId { shader, index })
    }

    pub fn shader_param_by_name(&self, shader: ShaderId, name: &str) -> GraphicsResult<ShaderParamId> {
        self.params(shader)?
            .index_of(name)
            .map(|index| ShaderParamId { shader, index })
            .ok_or(GraphicsError::InvalidHandle("shader parameter"))
    }

    /// The `ViewProj` parameter, when the shader declares one.
    pub fn shader_viewproj_matrix(&self, shader: ShaderId) -> GraphicsResult<Option<ShaderParamId>> {
        self.optional_param(shader, VIEW_PROJ_PARAM)
    }

    pub fn shader_world_matrix(&self, shader: ShaderId) -> GraphicsResult<Option<ShaderParamId>> {
        self.optional_param(shader, WORLD_PARAM)
    }

    fn optional_param(&self, shader: ShaderId, name: &str) -> GraphicsResult<Option<ShaderParamId>> {
        Ok(self
            .params(shader)?
            .index_of(name)
            .map(|index| ShaderParamId { shader, index }))
    }

    pub fn shader_param_info(&self, param: ShaderParamId) -> GraphicsResult<ShaderParamInfo> {
        self.params(param.shader)?
            .get(param.index)
            .map(|p| p.info.clone())
            .ok_or(GraphicsError::InvalidHandle("shader parameter"))
    }

    pub fn shader_param_value(&self, param: ShaderParamId) -> GraphicsResult<ShaderValue> {
        self.params(param.shader)?
            .get(param.index)
            .map(|p| p.value.clone())
            .ok_or(GraphicsError::InvalidHandle("shader parameter"))
    }

    fn set_param(&mut self, param: ShaderParamId, value: ShaderValue) -> GraphicsResult<()> {
        self.params_mut(param.shader)?.set(param.index, value)
    }

    pub fn shader_set_bool(&mut self, param: ShaderParamId, value: bool) -> GraphicsResult<()> {
        self.set_param(param, ShaderValue::Bool(value))
    }

    pub fn shader_set_float(&mut self, param: ShaderParamId, value: f32) -> GraphicsResult<()> {
        self.set_param(param, ShaderValue::Float(value))
    }

    pub fn shader_set_int(&mut self, param: ShaderParamId, value: i32) -> GraphicsResult<()> {
        self.set_param(param, ShaderValue::Int(value))
    }

    pub fn shader_set_vec2(&mut self, param: ShaderParamId, value: Vec2) -> GraphicsResult<()> {
        self.set_param(param, ShaderValue::Vec2(value))
    }

    pub fn shader_set_vec3(&mut self, param: ShaderParamId, value: Vec3) -> GraphicsResult<()> {
        self.set_param(param, ShaderValue::Vec3(value))
    }

    pub fn shader_set_vec4(&mut self, param: ShaderParamId, value: Vec4) -> GraphicsResult<()> {
        self.set_param(param, ShaderValue::Vec4(value))
    }

    /// Stored widened to a 4x4 matrix.
    pub fn shader_set_matrix3(&mut self, param: ShaderParamId, value: Matrix3) -> GraphicsResult<()> {
        self.set_param(param, ShaderValue::Matrix4(Matrix4::from(value)))
    }

    pub fn shader_set_matrix4(&mut self, param: ShaderParamId, value: Matrix4) -> GraphicsResult<()> {
        self.set_param(param, ShaderValue::Matrix4(value))
    }

    /// Binds a texture to a texture parameter. A sampler queued with
    /// [`Self::shader_set_next_sampler`] applies to this call only.
    pub fn shader_set_texture(
        &mut self,
        param: ShaderParamId,
        texture: Option<TextureId>,
        srgb: bool,
    ) -> GraphicsResult<()> {
        if let Some(texture) = texture {
            self.device.backend.texture_info(texture)?;
        }
        let binding = texture.map(|texture| TextureBinding {
            texture,
            srgb,
            sampler: None,
        });
        self.set_param(param, ShaderValue::Texture(binding))
    }

    /// Raw constant bytes, sized exactly like the declared type.
    pub fn shader_set_val(&mut self, param: ShaderParamId, bytes: &[u8]) -> GraphicsResult<()> {
        self.params_mut(param.shader)?.set_raw(param.index, bytes)
    }

    pub fn shader_set_default(&mut self, param: ShaderParamId) -> GraphicsResult<()> {
        self.params_mut(param.shader)?.set_default(param.index)
    }

    pub fn shader_set_next_sampler(
        &mut self,
        param: ShaderParamId,
        sampler: SamplerId,
    ) -> GraphicsResult<()> {
        self.params_mut(param.shader)?
            .set_next_sampler(param.index, sampler)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::soft_device;
    use super::*;
    use crate::format::ColorFormat;
    use crate::resource::{SamplerInfo, TextureDesc};
    use crate::shader::ShaderParamType;

    const PIXEL_SOURCE: &str = "
        uniform texture2d image;
        uniform float4 tint = {1.0, 1.0, 1.0, 1.0};
        uniform float4x4 color_matrix;
        uniform float opacity = 0.5;
    ";

    #[test]
    fn next_sampler_applies_to_the_next_texture_only() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let ps = ctx.pixelshader_create(PIXEL_SOURCE, "image.ps")?;
        let image = ctx.shader_param_by_name(ps, "image")?;
        let sampler = ctx.samplerstate_create(&SamplerInfo::default())?;
        let first = ctx.texture_create(&TextureDesc::texture_2d(2, 2, ColorFormat::Rgba), &[])?;
        let second = ctx.texture_create(&TextureDesc::texture_2d(4, 4, ColorFormat::Rgba), &[])?;

        ctx.shader_set_next_sampler(image, sampler)?;
        ctx.shader_set_texture(image, Some(first), false)?;
        assert!(matches!(
            ctx.shader_param_value(image)?,
            ShaderValue::Texture(Some(TextureBinding { sampler: Some(s), .. })) if s == sampler
        ));

        ctx.shader_set_texture(image, Some(second), true)?;
        assert!(matches!(
            ctx.shader_param_value(image)?,
            ShaderValue::Texture(Some(TextureBinding { sampler: None, srgb: true, .. }))
        ));
        Ok(())
    }

    #[test]
    fn destroyed_texture_is_unbound_from_every_shader() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let ps = ctx.pixelshader_create(PIXEL_SOURCE, "image.ps")?;
        let idle = ctx.pixelshader_create(PIXEL_SOURCE, "idle.ps")?;
        let image = ctx.shader_param_by_name(ps, "image")?;
        let idle_image = ctx.shader_param_by_name(idle, "image")?;
        let tex = ctx.texture_create(&TextureDesc::texture_2d(2, 2, ColorFormat::Rgba), &[])?;
        let kept = ctx.texture_create(&TextureDesc::texture_2d(2, 2, ColorFormat::Rgba), &[])?;
        ctx.load_pixelshader(Some(ps))?;
        ctx.load_texture(Some(tex), 0)?;
        ctx.shader_set_texture(image, Some(tex), false)?;
        ctx.shader_set_texture(idle_image, Some(tex), false)?;

        ctx.texture_destroy(tex)?;
        assert_eq!(ctx.shader_param_value(image)?, ShaderValue::Texture(None));
        assert_eq!(ctx.shader_param_value(idle_image)?, ShaderValue::Texture(None));
        assert_eq!(ctx.pipeline_state().textures[0], None);

        ctx.shader_set_texture(idle_image, Some(kept), false)?;
        let scratch = ctx.texture_create(&TextureDesc::texture_2d(1, 1, ColorFormat::Rgba), &[])?;
        ctx.texture_destroy(scratch)?;
        assert!(matches!(
            ctx.shader_param_value(idle_image)?,
            ShaderValue::Texture(Some(TextureBinding { texture, .. })) if texture == kept
        ));
        Ok(())
    }

    #[test]
    fn reflection_and_typed_setters() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let ps = ctx.pixelshader_create(PIXEL_SOURCE, "image.ps")?;
        assert_eq!(ctx.shader_num_params(ps)?, 4);
        assert_eq!(ctx.shader_viewproj_matrix(ps)?, None);
        assert_eq!(ctx.shader_world_matrix(ps)?, None);

        let tint = ctx.shader_param_by_idx(ps, 1)?;
        assert_eq!(ctx.shader_param_info(tint)?.param_type, ShaderParamType::Vec4);
        assert!(ctx.shader_param_by_idx(ps, 4).is_err());

        let opacity = ctx.shader_param_by_name(ps, "opacity")?;
        ctx.shader_set_float(opacity, 0.25)?;
        ctx.shader_set_default(opacity)?;
        assert_eq!(ctx.shader_param_value(opacity)?, ShaderValue::Float(0.5));
        ctx.shader_set_val(opacity, &1.0f32.to_le_bytes())?;
        assert_eq!(ctx.shader_param_value(opacity)?, ShaderValue::Float(1.0));
        assert!(matches!(
            ctx.shader_set_bool(opacity, true),
            Err(GraphicsError::ParamTypeMismatch { .. })
        ));
        assert!(ctx.shader_set_val(opacity, &[0; 3]).is_err());

        let matrix = ctx.shader_param_by_name(ps, "color_matrix")?;
        ctx.shader_set_matrix3(matrix, Matrix3::IDENTITY)?;
        assert_eq!(
            ctx.shader_param_value(matrix)?,
            ShaderValue::Matrix4(Matrix4::IDENTITY)
        );
        Ok(())
    }

    #[test]
    fn compile_errors_are_reported() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        assert!(matches!(
            ctx.vertexshader_create("uniform float4x4 ViewProj", "broken.vs"),
            Err(GraphicsError::ShaderCompile(_))
        ));
        let vs = ctx.vertexshader_create("uniform float4x4 ViewProj;", "ok.vs")?;
        ctx.load_vertexshader(Some(vs))?;
        ctx.shader_destroy(vs)?;
        assert_eq!(ctx.vertex_shader(), None);
        Ok(())
    }
}
