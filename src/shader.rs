//! Shader parameter reflection and value storage.
//!
//! Backends compile shader source however their API requires; the
//! parameter table is derived from the top-level `uniform` declarations
//! so every backend exposes the same names, order and defaults.

use crate::error::{GraphicsError, GraphicsResult};
use crate::math::{Matrix4, Vec2, Vec3, Vec4};
use crate::resource::{SamplerId, TextureId};

pub const VIEW_PROJ_PARAM: &str = "ViewProj";
pub const WORLD_PARAM: &str = "World";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderType {
    Vertex,
    Pixel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderParamType {
    Bool,
    Float,
    Int,
    Int2,
    Int3,
    Int4,
    Vec2,
    Vec3,
    Vec4,
    Matrix4x4,
    Texture,
}

impl ShaderParamType {
    fn from_decl(type_name: &str) -> Option<Self> {
        Some(match type_name {
            "bool" => Self::Bool,
            "float" => Self::Float,
            "int" => Self::Int,
            "int2" => Self::Int2,
            "int3" => Self::Int3,
            "int4" => Self::Int4,
            "float2" => Self::Vec2,
            "float3" => Self::Vec3,
            "float4" => Self::Vec4,
            "float4x4" => Self::Matrix4x4,
            "texture2d" | "texture3d" | "texture_cube" | "texture_rect" => Self::Texture,
            _ => return None,
        })
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Float => "float",
            Self::Int => "int",
            Self::Int2 => "int2",
            Self::Int3 => "int3",
            Self::Int4 => "int4",
            Self::Vec2 => "float2",
            Self::Vec3 => "float3",
            Self::Vec4 => "float4",
            Self::Matrix4x4 => "float4x4",
            Self::Texture => "texture",
        }
    }

    /// Size of the value in a constant buffer; textures occupy none.
    pub const fn byte_size(self) -> usize {
        match self {
            Self::Bool | Self::Float | Self::Int => 4,
            Self::Int2 | Self::Vec2 => 8,
            Self::Int3 | Self::Vec3 => 12,
            Self::Int4 | Self::Vec4 => 16,
            Self::Matrix4x4 => 64,
            Self::Texture => 0,
        }
    }

    const fn component_count(self) -> usize {
        self.byte_size() / 4
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    pub texture: TextureId,
    pub srgb: bool,
    pub sampler: Option<SamplerId>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ShaderValue {
    Bool(bool),
    Float(f32),
    Int(i32),
    Int2([i32; 2]),
    Int3([i32; 3]),
    Int4([i32; 4]),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Matrix4(Matrix4),
    Texture(Option<TextureBinding>),
}

impl ShaderValue {
    pub fn param_type(&self) -> ShaderParamType {
        match self {
            Self::Bool(_) => ShaderParamType::Bool,
            Self::Float(_) => ShaderParamType::Float,
            Self::Int(_) => ShaderParamType::Int,
            Self::Int2(_) => ShaderParamType::Int2,
            Self::Int3(_) => ShaderParamType::Int3,
            Self::Int4(_) => ShaderParamType::Int4,
            Self::Vec2(_) => ShaderParamType::Vec2,
            Self::Vec3(_) => ShaderParamType::Vec3,
            Self::Vec4(_) => ShaderParamType::Vec4,
            Self::Matrix4(_) => ShaderParamType::Matrix4x4,
            Self::Texture(_) => ShaderParamType::Texture,
        }
    }

    /// Zero value of a parameter type.
    pub fn zeroed(param_type: ShaderParamType) -> Self {
        match param_type {
            ShaderParamType::Bool => Self::Bool(false),
            ShaderParamType::Float => Self::Float(0.0),
            ShaderParamType::Int => Self::Int(0),
            ShaderParamType::Int2 => Self::Int2([0; 2]),
            ShaderParamType::Int3 => Self::Int3([0; 3]),
            ShaderParamType::Int4 => Self::Int4([0; 4]),
            ShaderParamType::Vec2 => Self::Vec2(Vec2::default()),
            ShaderParamType::Vec3 => Self::Vec3(Vec3::default()),
            ShaderParamType::Vec4 => Self::Vec4(Vec4::default()),
            ShaderParamType::Matrix4x4 => Self::Matrix4(Matrix4::default()),
            ShaderParamType::Texture => Self::Texture(None),
        }
    }

    /// Constant-buffer bytes of the value; empty for textures.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bool(v) => u32::from(*v).to_le_bytes().to_vec(),
            Self::Float(v) => v.to_le_bytes().to_vec(),
            Self::Int(v) => v.to_le_bytes().to_vec(),
            Self::Int2(v) => bytemuck::cast_slice(v).to_vec(),
            Self::Int3(v) => bytemuck::cast_slice(v).to_vec(),
            Self::Int4(v) => bytemuck::cast_slice(v).to_vec(),
            Self::Vec2(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Vec3(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Vec4(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Matrix4(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Texture(_) => Vec::new(),
        }
    }

    /// Decodes raw constant-buffer bytes for `param_type`.
    pub fn from_bytes(param_type: ShaderParamType, bytes: &[u8]) -> Option<Self> {
        if param_type == ShaderParamType::Texture || bytes.len() != param_type.byte_size() {
            return None;
        }
        let words: Vec<[u8; 4]> = bytes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        let float = |i: usize| f32::from_le_bytes(words[i]);
        let int = |i: usize| i32::from_le_bytes(words[i]);
        Some(match param_type {
            ShaderParamType::Bool => Self::Bool(u32::from_le_bytes(words[0]) != 0),
            ShaderParamType::Float => Self::Float(float(0)),
            ShaderParamType::Int => Self::Int(int(0)),
            ShaderParamType::Int2 => Self::Int2([int(0), int(1)]),
            ShaderParamType::Int3 => Self::Int3([int(0), int(1), int(2)]),
            ShaderParamType::Int4 => Self::Int4([int(0), int(1), int(2), int(3)]),
            ShaderParamType::Vec2 => Self::Vec2(Vec2::new(float(0), float(1))),
            ShaderParamType::Vec3 => Self::Vec3(Vec3::new(float(0), float(1), float(2))),
            ShaderParamType::Vec4 => {
                Self::Vec4(Vec4::new(float(0), float(1), float(2), float(3)))
            }
            ShaderParamType::Matrix4x4 => Self::Matrix4(bytemuck::pod_read_unaligned(bytes)),
            ShaderParamType::Texture => return None,
        })
    }

    fn from_components(param_type: ShaderParamType, c: &[f32]) -> Option<Self> {
        if c.len() != param_type.component_count() {
            return None;
        }
        let i = |k: usize| c[k] as i32;
        Some(match param_type {
            ShaderParamType::Bool => Self::Bool(c[0] != 0.0),
            ShaderParamType::Float => Self::Float(c[0]),
            ShaderParamType::Int => Self::Int(i(0)),
            ShaderParamType::Int2 => Self::Int2([i(0), i(1)]),
            ShaderParamType::Int3 => Self::Int3([i(0), i(1), i(2)]),
            ShaderParamType::Int4 => Self::Int4([i(0), i(1), i(2), i(3)]),
            ShaderParamType::Vec2 => Self::Vec2(Vec2::new(c[0], c[1])),
            ShaderParamType::Vec3 => Self::Vec3(Vec3::new(c[0], c[1], c[2])),
            ShaderParamType::Vec4 => Self::Vec4(Vec4::new(c[0], c[1], c[2], c[3])),
            ShaderParamType::Matrix4x4 => Self::Matrix4(bytemuck::pod_read_unaligned(
                bytemuck::cast_slice::<f32, u8>(c),
            )),
            ShaderParamType::Texture => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderParamInfo {
    pub name: String,
    pub param_type: ShaderParamType,
}

/// One reflected `uniform` declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformDecl {
    pub info: ShaderParamInfo,
    pub default: Option<ShaderValue>,
    pub line: usize,
}

/// Reflects the top-level `uniform <type> <name> [= <default>];`
/// declarations of `source`. The error string is the diagnostic a
/// caller shows for a failed compile.
pub fn reflect_uniforms(source: &str, file: &str) -> Result<Vec<UniformDecl>, String> {
    let stripped = strip_comments(source);
    if stripped.trim().is_empty() {
        return Err(format!("{file}: empty shader source"));
    }

    let mut decls: Vec<UniformDecl> = Vec::new();
    for statement in top_level_statements(&stripped, file)? {
        let text = statement.text.trim();
        let Some(rest) = text.strip_prefix("uniform") else {
            continue;
        };
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let decl = parse_uniform(rest.trim(), statement.line)
            .map_err(|message| format!("{file}({}): {message}", statement.line))?;
        if decls.iter().any(|d| d.info.name == decl.info.name) {
            return Err(format!(
                "{file}({}): redefinition of uniform '{}'",
                statement.line, decl.info.name
            ));
        }
        decls.push(decl);
    }
    Ok(decls)
}

struct Statement {
    text: String,
    line: usize,
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Splits on `;` at brace depth zero. A closing brace returning to depth
/// zero also ends a statement, so function bodies never swallow the
/// declaration that follows them.
fn top_level_statements(source: &str, file: &str) -> Result<Vec<Statement>, String> {
    let mut statements = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    let mut line = 1usize;
    let mut start_line = 1usize;

    for ch in source.chars() {
        if current.trim().is_empty() {
            start_line = line;
        }
        if ch == '\n' {
            line += 1;
        }
        match ch {
            '{' => {
                depth += 1;
                current.push(ch);
            }
            '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("{file}({line}): unmatched '}}'"))?;
                current.push(ch);
                if depth == 0 && !current.trim_start().starts_with("uniform") {
                    current.clear();
                }
            }
            ';' if depth == 0 => {
                statements.push(Statement {
                    text: std::mem::take(&mut current),
                    line: start_line,
                });
            }
            _ => current.push(ch),
        }
    }

    if depth != 0 {
        return Err(format!("{file}({line}): unexpected end of source inside a block"));
    }
    if current.trim_start().starts_with("uniform") {
        return Err(format!("{file}({start_line}): expected ';' after uniform declaration"));
    }
    Ok(statements)
}

fn parse_uniform(decl: &str, line: usize) -> Result<UniformDecl, String> {
    let (head, default_text) = match decl.split_once('=') {
        Some((head, value)) => (head.trim(), Some(value.trim())),
        None => (decl, None),
    };
    let mut tokens = head.split_whitespace();
    let type_name = tokens
        .next()
        .ok_or_else(|| "uniform declaration is missing a type".to_string())?;
    let name = tokens
        .next()
        .ok_or_else(|| format!("uniform of type '{type_name}' is missing a name"))?;
    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected token '{extra}' after uniform '{name}'"));
    }
    let param_type = ShaderParamType::from_decl(type_name)
        .ok_or_else(|| format!("unknown uniform type '{type_name}'"))?;
    if !is_identifier(name) {
        return Err(format!("'{name}' is not a valid identifier"));
    }

    let default = match default_text {
        None => None,
        Some(_) if param_type == ShaderParamType::Texture => {
            return Err(format!("texture uniform '{name}' cannot have a default value"));
        }
        Some(text) => {
            let components = parse_components(text)
                .ok_or_else(|| format!("malformed default value for '{name}': {text}"))?;
            Some(
                ShaderValue::from_components(param_type, &components).ok_or_else(|| {
                    format!(
                        "default for '{name}' has {} components, {} expects {}",
                        components.len(),
                        param_type.as_str(),
                        param_type.component_count()
                    )
                })?,
            )
        }
    };

    Ok(UniformDecl {
        info: ShaderParamInfo {
            name: name.to_string(),
            param_type,
        },
        default,
        line,
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Accepts `1.0`, `true`, `{1, 2}` and `float2(1, 2)`.
fn parse_components(text: &str) -> Option<Vec<f32>> {
    let inner = if let Some(body) = text.strip_prefix('{') {
        body.strip_suffix('}')?
    } else if let Some(open) = text.find('(') {
        text[open + 1..].strip_suffix(')')?
    } else {
        text
    };
    inner
        .split(',')
        .map(|part| match part.trim() {
            "true" => Some(1.0),
            "false" => Some(0.0),
            number => number.trim_end_matches('f').parse::<f32>().ok(),
        })
        .collect()
}

/// A parameter's current state inside a backend shader object.
#[derive(Clone, Debug)]
pub struct ShaderParam {
    pub info: ShaderParamInfo,
    pub value: ShaderValue,
    pub default: Option<ShaderValue>,
    /// Sampler bound to the next texture set on this parameter.
    pub next_sampler: Option<SamplerId>,
    pub changed: bool,
}

/// Parameter table of one shader, shared by every backend.
#[derive(Clone, Debug, Default)]
pub struct ShaderParams {
    params: Vec<ShaderParam>,
}

impl ShaderParams {
    pub fn from_decls(decls: Vec<UniformDecl>) -> Self {
        let params = decls
            .into_iter()
            .map(|decl| ShaderParam {
                value: decl
                    .default
                    .clone()
                    .unwrap_or_else(|| ShaderValue::zeroed(decl.info.param_type)),
                info: decl.info,
                default: decl.default,
                next_sampler: None,
                changed: true,
            })
            .collect();
        Self { params }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ShaderParam> {
        self.params.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.info.name == name)
    }

    fn param_mut(&mut self, index: usize) -> GraphicsResult<&mut ShaderParam> {
        self.params
            .get_mut(index)
            .ok_or(GraphicsError::InvalidHandle("shader parameter"))
    }

    /// Stores `value`, which must match the declared type. A texture
    /// value consumes the pending `next_sampler`.
    pub fn set(&mut self, index: usize, value: ShaderValue) -> GraphicsResult<()> {
        let param = self.param_mut(index)?;
        if value.param_type() != param.info.param_type {
            return Err(GraphicsError::ParamTypeMismatch {
                param: param.info.name.clone(),
                expected: param.info.param_type.as_str(),
            });
        }
        let value = match value {
            ShaderValue::Texture(Some(mut binding)) => {
                if let Some(sampler) = param.next_sampler.take() {
                    binding.sampler = Some(sampler);
                }
                ShaderValue::Texture(Some(binding))
            }
            other => other,
        };
        if param.value != value {
            param.value = value;
            param.changed = true;
        }
        Ok(())
    }

    /// Stores raw constant-buffer bytes; the length must equal the
    /// declared type's size.
    pub fn set_raw(&mut self, index: usize, bytes: &[u8]) -> GraphicsResult<()> {
        let param = self.param_mut(index)?;
        let value = ShaderValue::from_bytes(param.info.param_type, bytes).ok_or_else(|| {
            GraphicsError::ParamTypeMismatch {
                param: param.info.name.clone(),
                expected: param.info.param_type.as_str(),
            }
        })?;
        self.set(index, value)
    }

    /// Restores the declared default (or zero when none was declared).
    pub fn set_default(&mut self, index: usize) -> GraphicsResult<()> {
        let param = self.param_mut(index)?;
        param.value = param
            .default
            .clone()
            .unwrap_or_else(|| ShaderValue::zeroed(param.info.param_type));
        param.changed = true;
        Ok(())
    }

    pub fn set_next_sampler(&mut self, index: usize, sampler: SamplerId) -> GraphicsResult<()> {
        let param = self.param_mut(index)?;
        if param.info.param_type != ShaderParamType::Texture {
            return Err(GraphicsError::ParamTypeMismatch {
                param: param.info.name.clone(),
                expected: ShaderParamType::Texture.as_str(),
            });
        }
        param.next_sampler = Some(sampler);
        Ok(())
    }

    /// Takes the set of changed parameters, clearing their flags.
    pub fn take_changed(&mut self) -> Vec<usize> {
        self.params
            .iter_mut()
            .enumerate()
            .filter_map(|(i, p)| std::mem::take(&mut p.changed).then_some(i))
            .collect()
    }

    /// Drops texture bindings that reference `texture`.
    pub fn forget_texture(&mut self, texture: TextureId) {
        for param in &mut self.params {
            if matches!(&param.value, ShaderValue::Texture(Some(b)) if b.texture == texture) {
                param.value = ShaderValue::Texture(None);
                param.changed = true;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShaderParam> {
        self.params.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX_SOURCE: &str = r#"
        // transform
        uniform float4x4 ViewProj;
        uniform float4 color = {1.0, 0.5, 0.25, 1.0};
        uniform bool flip = true;
        /* block comment with ; inside */
        uniform texture2d image;

        struct VertInOut { float4 pos : POSITION; };

        VertInOut VSDefault(VertInOut vert_in)
        {
            VertInOut vert_out;
            vert_out.pos = mul(float4(vert_in.pos.xyz, 1.0), ViewProj);
            return vert_out;
        }
        uniform float multiplier = 2.0f;
    "#;

    #[test]
    fn reflects_uniforms_in_declaration_order() -> Result<(), String> {
        let decls = reflect_uniforms(VERTEX_SOURCE, "default.effect")?;
        let names: Vec<&str> = decls.iter().map(|d| d.info.name.as_str()).collect();
        assert_eq!(names, ["ViewProj", "color", "flip", "image", "multiplier"]);
        assert_eq!(decls[0].info.param_type, ShaderParamType::Matrix4x4);
        assert_eq!(
            decls[1].default,
            Some(ShaderValue::Vec4(Vec4::new(1.0, 0.5, 0.25, 1.0)))
        );
        assert_eq!(decls[2].default, Some(ShaderValue::Bool(true)));
        assert_eq!(decls[4].default, Some(ShaderValue::Float(2.0)));
        assert_eq!(decls[3].line, 7);
        Ok(())
    }

    #[test]
    fn malformed_declarations_produce_diagnostics() {
        let unknown = reflect_uniforms("uniform float5 x;", "a.effect").unwrap_err();
        assert!(unknown.contains("unknown uniform type 'float5'"), "{unknown}");

        let arity = reflect_uniforms("uniform float2 x = {1, 2, 3};", "b.effect").unwrap_err();
        assert!(arity.contains("3 components"), "{arity}");

        let unterminated = reflect_uniforms("uniform float x", "c.effect").unwrap_err();
        assert!(unterminated.contains("expected ';'"), "{unterminated}");

        let block = reflect_uniforms("float4 main() { return 1;", "d.effect").unwrap_err();
        assert!(block.contains("inside a block"), "{block}");

        assert!(reflect_uniforms("  // only a comment\n", "e.effect").is_err());
        assert!(reflect_uniforms("uniform int a; uniform int a;", "f.effect").is_err());
    }

    #[test]
    fn next_sampler_applies_to_following_texture_only() -> GraphicsResult<()> {
        let decls = reflect_uniforms("uniform texture2d image;", "t.effect")
            .map_err(GraphicsError::ShaderCompile)?;
        let mut params = ShaderParams::from_decls(decls);
        let sampler = SamplerId::from_raw(7);
        let texture = TextureId::from_raw(1);
        params.set_next_sampler(0, sampler)?;

        let binding = TextureBinding {
            texture,
            srgb: false,
            sampler: None,
        };
        params.set(0, ShaderValue::Texture(Some(binding)))?;
        assert!(matches!(
            params.get(0).map(|p| &p.value),
            Some(ShaderValue::Texture(Some(b))) if b.sampler == Some(sampler)
        ));

        params.set(0, ShaderValue::Texture(Some(binding)))?;
        assert!(matches!(
            params.get(0).map(|p| &p.value),
            Some(ShaderValue::Texture(Some(b))) if b.sampler.is_none()
        ));
        Ok(())
    }

    #[test]
    fn typed_and_raw_setters_validate_size() -> GraphicsResult<()> {
        let decls = reflect_uniforms("uniform float2 scale = {1, 1};", "s.effect")
            .map_err(GraphicsError::ShaderCompile)?;
        let mut params = ShaderParams::from_decls(decls);
        params.take_changed();

        assert!(matches!(
            params.set(0, ShaderValue::Float(1.0)),
            Err(GraphicsError::ParamTypeMismatch { .. })
        ));
        params.set_raw(0, bytemuck::bytes_of(&Vec2::new(3.0, 4.0)))?;
        assert_eq!(params.take_changed(), vec![0]);
        assert!(params.set_raw(0, &[0; 4]).is_err());

        params.set_default(0)?;
        assert_eq!(
            params.get(0).map(|p| p.value.clone()),
            Some(ShaderValue::Vec2(Vec2::new(1.0, 1.0)))
        );
        Ok(())
    }
}
