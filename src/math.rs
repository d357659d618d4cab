//! Plain-old-data vector and matrix types passed to shaders and the
//! projection stack. Matrices use row vectors: a point is transformed as
//! `p * M`, with `t` holding the translation row.

use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl Vec4 {
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Unpacks a `0xAARRGGBB` color into normalized RGBA.
    pub fn from_argb(color: u32) -> Self {
        let channel = |shift: u32| ((color >> shift) & 0xff) as f32 / 255.0;
        Self::new(channel(16), channel(8), channel(0), channel(24))
    }

    fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s, self.w * s)
    }

    fn add(self, o: Self) -> Self {
        Self::new(self.x + o.x, self.y + o.y, self.z + o.z, self.w + o.w)
    }
}

/// Affine 3D transform (rotation/scale rows plus translation).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Matrix3 {
    pub x: Vec3,
    pub y: Vec3,
    pub z: Vec3,
    pub t: Vec3,
}

impl Matrix3 {
    pub const IDENTITY: Self = Self {
        x: Vec3::new(1.0, 0.0, 0.0),
        y: Vec3::new(0.0, 1.0, 0.0),
        z: Vec3::new(0.0, 0.0, 1.0),
        t: Vec3::new(0.0, 0.0, 0.0),
    };
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Matrix4 {
    pub x: Vec4,
    pub y: Vec4,
    pub z: Vec4,
    pub t: Vec4,
}

impl Matrix4 {
    pub const IDENTITY: Self = Self {
        x: Vec4::new(1.0, 0.0, 0.0, 0.0),
        y: Vec4::new(0.0, 1.0, 0.0, 0.0),
        z: Vec4::new(0.0, 0.0, 1.0, 0.0),
        t: Vec4::new(0.0, 0.0, 0.0, 1.0),
    };

    /// Orthographic projection mapping `left..right` to -1..1,
    /// `top..bottom` to 1..-1 and `near..far` to 0..1.
    pub fn ortho(left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) -> Self {
        let rml = right - left;
        let bmt = bottom - top;
        let fmn = far - near;

        let mut m = Self::default();
        m.x.x = 2.0 / rml;
        m.t.x = (left + right) / -rml;
        m.y.y = 2.0 / -bmt;
        m.t.y = (bottom + top) / bmt;
        m.z.z = 1.0 / fmn;
        m.t.z = near / -fmn;
        m.t.w = 1.0;
        m
    }

    /// Perspective projection over the given near-plane rectangle.
    pub fn frustum(left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) -> Self {
        let rml = right - left;
        let bmt = bottom - top;
        let fmn = far - near;
        let near_x2 = 2.0 * near;

        let mut m = Self::default();
        m.x.x = near_x2 / rml;
        m.z.x = (left + right) / -rml;
        m.y.y = near_x2 / -bmt;
        m.z.y = (bottom + top) / bmt;
        m.z.z = far / fmn;
        m.t.z = (near * far) / -fmn;
        m.z.w = 1.0;
        m
    }

    pub fn transform(&self, v: Vec4) -> Vec4 {
        self.x
            .scale(v.x)
            .add(self.y.scale(v.y))
            .add(self.z.scale(v.z))
            .add(self.t.scale(v.w))
    }

    /// `self` applied first, then `other`.
    pub fn then(&self, other: &Self) -> Self {
        Self {
            x: other.transform(self.x),
            y: other.transform(self.y),
            z: other.transform(self.z),
            t: other.transform(self.t),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl From<Matrix3> for Matrix4 {
    fn from(m: Matrix3) -> Self {
        let row = |v: Vec3, w: f32| Vec4::new(v.x, v.y, v.z, w);
        Self {
            x: row(m.x, 0.0),
            y: row(m.y, 0.0),
            z: row(m.z, 0.0),
            t: row(m.t, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec4, b: Vec4) -> bool {
        (a.x - b.x).abs() < 1e-5
            && (a.y - b.y).abs() < 1e-5
            && (a.z - b.z).abs() < 1e-5
            && (a.w - b.w).abs() < 1e-5
    }

    #[test]
    fn ortho_maps_box_corners_to_clip_corners() {
        let m = Matrix4::ortho(0.0, 1920.0, 0.0, 1080.0, -100.0, 100.0);
        let top_left = m.transform(Vec4::new(0.0, 0.0, -100.0, 1.0));
        let bottom_right = m.transform(Vec4::new(1920.0, 1080.0, 100.0, 1.0));
        assert!(approx(top_left, Vec4::new(-1.0, 1.0, 0.0, 1.0)), "{top_left:?}");
        assert!(approx(bottom_right, Vec4::new(1.0, -1.0, 1.0, 1.0)), "{bottom_right:?}");
    }

    #[test]
    fn frustum_divides_by_depth() {
        let m = Matrix4::frustum(-1.0, 1.0, -1.0, 1.0, 1.0, 10.0);
        let near = m.transform(Vec4::new(0.0, 0.0, 1.0, 1.0));
        let far = m.transform(Vec4::new(0.0, 0.0, 10.0, 1.0));
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn identity_is_neutral_for_composition() {
        let m = Matrix4::ortho(0.0, 4.0, 0.0, 2.0, 0.0, 1.0);
        assert_eq!(m.then(&Matrix4::IDENTITY), m);
        assert_eq!(Matrix4::IDENTITY.then(&m), m);
    }

    #[test]
    fn matrix3_widens_with_unit_translation_w() {
        let m4 = Matrix4::from(Matrix3::IDENTITY);
        assert_eq!(m4, Matrix4::IDENTITY);
        assert_eq!(m4.as_bytes().len(), 64);
    }

    #[test]
    fn argb_unpacks_in_rgba_order() {
        let c = Vec4::from_argb(0x80ff_0000);
        assert_eq!(c.x, 1.0);
        assert_eq!(c.y, 0.0);
        assert!((c.w - 128.0 / 255.0).abs() < 1e-6);
    }
}
