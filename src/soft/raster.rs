//! Flat-shaded coverage rasterizer behind the soft backend's `draw`.
//!
//! Vertices go through the view-projection matrix and the viewport, and
//! every primitive is filled with one texel. Blending, depth testing,
//! culling and texture sampling are not modelled. A fully disabled color
//! mask suppresses writes.

use crate::math::{Matrix4, Vec3, Vec4};
use crate::state::{ColorMask, DrawMode, Rect};

/// Longest line walked before it is clipped away; guards runaway DDA
/// loops on vertices far outside the target.
const MAX_LINE_STEPS: f32 = 65_536.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ScreenPoint {
    pub(crate) x: f32,
    pub(crate) y: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Shape {
    Point(ScreenPoint),
    Line(ScreenPoint, ScreenPoint),
    Triangle([ScreenPoint; 3]),
}

/// Packed, single-layer destination.
pub(crate) struct Surface<'a> {
    pub(crate) bytes: &'a mut [u8],
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) pitch: usize,
}

impl Surface<'_> {
    fn put(&mut self, x: i32, y: i32, clip: Rect, texel: &[u8]) -> bool {
        if !contains(clip, x, y) || x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height
        {
            return false;
        }
        let offset = y as usize * self.pitch + x as usize * texel.len();
        match self.bytes.get_mut(offset..offset + texel.len()) {
            Some(dst) => {
                dst.copy_from_slice(texel);
                true
            }
            None => false,
        }
    }
}

fn contains(rect: Rect, x: i32, y: i32) -> bool {
    x >= rect.x && y >= rect.y && x < rect.x.saturating_add(rect.cx) && y < rect.y.saturating_add(rect.cy)
}

pub(crate) fn intersect(a: Rect, b: Rect) -> Rect {
    let left = a.x.max(b.x);
    let top = a.y.max(b.y);
    let right = a.x.saturating_add(a.cx).min(b.x.saturating_add(b.cx));
    let bottom = a.y.saturating_add(a.cy).min(b.y.saturating_add(b.cy));
    Rect::new(left, top, (right - left).max(0), (bottom - top).max(0))
}

pub(crate) fn writes_enabled(mask: ColorMask) -> bool {
    mask.red || mask.green || mask.blue || mask.alpha
}

/// Clip space to viewport pixels; `None` behind the eye.
pub(crate) fn to_screen(view_proj: &Matrix4, viewport: Rect, point: Vec3) -> Option<ScreenPoint> {
    let clip = view_proj.transform(Vec4::new(point.x, point.y, point.z, 1.0));
    if !(clip.w > 0.0) || !clip.x.is_finite() || !clip.y.is_finite() {
        return None;
    }
    let (ndc_x, ndc_y) = (clip.x / clip.w, clip.y / clip.w);
    Some(ScreenPoint {
        x: viewport.x as f32 + (ndc_x + 1.0) * 0.5 * viewport.cx as f32,
        y: viewport.y as f32 + (1.0 - ndc_y) * 0.5 * viewport.cy as f32,
    })
}

/// Splits the vertex order of a draw into primitives.
pub(crate) fn assemble(mode: DrawMode, order: &[usize]) -> Vec<&[usize]> {
    match mode {
        DrawMode::Points => order.chunks(1).collect(),
        DrawMode::Lines => order.chunks_exact(2).collect(),
        DrawMode::LineStrip => order.windows(2).collect(),
        DrawMode::Tris => order.chunks_exact(3).collect(),
        DrawMode::TriStrip => order.windows(3).collect(),
    }
}

/// Fills `shape` with `texel` inside `clip`; returns the pixels written.
pub(crate) fn rasterize(surface: &mut Surface<'_>, clip: Rect, shape: &Shape, texel: &[u8]) -> usize {
    if clip.is_empty() {
        return 0;
    }
    match *shape {
        Shape::Point(p) => usize::from(surface.put(p.x.floor() as i32, p.y.floor() as i32, clip, texel)),
        Shape::Line(a, b) => line(surface, clip, a, b, texel),
        Shape::Triangle(tri) => triangle(surface, clip, tri, texel),
    }
}

fn line(surface: &mut Surface<'_>, clip: Rect, a: ScreenPoint, b: ScreenPoint, texel: &[u8]) -> usize {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let steps = dx.abs().max(dy.abs()).ceil().clamp(1.0, MAX_LINE_STEPS) as u32;
    let mut written = 0;
    let mut last = None;
    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        let pixel = ((a.x + dx * t).floor() as i32, (a.y + dy * t).floor() as i32);
        if last == Some(pixel) {
            continue;
        }
        last = Some(pixel);
        written += usize::from(surface.put(pixel.0, pixel.1, clip, texel));
    }
    written
}

fn edge(a: ScreenPoint, b: ScreenPoint, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

fn triangle(surface: &mut Surface<'_>, clip: Rect, [a, b, c]: [ScreenPoint; 3], texel: &[u8]) -> usize {
    let area = edge(a, b, c.x, c.y);
    if area == 0.0 || !area.is_finite() {
        return 0;
    }
    let left = a.x.min(b.x).min(c.x).floor().max(clip.x as f32) as i32;
    let top = a.y.min(b.y).min(c.y).floor().max(clip.y as f32) as i32;
    let right = (a.x.max(b.x).max(c.x).ceil() as i32).min(clip.x.saturating_add(clip.cx));
    let bottom = (a.y.max(b.y).max(c.y).ceil() as i32).min(clip.y.saturating_add(clip.cy));

    let mut written = 0;
    for y in top..bottom {
        let py = y as f32 + 0.5;
        for x in left..right {
            let px = x as f32 + 0.5;
            let w = [edge(b, c, px, py), edge(c, a, px, py), edge(a, b, px, py)];
            let inside = if area > 0.0 {
                w.iter().all(|&e| e >= 0.0)
            } else {
                w.iter().all(|&e| e <= 0.0)
            };
            if inside {
                written += usize::from(surface.put(x, y, clip, texel));
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f32, y: f32) -> ScreenPoint {
        ScreenPoint { x, y }
    }

    #[test]
    fn triangle_covers_half_of_a_square() {
        let mut bytes = vec![0u8; 4 * 4];
        let mut surface = Surface {
            bytes: &mut bytes,
            width: 4,
            height: 4,
            pitch: 4,
        };
        let clip = Rect::new(0, 0, 4, 4);
        let shape = Shape::Triangle([pt(0.0, 0.0), pt(4.0, 0.0), pt(0.0, 4.0)]);
        assert_eq!(rasterize(&mut surface, clip, &shape, &[9]), 10);
        assert_eq!(&bytes[..4], &[9, 9, 9, 9]);
        assert_eq!(bytes[15], 0);
    }

    #[test]
    fn scissor_limits_coverage() {
        let mut bytes = vec![0u8; 4 * 4];
        let mut surface = Surface {
            bytes: &mut bytes,
            width: 4,
            height: 4,
            pitch: 4,
        };
        let clip = intersect(Rect::new(0, 0, 4, 4), Rect::new(1, 1, 2, 2));
        let quad = [
            Shape::Triangle([pt(0.0, 0.0), pt(4.0, 0.0), pt(0.0, 4.0)]),
            Shape::Triangle([pt(4.0, 0.0), pt(4.0, 4.0), pt(0.0, 4.0)]),
        ];
        for shape in &quad {
            rasterize(&mut surface, clip, shape, &[1]);
        }
        let covered: Vec<usize> = (0..16).filter(|&i| bytes[i] == 1).collect();
        assert_eq!(covered, vec![5, 6, 9, 10]);
    }

    #[test]
    fn line_and_point_modes() {
        let mut bytes = vec![0u8; 4 * 4];
        let mut surface = Surface {
            bytes: &mut bytes,
            width: 4,
            height: 4,
            pitch: 4,
        };
        let clip = Rect::new(0, 0, 4, 4);
        assert_eq!(
            rasterize(&mut surface, clip, &Shape::Line(pt(0.5, 0.5), pt(3.5, 3.5)), &[2]),
            4
        );
        assert_eq!(rasterize(&mut surface, clip, &Shape::Point(pt(-1.0, 2.0)), &[3]), 0);
        assert_eq!([bytes[0], bytes[5], bytes[10], bytes[15]], [2; 4]);
    }

    #[test]
    fn strips_share_vertices() {
        let order = [0, 1, 2, 3];
        assert_eq!(assemble(DrawMode::TriStrip, &order).len(), 2);
        assert_eq!(assemble(DrawMode::Tris, &order).len(), 1);
        assert_eq!(assemble(DrawMode::LineStrip, &order).len(), 3);
    }

    #[test]
    fn ortho_projection_lands_on_pixels() {
        let m = Matrix4::ortho(0.0, 8.0, 0.0, 8.0, -1.0, 1.0);
        let p = to_screen(&m, Rect::new(0, 0, 8, 8), Vec3::new(2.0, 6.0, 0.0));
        let p = p.map(|p| (p.x.round(), p.y.round()));
        assert_eq!(p, Some((2.0, 6.0)));
    }
}
