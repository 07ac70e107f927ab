use bytemuck::{Pod, Zeroable};

use crate::coords::{IntRect, Transform};

use super::Path;

/// One vertex of a coverage span: device position plus AA coverage.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct PathVertex {
    pub pos: [f32; 2],
    pub coverage: f32,
}

impl PathVertex {
    const ATTRS: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32];

    pub(crate) fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<PathVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

/// Rasterizes `path` under `transform` into an A8 mask covering `bounds`.
pub fn coverage_mask(path: &Path, transform: Transform, bounds: IntRect, aa: bool) -> Option<tiny_skia::Mask> {
    if bounds.is_empty() {
        return None;
    }
    let mut mask = tiny_skia::Mask::new(bounds.width as u32, bounds.height as u32)?;
    let local = transform.post_translate(-bounds.x as f32, -bounds.y as f32);
    mask.fill_path(path.skia(), path.fill_rule().to_skia(), aa, local.to_skia());
    Some(mask)
}

/// Converts the path's coverage inside `bounds` into triangle pairs, one
/// quad per horizontal run of equal coverage. Returns `None` when the path
/// covers nothing.
pub fn tessellate_spans(path: &Path, transform: Transform, bounds: IntRect, aa: bool) -> Option<Vec<PathVertex>> {
    let mask = coverage_mask(path, transform, bounds, aa)?;
    let width = bounds.width as usize;
    let mut out = Vec::new();

    for (row_idx, row) in mask.data().chunks_exact(width).enumerate() {
        let y0 = (bounds.y + row_idx as i32) as f32;
        let mut x = 0;
        while x < width {
            let a = row[x];
            let start = x;
            while x < width && row[x] == a {
                x += 1;
            }
            if a == 0 {
                continue;
            }
            let x0 = (bounds.x + start as i32) as f32;
            let x1 = (bounds.x + x as i32) as f32;
            push_quad(&mut out, x0, y0, x1, y0 + 1.0, a as f32 / 255.0);
        }
    }

    (!out.is_empty()).then_some(out)
}

fn push_quad(out: &mut Vec<PathVertex>, x0: f32, y0: f32, x1: f32, y1: f32, coverage: f32) {
    let v = |x: f32, y: f32| PathVertex { pos: [x, y], coverage };
    out.extend_from_slice(&[v(x0, y0), v(x1, y0), v(x1, y1), v(x0, y0), v(x1, y1), v(x0, y1)]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Rect;

    #[test]
    fn aligned_rect_becomes_one_span_per_row() {
        let p = Path::rect(Rect::new(2.0, 1.0, 4.0, 3.0)).unwrap();
        let verts = tessellate_spans(&p, Transform::identity(), IntRect::new(0, 0, 8, 8), false).unwrap();
        assert_eq!(verts.len(), 3 * 6);
        assert!(verts.iter().all(|v| v.coverage == 1.0));
        assert_eq!(verts[0].pos, [2.0, 1.0]);
        assert_eq!(verts[2].pos, [6.0, 2.0]);
    }

    #[test]
    fn spans_are_offset_by_bounds_origin() {
        let p = Path::rect(Rect::new(10.0, 10.0, 2.0, 1.0)).unwrap();
        let verts = tessellate_spans(&p, Transform::identity(), IntRect::new(10, 10, 2, 1), false).unwrap();
        assert_eq!(verts.len(), 6);
        assert_eq!(verts[0].pos, [10.0, 10.0]);
        assert_eq!(verts[4].pos, [12.0, 11.0]);
    }

    #[test]
    fn path_outside_bounds_yields_nothing() {
        let p = Path::rect(Rect::new(50.0, 50.0, 2.0, 2.0)).unwrap();
        assert!(tessellate_spans(&p, Transform::identity(), IntRect::new(0, 0, 8, 8), true).is_none());
    }

    #[test]
    fn half_pixel_edge_has_partial_coverage() {
        let p = Path::rect(Rect::new(0.0, 0.0, 2.5, 1.0)).unwrap();
        let mask = coverage_mask(&p, Transform::identity(), IntRect::new(0, 0, 4, 1), true).unwrap();
        assert!(mask.data()[0] > 250);
        assert!(mask.data()[2] > 0 && mask.data()[2] < 255);
        assert_eq!(mask.data()[3], 0);
    }
}
