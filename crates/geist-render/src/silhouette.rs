use geist_geom::{Aabb, OrthoCamera, Vec2, Vec3};
use geist_world::{CHUNK_DEPTH, CHUNK_WIDTH, ChunkCoord, ChunkFingerprint};
use image::{Rgb, RgbImage};

use crate::{RenderError, RenderStyle, Renderer, Scene, SceneOptions};

const MIN_COLUMN_HEIGHT: f32 = 48.0;
const COLUMN_HEIGHT_RANGE: u8 = 96;

/// Software stand-in for a real rasterizer: every chunk becomes a flat-topped column
/// whose height and colour come from its fingerprint, drawn back to front.
pub struct SilhouetteRenderer {
    frame: RgbImage,
    draws: u64,
}

impl SilhouetteRenderer {
    pub fn new(width: u32, height: u32) -> Result<Self, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::Setup(format!(
                "surface of {width}x{height} pixels"
            )));
        }
        Ok(Self {
            frame: RgbImage::new(width, height),
            draws: 0,
        })
    }

    /// Chunks drawn since creation.
    pub fn draw_count(&self) -> u64 {
        self.draws
    }

    fn column(coord: ChunkCoord, fp: &ChunkFingerprint) -> Aabb {
        let (bx, bz) = coord.block_origin();
        let h = MIN_COLUMN_HEIGHT + (fp.0[0] % COLUMN_HEIGHT_RANGE) as f32;
        Aabb::from_origin_size(
            Vec3::new(bx as f32, 0.0, bz as f32),
            CHUNK_WIDTH as f32,
            h,
            CHUNK_DEPTH as f32,
        )
    }

    fn top_color(style: RenderStyle, fp: &ChunkFingerprint) -> [u8; 3] {
        let b = fp.0;
        match style {
            RenderStyle::Normal => [60 + b[1] % 40, 110 + b[2] % 70, 40 + b[3] % 40],
            RenderStyle::Cave => {
                let g = 70 + b[1] % 60;
                [g, g, g.saturating_add(10)]
            }
            RenderStyle::Nether => [120 + b[1] % 80, 30 + b[2] % 30, 20 + b[3] % 20],
        }
    }

    fn fill_convex(&mut self, poly: &[Vec2], color: [u8; 3]) {
        if poly.len() < 3 {
            return;
        }
        let (w, h) = self.frame.dimensions();
        let min_x = poly.iter().map(|p| p.x).fold(f32::MAX, f32::min).floor().max(0.0);
        let min_y = poly.iter().map(|p| p.y).fold(f32::MAX, f32::min).floor().max(0.0);
        let max_x = poly.iter().map(|p| p.x).fold(f32::MIN, f32::max).ceil().min(w as f32);
        let max_y = poly.iter().map(|p| p.y).fold(f32::MIN, f32::max).ceil().min(h as f32);
        if min_x >= max_x || min_y >= max_y {
            return;
        }
        let area: f32 = (0..poly.len())
            .map(|i| cross(poly[i], poly[(i + 1) % poly.len()], Vec2::new(0.0, 0.0)))
            .sum();
        let sign = if area < 0.0 { -1.0 } else { 1.0 };
        for py in min_y as u32..max_y as u32 {
            for px in min_x as u32..max_x as u32 {
                let p = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);
                let inside = (0..poly.len())
                    .all(|i| sign * cross(poly[i], poly[(i + 1) % poly.len()], p) >= 0.0);
                if inside {
                    self.frame.put_pixel(px, py, Rgb(color));
                }
            }
        }
    }
}

/// z of (b - a) x (p - a).
fn cross(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Monotone chain hull, counter-clockwise in a y-up frame.
fn convex_hull(mut pts: Vec<Vec2>) -> Vec<Vec2> {
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    if pts.len() < 3 {
        return pts;
    }
    let mut hull: Vec<Vec2> = Vec::with_capacity(pts.len() * 2);
    for pass in 0..2 {
        let start = hull.len();
        let iter: Box<dyn Iterator<Item = &Vec2>> = if pass == 0 {
            Box::new(pts.iter())
        } else {
            Box::new(pts.iter().rev())
        };
        for &p in iter {
            while hull.len() >= start + 2
                && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
            {
                hull.pop();
            }
            hull.push(p);
        }
        hull.pop();
    }
    hull
}

fn shade(c: [u8; 3], f: f32) -> [u8; 3] {
    c.map(|v| (v as f32 * f).round().clamp(0.0, 255.0) as u8)
}

impl Renderer for SilhouetteRenderer {
    fn reset(&mut self) {
        for p in self.frame.pixels_mut() {
            *p = Rgb([0, 0, 0]);
        }
    }

    fn clear(&mut self, color: [u8; 3]) {
        for p in self.frame.pixels_mut() {
            *p = Rgb(color);
        }
    }

    fn draw(
        &mut self,
        camera: &OrthoCamera,
        scene: Scene<'_>,
        options: &SceneOptions,
    ) -> Result<(), RenderError> {
        let forward = camera.forward();
        let mut order: Vec<_> = scene
            .iter()
            .map(|(c, fp)| {
                let b = Self::column(*c, fp);
                let centre = (b.min + b.max) * 0.5;
                (centre.dot(forward), b, fp)
            })
            .collect();
        // Farthest first.
        order.sort_by(|a, b| b.0.total_cmp(&a.0));
        for (_, column, fp) in order {
            let top = Self::top_color(options.style, fp);
            let hull = convex_hull(column.corners().iter().map(|c| camera.project_f(*c)).collect());
            self.fill_convex(&hull, shade(top, 0.6));
            let y = column.max.y;
            let face = [
                Vec3::new(column.min.x, y, column.min.z),
                Vec3::new(column.max.x, y, column.min.z),
                Vec3::new(column.max.x, y, column.max.z),
                Vec3::new(column.min.x, y, column.max.z),
            ]
            .map(|c| camera.project_f(c));
            self.fill_convex(&face, top);
            self.draws += 1;
        }
        Ok(())
    }

    fn capture_image(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, RenderError> {
        let (fb_width, fb_height) = self.frame.dimensions();
        let fits = x.checked_add(width).is_some_and(|r| r <= fb_width)
            && y.checked_add(height).is_some_and(|b| b <= fb_height);
        if !fits {
            return Err(RenderError::CaptureBounds {
                x,
                y,
                width,
                height,
                fb_width,
                fb_height,
            });
        }
        Ok(image::imageops::crop_imm(&self.frame, x, y, width, height).to_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hull_of_square_with_interior_point() {
        let hull = convex_hull(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(4.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(4.0, 4.0),
            Vec2::new(0.0, 4.0),
        ]);
        assert_eq!(hull.len(), 4);
        assert!(!hull.contains(&Vec2::new(2.0, 2.0)));
    }

    #[test]
    fn fill_covers_triangle_interior_only() {
        let mut r = SilhouetteRenderer::new(8, 8).unwrap();
        r.clear([0, 0, 0]);
        r.fill_convex(
            &[Vec2::new(0.0, 0.0), Vec2::new(8.0, 0.0), Vec2::new(0.0, 8.0)],
            [255, 0, 0],
        );
        assert_eq!(r.frame.get_pixel(1, 1), &Rgb([255, 0, 0]));
        assert_eq!(r.frame.get_pixel(7, 7), &Rgb([0, 0, 0]));
    }
}
