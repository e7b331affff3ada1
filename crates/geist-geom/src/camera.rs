use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use crate::{Aabb, Mat4, Vec2, Vec3};

// Any distance works under an orthographic projection; it only has to keep the eye above the terrain.
const EYE_DISTANCE: f32 = 1000.0;
const NEAR_PLANE: f32 = 1000.0;
const FAR_PLANE: f32 = 7000.0;

const MARCH_STEP: f32 = 400.0;
const MIN_CAMERA_HEIGHT: f32 = 128.0;
const MAX_CAMERA_HEIGHT: f32 = 512.0;

/// Integer pixel position; y grows downward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

/// Inclusive pixel rectangle in screen space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenRect {
    pub min: ScreenPoint,
    pub max: ScreenPoint,
}

impl ScreenRect {
    pub fn bounding(points: impl IntoIterator<Item = ScreenPoint>) -> Option<Self> {
        let mut it = points.into_iter();
        let first = it.next()?;
        let mut rect = ScreenRect {
            min: first,
            max: first,
        };
        for p in it {
            rect.min.x = rect.min.x.min(p.x);
            rect.min.y = rect.min.y.min(p.y);
            rect.max.x = rect.max.x.max(p.x);
            rect.max.y = rect.max.y.max(p.y);
        }
        Some(rect)
    }
}

/// Orthographic camera looking down at the world from a fixed angle and elevation.
///
/// `zoom` is the world-space extent covered by one viewport, so a viewport of
/// `width` pixels spans `zoom` world units along the camera's right axis.
#[derive(Clone, Debug)]
pub struct OrthoCamera {
    width: u32,
    height: u32,
    eye: Vec3,
    target: Vec3,
    up: Vec3,
    right: Vec3,
    zoom: f32,
    projection: Mat4,
    view: Mat4,
    view_projection: Mat4,
    inverse_view_projection: Mat4,
}

impl OrthoCamera {
    pub fn new(width: u32, height: u32) -> Self {
        let mut cam = Self {
            width,
            height,
            eye: Vec3::ZERO,
            target: Vec3::ZERO,
            up: Vec3::UP,
            right: Vec3::new(0.0, 0.0, 1.0),
            zoom: 1.0,
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            inverse_view_projection: Mat4::IDENTITY,
        };
        cam.look_at(Vec3::ZERO, 1.0, 0.0, FRAC_PI_4);
        cam
    }

    fn eye_position(target: Vec3, angle: f32, elevation: f32) -> Vec3 {
        // Elevation 0 is horizontal; invert so 0 is straight up.
        let deelevation = FRAC_PI_2 - elevation;
        let horizontal = EYE_DISTANCE * deelevation.tan();
        // Angle 0 looks north.
        Vec3::new(
            target.x + angle.cos() * horizontal,
            target.y + EYE_DISTANCE,
            target.z + angle.sin() * horizontal,
        )
    }

    pub fn look_at(&mut self, target: Vec3, zoom: f32, angle: f32, elevation: f32) {
        self.target = target;
        self.zoom = zoom;
        self.eye = Self::eye_position(target, angle, elevation);

        let dir = (target - self.eye).normalized();
        let up_hint = if elevation >= FRAC_PI_2 {
            // Straight down: borrow the forward vector of a 45 degree view and nudge it up.
            let dummy_eye = Self::eye_position(target, angle, FRAC_PI_4);
            let dummy_forward = (target - dummy_eye).normalized();
            Vec3::new(dummy_forward.x, dummy_forward.y + 1.0, dummy_forward.z)
        } else {
            Vec3::UP
        };
        self.right = dir.cross(up_hint).normalized();
        self.up = self.right.cross(dir).normalized();

        let size = zoom / 2.0;
        self.projection = Mat4::ortho(-size, size, -size, size, NEAR_PLANE, FAR_PLANE);
        self.view = Mat4::look_at(self.eye, target, self.up);
        self.view_projection = self.projection * self.view;
        self.inverse_view_projection = self.view_projection.inverse().unwrap_or(Mat4::IDENTITY);
    }

    /// Centres the viewport on the given tile of the screen grid whose tile (0, 0) is
    /// centred on the world origin, then slides the camera along its view axis so
    /// its height stays in a range where the terrain lies between the clip planes.
    pub fn look_at_tile(&mut self, tile_x: i32, tile_y: i32, zoom: f32, angle: f32, elevation: f32) {
        // Basis vectors do not depend on position; settle them first.
        self.look_at(Vec3::ZERO, zoom, angle, elevation);
        let up = self.up;
        let right = self.right;
        let mut pos = right * (self.visible_world_width() * tile_x as f32)
            - up * (self.visible_world_height() * tile_y as f32);
        self.look_at(pos, zoom, angle, elevation);

        let forward = self.forward();
        if forward.y < -1e-6 {
            while pos.y < MIN_CAMERA_HEIGHT {
                pos -= forward * MARCH_STEP;
            }
            while pos.y > MAX_CAMERA_HEIGHT {
                pos += forward * MARCH_STEP;
            }
            self.look_at(pos, zoom, angle, elevation);
        }
    }

    #[inline]
    pub fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    #[inline]
    pub fn target(&self) -> Vec3 {
        self.target
    }

    #[inline]
    pub fn up(&self) -> Vec3 {
        self.up
    }

    #[inline]
    pub fn right(&self) -> Vec3 {
        self.right
    }

    #[inline]
    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).normalized()
    }

    #[inline]
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn projection_matrix(&self) -> &Mat4 {
        &self.projection
    }

    pub fn view_matrix(&self) -> &Mat4 {
        &self.view
    }

    #[inline]
    pub fn visible_world_width(&self) -> f32 {
        self.zoom
    }

    #[inline]
    pub fn visible_world_height(&self) -> f32 {
        self.zoom
    }

    /// World point to sub-pixel screen position (origin top-left, y down).
    pub fn project_f(&self, world: Vec3) -> Vec2 {
        let clip = self
            .view_projection
            .transform([world.x, world.y, world.z, 1.0]);
        let w = if clip[3].abs() > f32::EPSILON { clip[3] } else { 1.0 };
        let ndc_x = clip[0] / w;
        let ndc_y = clip[1] / w;
        let win_x = self.width as f32 * (ndc_x + 1.0) * 0.5;
        let win_y = self.height as f32 * (ndc_y + 1.0) * 0.5;
        Vec2::new(win_x, self.height as f32 - win_y)
    }

    /// Rounded to the nearest pixel, halves rounding up.
    pub fn project(&self, world: Vec3) -> ScreenPoint {
        let p = self.project_f(world);
        ScreenPoint {
            x: (p.x + 0.5).floor() as i32,
            y: (p.y + 0.5).floor() as i32,
        }
    }

    /// Screen position to the matching world point on the near plane.
    pub fn unproject(&self, screen: Vec2) -> Vec3 {
        let ndc_x = 2.0 * screen.x / self.width as f32 - 1.0;
        let ndc_y = 2.0 * (self.height as f32 - screen.y) / self.height as f32 - 1.0;
        let out = self
            .inverse_view_projection
            .transform([ndc_x, ndc_y, -1.0, 1.0]);
        let w = if out[3].abs() > f32::EPSILON { out[3] } else { 1.0 };
        Vec3::new(out[0] / w, out[1] / w, out[2] / w)
    }

    /// Screen-space bounding rectangle of a box's projected corners.
    pub fn project_aabb(&self, aabb: &Aabb) -> ScreenRect {
        let corners = aabb.corners().map(|c| self.project(c));
        // Eight corners are always present.
        ScreenRect::bounding(corners).unwrap_or(ScreenRect {
            min: ScreenPoint::default(),
            max: ScreenPoint::default(),
        })
    }

    /// World-space XZ rectangle `(min_x, min_z, max_x, max_z)` seen through the given
    /// screen rectangle, for geometry whose height lies in `[y_min, y_max]`.
    /// `None` when the view axis is parallel to the ground.
    pub fn ground_footprint(
        &self,
        screen_min: Vec2,
        screen_max: Vec2,
        y_min: f32,
        y_max: f32,
    ) -> Option<(f32, f32, f32, f32)> {
        let forward = self.forward();
        if forward.y.abs() < 1e-6 {
            return None;
        }
        let corners = [
            Vec2::new(screen_min.x, screen_min.y),
            Vec2::new(screen_max.x, screen_min.y),
            Vec2::new(screen_min.x, screen_max.y),
            Vec2::new(screen_max.x, screen_max.y),
        ];
        let mut min_x = f32::MAX;
        let mut min_z = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_z = f32::MIN;
        for corner in corners {
            let origin = self.unproject(corner);
            for plane_y in [y_min, y_max] {
                let t = (plane_y - origin.y) / forward.y;
                let hit = origin + forward * t;
                min_x = min_x.min(hit.x);
                min_z = min_z.min(hit.z);
                max_x = max_x.max(hit.x);
                max_z = max_z.max(hit.z);
            }
        }
        Some((min_x, min_z, max_x, max_z))
    }
}
