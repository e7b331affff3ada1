use geist_geom::{Mat4, Vec3};
use proptest::prelude::*;

fn approx_abs_rel(a: f32, b: f32, atol: f32, rtol: f32) -> bool {
    let diff = (a - b).abs();
    let scale = a.abs().max(b.abs());
    diff <= atol + rtol * scale
}

fn coord() -> impl Strategy<Value = f32> {
    -5_000.0f32..5_000.0
}

fn arb_point() -> impl Strategy<Value = Vec3> {
    (coord(), coord(), coord()).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn arb_angle() -> impl Strategy<Value = f32> {
    0.0f32..std::f32::consts::TAU
}

proptest! {
    // M * M^-1 ~= I for view matrices built from arbitrary eyes
    #[test]
    fn look_at_inverse_is_identity(eye in arb_point(), angle in arb_angle()) {
        let target = eye + Vec3::new(angle.cos() * 100.0, -80.0, angle.sin() * 100.0);
        let m = Mat4::look_at(eye, target, Vec3::UP);
        let inv = m.inverse().expect("view matrix is invertible");
        let id = m * inv;
        for row in 0..4 {
            for col in 0..4 {
                let expect = if row == col { 1.0 } else { 0.0 };
                prop_assert!(approx_abs_rel(id.at(row, col), expect, 1e-3, 1e-3));
            }
        }
    }

    // Transforming a point then applying the inverse recovers the point
    #[test]
    fn ortho_view_round_trip(p in arb_point(), size in 16.0f32..4096.0) {
        let proj = Mat4::ortho(-size, size, -size, size, 1000.0, 7000.0);
        let view = Mat4::look_at(Vec3::new(700.0, 1000.0, 0.0), Vec3::ZERO, Vec3::UP);
        let vp = proj * view;
        let inv = vp.inverse().expect("invertible");
        let clip = vp.transform([p.x, p.y, p.z, 1.0]);
        let back = inv.transform(clip);
        prop_assert!(approx_abs_rel(back[0], p.x, 0.05, 1e-3));
        prop_assert!(approx_abs_rel(back[1], p.y, 0.05, 1e-3));
        prop_assert!(approx_abs_rel(back[2], p.z, 0.05, 1e-3));
    }
}

#[test]
fn singular_matrix_has_no_inverse() {
    let m = Mat4 { m: [0.0; 16] };
    assert!(m.inverse().is_none());
}

#[test]
fn identity_is_neutral() {
    let m = Mat4::look_at(Vec3::new(3.0, 9.0, -2.0), Vec3::ZERO, Vec3::UP);
    assert_eq!(m * Mat4::IDENTITY, m);
    assert_eq!(Mat4::IDENTITY * m, m);
}
