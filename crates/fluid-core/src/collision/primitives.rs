//! Primitive colliders the fluid is pushed out of.

use glam::{Quat, Vec3};

/// Collider geometry in world space (cm).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColliderShape {
    Sphere {
        center: Vec3,
        radius: f32,
    },
    Capsule {
        a: Vec3,
        b: Vec3,
        radius: f32,
    },
    Box {
        center: Vec3,
        half_extents: Vec3,
        rotation: Quat,
    },
}

/// Push-out result for one particle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrimitiveContact {
    pub position: Vec3,
    /// Outward surface normal at the contact.
    pub normal: Vec3,
}

impl ColliderShape {
    /// Zero or non-finite extents. Such colliders are skipped, never resolved.
    pub fn is_degenerate(&self) -> bool {
        match *self {
            ColliderShape::Sphere { center, radius } => {
                !center.is_finite() || !(radius.is_finite() && radius > 0.0)
            }
            ColliderShape::Capsule { a, b, radius } => {
                !a.is_finite() || !b.is_finite() || !(radius.is_finite() && radius > 0.0)
            }
            ColliderShape::Box {
                center,
                half_extents,
                rotation,
            } => {
                !center.is_finite()
                    || !half_extents.is_finite()
                    || half_extents.min_element() <= 0.0
                    || !rotation.is_finite()
                    || rotation.length_squared() < 1e-12
            }
        }
    }

    /// World AABB grown by `margin`, for candidate filtering.
    pub fn aabb(&self, margin: f32) -> (Vec3, Vec3) {
        let m = Vec3::splat(margin);
        match *self {
            ColliderShape::Sphere { center, radius } => {
                (center - Vec3::splat(radius) - m, center + Vec3::splat(radius) + m)
            }
            ColliderShape::Capsule { a, b, radius } => {
                let r = Vec3::splat(radius);
                (a.min(b) - r - m, a.max(b) + r + m)
            }
            ColliderShape::Box {
                center,
                half_extents,
                rotation,
            } => {
                let rotation = rotation.normalize();
                let extent = (rotation * Vec3::X * half_extents.x).abs()
                    + (rotation * Vec3::Y * half_extents.y).abs()
                    + (rotation * Vec3::Z * half_extents.z).abs();
                (center - extent - m, center + extent + m)
            }
        }
    }

    /// Push a sphere of `radius` at `p` out of the shape.
    pub fn resolve(&self, p: Vec3, radius: f32) -> Option<PrimitiveContact> {
        match *self {
            ColliderShape::Sphere {
                center,
                radius: shape_radius,
            } => push_out_of_sphere(p, center, shape_radius + radius),
            ColliderShape::Capsule {
                a,
                b,
                radius: shape_radius,
            } => {
                let closest = closest_point_on_segment(p, a, b);
                push_out_of_sphere(p, closest, shape_radius + radius)
            }
            ColliderShape::Box {
                center,
                half_extents,
                rotation,
            } => push_out_of_box(p, center, half_extents, rotation.normalize(), radius),
        }
    }
}

fn push_out_of_sphere(p: Vec3, center: Vec3, min_dist: f32) -> Option<PrimitiveContact> {
    let d = p - center;
    let dist_sq = d.length_squared();
    if dist_sq >= min_dist * min_dist {
        return None;
    }
    let dist = dist_sq.sqrt();
    // Coincident with the center: any direction separates, pick up
    let normal = if dist > 1e-6 { d / dist } else { Vec3::Z };
    Some(PrimitiveContact {
        position: center + normal * min_dist,
        normal,
    })
}

/// Closest point to `p` on segment `ab`.
pub fn closest_point_on_segment(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < 1e-12 {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

fn push_out_of_box(
    p: Vec3,
    center: Vec3,
    half_extents: Vec3,
    rotation: Quat,
    radius: f32,
) -> Option<PrimitiveContact> {
    let local = rotation.inverse() * (p - center);
    let clamped = local.clamp(-half_extents, half_extents);
    let outside = local - clamped;
    let outside_dist = outside.length();

    if outside_dist > 1e-6 {
        // Center outside the box: only the particle radius overlaps
        if outside_dist >= radius {
            return None;
        }
        let local_normal = outside / outside_dist;
        return Some(PrimitiveContact {
            position: center + rotation * (clamped + local_normal * radius),
            normal: rotation * local_normal,
        });
    }

    // Center inside: leave through the face with the shortest separating distance
    let depth = half_extents - local.abs();
    let (axis, sign) = if depth.x <= depth.y && depth.x <= depth.z {
        (0, local.x.signum())
    } else if depth.y <= depth.z {
        (1, local.y.signum())
    } else {
        (2, local.z.signum())
    };
    let mut local_normal = Vec3::ZERO;
    local_normal[axis] = if sign == 0.0 { 1.0 } else { sign };
    let mut target = local;
    target[axis] = local_normal[axis] * (half_extents[axis] + radius);
    Some(PrimitiveContact {
        position: center + rotation * target,
        normal: rotation * local_normal,
    })
}
