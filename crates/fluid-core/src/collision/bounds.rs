use glam::{Quat, Vec3};

use crate::params::BoundsConfig;

/// Box-shaped simulation domain (AABB when unrotated, OBB otherwise).
///
/// Particles are kept inside by projecting them into the box's local frame,
/// clamping against `half_extents - radius`, and rotating the correction back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundsVolume {
    pub center: Vec3,
    pub half_extents: Vec3,
    pub rotation: Quat,
    inv_rotation: Quat,
    pub restitution: f32,
    pub friction: f32,
}

/// Result of pushing a point back inside the bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundsContact {
    pub position: Vec3,
    /// Inward-facing world normal of the wall that was hit hardest.
    pub normal: Vec3,
}

impl BoundsVolume {
    /// `None` for disabled or zero-extent bounds.
    pub fn from_config(config: &BoundsConfig) -> Option<Self> {
        if !config.enabled || is_degenerate(config.half_extents) {
            return None;
        }
        let rotation = config.rotation.normalize();
        if !rotation.is_finite() {
            return None;
        }
        Some(Self {
            center: config.center,
            half_extents: config.half_extents,
            rotation,
            inv_rotation: rotation.inverse(),
            restitution: config.restitution,
            friction: config.friction,
        })
    }

    pub fn is_axis_aligned(&self) -> bool {
        self.rotation.abs_diff_eq(Quat::IDENTITY, 1e-6)
    }

    /// World-space AABB enclosing the volume.
    pub fn world_aabb(&self) -> (Vec3, Vec3) {
        let axes = [
            self.rotation * Vec3::X * self.half_extents.x,
            self.rotation * Vec3::Y * self.half_extents.y,
            self.rotation * Vec3::Z * self.half_extents.z,
        ];
        let extent = axes[0].abs() + axes[1].abs() + axes[2].abs();
        (self.center - extent, self.center + extent)
    }

    pub fn contains(&self, p: Vec3, margin: f32) -> bool {
        let local = self.inv_rotation * (p - self.center);
        let limit = self.half_extents + Vec3::splat(margin);
        local.abs().cmple(limit).all()
    }

    /// Clamp a sphere of `radius` at `p` inside the volume.
    ///
    /// Returns `None` when no wall is touched. If the volume is thinner than
    /// the particle along some axis the particle is centered on that axis.
    pub fn project_inside(&self, p: Vec3, radius: f32) -> Option<BoundsContact> {
        let local = self.inv_rotation * (p - self.center);
        let limit = (self.half_extents - Vec3::splat(radius)).max(Vec3::ZERO);
        let clamped = local.clamp(-limit, limit);
        let push = clamped - local;
        if push == Vec3::ZERO {
            return None;
        }

        let abs = push.abs();
        let local_normal = if abs.x >= abs.y && abs.x >= abs.z {
            Vec3::new(push.x.signum(), 0.0, 0.0)
        } else if abs.y >= abs.z {
            Vec3::new(0.0, push.y.signum(), 0.0)
        } else {
            Vec3::new(0.0, 0.0, push.z.signum())
        };

        Some(BoundsContact {
            position: self.center + self.rotation * clamped,
            normal: self.rotation * local_normal,
        })
    }
}

fn is_degenerate(half_extents: Vec3) -> bool {
    !half_extents.is_finite() || half_extents.min_element() <= 0.0
}

/// Split `velocity` at a contact into normal and tangential parts and apply
/// restitution to an incoming normal component and friction to the tangent.
///
/// `incoming` is the velocity the particle had before the solve moved it.
/// Impacts slower than `resting_speed` are treated as resting contact and only
/// lose their approaching component.
pub fn contact_response(
    velocity: Vec3,
    incoming: Vec3,
    normal: Vec3,
    restitution: f32,
    friction: f32,
    resting_speed: f32,
) -> Vec3 {
    let vn = velocity.dot(normal);
    let v_in = incoming.dot(normal);
    let vn_new = if -v_in > resting_speed {
        vn.max(-restitution * v_in)
    } else {
        vn.max(0.0)
    };
    let tangent = velocity - normal * vn;
    normal * vn_new + tangent * (1.0 - friction).clamp(0.0, 1.0)
}
