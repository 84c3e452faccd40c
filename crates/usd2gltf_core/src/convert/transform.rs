use glam::{Mat4, Quat, Vec3};

/// Decomposed node transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

const EPSILON: f32 = 1e-6;

impl Transform {
    /// Decompose a matrix into translation, rotation and scale.
    ///
    /// Shear is lost. A negative determinant is folded into a negative X scale.
    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation: rotation.normalize(),
            scale,
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    pub fn is_identity(&self) -> bool {
        self.translation.abs_diff_eq(Vec3::ZERO, EPSILON)
            && self.rotation.abs_diff_eq(Quat::IDENTITY, EPSILON)
            && self.scale.abs_diff_eq(Vec3::ONE, EPSILON)
    }

    /// Flip the rotation into the hemisphere of `previous` so interpolation
    /// takes the short path.
    pub fn align_rotation(&mut self, previous: Quat) {
        if previous.dot(self.rotation) < 0.0 {
            self.rotation = -self.rotation;
        }
    }

    // Node fields, omitted when they hold the default.

    pub fn translation_field(&self) -> Option<[f32; 3]> {
        (!self.translation.abs_diff_eq(Vec3::ZERO, EPSILON)).then(|| self.translation.to_array())
    }

    pub fn rotation_field(&self) -> Option<[f32; 4]> {
        let identity = self.rotation.abs_diff_eq(Quat::IDENTITY, EPSILON)
            || self.rotation.abs_diff_eq(-Quat::IDENTITY, EPSILON);
        (!identity).then(|| self.rotation.to_array())
    }

    pub fn scale_field(&self) -> Option<[f32; 3]> {
        (!self.scale.abs_diff_eq(Vec3::ONE, EPSILON)).then(|| self.scale.to_array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_roundtrip() {
        let transform = Transform {
            translation: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_y(0.5),
            scale: Vec3::new(2.0, 2.0, 2.0),
        };
        let back = Transform::from_matrix(transform.to_matrix());
        assert!(back.translation.abs_diff_eq(transform.translation, 1e-5));
        assert!(back.rotation.abs_diff_eq(transform.rotation, 1e-5));
        assert!(back.scale.abs_diff_eq(transform.scale, 1e-5));
    }

    #[test]
    fn test_identity_fields_are_omitted() {
        let transform = Transform::from_matrix(Mat4::IDENTITY);
        assert!(transform.is_identity());
        assert_eq!(transform.translation_field(), None);
        assert_eq!(transform.rotation_field(), None);
        assert_eq!(transform.scale_field(), None);

        let moved = Transform::from_matrix(Mat4::from_translation(Vec3::X));
        assert_eq!(moved.translation_field(), Some([1.0, 0.0, 0.0]));
    }

    #[test]
    fn test_align_rotation() {
        let mut transform = Transform {
            rotation: -Quat::from_rotation_z(0.1),
            ..Default::default()
        };
        transform.align_rotation(Quat::IDENTITY);
        assert!(transform.rotation.w > 0.0);
    }
}
