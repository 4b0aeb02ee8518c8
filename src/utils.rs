//! Small type aliases and pose conversion helpers.

use nalgebra::{Isometry3, Matrix4, Rotation3, SVector, Vector3};

/// A vector with one entry per arm joint.
pub type Vector7 = SVector<f64, 7>;

/// Converts a 4x4 column-major homogeneous matrix to an [`Isometry3`].
pub fn array_to_isometry(array: &[f64; 16]) -> Isometry3<f64> {
    let rot = Rotation3::from_matrix(
        &Matrix4::from_column_slice(array)
            .remove_column(3)
            .remove_row(3),
    );
    Isometry3::from_parts(
        Vector3::new(array[12], array[13], array[14]).into(),
        rot.into(),
    )
}

/// Converts an [`Isometry3`] back to the 4x4 column-major array form used on
/// the wire.
pub fn isometry_to_array(isometry: &Isometry3<f64>) -> [f64; 16] {
    let mut out = [0.; 16];
    for (i, &x) in isometry.to_homogeneous().iter().enumerate() {
        out[i] = x;
    }
    out
}
