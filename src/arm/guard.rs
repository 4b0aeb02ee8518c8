//! The continuity guard that stands between user callbacks and the wire.
//!
//! Commands are checked against the previous cycle's accepted command: the
//! per-axis first derivative must stay inside the configured limits and pose
//! commands must be valid rigid transforms. An offending command is rejected
//! as-is, never smoothed; the verdict depends only on the
//! (previous, current, time step) triple.

use std::fmt;

use nalgebra::Rotation3;

use crate::utils::array_to_isometry;

/// Default per-joint velocity limit in \[rad/s\].
const DEFAULT_JOINT_VELOCITY: f64 = 2.6;
/// Default per-joint acceleration limit in \[rad/s^2\].
const DEFAULT_JOINT_ACCELERATION: f64 = 15.;
/// Default per-joint torque rate limit in \[Nm/s\].
const DEFAULT_TORQUE_RATE: f64 = 1000.;

/// Limits and tolerances applied by the guard.
///
/// The defaults are conservative values for an unloaded A7; deployments tune
/// them to their hardware.
#[derive(Debug, Clone)]
pub struct GuardLimits {
    /// Per-joint velocity limit for joint position commands in \[rad/s\].
    pub joint_velocity: [f64; 7],
    /// Per-joint acceleration limit for joint velocity commands in \[rad/s^2\].
    pub joint_acceleration: [f64; 7],
    /// Per-joint torque rate limit in \[Nm/s\].
    pub torque_rate: [f64; 7],
    /// Translational velocity limit for pose commands in \[m/s\].
    pub translational_velocity: f64,
    /// Rotational velocity limit for pose commands in \[rad/s\].
    pub rotational_velocity: f64,
    /// Translational acceleration limit for twist commands in \[m/s^2\].
    pub translational_acceleration: f64,
    /// Rotational acceleration limit for twist commands in \[rad/s^2\].
    pub rotational_acceleration: f64,
    /// Tolerance for the orthonormality check of pose commands.
    pub orthonormal_tolerance: f64,
    /// Cycle time assumed when the measured time step is zero, i.e. on the
    /// first cycle of a session.
    pub nominal_cycle_time: f64,
}

impl Default for GuardLimits {
    fn default() -> Self {
        GuardLimits {
            joint_velocity: [DEFAULT_JOINT_VELOCITY; 7],
            joint_acceleration: [DEFAULT_JOINT_ACCELERATION; 7],
            torque_rate: [DEFAULT_TORQUE_RATE; 7],
            translational_velocity: 1.7,
            rotational_velocity: 2.5,
            translational_acceleration: 13.,
            rotational_acceleration: 25.,
            orthonormal_tolerance: 1e-5,
            nominal_cycle_time: 1e-3,
        }
    }
}

/// A rejected command, with the axis and limit that were violated.
#[derive(Debug, Clone, PartialEq)]
pub enum Discontinuity {
    /// A commanded value is NaN or infinite.
    NotFinite,
    /// A pose command is not a rigid transform.
    MalformedTransform,
    /// A per-joint rate limit was exceeded.
    JointRate {
        joint: usize,
        commanded: f64,
        limit: f64,
    },
    /// A per-joint torque rate limit was exceeded.
    TorqueRate {
        joint: usize,
        commanded: f64,
        limit: f64,
    },
    /// The translational rate limit was exceeded.
    TranslationalRate { commanded: f64, limit: f64 },
    /// The rotational rate limit was exceeded.
    RotationalRate { commanded: f64, limit: f64 },
}

impl fmt::Display for Discontinuity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discontinuity::NotFinite => write!(f, "commanded value is NaN or infinite"),
            Discontinuity::MalformedTransform => {
                write!(f, "commanded pose is not a rigid transform")
            }
            Discontinuity::JointRate {
                joint,
                commanded,
                limit,
            } => write!(
                f,
                "joint {} commanded rate {:.4} exceeds limit {:.4}",
                joint, commanded, limit
            ),
            Discontinuity::TorqueRate {
                joint,
                commanded,
                limit,
            } => write!(
                f,
                "joint {} commanded torque rate {:.4} exceeds limit {:.4}",
                joint, commanded, limit
            ),
            Discontinuity::TranslationalRate { commanded, limit } => write!(
                f,
                "commanded translational rate {:.4} exceeds limit {:.4}",
                commanded, limit
            ),
            Discontinuity::RotationalRate { commanded, limit } => write!(
                f,
                "commanded rotational rate {:.4} exceeds limit {:.4}",
                commanded, limit
            ),
        }
    }
}

/// The time step used for rate checks. The first cycle of a session reports a
/// zero step; rates then assume the nominal cycle time.
pub(crate) fn effective_time_step(time_step: f64, limits: &GuardLimits) -> f64 {
    if time_step > 0. {
        time_step
    } else {
        limits.nominal_cycle_time
    }
}

fn check_finite(values: &[f64]) -> Result<(), Discontinuity> {
    if values.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(Discontinuity::NotFinite)
    }
}

/// Checks the per-joint first derivative of `commanded` against `previous`.
///
/// Used with velocity limits for position commands and with acceleration
/// limits for velocity commands.
pub fn check_joint_rates(
    commanded: &[f64; 7],
    previous: &[f64; 7],
    time_step: f64,
    limits: &[f64; 7],
) -> Result<(), Discontinuity> {
    check_finite(commanded)?;
    for i in 0..7 {
        let rate = (commanded[i] - previous[i]) / time_step;
        if rate.abs() > limits[i] {
            return Err(Discontinuity::JointRate {
                joint: i,
                commanded: rate,
                limit: limits[i],
            });
        }
    }
    Ok(())
}

/// Checks the per-joint torque derivative of `commanded` against `previous`.
pub fn check_torque_rates(
    commanded: &[f64; 7],
    previous: &[f64; 7],
    time_step: f64,
    limits: &[f64; 7],
) -> Result<(), Discontinuity> {
    check_finite(commanded)?;
    for i in 0..7 {
        let rate = (commanded[i] - previous[i]) / time_step;
        if rate.abs() > limits[i] {
            return Err(Discontinuity::TorqueRate {
                joint: i,
                commanded: rate,
                limit: limits[i],
            });
        }
    }
    Ok(())
}

/// Checks that a pose command is a rigid transform and that its translational
/// and rotational deltas to the previous pose stay inside the velocity limits.
pub fn check_pose_rates(
    commanded: &[f64; 16],
    previous: &[f64; 16],
    time_step: f64,
    limits: &GuardLimits,
) -> Result<(), Discontinuity> {
    check_finite(commanded)?;
    if !is_rigid_transform(commanded, limits.orthonormal_tolerance) {
        return Err(Discontinuity::MalformedTransform);
    }
    let pose = array_to_isometry(commanded);
    let last_pose = array_to_isometry(previous);

    let translational = (pose.translation.vector - last_pose.translation.vector).norm() / time_step;
    if translational > limits.translational_velocity {
        return Err(Discontinuity::TranslationalRate {
            commanded: translational,
            limit: limits.translational_velocity,
        });
    }
    let mut rot_diff: Rotation3<f64> =
        pose.rotation.to_rotation_matrix() * last_pose.rotation.to_rotation_matrix().transpose();
    rot_diff.renormalize();
    let rotational = rot_diff.scaled_axis().norm() / time_step;
    if rotational > limits.rotational_velocity {
        return Err(Discontinuity::RotationalRate {
            commanded: rotational,
            limit: limits.rotational_velocity,
        });
    }
    Ok(())
}

/// Checks a twist command against the previous one, translational and
/// rotational parts separately.
pub fn check_twist_rates(
    commanded: &[f64; 6],
    previous: &[f64; 6],
    time_step: f64,
    limits: &GuardLimits,
) -> Result<(), Discontinuity> {
    check_finite(commanded)?;
    let part_rate = |offset: usize| -> f64 {
        let dx = commanded[offset] - previous[offset];
        let dy = commanded[offset + 1] - previous[offset + 1];
        let dz = commanded[offset + 2] - previous[offset + 2];
        (dx * dx + dy * dy + dz * dz).sqrt() / time_step
    };
    let translational = part_rate(0);
    if translational > limits.translational_acceleration {
        return Err(Discontinuity::TranslationalRate {
            commanded: translational,
            limit: limits.translational_acceleration,
        });
    }
    let rotational = part_rate(3);
    if rotational > limits.rotational_acceleration {
        return Err(Discontinuity::RotationalRate {
            commanded: rotational,
            limit: limits.rotational_acceleration,
        });
    }
    Ok(())
}

/// Whether the given column-major 4x4 matrix is a rigid transform: orthonormal
/// rotation columns and rows within tolerance and a `0 0 0 1` homogeneous row.
#[allow(clippy::float_cmp)]
pub fn is_rigid_transform(transform: &[f64; 16], tolerance: f64) -> bool {
    if transform[3] != 0. || transform[7] != 0. || transform[11] != 0. || transform[15] != 1. {
        return false;
    }
    for j in 0..3 {
        let column_norm = (transform[j * 4].powi(2)
            + transform[j * 4 + 1].powi(2)
            + transform[j * 4 + 2].powi(2))
        .sqrt();
        if (column_norm - 1.).abs() > tolerance {
            return false;
        }
    }
    for i in 0..3 {
        let row_norm =
            (transform[i].powi(2) + transform[4 + i].powi(2) + transform[8 + i].powi(2)).sqrt();
        if (row_norm - 1.).abs() > tolerance {
            return false;
        }
    }
    true
}
