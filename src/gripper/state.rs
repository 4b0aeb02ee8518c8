//! Contains the gripper state snapshot.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gripper::wire::GripperStateFrame;

/// Describes the gripper state.
#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct GripperState {
    /// Current opening width in \[m\].
    pub width: f64,

    /// Maximum opening width in \[m\], estimated during homing. Changing the
    /// fingers requires a new homing run.
    pub max_width: f64,

    /// Whether an object is currently grasped.
    pub grasped: bool,

    /// Finger drive temperature in \[°C\].
    pub temperature: u16,

    /// Strictly monotonic time since server start.
    pub time: Duration,
}

impl From<GripperStateFrame> for GripperState {
    fn from(frame: GripperStateFrame) -> Self {
        GripperState {
            width: frame.width,
            max_width: frame.max_width,
            grasped: frame.grasped,
            temperature: frame.temperature,
            time: Duration::from_millis(frame.message_id as u64),
        }
    }
}
