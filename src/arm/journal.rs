//! Bounded rolling record of recent control cycles, handed to the caller
//! inside a control fault.

use std::collections::VecDeque;

use crate::arm::state::ArmState;
use crate::arm::wire::CycleFrame;

/// The values that went on the wire in one cycle, one group per command
/// variant plus the torque stream.
#[derive(Debug, Copy, Clone)]
pub struct SentCommand {
    /// Commanded joint positions in \[rad\].
    pub joint_positions: [f64; 7],
    /// Commanded joint velocities in \[rad/s\].
    pub joint_velocities: [f64; 7],
    /// Commanded end effector pose, 4x4 column-major.
    pub ee_pose: [f64; 16],
    /// Commanded end effector twist.
    pub ee_twist: [f64; 6],
    /// Commanded joint torques in \[Nm\].
    pub torques: [f64; 7],
}

impl From<&CycleFrame> for SentCommand {
    fn from(frame: &CycleFrame) -> Self {
        SentCommand {
            joint_positions: frame.motion.q_c,
            joint_velocities: frame.motion.dq_c,
            ee_pose: frame.motion.pose_c,
            ee_twist: frame.motion.twist_c,
            torques: frame.torque.tau_c,
        }
    }
}

/// One journal row: the command sent in cycle n paired with the state the
/// controller produced in cycle n+1.
#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub state: ArmState,
    pub command: SentCommand,
}

/// Ring buffer of [`CycleRecord`]s. Append is O(1); once the capacity is
/// reached the oldest record is evicted first.
pub(crate) struct Journal {
    records: VecDeque<CycleRecord>,
    capacity: usize,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Journal {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, state: &ArmState, frame: &CycleFrame) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(CycleRecord {
            state: state.clone(),
            command: SentCommand::from(frame),
        });
    }

    /// Copies the retained records out, oldest first, and clears the journal.
    /// The returned snapshot shares nothing with the live buffer.
    pub fn drain(&mut self) -> Vec<CycleRecord> {
        self.records.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&CycleRecord> {
        self.records.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::wire::{MotionFrame, TorqueFrame};

    fn frame_with_q(q0: f64) -> CycleFrame {
        let mut motion = MotionFrame::zeroed();
        motion.q_c[0] = q0;
        CycleFrame {
            message_id: 0,
            motion,
            torque: TorqueFrame::zeroed(),
        }
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut journal = Journal::new(5);
        let state = ArmState::default();
        for i in 0..20 {
            journal.record(&state, &frame_with_q(i as f64));
            assert!(journal.len() <= 5);
        }
        assert_eq!(journal.len(), 5);
    }

    #[test]
    fn eviction_is_fifo() {
        let mut journal = Journal::new(3);
        let state = ArmState::default();
        for i in 0..7 {
            journal.record(&state, &frame_with_q(i as f64));
        }
        let records = journal.drain();
        let retained: Vec<f64> = records
            .iter()
            .map(|r| r.command.joint_positions[0])
            .collect();
        assert_eq!(retained, vec![4., 5., 6.]);
    }

    #[test]
    fn drain_empties_the_journal() {
        let mut journal = Journal::new(4);
        let state = ArmState::default();
        journal.record(&state, &frame_with_q(1.));
        journal.record(&state, &frame_with_q(2.));
        let records = journal.drain();
        assert_eq!(records.len(), 2);
        assert_eq!(journal.len(), 0);
    }

    #[test]
    fn drained_snapshot_is_independent() {
        let mut journal = Journal::new(2);
        let state = ArmState::default();
        journal.record(&state, &frame_with_q(1.));
        let records = journal.drain();
        journal.record(&state, &frame_with_q(9.));
        journal.clear();
        assert_eq!(records[0].command.joint_positions[0], 1.);
    }
}
