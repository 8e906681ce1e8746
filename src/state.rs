//! The process-wide observed-state record (§3 "Observed state", §5(c),
//! §9 "Globally mutable shared state"). Single writer (the dispatcher),
//! many readers; readers detect torn snapshots by comparing the
//! state-change counter before and after a read.

use crate::astro_math::{Degrees, Hours};
use parking_lot::RwLock;
use std::sync::Arc;

/// Telescope mode, one of §3's six values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelescopeMode {
    Stopped,
    Slewing,
    Hunting,
    Tracking,
    Homing,
    Limiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomeState {
    Open,
    Closed,
    Moving,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterState {
    Open,
    Closed,
    Moving,
}

/// A snapshot of an axis's published fields, independent of the internal
/// activity-engine representation in [`crate::activity`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisStatus {
    pub cpos: f64,
    pub dpos: f64,
    pub is_homed: bool,
    pub homing: bool,
    pub limiting: bool,
}

/// Fields enumerated in §3, minus anything derivable on demand.
#[derive(Debug, Clone)]
pub struct ObservedStateData {
    pub apparent_ra_hours: Hours,
    pub apparent_dec_deg: Degrees,
    pub apparent_ha_hours: Hours,
    pub j2000_ra_hours: Hours,
    pub j2000_dec_deg: Degrees,
    pub alt_deg: Degrees,
    pub az_deg: Degrees,
    pub desired_alt_deg: Degrees,
    pub desired_az_deg: Degrees,
    pub mode: TelescopeMode,
    pub dome: DomeState,
    pub shutter: ShutterState,
    pub jogging_active: bool,
    pub ha: AxisStatus,
    pub dec: AxisStatus,
    pub rotator: AxisStatus,
    /// Monotonically-increasing state-change counter (§8 invariant 5).
    pub state_change_counter: u64,
    /// Seconds since the Unix epoch of the last poll that wrote this
    /// record, so readers can detect staleness (§6).
    pub last_update_unix_secs: f64,
}

impl Default for ObservedStateData {
    fn default() -> Self {
        ObservedStateData {
            apparent_ra_hours: 0.,
            apparent_dec_deg: 0.,
            apparent_ha_hours: 0.,
            j2000_ra_hours: 0.,
            j2000_dec_deg: 0.,
            alt_deg: 0.,
            az_deg: 0.,
            desired_alt_deg: 0.,
            desired_az_deg: 0.,
            mode: TelescopeMode::Stopped,
            dome: DomeState::Absent,
            shutter: ShutterState::Closed,
            jogging_active: false,
            ha: AxisStatus::default(),
            dec: AxisStatus::default(),
            rotator: AxisStatus::default(),
            state_change_counter: 0,
            last_update_unix_secs: 0.,
        }
    }
}

/// Shared handle to the observed-state record. Stands in for the named
/// shared-memory segment of §5/§6: in this single-process core a
/// [`parking_lot::RwLock`] gives the same single-writer/many-reader
/// contract without needing real IPC.
#[derive(Clone)]
pub struct ObservedState(Arc<RwLock<ObservedStateData>>);

impl ObservedState {
    pub fn new() -> Self {
        ObservedState(Arc::new(RwLock::new(ObservedStateData::default())))
    }

    /// Returns a consistent snapshot, matching the "retry on counter
    /// change" contract of §5(c) even though a single-process `RwLock`
    /// already makes torn reads impossible; callers that talk to this
    /// record over real shared memory would instead loop on
    /// `state_change_counter`.
    pub fn snapshot(&self) -> ObservedStateData {
        self.0.read().clone()
    }

    /// Applies `f` to the record and bumps the state-change counter,
    /// unless `mode_unchanged` reports the telescope mode itself did not
    /// move -- a transition increments the counter exactly once (§8
    /// invariant 5), not once per field write.
    pub fn update<F: FnOnce(&mut ObservedStateData)>(&self, f: F) {
        let mut guard = self.0.write();
        let prev_mode = guard.mode;
        f(&mut guard);
        if guard.mode != prev_mode {
            guard.state_change_counter += 1;
        }
    }
}

impl Default for ObservedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_transition_increments_counter_once() {
        let state = ObservedState::new();
        let before = state.snapshot().state_change_counter;
        state.update(|s| {
            s.mode = TelescopeMode::Slewing;
            s.alt_deg = 10.;
        });
        let after = state.snapshot();
        assert_eq!(after.state_change_counter, before + 1);
        assert_eq!(after.mode, TelescopeMode::Slewing);
    }

    #[test]
    fn field_only_update_does_not_bump_counter() {
        let state = ObservedState::new();
        state.update(|s| s.mode = TelescopeMode::Tracking);
        let before = state.snapshot().state_change_counter;
        state.update(|s| s.alt_deg = 42.);
        assert_eq!(state.snapshot().state_change_counter, before);
    }
}
