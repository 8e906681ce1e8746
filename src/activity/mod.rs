//! C3: axis activity engine. Per-axis state machine for homing,
//! limit-finding, slewing and jogging (§4.3), implemented as the
//! explicit continuation objects called for in §9 ("Per-axis
//! first/continuation calling convention"): each state carries its own
//! record and `poll` returns a three-way outcome instead of a va_list
//! callback re-entered with `first`.

use crate::axis::Axis;
use crate::errors::{AxisMotionError, CoreError, HomingError};
use crate::transport::{AxisChannels, AxisTransport};

/// Result of one continuation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollResult {
    /// Activity needs another poll.
    Continue,
    /// Activity reached its goal; the axis returns to `Idle`.
    Done,
}

/// How many consecutive polls of no measurable progress toward the goal,
/// despite a nonzero commanded velocity, before an axis is declared stuck
/// (`axisMotionCheck`, §4.3).
const STUCK_POLL_THRESHOLD: u32 = 5;

/// Homing/limit-finding timeout, seconds.
const HOMING_TIMEOUT_SECS: f64 = 60.0;
const LIMITING_TIMEOUT_SECS: f64 = 120.0;

#[derive(Debug, Clone, Copy)]
struct SlewingState {
    goal: f64,
    /// Largest axis error seen over the current one-second settle window.
    settle_window_max_err: f64,
    settle_elapsed: f64,
    stall_polls: u32,
}

#[derive(Debug, Clone, Copy)]
struct HuntingState {
    settle_elapsed: f64,
}

#[derive(Debug, Clone, Copy)]
struct TrackingState {
    /// Becomes `Hunting` again once `onTarget()` is false without a jog in
    /// progress (§4.4: "TRACKING -> HUNTING if any axis drifts past
    /// track_acc without the jogging flag being set").
    jogging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum HomingPhase {
    SeekingSwitch,
}

#[derive(Debug, Clone, Copy)]
struct HomingState {
    phase: HomingPhase,
    elapsed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LimitingPhase {
    SeekingNegative,
    SeekingPositive,
}

#[derive(Debug, Clone, Copy)]
struct LimitingState {
    phase: LimitingPhase,
    elapsed: f64,
    found_negative: Option<f64>,
    found_positive: Option<f64>,
    /// Whether `is_homed` should be restored on the owning axis once
    /// limit-finding completes, per §9's open question on the combined
    /// limit+home cycle: `tel_limits` clears `is_homed` around the seek and
    /// restores it afterward only if it was set beforehand.
    restore_homed: bool,
}

/// Per-axis activity state (§9: "tagged variant of activity records").
#[derive(Debug, Clone, Copy)]
enum ActivityState {
    Idle,
    Slewing(SlewingState),
    Hunting(HuntingState),
    Tracking(TrackingState),
    Homing(HomingState),
    Limiting(LimitingState),
}

/// Owns one axis's runtime record plus its current activity and drives both
/// through the transport.
pub struct AxisActivity {
    pub axis: Axis,
    pub channels: AxisChannels,
    state: ActivityState,
    prev_cpos: f64,
}

impl AxisActivity {
    pub fn new(axis: Axis, channels: AxisChannels) -> Self {
        AxisActivity {
            axis,
            channels,
            state: ActivityState::Idle,
            prev_cpos: axis.cpos,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ActivityState::Idle)
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, ActivityState::Tracking(_))
    }

    pub fn is_hunting(&self) -> bool {
        matches!(self.state, ActivityState::Hunting(_))
    }

    pub fn is_homing(&self) -> bool {
        matches!(self.state, ActivityState::Homing(_))
    }

    pub fn is_limiting(&self) -> bool {
        matches!(self.state, ActivityState::Limiting(_))
    }

    /// Stops whatever is in progress and returns the axis to `Idle`,
    /// discarding any continuation (§5 "Cancellation").
    pub fn cancel(&mut self, transport: &mut dyn AxisTransport) -> Result<(), CoreError> {
        transport.interrupt(self.channels.command)?;
        self.state = ActivityState::Idle;
        Ok(())
    }

    /// Issues a motor goto and enters `Slewing` (§4.3).
    pub fn start_slew(&mut self, transport: &mut dyn AxisTransport, goal: f64) -> Result<(), CoreError> {
        let raw_goal = self.goal_to_raw(goal);
        transport.write(self.channels.command, &format!("mtpos {}", raw_goal))?;
        self.state = ActivityState::Slewing(SlewingState {
            goal,
            settle_window_max_err: f64::MAX,
            settle_elapsed: 0.,
            stall_polls: 0,
        });
        Ok(())
    }

    /// Enters `Hunting`: called once a tracking profile has just been
    /// downloaded by the tracking engine (§4.4).
    pub fn start_hunting(&mut self) {
        self.state = ActivityState::Hunting(HuntingState { settle_elapsed: 0. });
    }

    /// Issues a home-search script and enters `Homing` (§4.3).
    pub fn start_homing(&mut self, transport: &mut dyn AxisTransport) -> Result<(), CoreError> {
        transport.write(self.channels.command, "home")?;
        self.axis.homing = true;
        self.state = ActivityState::Homing(HomingState {
            phase: HomingPhase::SeekingSwitch,
            elapsed: 0.,
        });
        Ok(())
    }

    /// Begins the slow bidirectional limit-seeking drive and enters
    /// `Limiting` (§4.3). `restore_homed` records whether `is_homed` was set
    /// before the seek began, per the combined limit+home open question.
    pub fn start_limiting(&mut self, transport: &mut dyn AxisTransport) -> Result<(), CoreError> {
        let restore_homed = self.axis.is_homed;
        self.axis.is_homed = false;
        self.axis.limiting = true;
        transport.write(self.channels.command, "mtvel -1")?;
        self.state = ActivityState::Limiting(LimitingState {
            phase: LimitingPhase::SeekingNegative,
            elapsed: 0.,
            found_negative: None,
            found_positive: None,
            restore_homed,
        });
        Ok(())
    }

    fn goal_to_raw(&self, goal_rad: f64) -> i64 {
        let cfg = &self.axis.config;
        if cfg.have_encoder {
            (goal_rad * cfg.estep / (std::f64::consts::TAU * cfg.esign as f64)).round() as i64
        } else {
            (goal_rad * cfg.step / (std::f64::consts::TAU * cfg.sign as f64)).round() as i64
        }
    }

    /// One poll tick. Refreshes the axis's observed position, runs
    /// stuck/limit checks while in motion, and advances the current
    /// activity's continuation.
    pub fn poll(
        &mut self,
        transport: &mut dyn AxisTransport,
        dt_secs: f64,
        acquire_acc: f64,
        acquire_delt: f64,
        track_acc: f64,
    ) -> Result<PollResult, CoreError> {
        let query = if self.axis.config.have_encoder { "=epos" } else { "=mpos" };
        let raw = transport.read_int(self.channels.status, query)?;
        self.axis.update_from_raw(raw);

        if matches!(self.state, ActivityState::Idle) {
            self.prev_cpos = self.axis.cpos;
            return Ok(PollResult::Done);
        }

        if !self.axis.within_limits(self.axis.cpos) && !matches!(self.state, ActivityState::Limiting(_)) {
            self.state = ActivityState::Idle;
            return Err(AxisMotionError::UnexpectedLimit {
                axis: self.axis.config.id.label(),
            }
            .into());
        }

        let mvel = transport.read_int(self.channels.status, "=mvel")? as f64;
        let outcome = match self.state {
            ActivityState::Idle => unreachable!(),
            ActivityState::Slewing(ref mut s) => {
                Self::poll_slewing(s, &self.axis, &mut self.prev_cpos, dt_secs, mvel, acquire_acc, acquire_delt)?
            }
            ActivityState::Hunting(ref mut s) => {
                Self::poll_hunting(s, &self.axis, dt_secs, track_acc)
            }
            ActivityState::Tracking(ref mut s) => {
                Self::poll_tracking(s, &self.axis, track_acc)
            }
            ActivityState::Homing(ref mut s) => {
                Self::poll_homing(s, transport, self.channels, dt_secs, self.axis.config.id.label())?
            }
            ActivityState::Limiting(ref mut s) => {
                Self::poll_limiting(s, transport, self.channels, &self.axis, dt_secs)?
            }
        };

        self.prev_cpos = self.axis.cpos;

        match outcome {
            PollResult::Done => {
                if let ActivityState::Hunting(_) = self.state {
                    self.state = ActivityState::Tracking(TrackingState { jogging: false });
                    return Ok(PollResult::Continue);
                }
                if let ActivityState::Homing(_) = self.state {
                    self.axis.is_homed = true;
                    self.axis.homing = false;
                }
                if let ActivityState::Limiting(s) = self.state {
                    self.axis.is_homed = s.restore_homed;
                    self.axis.limiting = false;
                }
                self.state = ActivityState::Idle;
                Ok(PollResult::Done)
            }
            PollResult::Continue => {
                if let ActivityState::Tracking(ref s) = self.state {
                    if !s.jogging && (self.axis.cpos - self.axis.dpos).abs() > track_acc {
                        self.state = ActivityState::Hunting(HuntingState { settle_elapsed: 0. });
                    }
                }
                Ok(PollResult::Continue)
            }
        }
    }

    fn poll_slewing(
        s: &mut SlewingState,
        axis: &Axis,
        prev_cpos: &mut f64,
        dt_secs: f64,
        mvel: f64,
        acquire_acc: f64,
        acquire_delt: f64,
    ) -> Result<PollResult, AxisMotionError> {
        let tolerance = axis.config.acquire_tolerance(acquire_acc);
        let err = (axis.cpos - s.goal).abs();

        if mvel.abs() < 1e-6 && (axis.cpos - *prev_cpos).abs() < 1e-9 && err > tolerance {
            s.stall_polls += 1;
        } else {
            s.stall_polls = 0;
        }

        if s.stall_polls >= STUCK_POLL_THRESHOLD {
            return Err(AxisMotionError::Stuck {
                axis: axis.config.id.label(),
            });
        }

        if err <= tolerance {
            let delmax_change = (err - s.settle_window_max_err.min(err)).abs();
            s.settle_window_max_err = s.settle_window_max_err.min(err);
            if delmax_change <= acquire_delt || s.settle_elapsed > 0. {
                s.settle_elapsed += dt_secs;
            }
            if s.settle_elapsed >= crate::consts::ACQUIRE_SETTLE_SECS {
                return Ok(PollResult::Done);
            }
        } else {
            s.settle_elapsed = 0.;
            s.settle_window_max_err = err;
        }

        Ok(PollResult::Continue)
    }

    fn poll_hunting(s: &mut HuntingState, axis: &Axis, dt_secs: f64, track_acc: f64) -> PollResult {
        if (axis.cpos - axis.dpos).abs() <= track_acc {
            s.settle_elapsed += dt_secs;
            if s.settle_elapsed >= crate::consts::ACQUIRE_SETTLE_SECS {
                return PollResult::Done;
            }
        } else {
            s.settle_elapsed = 0.;
        }
        PollResult::Continue
    }

    fn poll_tracking(_s: &mut TrackingState, _axis: &Axis, _track_acc: f64) -> PollResult {
        PollResult::Continue
    }

    fn poll_homing(
        s: &mut HomingState,
        transport: &mut dyn AxisTransport,
        channels: AxisChannels,
        dt_secs: f64,
        axis_label: &'static str,
    ) -> Result<PollResult, CoreError> {
        s.elapsed += dt_secs;
        if s.elapsed > HOMING_TIMEOUT_SECS {
            return Err(HomingError::Timeout { axis: axis_label }.into());
        }
        let homed = transport.read_int(channels.status, "=homed")?;
        if homed != 0 {
            return Ok(PollResult::Done);
        }
        Ok(PollResult::Continue)
    }

    fn poll_limiting(
        s: &mut LimitingState,
        transport: &mut dyn AxisTransport,
        channels: AxisChannels,
        axis: &Axis,
        dt_secs: f64,
    ) -> Result<PollResult, CoreError> {
        s.elapsed += dt_secs;
        if s.elapsed > LIMITING_TIMEOUT_SECS {
            return Err(HomingError::Timeout { axis: axis.config.id.label() }.into());
        }

        let mvel = transport.read_int(channels.status, "=mvel")? as f64;
        match s.phase {
            LimitingPhase::SeekingNegative => {
                if mvel.abs() < 1e-6 && s.elapsed > 0.5 {
                    s.found_negative = Some(axis.cpos);
                    s.phase = LimitingPhase::SeekingPositive;
                    s.elapsed = 0.;
                    transport.write(channels.command, "mtvel 1")?;
                }
            }
            LimitingPhase::SeekingPositive => {
                if mvel.abs() < 1e-6 && s.elapsed > 0.5 {
                    s.found_positive = Some(axis.cpos);
                }
            }
        }

        if s.found_negative.is_some() && s.found_positive.is_some() {
            Ok(PollResult::Done)
        } else {
            Ok(PollResult::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{AxisConfig, AxisId};
    use crate::transport::{AxisSetup, Handle, VirtualTransport};

    fn test_config() -> AxisConfig {
        AxisConfig {
            id: AxisId::Ha,
            have: true,
            have_encoder: false,
            have_limits: true,
            enc_home: false,
            sign: 1,
            esign: 1,
            step: 360_000.,
            estep: 360_000.,
            max_vel: 1.0,
            max_acc: 0.5,
            slim_acc: 0.1,
            pos_lim: 3.0,
            neg_lim: -3.0,
        }
    }

    fn setup() -> (VirtualTransport, AxisChannels, crate::transport::AxisAddress) {
        let mut vt = VirtualTransport::new();
        let addr = crate::transport::AxisAddress {
            host: "virtual".into(),
            port: 0,
            address: 0,
        };
        let channels = vt.open(&addr).unwrap();
        vt.setup(
            channels.command,
            &AxisSetup {
                msteps: 360_000.,
                esteps: 360_000.,
                esign: 1,
                maxvel: 200_000.,
                maxacc: 1.,
                limacc: 1.,
                ipolar: false,
            },
        )
        .unwrap();
        (vt, channels, addr)
    }

    #[test]
    fn idle_axis_polls_done_immediately() {
        let (mut vt, channels, _addr) = setup();
        let mut activity = AxisActivity::new(Axis::new(test_config()), channels);
        let result = activity.poll(&mut vt, 0.1, 0., 0., 0.01).unwrap();
        assert_eq!(result, PollResult::Done);
    }

    #[test]
    fn slewing_reaches_goal_and_settles() {
        let (mut vt, channels, _addr) = setup();
        let mut activity = AxisActivity::new(Axis::new(test_config()), channels);
        activity.start_slew(&mut vt, 1.0).unwrap();

        let mut done = false;
        for _ in 0..50 {
            vt.tick(1.0);
            match activity.poll(&mut vt, 1.0, 0.01, 1.0, 0.01).unwrap() {
                PollResult::Done => {
                    done = true;
                    break;
                }
                PollResult::Continue => {}
            }
        }
        assert!(done, "slew should converge and settle within the poll budget");
        assert!(activity.is_idle());
    }

    #[test]
    fn slewing_axis_declared_stuck_after_threshold_polls() {
        let (mut vt, channels, _addr) = setup();
        let mut activity = AxisActivity::new(Axis::new(test_config()), channels);
        activity.start_slew(&mut vt, 1.0).unwrap();
        // Kill the commanded motion so the axis never moves toward goal.
        vt.write(channels.command, "stop!").unwrap();

        let mut last = Ok(PollResult::Continue);
        for _ in 0..STUCK_POLL_THRESHOLD {
            last = activity.poll(&mut vt, 1.0, 0.01, 1.0, 0.01);
            if last.is_err() {
                break;
            }
        }
        assert!(last.is_err(), "expected a stuck-axis error within the threshold");
    }

    #[test]
    fn homing_completes_once_switch_marked() {
        let (mut vt, channels, addr) = setup();
        let mut activity = AxisActivity::new(Axis::new(test_config()), channels);
        activity.start_homing(&mut vt).unwrap();
        vt.mark_homed(&addr);

        let result = activity.poll(&mut vt, 0.1, 0., 0., 0.01).unwrap();
        assert_eq!(result, PollResult::Done);
        assert!(activity.axis.is_homed);
    }

    #[test]
    fn limiting_restores_prior_homed_flag_on_completion() {
        let (mut vt, channels, _addr) = setup();
        let mut activity = AxisActivity::new(Axis::new(test_config()), channels);
        activity.axis.is_homed = true;
        activity.start_limiting(&mut vt).unwrap();
        assert!(!activity.axis.is_homed);

        // simulate reaching the negative switch
        vt.write(channels.command, "stop!").unwrap();
        let r1 = activity.poll(&mut vt, 1.0, 0.01, 1.0, 0.01).unwrap();
        assert_eq!(r1, PollResult::Continue);

        // simulate reaching the positive switch
        vt.write(channels.command, "stop!").unwrap();
        let r2 = activity.poll(&mut vt, 1.0, 0.01, 1.0, 0.01).unwrap();
        assert_eq!(r2, PollResult::Done);

        assert!(activity.is_idle());
        assert!(activity.axis.is_homed);
    }
}
