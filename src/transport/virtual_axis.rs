//! `vmc*` virtual mode (§4.1): simulates each transport operation without
//! hardware so the dispatcher can run identically whether `virtual_mode` is
//! set or not.

use super::{AxisAddress, AxisChannels, AxisSetup, AxisTransport, Handle};
use crate::errors::TransportError;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    Command,
    Status,
}

#[derive(Debug, Clone, Default)]
struct Profile {
    interval_ms: f64,
    samples: Vec<i64>,
    /// Controller-clock time (ms) at which the profile was (re)loaded.
    loaded_at_ms: f64,
}

impl Profile {
    fn sample_at(&self, clock_ms: f64) -> Option<i64> {
        if self.samples.is_empty() || self.interval_ms <= 0. {
            return None;
        }
        let elapsed = (clock_ms - self.loaded_at_ms).max(0.);
        let idx = (elapsed / self.interval_ms) as usize;
        let idx = idx.min(self.samples.len() - 1);
        Some(self.samples[idx])
    }
}

#[derive(Debug, Clone)]
struct VirtualAxisState {
    raw: i64,
    /// Constant commanded velocity, steps/sec (`mtvel`).
    velocity: f64,
    /// Goto target, steps (`mtpos`).
    goto_target: Option<i64>,
    max_vel: f64,
    profile: Option<Profile>,
    /// Cumulative `toffset`, steps.
    toffset: i64,
    /// Controller-local millisecond clock, advanced by `tick`.
    clock_ms: f64,
    homed: bool,
}

impl Default for VirtualAxisState {
    fn default() -> Self {
        VirtualAxisState {
            raw: 0,
            velocity: 0.,
            goto_target: None,
            max_vel: 1_000.,
            profile: None,
            toffset: 0,
            clock_ms: 0.,
            homed: false,
        }
    }
}

/// Simulates a set of motor nodes in-process. Each call to [`tick`] advances
/// every axis by `dt_secs` of simulated motion, standing in for the
/// dispatcher's poll-time "advance each simulated axis one step" (§4.5(a)).
pub struct VirtualTransport {
    next_handle: u32,
    handle_axis: HashMap<Handle, (AxisAddress, HandleKind)>,
    axes: HashMap<AxisAddress, VirtualAxisState>,
    /// Scales how fast each node's internal clock advances relative to
    /// wall/host time; used to simulate clock drift (§8 boundary scenario 5).
    clock_rate: HashMap<AxisAddress, f64>,
}

impl Default for VirtualTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualTransport {
    pub fn new() -> Self {
        VirtualTransport {
            next_handle: 0,
            handle_axis: HashMap::new(),
            axes: HashMap::new(),
            clock_rate: HashMap::new(),
        }
    }

    pub fn set_clock_rate(&mut self, addr: &AxisAddress, rate: f64) {
        self.clock_rate.insert(addr.clone(), rate);
    }

    /// Advances every open axis by `dt_secs` of simulated time.
    pub fn tick(&mut self, dt_secs: f64) {
        for (addr, state) in self.axes.iter_mut() {
            let rate = self.clock_rate.get(addr).copied().unwrap_or(1.0);
            state.clock_ms += dt_secs * 1000. * rate;

            if let Some(profile) = &state.profile {
                if let Some(target) = profile.sample_at(state.clock_ms) {
                    state.raw = target + state.toffset;
                    continue;
                }
            }

            if let Some(target) = state.goto_target {
                let max_step = state.max_vel * dt_secs;
                let delta = (target - state.raw) as f64;
                if delta.abs() <= max_step {
                    state.raw = target;
                    state.goto_target = None;
                } else {
                    state.raw += delta.signum() as i64 * max_step.round() as i64;
                }
            } else if state.velocity != 0. {
                state.raw += (state.velocity * dt_secs).round() as i64;
            }
        }
    }

    fn state_for(&mut self, addr: &AxisAddress) -> &mut VirtualAxisState {
        self.axes.entry(addr.clone()).or_default()
    }

    fn addr_kind(&self, handle: Handle) -> Option<(AxisAddress, HandleKind)> {
        self.handle_axis.get(&handle).cloned()
    }
}

impl AxisTransport for VirtualTransport {
    fn open(&mut self, addr: &AxisAddress) -> Result<AxisChannels, TransportError> {
        self.axes.entry(addr.clone()).or_default();

        let command = Handle(self.next_handle);
        self.next_handle += 1;
        let status = Handle(self.next_handle);
        self.next_handle += 1;

        self.handle_axis
            .insert(command, (addr.clone(), HandleKind::Command));
        self.handle_axis
            .insert(status, (addr.clone(), HandleKind::Status));

        Ok(AxisChannels { command, status })
    }

    fn close(&mut self, handle: Handle) {
        self.handle_axis.remove(&handle);
    }

    fn write(&mut self, handle: Handle, text: &str) -> Result<(), TransportError> {
        let Some((addr, _)) = self.addr_kind(handle) else {
            return Err(TransportError::Write {
                address: "<closed handle>".to_string(),
                reason: "handle not open".to_string(),
            });
        };

        let mut parts = text.split_whitespace();
        let cmd = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();
        let state = self.state_for(&addr);

        match cmd {
            "mtpos" => {
                state.goto_target = args.first().and_then(|a| a.parse().ok());
                state.velocity = 0.;
                state.profile = None;
            }
            "mtvel" => {
                state.velocity = args.first().and_then(|a| a.parse().ok()).unwrap_or(0.);
                state.goto_target = None;
                state.profile = None;
            }
            "stop!" | "stop" => {
                state.velocity = 0.;
                state.goto_target = None;
                state.profile = None;
            }
            "rstclock" => {
                state.clock_ms = 0.;
            }
            "toffset" => {
                state.toffset = args.first().and_then(|a| a.parse().ok()).unwrap_or(0);
            }
            "etrack" | "mtrack" => {
                if let Some((interval, samples)) = args.split_first() {
                    state.profile = Some(Profile {
                        interval_ms: interval.parse().unwrap_or(0.),
                        samples: samples.iter().filter_map(|s| s.parse().ok()).collect(),
                        loaded_at_ms: state.clock_ms,
                    });
                    state.goto_target = None;
                    state.velocity = 0.;
                }
            }
            "home" => {
                state.goto_target = Some(0);
                state.homed = false;
            }
            _ => {}
        }
        Ok(())
    }

    fn setup(&mut self, handle: Handle, setup: &AxisSetup) -> Result<(), TransportError> {
        let Some((addr, _)) = self.addr_kind(handle) else {
            return Err(TransportError::Write {
                address: "<closed handle>".to_string(),
                reason: "handle not open".to_string(),
            });
        };
        let state = self.state_for(&addr);
        state.max_vel = setup.maxvel.max(1.);
        state.homed = false;
        Ok(())
    }

    fn read_int(&mut self, handle: Handle, query: &str) -> Result<i64, TransportError> {
        let Some((addr, _)) = self.addr_kind(handle) else {
            return Err(TransportError::Read {
                address: "<closed handle>".to_string(),
                reason: "handle not open".to_string(),
            });
        };
        let state = self.state_for(&addr);

        Ok(match query {
            "=mpos" | "=epos" => state.raw,
            "=mvel" => {
                if state.goto_target.is_some() {
                    state.max_vel.round() as i64
                } else {
                    state.velocity.round() as i64
                }
            }
            "=clock" => state.clock_ms.round() as i64,
            "=homed" => i64::from(state.homed),
            _ => 0,
        })
    }

    fn read_nonblocking(&mut self, _handle: Handle) -> Vec<String> {
        Vec::new()
    }

    fn interrupt(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.write(handle, "stop!")
    }
}

impl VirtualTransport {
    /// Marks the given axis's simulated home switch as found. Used by the
    /// homing activity to end a `home` goto once the encoder reaches the
    /// configured home position.
    pub fn mark_homed(&mut self, addr: &AxisAddress) {
        self.state_for(addr).homed = true;
    }

    pub fn raw_position(&self, addr: &AxisAddress) -> i64 {
        self.axes.get(addr).map(|s| s.raw).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> AxisAddress {
        AxisAddress {
            host: "virtual".into(),
            port: 0,
            address: 0,
        }
    }

    #[test]
    fn goto_moves_toward_target_and_stops() {
        let mut t = VirtualTransport::new();
        let channels = t.open(&addr()).unwrap();
        t.setup(
            channels.command,
            &AxisSetup {
                msteps: 1.,
                esteps: 1.,
                esign: 1,
                maxvel: 100.,
                maxacc: 1.,
                limacc: 1.,
                ipolar: false,
            },
        )
        .unwrap();
        t.write(channels.command, "mtpos 1000").unwrap();

        for _ in 0..20 {
            t.tick(1.0);
        }

        assert_eq!(t.read_int(channels.status, "=mpos").unwrap(), 1000);
        assert_eq!(t.read_int(channels.status, "=mvel").unwrap(), 0);
    }

    #[test]
    fn profile_playback_follows_samples_over_time() {
        let mut t = VirtualTransport::new();
        let channels = t.open(&addr()).unwrap();
        t.write(channels.command, "etrack 1000 0 10 20 30").unwrap();

        assert_eq!(t.read_int(channels.status, "=mpos").unwrap(), 0);
        t.tick(1.0);
        assert_eq!(t.read_int(channels.status, "=mpos").unwrap(), 10);
        t.tick(1.0);
        assert_eq!(t.read_int(channels.status, "=mpos").unwrap(), 20);
    }

    #[test]
    fn toffset_shifts_profile_output() {
        let mut t = VirtualTransport::new();
        let channels = t.open(&addr()).unwrap();
        t.write(channels.command, "etrack 1000 0 10 20").unwrap();
        t.write(channels.command, "toffset 5").unwrap();
        t.tick(0.0);
        assert_eq!(t.read_int(channels.status, "=mpos").unwrap(), 5);
    }

    #[test]
    fn clock_rate_scales_controller_clock() {
        let mut t = VirtualTransport::new();
        let a = addr();
        t.open(&a).unwrap();
        t.set_clock_rate(&a, 0.5);
        t.tick(10.0);
        let channels = AxisChannels {
            command: Handle(0),
            status: Handle(1),
        };
        assert_eq!(t.read_int(channels.status, "=clock").unwrap(), 5000);
    }
}
