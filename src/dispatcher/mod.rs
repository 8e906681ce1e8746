//! C5: command dispatcher. The single-threaded message loop named in §4.5:
//! parses incoming lines, validates geometry, drives the axis activity
//! engine (C3) and tracking engine (C4), and publishes observed state.

mod command;
mod geometry;

pub use command::{parse, Command};
pub use geometry::{chk_dome_limits, chk_limits};

use crate::activity::AxisActivity;
use crate::axis::AxisId;
use crate::config::CoreConfig;
use crate::errors::CoreError;
use crate::fifo::StatusLine;
use crate::mount::{altaz_to_hadec, mount_to_sky, sky_to_mount, MeshTable, MountAxes, MountFrame};
use crate::state::{AxisStatus, DomeState, ObservedState, TelescopeMode};
use crate::target::{ApparentPosition, Ephemeris, Equinox, Target, TargetOffset};
use crate::tracking::{AxisTrackHandle, TrackingConfig, TrackingEngine};
use crate::transport::AxisTransport;
use std::collections::HashMap;

/// Everything the dispatcher needs to address one mount axis: its activity
/// engine plus the track-handle view the tracking engine addresses it by.
struct MountAxis {
    activity: AxisActivity,
}

/// Corner offsets of a box raster, as fractions of the commanded leg size,
/// visited in zig-zag order (`tel_raster_*`).
const RASTER_LEGS: [(f64, f64); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];

/// How long the telescope dwells on each raster leg before stepping to the
/// next corner.
const RASTER_LEG_SECS: f64 = 5.0;

/// Raster-during-exposure state (§4.5's `raster` message family). `armed`
/// only steps while the mount is actively `Tracking`, matching the source
/// daemon's "synchronized to exposure time" behaviour as closely as this
/// crate's scope allows without a real exposure-progress signal.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RasterState {
    Off,
    Armed {
        size_arcsec: f64,
        leg: usize,
        elapsed_secs: f64,
        /// Net (x, y) arcsec offset already pushed to the mount for the
        /// current leg, so disarming or stepping can undo exactly that much.
        applied_arcsec: (f64, f64),
    },
}

pub struct Dispatcher {
    mount: MountAxes,
    mesh: MeshTable,
    core_cfg: CoreConfig,
    axes: HashMap<AxisId, MountAxis>,
    tracking: TrackingEngine,
    state: ObservedState,
    ephemeris: Box<dyn Ephemeris + Send>,
    dome_interferes: bool,
    engineering_mode: bool,
    /// Set when a track has just been started and its coarse slew is still
    /// in progress; cleared once every mount axis has settled and the
    /// profile handoff to `Hunting` has happened.
    awaiting_hunt_handoff: bool,
    pressure_mbar: f64,
    temp_celsius: f64,
    stow_alt_deg: f64,
    stow_az_deg: f64,
    raster: RasterState,
    /// Whether the most recently commanded mount frame applied the
    /// German-equatorial pier flip, so the cooked-position read-back in
    /// [`Dispatcher::refresh_observed_state`] can invert the same frame
    /// deterministically instead of re-deriving the flip from encoder
    /// counts alone.
    current_flip: bool,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mount: MountAxes,
        mesh: MeshTable,
        core_cfg: CoreConfig,
        axes: HashMap<AxisId, AxisActivity>,
        ephemeris: Box<dyn Ephemeris + Send>,
        pressure_mbar: f64,
        temp_celsius: f64,
        stow_alt_deg: f64,
        stow_az_deg: f64,
    ) -> Self {
        let tracking = TrackingEngine::new(TrackingConfig {
            trackint_secs: core_cfg.trackint_secs,
            track_acc: core_cfg.track_acc,
        });
        let axes = axes
            .into_iter()
            .map(|(id, activity)| (id, MountAxis { activity }))
            .collect();
        Dispatcher {
            mount,
            mesh,
            core_cfg,
            axes,
            tracking,
            state: ObservedState::new(),
            ephemeris,
            dome_interferes: false,
            engineering_mode: false,
            awaiting_hunt_handoff: false,
            pressure_mbar,
            temp_celsius,
            stow_alt_deg,
            stow_az_deg,
            raster: RasterState::Off,
            current_flip: false,
        }
    }

    pub fn observed_state(&self) -> ObservedState {
        self.state.clone()
    }

    pub fn set_dome_interferes(&mut self, interferes: bool) {
        self.dome_interferes = interferes;
        self.state.update(|s| {
            s.dome = if interferes { DomeState::Closed } else { DomeState::Open };
        });
    }

    pub fn set_engineering_mode(&mut self, on: bool) {
        self.engineering_mode = on;
    }

    fn axis_config(&self, id: AxisId) -> Option<crate::axis::AxisConfig> {
        self.axes.get(&id).map(|a| a.activity.axis.config)
    }

    /// Stops every mount axis, discarding any in-progress continuation
    /// (§5 "Cancellation").
    fn cancel_all(&mut self, transport: &mut dyn AxisTransport) {
        for axis in self.axes.values_mut() {
            let _ = axis.activity.cancel(transport);
        }
        self.tracking.stop();
        self.awaiting_hunt_handoff = false;
        if let RasterState::Armed { applied_arcsec: (x, y), .. } = self.raster {
            let _ = self.apply_offset(transport, -x, -y);
        }
        self.raster = RasterState::Off;
    }

    /// Handles one incoming dispatcher line, returning the terminal status
    /// to write back on the owning FIFO.
    pub fn handle_command(&mut self, transport: &mut dyn AxisTransport, line: &str) -> StatusLine {
        let command = parse(line);

        if !matches!(command, Command::Raster { .. }) {
            self.cancel_all(transport);
        }

        match self.dispatch(transport, command) {
            Ok(msg) => StatusLine::success(msg),
            Err(err) => StatusLine::failure(-1, err.to_string()),
        }
    }

    fn dispatch(&mut self, transport: &mut dyn AxisTransport, command: Command) -> Result<String, CoreError> {
        match command {
            Command::Reset => {
                self.state.update(|s| s.mode = TelescopeMode::Stopped);
                Ok("reset".into())
            }
            Command::Stop => {
                self.state.update(|s| s.mode = TelescopeMode::Stopped);
                Ok("stopped".into())
            }
            Command::Home(ids) => {
                for id in ids {
                    if let Some(axis) = self.axes.get_mut(&id) {
                        axis.activity.start_homing(transport)?;
                    }
                }
                self.state.update(|s| s.mode = TelescopeMode::Homing);
                Ok("homing".into())
            }
            Command::Limits(ids) => {
                for id in ids {
                    if let Some(axis) = self.axes.get_mut(&id) {
                        axis.activity.start_limiting(transport)?;
                    }
                }
                self.state.update(|s| s.mode = TelescopeMode::Limiting);
                Ok("limit-finding".into())
            }
            Command::Stow => self.slew_horizon(transport, self.stow_alt_deg, self.stow_az_deg),
            Command::SlewHorizon { alt_deg, az_deg } => self.slew_horizon(transport, alt_deg, az_deg),
            Command::SlewEquatorial { ha_hours, dec_deg } => {
                let ha = crate::astro_math::hours_to_rad(ha_hours);
                let dec = crate::astro_math::deg_to_rad(dec_deg);
                self.slew_fixed_frame(transport, ha, dec)
            }
            Command::SlewApparent { ra_hours, dec_deg, epoch } => {
                let equinox = if epoch.is_some() { Equinox::J2000 } else { Equinox::OfDate };
                let target = Target::Fixed {
                    ra_hours,
                    dec_deg,
                    equinox,
                    offset: TargetOffset::default(),
                };
                self.start_track(transport, target)
            }
            Command::DbLine { line, d_ra_arcsec, d_dec_arcsec } => {
                let target = Target::Object {
                    handle: crate::target::ObjectHandle(line),
                    offset: TargetOffset {
                        d_ra_arcsec,
                        d_dec_arcsec,
                    },
                };
                self.start_track(transport, target)
            }
            Command::Jog(sequence) => self.jog(transport, &sequence),
            Command::Offset { x_arcsec, y_arcsec } => self.apply_offset(transport, x_arcsec, y_arcsec),
            Command::Raster { enable, size_arcsec } => self.set_raster(transport, enable, size_arcsec),
        }
    }

    fn slew_horizon(&mut self, transport: &mut dyn AxisTransport, alt_deg: f64, az_deg: f64) -> Result<String, CoreError> {
        // `slew_fixed_frame` re-derives Alt/Az from the validated mount
        // frame and runs the dome check itself (§4.5: every slew path, not
        // just this one).
        let (ha, dec) = altaz_to_hadec(
            crate::astro_math::deg_to_rad(alt_deg),
            crate::astro_math::deg_to_rad(az_deg),
            self.mount.latitude,
        );
        self.slew_fixed_frame(transport, ha, dec)
    }

    fn slew_fixed_frame(&mut self, transport: &mut dyn AxisTransport, ha: f64, dec: f64) -> Result<String, CoreError> {
        let frame = sky_to_mount(ha, dec, &self.mount, &self.mesh);
        let ha_cfg = self.axis_config(AxisId::Ha);
        let dec_cfg = self.axis_config(AxisId::Dec);
        let rot_cfg = self.axis_config(AxisId::Rotator);
        let (Some(ha_cfg), Some(dec_cfg)) = (ha_cfg, dec_cfg) else {
            return Ok("no mount axes configured".into());
        };
        let frame = chk_limits(frame, &ha_cfg, &dec_cfg, rot_cfg.as_ref())?;

        let (alt, az) = mount_to_sky(frame, &self.mount, &self.mesh);
        chk_dome_limits(
            crate::astro_math::rad_to_deg(alt),
            crate::astro_math::rad_to_deg(az),
            &self.core_cfg,
            self.dome_interferes,
            self.engineering_mode,
        )?;
        self.current_flip = frame.flipped;

        if let Some(axis) = self.axes.get_mut(&AxisId::Ha) {
            axis.activity.start_slew(transport, frame.x)?;
        }
        if let Some(axis) = self.axes.get_mut(&AxisId::Dec) {
            axis.activity.start_slew(transport, frame.y)?;
        }
        if self.mount.have_rotator {
            if let Some(axis) = self.axes.get_mut(&AxisId::Rotator) {
                axis.activity.start_slew(transport, frame.r)?;
            }
        }
        self.state.update(|s| s.mode = TelescopeMode::Slewing);
        Ok("slewing".into())
    }

    fn start_track(&mut self, transport: &mut dyn AxisTransport, target: Target) -> Result<String, CoreError> {
        // Coarse slew to the target's current position before handing off
        // to the profile-driven hunt (boundary scenario 1's
        // SLEWING -> HUNTING -> TRACKING sequence).
        let now_mjd = 60000.0;
        let ApparentPosition { ra_hours, dec_deg } = self.ephemeris.apparent_position(&target, now_mjd);
        let ha_hours = crate::astro_math::ra_to_hour_angle(ra_hours);
        let ha = crate::astro_math::hours_to_rad(ha_hours);
        let dec = crate::astro_math::deg_to_rad(dec_deg);
        let result = self.slew_fixed_frame(transport, ha, dec)?;

        self.tracking.start(target);
        self.awaiting_hunt_handoff = true;
        Ok(result)
    }

    fn jog(&mut self, transport: &mut dyn AxisTransport, sequence: &[char]) -> Result<String, CoreError> {
        for &c in sequence {
            let (id, sign) = match c {
                'N' | 'n' => (AxisId::Dec, 1.0),
                'S' | 's' => (AxisId::Dec, -1.0),
                'E' | 'e' => (AxisId::Ha, 1.0),
                'W' | 'w' => (AxisId::Ha, -1.0),
                _ => continue,
            };
            let coarse = c.is_uppercase();
            let rate = if coarse { self.core_cfg.coarse_guide_vel } else { self.core_cfg.fine_guide_vel };
            if let Some(axis) = self.axes.get_mut(&id) {
                if axis.activity.is_tracking() {
                    // While tracking, a jog nudges toffset instead of
                    // commanding a free-running velocity (§4.3). `rate` is
                    // rad/s over a nominal one-second jog tick.
                    let arcsec = crate::astro_math::rad_to_deg(sign * rate) * 3600.0;
                    let steps = axis.activity.axis.arcsec_to_steps(arcsec);
                    transport.write(axis.activity.channels.command, &format!("toffset {}", steps))?;
                } else {
                    transport.write(axis.activity.channels.command, &format!("mtvel {}", sign * rate))?;
                }
            }
        }
        Ok("jogging".into())
    }

    fn apply_offset(&mut self, transport: &mut dyn AxisTransport, x_arcsec: f64, y_arcsec: f64) -> Result<String, CoreError> {
        let ha_steps = self.axis_config(AxisId::Ha).map(|c| (x_arcsec * c.estep * c.esign as f64 / 1_296_000.0).round() as i64).unwrap_or(0);
        let dec_steps = self.axis_config(AxisId::Dec).map(|c| (y_arcsec * c.estep * c.esign as f64 / 1_296_000.0).round() as i64).unwrap_or(0);
        if let Some(axis) = self.axes.get(&AxisId::Ha) {
            transport.write(axis.activity.channels.command, &format!("toffset {}", ha_steps))?;
        }
        if let Some(axis) = self.axes.get(&AxisId::Dec) {
            transport.write(axis.activity.channels.command, &format!("toffset {}", dec_steps))?;
        }
        Ok("offset applied".into())
    }

    fn set_raster(&mut self, transport: &mut dyn AxisTransport, enable: bool, size_arcsec: f64) -> Result<String, CoreError> {
        if !enable {
            if let RasterState::Armed { applied_arcsec: (x, y), .. } = self.raster {
                self.apply_offset(transport, -x, -y)?;
            }
            self.raster = RasterState::Off;
            return Ok("raster disabled".into());
        }
        self.raster = RasterState::Armed {
            size_arcsec,
            leg: 0,
            elapsed_secs: 0.0,
            applied_arcsec: (0.0, 0.0),
        };
        Ok(format!("raster armed {}", size_arcsec))
    }

    /// Advances the raster leg timer and, once a leg's dwell time has
    /// elapsed, commands the delta to the next corner of the box pattern
    /// (§10.5: zig-zag through `RASTER_LEGS`). Only steps while actually
    /// tracking, since a raster only makes sense mid-exposure.
    fn advance_raster(&mut self, transport: &mut dyn AxisTransport, dt_secs: f64, tracking: bool) -> Result<(), CoreError> {
        let RasterState::Armed { size_arcsec, leg, elapsed_secs, applied_arcsec } = self.raster else {
            return Ok(());
        };
        if !tracking {
            return Ok(());
        }
        let elapsed_secs = elapsed_secs + dt_secs;
        if elapsed_secs < RASTER_LEG_SECS {
            self.raster = RasterState::Armed { size_arcsec, leg, elapsed_secs, applied_arcsec };
            return Ok(());
        }

        let next_leg = (leg + 1) % RASTER_LEGS.len();
        let (fx, fy) = RASTER_LEGS[next_leg];
        let target = (fx * size_arcsec, fy * size_arcsec);
        let delta = (target.0 - applied_arcsec.0, target.1 - applied_arcsec.1);
        self.apply_offset(transport, delta.0, delta.1)?;
        self.raster = RasterState::Armed {
            size_arcsec,
            leg: next_leg,
            elapsed_secs: 0.0,
            applied_arcsec: target,
        };
        Ok(())
    }

    /// Re-derives Alt/Az for the currently commanded (desired) mount frame
    /// and runs the dome check against it, so dome closure mid-slew or
    /// mid-track is caught even though the original command already passed
    /// the check once (§4.5: "re-checked every poll and can preempt a long
    /// slew").
    fn check_dome_for_current_target(&self) -> Result<(), CoreError> {
        let (Some(ha), Some(dec)) = (self.axes.get(&AxisId::Ha), self.axes.get(&AxisId::Dec)) else {
            return Ok(());
        };
        let r = self.axes.get(&AxisId::Rotator).map(|a| a.activity.axis.dpos).unwrap_or(0.);
        let target = MountFrame {
            x: ha.activity.axis.dpos,
            y: dec.activity.axis.dpos,
            r,
            flipped: self.current_flip,
        };
        let (alt, az) = mount_to_sky(target, &self.mount, &self.mesh);
        chk_dome_limits(
            crate::astro_math::rad_to_deg(alt),
            crate::astro_math::rad_to_deg(az),
            &self.core_cfg,
            self.dome_interferes,
            self.engineering_mode,
        )?;
        Ok(())
    }

    /// The "mkCook" step (DESIGN NOTES, §4.5 polling step (c)): re-reads raw
    /// axis positions, recomputes cooked Alt/Az/HA/Dec via [`mount_to_sky`],
    /// applies refraction, and publishes the result for display. Desired
    /// Alt/Az mirrors the same transform run against each axis's `dpos`.
    fn refresh_observed_state(&mut self, host_mjd: f64) {
        let (Some(ha), Some(dec)) = (self.axes.get(&AxisId::Ha), self.axes.get(&AxisId::Dec)) else {
            return;
        };
        let rot = self.axes.get(&AxisId::Rotator);
        let rot_cpos = rot.map(|a| a.activity.axis.cpos).unwrap_or(0.);
        let rot_dpos = rot.map(|a| a.activity.axis.dpos).unwrap_or(0.);

        let cooked = MountFrame {
            x: ha.activity.axis.cpos,
            y: dec.activity.axis.cpos,
            r: rot_cpos,
            flipped: self.current_flip,
        };
        let (true_alt, true_az) = mount_to_sky(cooked, &self.mount, &self.mesh);
        let (ha_rad, dec_rad) = altaz_to_hadec(true_alt, true_az, self.mount.latitude);
        let apparent_ha_hours = crate::astro_math::rad_to_hours(ha_rad);
        let apparent_dec_deg = crate::astro_math::rad_to_deg(dec_rad);
        let apparent_ra_hours = crate::astro_math::hour_angle_to_ra(apparent_ha_hours);
        let alt_deg = crate::astro_math::rad_to_deg(crate::astro_math::unrefract(self.pressure_mbar, self.temp_celsius, true_alt));
        let az_deg = crate::astro_math::rad_to_deg(true_az);

        let desired = MountFrame {
            x: ha.activity.axis.dpos,
            y: dec.activity.axis.dpos,
            r: rot_dpos,
            flipped: self.current_flip,
        };
        let (desired_true_alt, desired_az_rad) = mount_to_sky(desired, &self.mount, &self.mesh);
        let desired_alt_deg =
            crate::astro_math::rad_to_deg(crate::astro_math::unrefract(self.pressure_mbar, self.temp_celsius, desired_true_alt));
        let desired_az_deg = crate::astro_math::rad_to_deg(desired_az_rad);

        let axis_status = |a: &MountAxis| AxisStatus {
            cpos: a.activity.axis.cpos,
            dpos: a.activity.axis.dpos,
            is_homed: a.activity.axis.is_homed,
            homing: a.activity.is_homing(),
            limiting: a.activity.is_limiting(),
        };
        let ha_status = axis_status(ha);
        let dec_status = axis_status(dec);
        let rotator_status = rot.map(axis_status).unwrap_or_default();

        // Unix epoch as MJD (1970-01-01T00:00:00Z), so the record can carry
        // a last-update timestamp without reaching for an ambient clock.
        const MJD_UNIX_EPOCH: f64 = 40_587.0;
        let last_update_unix_secs = (host_mjd - MJD_UNIX_EPOCH) * 86_400.0;

        self.state.update(|s| {
            s.apparent_ra_hours = apparent_ra_hours;
            s.apparent_dec_deg = apparent_dec_deg;
            s.apparent_ha_hours = apparent_ha_hours;
            // Precession/nutation to J2000 is out of scope; the displayed
            // J2000 coordinates mirror the apparent ones.
            s.j2000_ra_hours = apparent_ra_hours;
            s.j2000_dec_deg = apparent_dec_deg;
            s.alt_deg = alt_deg;
            s.az_deg = az_deg;
            s.desired_alt_deg = desired_alt_deg;
            s.desired_az_deg = desired_az_deg;
            s.ha = ha_status;
            s.dec = dec_status;
            s.rotator = rotator_status;
            s.last_update_unix_secs = last_update_unix_secs;
        });
    }

    /// One dispatcher poll (§4.5). `transport` must already reflect the
    /// current tick -- for virtual mode the caller advances the simulated
    /// axes (step (a) of the polling contract) before calling this.
    pub fn poll(&mut self, transport: &mut dyn AxisTransport, dt_secs: f64, host_mjd: f64) -> Vec<StatusLine> {
        let mut out = Vec::new();

        let activity_in_progress = !self.axes.values().all(|a| a.activity.is_idle()) || self.tracking.is_active();
        if activity_in_progress {
            if let Err(err) = self.check_dome_for_current_target() {
                self.cancel_all(transport);
                self.state.update(|s| s.mode = TelescopeMode::Stopped);
                out.push(StatusLine::failure(-1, err.to_string()));
                return out;
            }
        }

        for id in AxisId::MOUNT_AXES {
            let Some(axis) = self.axes.get_mut(&id) else { continue };
            if axis.activity.is_idle() {
                continue;
            }
            match axis.activity.poll(
                transport,
                dt_secs,
                self.core_cfg.acquire_acc,
                self.core_cfg.acquire_delt,
                self.core_cfg.track_acc,
            ) {
                Ok(_) => {}
                Err(err) => {
                    self.cancel_all(transport);
                    self.state.update(|s| s.mode = TelescopeMode::Stopped);
                    out.push(StatusLine::failure(-1, err.to_string()));
                    return out;
                }
            }
        }

        if self.awaiting_hunt_handoff {
            let settled = AxisId::MOUNT_AXES
                .iter()
                .all(|id| self.axes.get(id).map(|a| a.activity.is_idle()).unwrap_or(true));
            if settled {
                for id in AxisId::MOUNT_AXES {
                    if let Some(axis) = self.axes.get_mut(&id) {
                        axis.activity.start_hunting();
                    }
                }
                self.awaiting_hunt_handoff = false;
                self.state.update(|s| s.mode = TelescopeMode::Hunting);
            }
        }

        if self.tracking.is_active() && !self.awaiting_hunt_handoff {
            let handles: Vec<AxisTrackHandle> = AxisId::MOUNT_AXES
                .iter()
                .filter_map(|&id| {
                    self.axes.get(&id).map(|a| AxisTrackHandle {
                        id,
                        command: a.activity.channels.command,
                        status: a.activity.channels.status,
                        have_encoder: a.activity.axis.config.have_encoder,
                    })
                })
                .collect();

            let mut node_clocks = HashMap::new();
            for handle in &handles {
                match transport.read_int(handle.status, "=clock") {
                    Ok(clock_ms) => {
                        node_clocks.insert(handle.id, clock_ms);
                    }
                    Err(err) => {
                        self.cancel_all(transport);
                        self.state.update(|s| s.mode = TelescopeMode::Stopped);
                        out.push(StatusLine::failure(-1, err.to_string()));
                        return out;
                    }
                }
            }

            match self.tracking.poll(
                host_mjd,
                self.ephemeris.as_ref(),
                &self.mount,
                &self.mesh,
                transport,
                &handles,
                &node_clocks,
            ) {
                Ok(_) => {}
                Err(err) => {
                    self.cancel_all(transport);
                    self.state.update(|s| s.mode = TelescopeMode::Stopped);
                    out.push(StatusLine::failure(-1, err.to_string()));
                    return out;
                }
            }

            let any_tracking = AxisId::MOUNT_AXES
                .iter()
                .any(|id| self.axes.get(id).map(|a| a.activity.is_tracking()).unwrap_or(false));
            let any_hunting = AxisId::MOUNT_AXES
                .iter()
                .any(|id| self.axes.get(id).map(|a| a.activity.is_hunting()).unwrap_or(false));
            self.state.update(|s| {
                s.mode = if any_tracking {
                    TelescopeMode::Tracking
                } else if any_hunting {
                    TelescopeMode::Hunting
                } else {
                    s.mode
                };
            });
        }

        let tracking_now = matches!(self.state.snapshot().mode, TelescopeMode::Tracking);
        if let Err(err) = self.advance_raster(transport, dt_secs, tracking_now) {
            out.push(StatusLine::failure(-1, err.to_string()));
        }

        self.refresh_observed_state(host_mjd);

        out
    }
}
