//! C4: tracking engine. Builds a segmented position profile for a moving
//! target, downloads it to each mount axis, reconciles host vs controller
//! clocks, and detects lock acquisition/loss (§4.4).

use crate::axis::AxisId;
use crate::consts::{MAXJITTER_SECS, PPTRACK};
use crate::errors::{ClockDriftError, CoreError};
use crate::mount::{sky_to_mount, MeshTable, MountAxes, MountFrame};
use crate::target::{ApparentPosition, Ephemeris, Target};
use crate::transport::AxisTransport;
use std::collections::HashMap;

/// Seconds of trajectory covered by one profile download (`TRACKINT`).
#[derive(Debug, Clone, Copy)]
pub struct TrackingConfig {
    pub trackint_secs: f64,
    pub track_acc: f64,
}

/// One axis's command-channel handle plus the data the engine needs to
/// address it, keyed the same way the activity engine keys its axes.
pub struct AxisTrackHandle {
    pub id: AxisId,
    pub command: crate::transport::Handle,
    pub status: crate::transport::Handle,
    pub have_encoder: bool,
}

/// State carried across polls while a track is active (§9: promote
/// per-function statics like `strack`, `mjd0` into the owning activity's
/// record).
pub struct TrackingEngine {
    config: TrackingConfig,
    target: Option<Target>,
    /// Host MJD recorded at the instant each node's clock was last zeroed.
    strack_mjd: f64,
    /// Host MJD at which the current profile must be refreshed.
    refresh_at_mjd: f64,
    profile_loaded: bool,
}

pub enum TrackOutcome {
    Continue,
    /// `onTarget()` true on every mount axis this poll.
    AllOnTarget,
    /// An axis drifted past `track_acc`.
    Drifted,
}

impl TrackingEngine {
    pub fn new(config: TrackingConfig) -> Self {
        TrackingEngine {
            config,
            target: None,
            strack_mjd: 0.,
            refresh_at_mjd: 0.,
            profile_loaded: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn stop(&mut self) {
        self.target = None;
        self.profile_loaded = false;
    }

    /// Starts (or restarts) tracking `target`, forcing an immediate profile
    /// build on the next `poll`.
    pub fn start(&mut self, target: Target) {
        self.target = Some(target);
        self.profile_loaded = false;
        self.refresh_at_mjd = 0.;
    }

    /// One tracking-engine poll. `host_mjd` and `resolve` let the caller
    /// supply the wall clock and ephemeris so this stays free of any
    /// ambient time source. `node_clocks_ms` is the controller clock
    /// register read from each axis this poll, keyed by [`AxisId`].
    #[allow(clippy::too_many_arguments)]
    pub fn poll(
        &mut self,
        host_mjd: f64,
        ephemeris: &dyn Ephemeris,
        mount: &MountAxes,
        mesh: &MeshTable,
        transports: &mut dyn AxisTransport,
        axes: &[AxisTrackHandle],
        node_clocks_ms: &HashMap<AxisId, i64>,
    ) -> Result<TrackOutcome, CoreError> {
        let Some(target) = self.target.clone() else {
            return Ok(TrackOutcome::Continue);
        };

        let needs_refresh = !self.profile_loaded || host_mjd > self.refresh_at_mjd;
        if needs_refresh {
            self.download_profile(host_mjd, &target, ephemeris, mount, mesh, transports, axes)?;
            self.strack_mjd = host_mjd;
            self.refresh_at_mjd = host_mjd + self.config.trackint_secs / 86400.0;
            self.profile_loaded = true;
        }

        // Drift check: use whichever axis's clock we have; all are zeroed
        // together so any one is representative (§5(b)).
        if let Some(&clock_ms) = node_clocks_ms.values().next() {
            let controller_mjd = self.strack_mjd + (clock_ms as f64) / 86_400_000.0;
            let drift_secs = (host_mjd - controller_mjd).abs() * 86_400.0;
            if drift_secs > MAXJITTER_SECS {
                self.stop();
                return Err(ClockDriftError {
                    limit_secs: MAXJITTER_SECS,
                    observed_secs: drift_secs,
                }
                .into());
            }
        }

        Ok(TrackOutcome::Continue)
    }

    #[allow(clippy::too_many_arguments)]
    fn download_profile(
        &self,
        host_mjd: f64,
        target: &Target,
        ephemeris: &dyn Ephemeris,
        mount: &MountAxes,
        mesh: &MeshTable,
        transports: &mut dyn AxisTransport,
        axes: &[AxisTrackHandle],
    ) -> Result<(), CoreError> {
        let frames = build_profile(self.config.trackint_secs, host_mjd, target, ephemeris, mount, mesh);

        for handle in axes {
            transports.write(handle.command, "rstclock")?;
            let interval_ms = (self.config.trackint_secs / PPTRACK as f64 * 1000.0).round() as i64;
            let samples: Vec<i64> = frames.iter().map(|f| axis_component_steps(handle.id, f)).collect();
            let cmd = if handle.have_encoder { "etrack" } else { "mtrack" };
            let mut line = format!("{} {}", cmd, interval_ms);
            for s in samples {
                line.push(' ');
                line.push_str(&s.to_string());
            }
            transports.write(handle.command, &line)?;
        }
        Ok(())
    }

    /// Injects an arcsecond offset on (HA, Dec) as a `toffset` on the
    /// affected axes without rebuilding the profile (§4.4).
    pub fn apply_offset(
        &self,
        transports: &mut dyn AxisTransport,
        ha_handle: &AxisTrackHandle,
        dec_handle: &AxisTrackHandle,
        ha_steps: i64,
        dec_steps: i64,
    ) -> Result<(), CoreError> {
        transports.write(ha_handle.command, &format!("toffset {}", ha_steps))?;
        transports.write(dec_handle.command, &format!("toffset {}", dec_steps))?;
        Ok(())
    }
}

/// Builds N = [`PPTRACK`] mount-frame samples covering the next `trackint`
/// seconds, one every `trackint / N` seconds, each independently clamped
/// (whole-revolution wrapping allowed) per §4.4.
fn build_profile(
    trackint_secs: f64,
    host_mjd: f64,
    target: &Target,
    ephemeris: &dyn Ephemeris,
    mount: &MountAxes,
    mesh: &MeshTable,
) -> Vec<MountFrame> {
    let step_days = (trackint_secs / PPTRACK as f64) / 86_400.0;
    let offset = target.offset();

    (0..PPTRACK)
        .map(|i| {
            let mjd = host_mjd + step_days * i as f64;
            let ApparentPosition { ra_hours, dec_deg } = ephemeris.apparent_position(target, mjd);
            let ha_hours = crate::astro_math::ra_to_hour_angle(ra_hours);
            let ha = crate::astro_math::hours_to_rad(ha_hours)
                + crate::astro_math::deg_to_rad(offset.d_ra_arcsec / 3600.0);
            let dec = crate::astro_math::deg_to_rad(dec_deg)
                + crate::astro_math::deg_to_rad(offset.d_dec_arcsec / 3600.0);
            sky_to_mount(ha, dec, mount, mesh)
        })
        .collect()
}

fn axis_component_steps(id: AxisId, frame: &MountFrame) -> i64 {
    let value = match id {
        AxisId::Ha => frame.x,
        AxisId::Dec => frame.y,
        AxisId::Rotator => frame.r,
        _ => 0.0,
    };
    (value / std::f64::consts::TAU * 1_000_000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Equinox, TargetOffset};
    use crate::transport::{AxisAddress, VirtualTransport};

    struct StubEphemeris;
    impl Ephemeris for StubEphemeris {
        fn apparent_position(&self, _target: &Target, _mjd: f64) -> ApparentPosition {
            ApparentPosition {
                ra_hours: 5.0,
                dec_deg: 30.0,
            }
        }
    }

    fn mount() -> MountAxes {
        MountAxes {
            ht: 0.,
            dt: 0.,
            xp: 0.,
            yc: 0.,
            np: 0.,
            r0: 0.,
            have_rotator: false,
            german_equatorial: false,
            zenith_flip: false,
            latitude: crate::astro_math::deg_to_rad(45.),
            neg_ha_lim: -std::f64::consts::PI,
            pos_ha_lim: std::f64::consts::PI,
        }
    }

    #[test]
    fn profile_has_pptrack_samples() {
        let profile = build_profile(4.0, 60000.0, &Target::Apparent {
            ra_hours: 5.,
            dec_deg: 30.,
            offset: TargetOffset::default(),
        }, &StubEphemeris, &mount(), &MeshTable::identity());
        assert_eq!(profile.len(), PPTRACK);
    }

    #[test]
    fn starting_a_track_marks_engine_active() {
        let mut engine = TrackingEngine::new(TrackingConfig {
            trackint_secs: 4.0,
            track_acc: 0.001,
        });
        assert!(!engine.is_active());
        engine.start(Target::Fixed {
            ra_hours: 5.,
            dec_deg: 30.,
            equinox: Equinox::J2000,
            offset: TargetOffset::default(),
        });
        assert!(engine.is_active());
        engine.stop();
        assert!(!engine.is_active());
    }

    #[test]
    fn drift_beyond_maxjitter_is_fatal() {
        let mut engine = TrackingEngine::new(TrackingConfig {
            trackint_secs: 4.0,
            track_acc: 0.001,
        });
        engine.start(Target::Fixed {
            ra_hours: 5.,
            dec_deg: 30.,
            equinox: Equinox::J2000,
            offset: TargetOffset::default(),
        });

        let mut vt = VirtualTransport::new();
        let addr = AxisAddress {
            host: "virtual".into(),
            port: 0,
            address: 0,
        };
        let channels = vt.open(&addr).unwrap();
        let axes = vec![AxisTrackHandle {
            id: AxisId::Ha,
            command: channels.command,
            status: channels.status,
            have_encoder: false,
        }];

        // First poll downloads the profile and zeroes strack at host_mjd=60000.
        engine
            .poll(60000.0, &StubEphemeris, &mount(), &MeshTable::identity(), &mut vt, &axes, &HashMap::new())
            .unwrap();

        // A controller clock far from what host time implies trips the drift check.
        let mut node_clocks = HashMap::new();
        node_clocks.insert(AxisId::Ha, 0i64);
        let result = engine.poll(
            60000.0 + 1.0, // one full day later on the host clock
            &StubEphemeris,
            &mount(),
            &MeshTable::identity(),
            &mut vt,
            &axes,
            &node_clocks,
        );
        assert!(result.is_err());
        assert!(!engine.is_active());
    }
}
