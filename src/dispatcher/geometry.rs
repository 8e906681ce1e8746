//! `chkLimits`/`chkDomeLimits` (§4.5): geometry validation run on every
//! computed mount-frame target before any motor command is issued (§8
//! invariant 4).

use crate::axis::AxisConfig;
use crate::config::CoreConfig;
use crate::errors::GeometryError;
use crate::mount::MountFrame;
use std::f64::consts::TAU;

/// Checks one axis value against its soft limits, trying +/- one whole
/// revolution first when `allow_wrap` (HA only, §4.5: "Axes with
/// wrap-around add or subtract whole revolutions to escape the limit gap
/// before rejection").
fn clamp_into_limits(value: f64, cfg: &AxisConfig, allow_wrap: bool) -> Result<f64, GeometryError> {
    if !cfg.have_limits {
        return Ok(value);
    }
    let candidates: &[f64] = if allow_wrap { &[0.0, TAU, -TAU] } else { &[0.0] };
    for &shift in candidates {
        let candidate = value + shift;
        if cfg.neg_lim < candidate && candidate < cfg.pos_lim {
            return Ok(candidate);
        }
    }
    if value <= cfg.neg_lim {
        Err(GeometryError::NegativeLimit { axis: cfg.id.label() })
    } else {
        Err(GeometryError::PositiveLimit { axis: cfg.id.label() })
    }
}

/// Validates a candidate mount-frame target axis-by-axis, escaping
/// wrap-around gaps on HA before giving up. Returns the (possibly
/// revolution-shifted) frame that is actually safe to command.
pub fn chk_limits(
    frame: MountFrame,
    ha_cfg: &AxisConfig,
    dec_cfg: &AxisConfig,
    rotator_cfg: Option<&AxisConfig>,
) -> Result<MountFrame, GeometryError> {
    let x = clamp_into_limits(frame.x, ha_cfg, true)?;
    let y = clamp_into_limits(frame.y, dec_cfg, false)?;
    let r = match rotator_cfg {
        Some(cfg) => clamp_into_limits(frame.r, cfg, false)?,
        None => frame.r,
    };
    Ok(MountFrame { x, y, r, flipped: frame.flipped })
}

/// Dome-interference check (§4.5): only applies when the dome is closed (or
/// moving -- anything but absent/open) and the dispatcher is not in
/// engineering-mode override.
pub fn chk_dome_limits(
    alt_deg: f64,
    az_deg: f64,
    cfg: &CoreConfig,
    dome_interferes: bool,
    engineering_mode: bool,
) -> Result<(), GeometryError> {
    if !dome_interferes || engineering_mode {
        return Ok(());
    }
    if az_deg > cfg.pos_az_lim_dc_deg {
        return Err(GeometryError::PositiveAzLimitInDome);
    }
    if az_deg < cfg.neg_az_lim_dc_deg {
        return Err(GeometryError::NegativeAzLimitInDome);
    }
    if alt_deg > cfg.pos_alt_lim_dc_deg {
        return Err(GeometryError::PositiveAltLimitInDome);
    }
    if alt_deg < cfg.neg_alt_lim_dc_deg {
        return Err(GeometryError::NegativeAltLimitInDome);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::AxisId;

    fn cfg(id: AxisId, neg: f64, pos: f64) -> AxisConfig {
        AxisConfig {
            id,
            have: true,
            have_encoder: true,
            have_limits: true,
            enc_home: false,
            sign: 1,
            esign: 1,
            step: 1_000_000.,
            estep: 1_000_000.,
            max_vel: 1.,
            max_acc: 1.,
            slim_acc: 0.1,
            pos_lim: pos,
            neg_lim: neg,
        }
    }

    fn core_config() -> CoreConfig {
        CoreConfig {
            latitude_deg: 32.0,
            trackint_secs: 4.,
            german_equatorial: true,
            zenith_flip: false,
            track_acc: 0.0001,
            acquire_acc: 0.001,
            acquire_delt: 0.0005,
            fine_guide_vel: 0.0001,
            coarse_guide_vel: 0.001,
            pos_alt_lim_dc_deg: 80.,
            neg_alt_lim_dc_deg: -10.,
            pos_az_lim_dc_deg: 350.,
            neg_az_lim_dc_deg: 10.,
        }
    }

    #[test]
    fn within_limits_passes_through_unchanged() {
        let ha = cfg(AxisId::Ha, -3., 3.);
        let dec = cfg(AxisId::Dec, -1.5, 1.5);
        let frame = MountFrame { x: 0.2, y: 0.3, r: 0., flipped: false };
        let out = chk_limits(frame, &ha, &dec, None).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn ha_escapes_limit_gap_by_a_full_revolution() {
        let ha = cfg(AxisId::Ha, -3.0, 3.0);
        let dec = cfg(AxisId::Dec, -1.5, 1.5);
        // 3.2 is outside (-3, 3) but 3.2 - TAU is inside.
        let frame = MountFrame { x: 3.2, y: 0., r: 0., flipped: false };
        let out = chk_limits(frame, &ha, &dec, None).unwrap();
        assert!(out.x > -3.0 && out.x < 3.0);
    }

    #[test]
    fn dec_has_no_wraparound_escape() {
        let ha = cfg(AxisId::Ha, -3., 3.);
        let dec = cfg(AxisId::Dec, -1.0, 1.0);
        let frame = MountFrame { x: 0., y: 1.5, r: 0., flipped: false };
        assert!(chk_limits(frame, &ha, &dec, None).is_err());
    }

    #[test]
    fn dome_check_only_applies_when_dome_interferes_and_not_engineering() {
        let cfg = core_config();
        assert!(chk_dome_limits(45., 90., &cfg, false, false).is_ok());
        assert!(chk_dome_limits(45., 5., &cfg, true, true).is_ok());
        assert!(chk_dome_limits(45., 5., &cfg, true, false).is_err());
    }
}
