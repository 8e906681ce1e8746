//! Configuration (§6, §7 "Configuration error -> fatal at startup"). The
//! files are plain `KEY=VALUE` with `#`-comments, grounded on the
//! `CfgEntry`/`readCfgFile` table-driven reader the rest of this
//! repository's config files were loaded by: every required key is listed
//! once, parsed to its typed slot, and any key missing or malformed fails
//! the whole file in one shot rather than partially applying it.

mod keyval;

pub use keyval::KeyValueFile;

use crate::axis::AxisConfig;
use crate::errors::ConfigError;
use crate::mount::MountAxes;
use std::path::Path;

/// `telsched.cfg` (§6): scheduling/limit envelope shared with the
/// scheduler peer process.
#[derive(Debug, Clone, Copy)]
pub struct SchedConfig {
    pub min_alt_deg: f64,
    pub max_ha_hours: f64,
    pub max_dec_deg: f64,
    pub sundown_deg: f64,
    pub stow_alt_deg: f64,
    pub stow_az_deg: f64,
    pub service_alt_deg: f64,
    pub service_az_deg: f64,
}

impl SchedConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = KeyValueFile::load(path)?;
        Ok(SchedConfig {
            min_alt_deg: file.required_f64("MINALT")?,
            max_ha_hours: file.required_f64("MAXHA")?,
            max_dec_deg: file.required_f64("MAXDEC")?,
            sundown_deg: file.required_f64("SUNDOWN")?,
            stow_alt_deg: file.required_f64("STOWALT")?,
            stow_az_deg: file.required_f64("STOWAZ")?,
            service_alt_deg: file.required_f64("SERVICEALT")?,
            service_az_deg: file.required_f64("SERVICEAZ")?,
        })
    }
}

/// `telescoped.cfg` (§6): the core daemon's own tunables plus the dome
/// envelope and one `AxisConfig` per mount axis (prefixes `H`, `D`, `R`).
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    pub latitude_deg: f64,
    pub trackint_secs: f64,
    pub german_equatorial: bool,
    pub zenith_flip: bool,
    pub track_acc: f64,
    pub acquire_acc: f64,
    pub acquire_delt: f64,
    pub fine_guide_vel: f64,
    pub coarse_guide_vel: f64,
    pub pos_alt_lim_dc_deg: f64,
    pub neg_alt_lim_dc_deg: f64,
    pub pos_az_lim_dc_deg: f64,
    pub neg_az_lim_dc_deg: f64,
}

impl CoreConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = KeyValueFile::load(path)?;
        let trackint_secs = file.required_f64("TRACKINT")?;
        if trackint_secs <= 0. {
            return Err(ConfigError::InvalidValue {
                file: file.path_display(),
                key: "TRACKINT".into(),
                value: trackint_secs.to_string(),
                reason: "must be > 0".into(),
            });
        }
        Ok(CoreConfig {
            latitude_deg: file.required_f64("LATITUDE")?,
            trackint_secs,
            german_equatorial: file.required_bool("GERMEQ")?,
            zenith_flip: file.required_bool("ZENFLIP")?,
            track_acc: file.required_f64("TRACKACC")?,
            acquire_acc: file.required_f64("ACQUIREACC")?,
            acquire_delt: file.required_f64("ACQUIREDELT")?,
            fine_guide_vel: file.required_f64("FGUIDEVEL")?,
            coarse_guide_vel: file.required_f64("CGUIDEVEL")?,
            pos_alt_lim_dc_deg: file.required_f64("POSALTLIMDC")?,
            neg_alt_lim_dc_deg: file.required_f64("NEGALTLIMDC")?,
            pos_az_lim_dc_deg: file.required_f64("POSAZLIMDC")?,
            neg_az_lim_dc_deg: file.required_f64("NEGAZLIMDC")?,
        })
    }

    /// Parses one axis's `H*`/`D*`/`R*` group out of `telescoped.cfg`,
    /// e.g. prefix `"H"` reads `HHAVE`, `HAXIS`, `HESTEP`, `HESIGN`,
    /// `HMAXVEL`, `HMAXACC`, `HSLIMACC`.
    pub fn axis_group(
        file: &KeyValueFile,
        prefix: &str,
        id: crate::axis::AxisId,
    ) -> Result<AxisConfig, ConfigError> {
        let have = file.required_bool(&format!("{prefix}HAVE"))?;
        Ok(AxisConfig {
            id,
            have,
            have_encoder: file.optional_bool(&format!("{prefix}AXIS"))?.unwrap_or(false),
            have_limits: true,
            enc_home: file.optional_bool(&format!("{prefix}ENCHOME"))?.unwrap_or(false),
            sign: file.optional_i8(&format!("{prefix}SIGN"))?.unwrap_or(1),
            esign: file.optional_i8(&format!("{prefix}ESIGN"))?.unwrap_or(1),
            step: file.optional_f64(&format!("{prefix}STEP"))?.unwrap_or(1.0),
            estep: file.required_f64(&format!("{prefix}ESTEP"))?,
            max_vel: file.required_f64(&format!("{prefix}MAXVEL"))?,
            max_acc: file.required_f64(&format!("{prefix}MAXACC"))?,
            slim_acc: file.required_f64(&format!("{prefix}SLIMACC"))?,
            pos_lim: file.optional_f64(&format!("{prefix}POSLIM"))?.unwrap_or(std::f64::consts::PI),
            neg_lim: file.optional_f64(&format!("{prefix}NEGLIM"))?.unwrap_or(-std::f64::consts::PI),
        })
    }
}

/// Home file `hc.cfg` (§6): mount geometry plus per-axis `POSLIM`/`NEGLIM`/
/// `STEP`/`SIGN` and the `LARGEXP` flag.
pub fn load_mount_axes(path: impl AsRef<Path>, latitude_deg: f64) -> Result<MountAxes, ConfigError> {
    let file = KeyValueFile::load(path)?;
    let mut mount = MountAxes {
        ht: file.required_f64("HT")?,
        dt: file.required_f64("DT")?,
        xp: file.required_f64("XP")?,
        yc: file.required_f64("YC")?,
        np: file.required_f64("NP")?,
        r0: file.required_f64("R0")?,
        have_rotator: file.optional_bool("HAVEROTATOR")?.unwrap_or(false),
        german_equatorial: file.optional_bool("GERMEQ")?.unwrap_or(false),
        zenith_flip: file.optional_bool("ZENFLIP")?.unwrap_or(false),
        latitude: crate::astro_math::deg_to_rad(latitude_deg),
        neg_ha_lim: file.optional_f64("NEGHALIM")?.unwrap_or(-std::f64::consts::PI),
        pos_ha_lim: file.optional_f64("POSHALIM")?.unwrap_or(std::f64::consts::PI),
    };
    if file.optional_bool("LARGEXP")?.unwrap_or(false) {
        mount.apply_largexp();
    }
    Ok(mount)
}
