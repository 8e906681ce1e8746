//! The "Mount-axes record" (§3): telescope-geometry parameters, read-only
//! after initialisation. Loaded from `hc.cfg` (§6).

use crate::astro_math::Radians;

/// Read-only telescope-geometry parameters (§3 "Mount-axes record").
#[derive(Debug, Clone, Copy)]
pub struct MountAxes {
    /// Polar-axis error vector, radians.
    pub ht: Radians,
    pub dt: Radians,
    /// Collimation error, radians.
    pub xp: Radians,
    /// Bearing non-perpendicularity, radians.
    pub yc: Radians,
    pub np: Radians,
    /// Rotator mechanical zero, radians. Ignored if `have_rotator` is false.
    pub r0: Radians,
    pub have_rotator: bool,
    pub german_equatorial: bool,
    pub zenith_flip: bool,
    /// Observer latitude, radians -- needed for the final HA/Dec <-> Alt/Az
    /// leg of the mount<->sky transform (§4.2).
    pub latitude: Radians,
    /// Soft HA envelope, radians: `neg_ha_lim < pos_ha_lim`.
    pub neg_ha_lim: Radians,
    pub pos_ha_lim: Radians,
}

impl MountAxes {
    /// `LARGEXP` in `hc.cfg`: shifts `HT` and `XP` by pi/2, per §6.
    pub fn apply_largexp(&mut self) {
        self.ht += std::f64::consts::FRAC_PI_2;
        self.xp += std::f64::consts::FRAC_PI_2;
    }
}
