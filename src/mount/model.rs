//! C2: mount-model transform. Two pure functions, exact inverses up to
//! mesh-interpolation error (§4.2).

use crate::astro_math::{
    calculate_alt_from_ha_dec, calculate_az_from_ha_dec, calculate_ha_dec_from_alt_az,
    clamp_dec_rad, deg_to_rad, rad_to_deg, wrap_pi, Radians,
};
use crate::mount::axes::MountAxes;
use crate::mount::mesh::MeshTable;

/// Mount-frame coordinates: x is polar axis, y is declination axis, r is
/// the optional field rotator (radians from mechanical home).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MountFrame {
    pub x: Radians,
    pub y: Radians,
    pub r: Radians,
    /// Whether the forward transform applied the German-equatorial pier
    /// flip. Carried on the frame so `mount_to_sky` can undo it exactly
    /// instead of re-deriving the decision from the post-rotation `x`,
    /// which does not determine it.
    pub flipped: bool,
}

/// `hd2xyr` (§4.2): apparent (HA, Dec) -> mount-frame (x, y, r).
///
/// Order: (1) mesh correction, (2) normalise HA/Dec, (3) ideal
/// equatorial-to-xy rotation (honouring German-equatorial/zenith-flip),
/// (4) non-ideal corrections (polar misalignment, collimation,
/// non-perpendicularity), (5) rotator angle from parallactic angle + R0.
pub fn sky_to_mount(ha: Radians, dec: Radians, mount: &MountAxes, mesh: &MeshTable) -> MountFrame {
    let (dha, ddec) = mesh.correction(ha, dec);
    let ha = wrap_pi(ha + dha);
    let dec = clamp_dec_rad(dec + ddec);

    // Ideal rotation: x tracks HA directly, y tracks Dec, optionally mirrored
    // by a German-equatorial pier flip or a zenith flip.
    let flip = mount.german_equatorial && should_flip(ha);
    let (mut x, mut y) = if flip {
        (wrap_pi(ha + std::f64::consts::PI), -dec)
    } else {
        (ha, dec)
    };

    if mount.zenith_flip {
        x = -x;
        y = -y;
    }

    // Non-ideal corrections: polar-axis misalignment (HT, DT), collimation
    // (XP), bearing non-perpendicularity (YC, NP).
    x += mount.ht * dec.sin() + mount.dt * dec.cos() + mount.xp;
    y += mount.yc * x.sin() + mount.np;

    let r = if mount.have_rotator {
        parallactic_angle(ha, dec, mount.latitude) + mount.r0 * if flip { -1. } else { 1. }
    } else {
        0.
    };

    MountFrame { x, y, r, flipped: flip }
}

/// `xyr2altaz` (§4.2): mount-frame (x, y, r) -> (Alt, Az), via apparent
/// HA/Dec as an intermediate. Reverses the non-ideal corrections, then the
/// ideal rotation, then the mesh correction, then HA/Dec -> Alt/Az.
pub fn mount_to_sky(frame: MountFrame, mount: &MountAxes, mesh: &MeshTable) -> (Radians, Radians) {
    let MountFrame { x: x_frame, y: y_frame, flipped, .. } = frame;

    // Undo the bearing non-perpendicularity term first; it was the last
    // thing the forward transform added to y.
    let y1 = y_frame - mount.yc * x_frame.sin() - mount.np;
    let y_prezenith = if mount.zenith_flip { -y1 } else { y1 };
    // `flipped` was recorded by the forward transform, so the un-flip
    // decision here is exact rather than re-derived from x's ambiguous
    // post-rotation range.
    let dec = if flipped { -y_prezenith } else { y_prezenith };

    // HT/DT/XP were added to x using the pre-flip sky declination, so back
    // them out with that same `dec`, not the mount-frame y.
    let x1 = x_frame - mount.ht * dec.sin() - mount.dt * dec.cos() - mount.xp;
    let x_prezenith = if mount.zenith_flip { -x1 } else { x1 };
    let ha = if flipped {
        wrap_pi(x_prezenith + std::f64::consts::PI)
    } else {
        x_prezenith
    };

    let (dha, ddec) = mesh.correction(ha, dec);
    let ha = wrap_pi(ha - dha);
    let dec = clamp_dec_rad(dec - ddec);

    let ha_hours = crate::astro_math::rad_to_hours(ha);
    let dec_deg = rad_to_deg(dec);
    let lat_deg = rad_to_deg(mount.latitude);

    let alt = calculate_alt_from_ha_dec(ha_hours, dec_deg, lat_deg);
    let az = calculate_az_from_ha_dec(ha_hours, dec_deg, lat_deg);
    (deg_to_rad(alt), deg_to_rad(az))
}

/// Alt/Az -> apparent HA/Dec, the first half of `mount_to_sky` run in
/// reverse when a caller needs encoder coordinates for a horizon target
/// (§4.5 slew-horizon).
pub fn altaz_to_hadec(alt: Radians, az: Radians, latitude: Radians) -> (Radians, Radians) {
    let (ha_hours, dec_deg) =
        calculate_ha_dec_from_alt_az(rad_to_deg(alt), rad_to_deg(az), rad_to_deg(latitude));
    (crate::astro_math::hours_to_rad(ha_hours), deg_to_rad(dec_deg))
}

/// German-equatorial mounts flip the tube across the pier once the target
/// crosses the meridian on the "wrong" side for the un-flipped geometry.
fn should_flip(ha: Radians) -> bool {
    ha < 0.
}

/// Parallactic angle, needed to counter-rotate a field derotator so the
/// camera's up stays fixed on the sky while tracking (GLOSSARY).
fn parallactic_angle(ha: Radians, dec: Radians, latitude: Radians) -> Radians {
    let sin_p = latitude.cos() * ha.sin();
    let cos_p = dec.cos() * latitude.sin() - dec.sin() * latitude.cos() * ha.cos();
    sin_p.atan2(cos_p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_mount() -> MountAxes {
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
            latitude: deg_to_rad(45.),
            neg_ha_lim: -std::f64::consts::PI,
            pos_ha_lim: std::f64::consts::PI,
        }
    }

    #[test]
    fn ideal_mount_is_identity_on_xy() {
        let mount = simple_mount();
        let mesh = MeshTable::identity();
        let frame = sky_to_mount(0.3, 0.2, &mount, &mesh);
        assert_float_eq::assert_float_relative_eq!(frame.x, 0.3, 1E-9);
        assert_float_eq::assert_float_relative_eq!(frame.y, 0.2, 1E-9);
    }

    #[test]
    fn sky_to_mount_then_mount_to_sky_round_trips_alt_az() {
        let mount = simple_mount();
        let mesh = MeshTable::identity();
        let ha = deg_to_rad(-15.);
        let dec = deg_to_rad(30.);

        let frame = sky_to_mount(ha, dec, &mount, &mesh);
        let (alt, az) = mount_to_sky(frame, &mount, &mesh);

        let expected_alt = calculate_alt_from_ha_dec(
            crate::astro_math::rad_to_hours(ha),
            rad_to_deg(dec),
            rad_to_deg(mount.latitude),
        );
        let expected_az = calculate_az_from_ha_dec(
            crate::astro_math::rad_to_hours(ha),
            rad_to_deg(dec),
            rad_to_deg(mount.latitude),
        );

        assert_float_eq::assert_float_absolute_eq!(rad_to_deg(alt), expected_alt, 1E-6);
        assert_float_eq::assert_float_absolute_eq!(rad_to_deg(az), expected_az, 1E-6);
    }

    #[test]
    fn german_equatorial_flip_reverses_x_sign_across_meridian() {
        let mut mount = simple_mount();
        mount.german_equatorial = true;
        let mesh = MeshTable::identity();

        let before = sky_to_mount(deg_to_rad(-1.), deg_to_rad(30.), &mount, &mesh);
        let after = sky_to_mount(deg_to_rad(1.), deg_to_rad(30.), &mount, &mesh);

        assert!(before.x.signum() != after.x.signum() || before.x == 0. || after.x == 0.);
        assert_float_eq::assert_float_relative_eq!(before.y, 30f64.to_radians(), 1E-6);
        assert_float_eq::assert_float_relative_eq!(after.y, 30f64.to_radians(), 1E-6);
    }

    #[test]
    fn german_equatorial_flip_round_trips_exactly() {
        let mut mount = simple_mount();
        mount.german_equatorial = true;
        let mesh = MeshTable::identity();

        let ha = deg_to_rad(-0.3f64.to_degrees());
        let dec = deg_to_rad(0.2f64.to_degrees());
        let frame = sky_to_mount(ha, dec, &mount, &mesh);
        assert!(frame.flipped);

        let (alt, az) = mount_to_sky(frame, &mount, &mesh);
        let expected_alt = calculate_alt_from_ha_dec(
            crate::astro_math::rad_to_hours(ha),
            rad_to_deg(dec),
            rad_to_deg(mount.latitude),
        );
        let expected_az = calculate_az_from_ha_dec(
            crate::astro_math::rad_to_hours(ha),
            rad_to_deg(dec),
            rad_to_deg(mount.latitude),
        );
        assert_float_eq::assert_float_absolute_eq!(rad_to_deg(alt), expected_alt, 1E-6);
        assert_float_eq::assert_float_absolute_eq!(rad_to_deg(az), expected_az, 1E-6);
    }

    #[test]
    fn non_ideal_corrections_round_trip_with_a_flip_active() {
        let mut mount = simple_mount();
        mount.german_equatorial = true;
        mount.ht = 0.001;
        mount.dt = -0.0005;
        mount.xp = 0.0002;
        mount.yc = 0.0003;
        mount.np = -0.0001;
        let mesh = MeshTable::identity();

        let ha = deg_to_rad(-20.);
        let dec = deg_to_rad(15.);
        let frame = sky_to_mount(ha, dec, &mount, &mesh);
        let (alt, az) = mount_to_sky(frame, &mount, &mesh);

        let expected_alt = calculate_alt_from_ha_dec(
            crate::astro_math::rad_to_hours(ha),
            rad_to_deg(dec),
            rad_to_deg(mount.latitude),
        );
        let expected_az = calculate_az_from_ha_dec(
            crate::astro_math::rad_to_hours(ha),
            rad_to_deg(dec),
            rad_to_deg(mount.latitude),
        );
        assert_float_eq::assert_float_absolute_eq!(rad_to_deg(alt), expected_alt, 1E-6);
        assert_float_eq::assert_float_absolute_eq!(rad_to_deg(az), expected_az, 1E-6);
    }

    #[test]
    fn tolerates_any_finite_input() {
        let mount = simple_mount();
        let mesh = MeshTable::identity();
        for ha_deg in [-720., -181., 0., 181., 720.] {
            for dec_deg in [-190., -91., 0., 91., 190.] {
                let frame = sky_to_mount(deg_to_rad(ha_deg), deg_to_rad(dec_deg), &mount, &mesh);
                assert!(frame.x.is_finite());
                assert!(frame.y.is_finite());
            }
        }
    }

    #[test]
    fn zenith_has_well_defined_altitude() {
        let mount = simple_mount();
        let mesh = MeshTable::identity();
        let frame = sky_to_mount(0., mount.latitude, &mount, &mesh);
        let (alt, _az) = mount_to_sky(frame, &mount, &mesh);
        assert_float_eq::assert_float_absolute_eq!(rad_to_deg(alt), 90., 1E-6);
    }
}
