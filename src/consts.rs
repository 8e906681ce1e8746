//! Tunables that are fixed constants of the core rather than per-installation
//! config.

/// Number of (x, y, r) samples loaded into a tracking profile (`PPTRACK`).
pub const PPTRACK: usize = 60;

/// Maximum allowed divergence between host and controller clocks while
/// tracking, in seconds (`MAXJITTER`).
pub const MAXJITTER_SECS: f64 = 10.0;

/// Arcseconds in a full revolution (360 * 3600), used to convert an
/// arcsecond tracking offset into encoder steps. Only valid when an axis's
/// `estep` is defined as counts per full revolution -- see
/// `Axis::arcsec_to_steps`.
pub const ARCSEC_PER_REV: f64 = 360.0 * 3600.0;

/// How long an axis must sit within its acquisition tolerance before the
/// activity engine declares it on-target (seconds).
pub const ACQUIRE_SETTLE_SECS: f64 = 1.0;

/// Default dispatcher poll rate (Hz) absent a config override.
pub const DEFAULT_POLL_HZ: f64 = 10.0;
