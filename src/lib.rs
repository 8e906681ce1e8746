//! Multi-axis motion-control core for an autonomous astronomical
//! observatory (§1 OVERVIEW). The crate is organised around the five
//! components named in §4: axis transport (C1), mount-model transform (C2),
//! per-axis activity engine (C3), tracking engine (C4) and the command
//! dispatcher (C5) that owns them all.

pub mod activity;
pub mod astro_math;
pub mod axis;
pub mod config;
pub mod consts;
pub mod dispatcher;
pub mod errors;
pub mod fifo;
pub mod mount;
pub mod state;
pub mod target;
pub mod tracking;
pub mod transport;
