//! Message grammar (§4.5): each incoming line is parsed once, at the
//! dispatcher boundary, into a typed [`Command`] (§9: "parse at the
//! dispatcher boundary into typed variants; activities take strongly-typed
//! inputs").

use crate::axis::AxisId;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reset,
    Home(Vec<AxisId>),
    Limits(Vec<AxisId>),
    Stow,
    SlewApparent {
        ra_hours: f64,
        dec_deg: f64,
        epoch: Option<f64>,
    },
    SlewHorizon {
        alt_deg: f64,
        az_deg: f64,
    },
    SlewEquatorial {
        ha_hours: f64,
        dec_deg: f64,
    },
    DbLine {
        line: String,
        d_ra_arcsec: f64,
        d_dec_arcsec: f64,
    },
    Jog(Vec<char>),
    Offset {
        x_arcsec: f64,
        y_arcsec: f64,
    },
    Raster {
        enable: bool,
        size_arcsec: f64,
    },
    Stop,
}

fn axes_from_letters(rest: &str) -> Vec<AxisId> {
    let axes: Vec<AxisId> = rest
        .chars()
        .filter_map(|c| match c.to_ascii_uppercase() {
            'H' => Some(AxisId::Ha),
            'D' => Some(AxisId::Dec),
            'R' => Some(AxisId::Rotator),
            _ => None,
        })
        .collect();
    if axes.is_empty() {
        AxisId::MOUNT_AXES.to_vec()
    } else {
        axes
    }
}

/// Pulls `Key:value` tokens out of a line, e.g. `"RA:5.5 Dec:30 Epoch:2000"`.
fn fields(line: &str) -> std::collections::HashMap<String, String> {
    line.split_whitespace()
        .filter_map(|tok| tok.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn parse(line: &str) -> Command {
    let trimmed = line.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower == "reset" {
        return Command::Reset;
    }
    if lower == "stow" {
        return Command::Stow;
    }
    if let Some(rest) = trimmed.strip_prefix("home") {
        return Command::Home(axes_from_letters(rest));
    }
    if let Some(rest) = trimmed.strip_prefix("limits") {
        return Command::Limits(axes_from_letters(rest));
    }
    if let Some(rest) = trimmed.strip_prefix("raster") {
        let mut parts = rest.split_whitespace();
        let n: i32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let size: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.);
        return Command::Raster {
            enable: n != 0,
            size_arcsec: size,
        };
    }
    if let Some(rest) = trimmed.strip_prefix("Offset") {
        let mut parts = rest.split(|c| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty());
        let x: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.);
        let y: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.);
        return Command::Offset {
            x_arcsec: x,
            y_arcsec: y,
        };
    }
    if trimmed.starts_with('j') && trimmed.len() > 1 && trimmed[1..].chars().all(|c| "NnSsEeWw0".contains(c)) {
        return Command::Jog(trimmed[1..].chars().collect());
    }
    if let Some(rest) = trimmed.strip_prefix("dRA:") {
        // "dRA:x dDec:y #<db line>"
        let (offsets, dbline) = rest.split_once('#').unwrap_or((rest, ""));
        let f = fields(&format!("dRA:{}", offsets));
        let d_ra = f.get("dRA").and_then(|s| s.parse().ok()).unwrap_or(0.);
        let d_dec = f.get("dDec").and_then(|s| s.parse().ok()).unwrap_or(0.);
        return Command::DbLine {
            line: dbline.trim().to_string(),
            d_ra_arcsec: d_ra,
            d_dec_arcsec: d_dec,
        };
    }

    let f = fields(trimmed);
    if let (Some(ra), Some(dec)) = (f.get("RA"), f.get("Dec")) {
        if let (Ok(ra), Ok(dec)) = (ra.parse(), dec.parse()) {
            let epoch = f.get("Epoch").and_then(|s| s.parse().ok());
            return Command::SlewApparent {
                ra_hours: ra,
                dec_deg: dec,
                epoch,
            };
        }
    }
    if let (Some(alt), Some(az)) = (f.get("Alt"), f.get("Az")) {
        if let (Ok(alt), Ok(az)) = (alt.parse(), az.parse()) {
            return Command::SlewHorizon {
                alt_deg: alt,
                az_deg: az,
            };
        }
    }
    if let (Some(ha), Some(dec)) = (f.get("HA"), f.get("Dec")) {
        if let (Ok(ha), Ok(dec)) = (ha.parse(), dec.parse()) {
            return Command::SlewEquatorial {
                ha_hours: ha,
                dec_deg: dec,
            };
        }
    }

    // A well-formed xephem DB line with no explicit offsets.
    if trimmed.contains(',') && !trimmed.is_empty() {
        return Command::DbLine {
            line: trimmed.to_string(),
            d_ra_arcsec: 0.,
            d_dec_arcsec: 0.,
        };
    }

    Command::Stop
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reset_and_stow() {
        assert_eq!(parse("reset"), Command::Reset);
        assert_eq!(parse("stow"), Command::Stow);
    }

    #[test]
    fn parses_home_with_named_axes() {
        assert_eq!(parse("home HD"), Command::Home(vec![AxisId::Ha, AxisId::Dec]));
        assert_eq!(parse("home"), Command::Home(AxisId::MOUNT_AXES.to_vec()));
    }

    #[test]
    fn parses_slew_apparent_with_and_without_epoch() {
        assert_eq!(
            parse("RA:5.5 Dec:30 Epoch:2000"),
            Command::SlewApparent {
                ra_hours: 5.5,
                dec_deg: 30.,
                epoch: Some(2000.)
            }
        );
        assert_eq!(
            parse("RA:5.5 Dec:30"),
            Command::SlewApparent {
                ra_hours: 5.5,
                dec_deg: 30.,
                epoch: None
            }
        );
    }

    #[test]
    fn parses_slew_horizon() {
        assert_eq!(
            parse("Alt:45 Az:90"),
            Command::SlewHorizon {
                alt_deg: 45.,
                az_deg: 90.
            }
        );
    }

    #[test]
    fn parses_jog_sequence() {
        assert_eq!(parse("jNe"), Command::Jog(vec!['N', 'e']));
    }

    #[test]
    fn parses_offset() {
        assert_eq!(
            parse("Offset 10,-5"),
            Command::Offset {
                x_arcsec: 10.,
                y_arcsec: -5.
            }
        );
    }

    #[test]
    fn unrecognised_text_is_a_stop() {
        assert_eq!(parse("gibberish"), Command::Stop);
    }

    #[test]
    fn parses_raster_enable_and_disable() {
        assert_eq!(
            parse("raster 1 30"),
            Command::Raster {
                enable: true,
                size_arcsec: 30.
            }
        );
        assert_eq!(
            parse("raster 0 0"),
            Command::Raster {
                enable: false,
                size_arcsec: 0.
            }
        );
    }
}
