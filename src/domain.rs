use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::HsaError;

/// HST observation identifier, e.g. `J6FL25S4Q`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservationId(String);

impl ObservationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used in output file names and MAST product paths.
    pub fn lower(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObservationId {
    type Err = HsaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if !is_valid {
            return Err(HsaError::InvalidObservationId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Box search region: center in decimal degrees, radius in arcminutes.
///
/// The RA half-width is cos(dec)-corrected when the box is turned into
/// query clauses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyBox {
    pub ra: f64,
    pub dec: f64,
    pub radius_arcmin: f64,
}

impl SkyBox {
    pub fn new(ra: f64, dec: f64, radius_arcmin: f64) -> Result<Self, HsaError> {
        if !(0.0..360.0).contains(&ra) || !ra.is_finite() {
            return Err(HsaError::InvalidBox(format!("ra out of range: {ra}")));
        }
        if !(-90.0..=90.0).contains(&dec) || !dec.is_finite() {
            return Err(HsaError::InvalidBox(format!("dec out of range: {dec}")));
        }
        if !(radius_arcmin > 0.0) || !radius_arcmin.is_finite() {
            return Err(HsaError::InvalidBox(format!(
                "radius must be positive: {radius_arcmin}"
            )));
        }
        Ok(Self {
            ra,
            dec,
            radius_arcmin,
        })
    }
}

impl fmt::Display for SkyBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.ra, self.dec, self.radius_arcmin)
    }
}

impl FromStr for SkyBox {
    type Err = HsaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts = value.split(',').map(str::trim).collect::<Vec<_>>();
        if parts.len() != 3 {
            return Err(HsaError::InvalidBox(format!(
                "expected ra,dec,radius_arcmin: {value}"
            )));
        }
        let parse = |part: &str| {
            part.parse::<f64>()
                .map_err(|_| HsaError::InvalidBox(format!("not a number: {part}")))
        };
        SkyBox::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?)
    }
}

/// Galactic dust reddening model served by IRSA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DustModel {
    /// Schlafly & Finkbeiner 2011.
    Sandf,
    /// Schlegel, Finkbeiner & Davis 1998.
    Sfd,
}

impl fmt::Display for DustModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DustModel::Sandf => write!(f, "SandF"),
            DustModel::Sfd => write!(f, "SFD"),
        }
    }
}

impl Default for DustModel {
    fn default() -> Self {
        DustModel::Sandf
    }
}

/// Build a `jHHMMSS[+-]DDMMSS` target name from decimal-degree coordinates.
///
/// Coordinates are quantized by `scale` before conversion (RA additionally by
/// cos(dec)) so nearby positions collapse onto the same name. Seconds are
/// rounded to two decimals and then truncated.
pub fn radec_to_targname(ra: f64, dec: f64, scale: f64) -> String {
    let dec_scl = (dec * scale).round() / scale;
    let cosd = dec_scl.to_radians().cos();
    let ra_scl = (ra * scale / cosd).round() / (scale / cosd);

    let (rh, rm, rs) = sexagesimal(ra_scl.rem_euclid(360.0) / 15.0);
    let (dd, dm, ds) = sexagesimal(dec_scl.abs());
    let sign = if dec_scl < 0.0 { '-' } else { '+' };
    format!("j{rh:02}{rm:02}{rs:02}{sign}{dd:02}{dm:02}{ds:02}")
}

fn sexagesimal(value: f64) -> (u32, u32, u32) {
    let mut whole = value.trunc() as u32;
    let mut minutes = ((value * 60.0).trunc() as u32) % 60;
    let mut seconds = value * 3600.0 - (whole * 3600 + minutes * 60) as f64;
    seconds = (seconds * 100.0).round() / 100.0;
    if seconds >= 60.0 {
        seconds -= 60.0;
        minutes += 1;
    }
    if minutes >= 60 {
        minutes -= 60;
        whole += 1;
    }
    (whole, minutes, seconds.trunc() as u32)
}

/// Unweighted mean of a set of (RA, Dec) positions in decimal degrees.
pub fn mean_position(positions: &[(f64, f64)]) -> Option<(f64, f64)> {
    if positions.is_empty() {
        return None;
    }
    let n = positions.len() as f64;
    let (sum_ra, sum_dec) = positions
        .iter()
        .fold((0.0, 0.0), |(ra, dec), p| (ra + p.0, dec + p.1));
    Some((sum_ra / n, sum_dec / n))
}
