//! Typed records decoded from structured replies.
//!
//! Each record is built from a [`Reply`] that was decoded with the matching
//! shape from [`operations`](crate::operations). Integer codes the peer uses
//! for modes and units become enums, with an `Unknown` variant so that codes
//! introduced by newer peers still decode.

use serde::{Deserialize, Serialize};

use crate::codec::Reply;
use crate::error::LinkError;

/// Lens units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensUnit {
    Millimeters,
    Centimeters,
    Inches,
    Meters,
    Unknown(i64),
}

impl LensUnit {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => LensUnit::Millimeters,
            1 => LensUnit::Centimeters,
            2 => LensUnit::Inches,
            3 => LensUnit::Meters,
            other => LensUnit::Unknown(other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LensUnit::Millimeters => "mm",
            LensUnit::Centimeters => "cm",
            LensUnit::Inches => "in",
            LensUnit::Meters => "m",
            LensUnit::Unknown(_) => "?",
        }
    }
}

/// Ray aiming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RayAiming {
    Off,
    Paraxial,
    Real,
    Unknown(i64),
}

impl RayAiming {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => RayAiming::Off,
            1 => RayAiming::Paraxial,
            2 => RayAiming::Real,
            other => RayAiming::Unknown(other),
        }
    }
}

/// How the system aperture is specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApertureType {
    EntrancePupilDiameter,
    ImageSpaceFNumber,
    ObjectSpaceNa,
    FloatByStop,
    ParaxialWorkingFNumber,
    ObjectConeAngle,
    Unknown(i64),
}

impl ApertureType {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => ApertureType::EntrancePupilDiameter,
            1 => ApertureType::ImageSpaceFNumber,
            2 => ApertureType::ObjectSpaceNa,
            3 => ApertureType::FloatByStop,
            4 => ApertureType::ParaxialWorkingFNumber,
            5 => ApertureType::ObjectConeAngle,
            other => ApertureType::Unknown(other),
        }
    }
}

/// Pupil apodization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Apodization {
    None,
    Gaussian,
    CosineCubed,
    Unknown(i64),
}

impl Apodization {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Apodization::None,
            1 => Apodization::Gaussian,
            2 => Apodization::CosineCubed,
            other => Apodization::Unknown(other),
        }
    }
}

/// How field points are specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Angles in degrees
    Angle,
    ObjectHeight,
    ParaxialImageHeight,
    RealImageHeight,
    Unknown(i64),
}

impl FieldKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => FieldKind::Angle,
            1 => FieldKind::ObjectHeight,
            2 => FieldKind::ParaxialImageHeight,
            3 => FieldKind::RealImageHeight,
            other => FieldKind::Unknown(other),
        }
    }
}

fn require(reply: &Reply, min: usize) -> Result<(), LinkError> {
    if reply.len() < min {
        return Err(LinkError::Decode {
            command: reply.command().to_string(),
            reply: reply
                .values()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
            reason: format!("expected at least {} fields, got {}", min, reply.len()),
        });
    }
    Ok(())
}

/// General lens data, as returned by `GetSystem`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemData {
    pub num_surfaces: i64,
    pub units: LensUnit,
    pub stop_surface: i64,
    pub non_axial: bool,
    pub ray_aiming: RayAiming,
    /// Index data adjusted to environment
    pub adjust_index: bool,
    /// Degrees Celsius
    pub temperature: f64,
    /// Atmospheres. Older peers do not report it.
    pub pressure: Option<f64>,
    pub global_ref_surface: Option<i64>,
}

impl TryFrom<&Reply> for SystemData {
    type Error = LinkError;

    fn try_from(reply: &Reply) -> Result<Self, Self::Error> {
        require(reply, 7)?;
        Ok(Self {
            num_surfaces: reply.int(0)?,
            units: LensUnit::from_code(reply.int(1)?),
            stop_surface: reply.int(2)?,
            non_axial: reply.int(3)? != 0,
            ray_aiming: RayAiming::from_code(reply.int(4)?),
            adjust_index: reply.int(5)? != 0,
            temperature: reply.float(6)?,
            pressure: reply.get(7).and_then(|v| v.as_f64()),
            global_ref_surface: reply.get(8).and_then(|v| v.as_i64()),
        })
    }
}

/// Result of tracing one real ray.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayTraceData {
    /// 0 on success. Positive: the ray missed that surface. Negative: total
    /// internal reflection at surface `|error_code|`.
    pub error_code: i64,
    /// First surface where the ray was vignetted, 0 if none.
    pub vignette_code: i64,
    pub position: [f64; 3],
    /// Direction cosines after the requested surface.
    pub direction: [f64; 3],
    /// Surface normal at the intercept.
    pub normal: [f64; 3],
    pub intensity: f64,
}

impl RayTraceData {
    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }

    /// Surface the ray missed, if any.
    pub fn missed_surface(&self) -> Option<i64> {
        (self.error_code > 0).then_some(self.error_code)
    }

    /// Surface with total internal reflection, if any.
    pub fn tir_surface(&self) -> Option<i64> {
        (self.error_code < 0).then(|| -self.error_code)
    }

    pub fn is_vignetted(&self) -> bool {
        self.vignette_code != 0
    }
}

impl TryFrom<&Reply> for RayTraceData {
    type Error = LinkError;

    fn try_from(reply: &Reply) -> Result<Self, Self::Error> {
        require(reply, 12)?;
        let triple = |start: usize| -> Result<[f64; 3], LinkError> {
            Ok([
                reply.float(start)?,
                reply.float(start + 1)?,
                reply.float(start + 2)?,
            ])
        };
        Ok(Self {
            error_code: reply.int(0)?,
            vignette_code: reply.int(1)?,
            position: triple(2)?,
            direction: triple(5)?,
            normal: triple(8)?,
            intensity: reply.float(11)?,
        })
    }
}

/// Pupil data, as returned by `GetPupil`. Lengths are in lens units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PupilData {
    pub aperture_type: ApertureType,
    /// Stop semi-diameter for float-by-stop systems, else the aperture value.
    pub value: f64,
    pub entrance_pupil_diameter: f64,
    pub entrance_pupil_position: f64,
    pub exit_pupil_diameter: f64,
    pub exit_pupil_position: f64,
    pub apodization: Apodization,
    pub apodization_factor: f64,
}

impl TryFrom<&Reply> for PupilData {
    type Error = LinkError;

    fn try_from(reply: &Reply) -> Result<Self, Self::Error> {
        require(reply, 8)?;
        Ok(Self {
            aperture_type: ApertureType::from_code(reply.int(0)?),
            value: reply.float(1)?,
            entrance_pupil_diameter: reply.float(2)?,
            entrance_pupil_position: reply.float(3)?,
            exit_pupil_diameter: reply.float(4)?,
            exit_pupil_position: reply.float(5)?,
            apodization: Apodization::from_code(reply.int(6)?),
            apodization_factor: reply.float(7)?,
        })
    }
}

/// General field settings (`GetField,0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldHeader {
    pub kind: FieldKind,
    pub count: i64,
    pub max_x: f64,
    pub max_y: f64,
    /// Rectangular rather than radial normalisation. Older peers omit it.
    pub rectangular: bool,
}

impl TryFrom<&Reply> for FieldHeader {
    type Error = LinkError;

    fn try_from(reply: &Reply) -> Result<Self, Self::Error> {
        require(reply, 2)?;
        let optional = |i: usize| reply.get(i).and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok(Self {
            kind: FieldKind::from_code(reply.int(0)?),
            count: reply.int(1)?,
            max_x: optional(2),
            max_y: optional(3),
            rectangular: optional(4) != 0.0,
        })
    }
}

/// One field point (`GetField,n` for n > 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
    pub vdx: f64,
    pub vdy: f64,
    pub vcx: f64,
    pub vcy: f64,
    pub van: f64,
}

impl TryFrom<&Reply> for Field {
    type Error = LinkError;

    fn try_from(reply: &Reply) -> Result<Self, Self::Error> {
        require(reply, 3)?;
        // Vignetting factors are missing when the field has none set.
        let factor = |i: usize| reply.get(i).and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok(Self {
            x: reply.float(0)?,
            y: reply.float(1)?,
            weight: reply.float(2)?,
            vdx: factor(3),
            vdy: factor(4),
            vcx: factor(5),
            vcy: factor(6),
            van: factor(7),
        })
    }
}

/// Wavelength settings (`GetWave,0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveHeader {
    pub primary: i64,
    pub count: i64,
}

impl TryFrom<&Reply> for WaveHeader {
    type Error = LinkError;

    fn try_from(reply: &Reply) -> Result<Self, Self::Error> {
        require(reply, 2)?;
        Ok(Self {
            primary: reply.int(0)?,
            count: reply.int(1)?,
        })
    }
}

/// One wavelength (`GetWave,n` for n > 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wavelength {
    /// Micrometres
    pub wavelength: f64,
    pub weight: f64,
}

impl TryFrom<&Reply> for Wavelength {
    type Error = LinkError;

    fn try_from(reply: &Reply) -> Result<Self, Self::Error> {
        require(reply, 2)?;
        Ok(Self {
            wavelength: reply.float(0)?,
            weight: reply.float(1)?,
        })
    }
}
