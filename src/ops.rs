//! Typed wrappers for common commands.
//!
//! Each method builds its arguments, sends one operation through
//! [`ZemaxLink::send_op`] and turns the decoded reply into a plain value or a
//! record from [`models`](crate::models).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{Arg, ReplyShape, Value};
use crate::error::LinkError;
use crate::ipc::ZemaxLink;
use crate::models::{Field, FieldHeader, PupilData, RayTraceData, SystemData, WaveHeader, Wavelength};
use crate::operations::{self, Operation};

/// Status the peer returns when a file or lens update could not be applied.
pub const UPDATE_FAILED: i64 = -999;

/// Merit value the optimiser reports when the lens could not be evaluated.
pub const MERIT_FAILED: f64 = 9.0e9;

/// `GetSurfaceData` codes whose reply is text (type, comment, glass, ...).
const TEXT_SURFACE_CODES: [i64; 5] = [0, 1, 4, 7, 9];

/// Parameters of a single real-ray trace.
///
/// Field coordinates (`hx`, `hy`) and pupil coordinates (`px`, `py`) are
/// normalised to the range -1..=1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceRequest {
    pub wave: i64,
    /// 0 for real rays, 1 for paraxial
    pub mode: i64,
    /// Surface to report; -1 is the image surface
    pub surface: i64,
    pub hx: f64,
    pub hy: f64,
    pub px: f64,
    pub py: f64,
}

impl Default for TraceRequest {
    fn default() -> Self {
        Self {
            wave: 1,
            mode: 0,
            surface: -1,
            hx: 0.0,
            hy: 0.0,
            px: 0.0,
            py: 0.0,
        }
    }
}

impl TraceRequest {
    fn args(&self) -> [Arg; 7] {
        [
            Arg::Int(self.wave),
            Arg::Int(self.mode),
            Arg::Int(self.surface),
            Arg::Float(self.hx),
            Arg::Float(self.hy),
            Arg::Float(self.px),
            Arg::Float(self.py),
        ]
    }
}

/// Optimisation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    DampedLeastSquares,
    OrthogonalDescent,
}

impl Algorithm {
    fn code(self) -> i64 {
        match self {
            Algorithm::DampedLeastSquares => 0,
            Algorithm::OrthogonalDescent => 1,
        }
    }
}

fn is_absolute(path: &str) -> bool {
    if Path::new(path).is_absolute() {
        return true;
    }
    // The peer may run on Windows: accept drive-letter and UNC paths too.
    let bytes = path.as_bytes();
    let drive = bytes.len() > 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/');
    drive || path.starts_with("\\\\")
}

fn lens_file_arg(path: &Path) -> Result<String, LinkError> {
    let text = path.to_str().ok_or_else(|| {
        LinkError::InvalidArgument(format!("path is not valid UTF-8: {}", path.display()))
    })?;
    if !is_absolute(text) {
        return Err(LinkError::InvalidArgument(format!(
            "lens file path must be absolute: {}",
            text
        )));
    }
    let is_zmx = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zmx"));
    if !is_zmx {
        return Err(LinkError::InvalidArgument(format!(
            "lens file must have a .zmx extension: {}",
            text
        )));
    }
    Ok(text.to_string())
}

impl ZemaxLink {
    /// Version number of the running peer, e.g. `130101`.
    pub fn get_version(&self) -> Result<i64, LinkError> {
        self.send_op(&operations::GET_VERSION, &[])?.int(0)
    }

    pub fn get_serial(&self) -> Result<i64, LinkError> {
        self.send_op(&operations::GET_SERIAL, &[])?.int(0)
    }

    /// Title of the lens in the server copy.
    pub fn get_name(&self) -> Result<String, LinkError> {
        Ok(self.send_op(&operations::GET_NAME, &[])?.text(0)?.to_string())
    }

    /// Full path of the lens file in the server copy.
    pub fn get_file(&self) -> Result<String, LinkError> {
        Ok(self.send_op(&operations::GET_FILE, &[])?.text(0)?.to_string())
    }

    pub fn get_system(&self) -> Result<SystemData, LinkError> {
        SystemData::try_from(&self.send_op(&operations::GET_SYSTEM, &[])?)
    }

    pub fn get_pupil(&self) -> Result<PupilData, LinkError> {
        PupilData::try_from(&self.send_op(&operations::GET_PUPIL, &[])?)
    }

    /// Trace one ray through the server copy of the lens.
    ///
    /// Check [`RayTraceData::is_ok`] before using the coordinates.
    pub fn get_trace(&self, request: &TraceRequest) -> Result<RayTraceData, LinkError> {
        RayTraceData::try_from(&self.send_op(&operations::GET_TRACE, &request.args())?)
    }

    /// Recompute the server copy. Returns 0 on success, -1 on failure.
    pub fn get_update(&self) -> Result<i64, LinkError> {
        self.send_op(&operations::GET_UPDATE, &[])?.int(0)
    }

    /// Copy the editor's lens into the server and recompute. Returns 0 on
    /// success, -1 on failure.
    pub fn get_refresh(&self) -> Result<i64, LinkError> {
        self.send_op(&operations::GET_REFRESH, &[])?.int(0)
    }

    /// Copy the server's lens into the editor, optionally updating open
    /// windows. Returns 0 on success or [`UPDATE_FAILED`].
    pub fn push_lens(&self, update_windows: bool) -> Result<i64, LinkError> {
        let args = if update_windows {
            vec![Arg::Int(1)]
        } else {
            Vec::new()
        };
        self.send_op(&operations::PUSH_LENS, &args)?.int(0)
    }

    /// Load a lens file into the server copy.
    ///
    /// With `append`, the file is inserted starting at that surface. The
    /// path must be absolute, end in `.zmx`, and exist. Returns 0 on
    /// success or [`UPDATE_FAILED`].
    pub fn load_file(&self, path: &Path, append: Option<i64>) -> Result<i64, LinkError> {
        let file = lens_file_arg(path)?;
        if !path.exists() {
            return Err(LinkError::InvalidArgument(format!(
                "lens file does not exist: {}",
                file
            )));
        }
        let mut args = vec![Arg::Str(file)];
        if let Some(surface) = append.filter(|s| *s != 0) {
            args.push(Arg::Int(surface));
        }
        self.send_op(&operations::LOAD_FILE, &args)?.int(0)
    }

    /// Save the server copy to a lens file. The path must be absolute and end
    /// in `.zmx`. Returns 0 on success or [`UPDATE_FAILED`].
    pub fn save_file(&self, path: &Path) -> Result<i64, LinkError> {
        let file = lens_file_arg(path)?;
        self.send_op(&operations::SAVE_FILE, &[Arg::Str(file)])?.int(0)
    }

    /// One item of surface data.
    ///
    /// Codes 0, 1, 4, 7 and 9 (type, comment, glass, ...) return text; every
    /// other code returns a number. `arg2` selects an element for the codes
    /// that take one.
    pub fn get_surface_data(
        &self,
        surface: i64,
        code: i64,
        arg2: Option<i64>,
    ) -> Result<Value, LinkError> {
        const AS_TEXT: Operation = Operation::new("GetSurfaceData", ReplyShape::Text);

        let mut args = vec![Arg::Int(surface), Arg::Int(code)];
        if let Some(extra) = arg2 {
            args.push(Arg::Int(extra));
        }
        let reply = self.send_op(&AS_TEXT, &args)?;
        let text = reply.text(0)?.trim();

        if TEXT_SURFACE_CODES.contains(&code) {
            let first = text.split_whitespace().next().unwrap_or_default();
            return Ok(Value::Str(first.to_string()));
        }
        text.parse::<f64>().map(Value::Float).map_err(|_| LinkError::Decode {
            command: AS_TEXT.name.to_string(),
            reply: text.to_string(),
            reason: format!("surface data code {} is not a number", code),
        })
    }

    pub fn get_field_header(&self) -> Result<FieldHeader, LinkError> {
        FieldHeader::try_from(&self.send_op(&operations::GET_FIELD_HEADER, &[Arg::Int(0)])?)
    }

    /// Field point `n` (1-based).
    pub fn get_field(&self, n: i64) -> Result<Field, LinkError> {
        if n < 1 {
            return Err(LinkError::InvalidArgument(format!(
                "field numbers start at 1, got {}; use get_field_header",
                n
            )));
        }
        Field::try_from(&self.send_op(&operations::GET_FIELD_ROW, &[Arg::Int(n)])?)
    }

    pub fn get_wave_header(&self) -> Result<WaveHeader, LinkError> {
        WaveHeader::try_from(&self.send_op(&operations::GET_WAVE_HEADER, &[Arg::Int(0)])?)
    }

    /// Wavelength `n` (1-based).
    pub fn get_wave(&self, n: i64) -> Result<Wavelength, LinkError> {
        if n < 1 {
            return Err(LinkError::InvalidArgument(format!(
                "wavelength numbers start at 1, got {}; use get_wave_header",
                n
            )));
        }
        Wavelength::try_from(&self.send_op(&operations::GET_WAVE_ROW, &[Arg::Int(n)])?)
    }

    /// Run the local optimiser and return the final merit function.
    ///
    /// `cycles == 0` runs in automatic mode; a negative value only updates
    /// the merit function. [`MERIT_FAILED`] means the lens could not be
    /// evaluated. Long runs need a timeout to match.
    pub fn optimize(&self, cycles: i64, algorithm: Algorithm) -> Result<f64, LinkError> {
        self.send_op(
            &operations::OPTIMIZE,
            &[Arg::Int(cycles), Arg::Int(algorithm.code())],
        )?
        .float(0)
    }
}
