//! Table of known commands and the shape of their replies.
//!
//! Every entry pairs a wire name with a [`ReplyShape`]. The generic
//! [`ZemaxLink::send`](crate::ZemaxLink::send) looks names up here; commands
//! that are not listed are still sent, and their replies decoded with literal
//! inference.

use crate::codec::FieldType::{Float as F, Int as I, Str as S};
use crate::codec::ReplyShape;

/// A command name and the layout of its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub reply: ReplyShape,
}

impl Operation {
    pub const fn new(name: &'static str, reply: ReplyShape) -> Self {
        Self { name, reply }
    }
}

const INT: ReplyShape = ReplyShape::Fields(&[I]);
const FLOAT: ReplyShape = ReplyShape::Fields(&[F]);

// Identification and files
pub const GET_VERSION: Operation = Operation::new("GetVersion", INT);
pub const GET_SERIAL: Operation = Operation::new("GetSerial", INT);
pub const GET_DATE: Operation = Operation::new("GetDate", ReplyShape::Text);
pub const GET_NAME: Operation = Operation::new("GetName", ReplyShape::Text);
pub const GET_FILE: Operation = Operation::new("GetFile", ReplyShape::Text);
pub const GET_PATH: Operation = Operation::new("GetPath", ReplyShape::Fields(&[S, S]));
pub const GET_ADDRESS: Operation = Operation::new("GetAddress", ReplyShape::Text);
pub const GET_COMMENT: Operation = Operation::new("GetComment", ReplyShape::Text);
pub const LOAD_FILE: Operation = Operation::new("LoadFile", INT);
pub const SAVE_FILE: Operation = Operation::new("SaveFile", INT);
pub const NEW_LENS: Operation = Operation::new("NewLens", INT);
pub const EXPORT_CHECK: Operation = Operation::new("ExportCheck", INT);

// Server copy <-> editor synchronisation
pub const PUSH_LENS: Operation = Operation::new("PushLens", INT);
pub const PUSH_LENS_PERMISSION: Operation = Operation::new("PushLensPermission", INT);
pub const GET_REFRESH: Operation = Operation::new("GetRefresh", INT);
pub const GET_UPDATE: Operation = Operation::new("GetUpdate", INT);
pub const GET_SEQUENCE: Operation = Operation::new("GetSequence", ReplyShape::Repeated(F));

// System data
pub const GET_SYSTEM: Operation =
    Operation::new("GetSystem", ReplyShape::Leading(&[I, I, I, I, I, I, F], I));
pub const GET_SYSTEM_APER: Operation =
    Operation::new("GetSystemAper", ReplyShape::Leading(&[I, I, F], I));
pub const GET_FIRST: Operation = Operation::new("GetFirst", ReplyShape::Repeated(F));
pub const GET_PUPIL: Operation =
    Operation::new("GetPupil", ReplyShape::Leading(&[I, F, F, F, F, F, I], F));
pub const GET_APERTURE: Operation = Operation::new("GetAperture", ReplyShape::Literals);
pub const GET_APODIZATION: Operation = Operation::new("GetApodization", FLOAT);

// Fields and wavelengths. The layout depends on the row argument, so the
// table entries infer types; the header and row variants are exact.
pub const GET_FIELD: Operation = Operation::new("GetField", ReplyShape::Literals);
pub const GET_FIELD_HEADER: Operation =
    Operation::new("GetField", ReplyShape::Leading(&[I, I], F));
pub const GET_FIELD_ROW: Operation = Operation::new("GetField", ReplyShape::Repeated(F));
pub const GET_WAVE: Operation = Operation::new("GetWave", ReplyShape::Literals);
pub const GET_WAVE_HEADER: Operation = Operation::new("GetWave", ReplyShape::Fields(&[I, I]));
pub const GET_WAVE_ROW: Operation = Operation::new("GetWave", ReplyShape::Fields(&[F, F]));

// Ray tracing
pub const GET_TRACE: Operation = Operation::new("GetTrace", ReplyShape::Leading(&[I, I], F));
pub const GET_TRACE_DIRECT: Operation =
    Operation::new("GetTraceDirect", ReplyShape::Leading(&[I, I], F));
pub const GET_POL_TRACE: Operation =
    Operation::new("GetPolTrace", ReplyShape::Leading(&[I], F));
pub const GET_POL_TRACE_DIRECT: Operation =
    Operation::new("GetPolTraceDirect", ReplyShape::Leading(&[I], F));
pub const GET_POL_STATE: Operation = Operation::new("GetPolState", ReplyShape::Literals);

// Surfaces
pub const GET_SURFACE_DATA: Operation = Operation::new("GetSurfaceData", ReplyShape::Literals);
pub const GET_SURFACE_PARAMETER: Operation = Operation::new("GetSurfaceParameter", FLOAT);
pub const GET_INDEX: Operation = Operation::new("GetIndex", ReplyShape::Repeated(F));
pub const GET_SAG: Operation = Operation::new("GetSag", ReplyShape::Fields(&[F, F]));
pub const GET_GLASS: Operation = Operation::new("GetGlass", ReplyShape::Leading(&[S], F));
pub const GET_GLOBAL_MATRIX: Operation =
    Operation::new("GetGlobalMatrix", ReplyShape::Repeated(F));
pub const GET_LABEL: Operation = Operation::new("GetLabel", INT);
pub const SET_LABEL: Operation = Operation::new("SetLabel", INT);
pub const FIND_LABEL: Operation = Operation::new("FindLabel", INT);
pub const INSERT_SURFACE: Operation = Operation::new("InsertSurface", INT);
pub const DELETE_SURFACE: Operation = Operation::new("DeleteSurface", INT);
pub const GET_SOLVE: Operation = Operation::new("GetSolve", ReplyShape::Literals);
pub const GET_NSC_DATA: Operation = Operation::new("GetNSCData", INT);

// Multi-configuration editor
pub const GET_CONFIG: Operation = Operation::new("GetConfig", ReplyShape::Repeated(I));
pub const SET_CONFIG: Operation = Operation::new("SetConfig", ReplyShape::Repeated(I));
pub const INSERT_CONFIG: Operation = Operation::new("InsertConfig", INT);
pub const DELETE_CONFIG: Operation = Operation::new("DeleteConfig", INT);
pub const GET_MULTICON: Operation = Operation::new("GetMulticon", ReplyShape::Literals);
pub const INSERT_MCO: Operation = Operation::new("InsertMCO", INT);
pub const DELETE_MCO: Operation = Operation::new("DeleteMCO", INT);

// Merit function and optimisation
pub const GET_OPERAND: Operation = Operation::new("GetOperand", ReplyShape::Literals);
pub const INSERT_MFO: Operation = Operation::new("InsertMFO", INT);
pub const DELETE_MFO: Operation = Operation::new("DeleteMFO", INT);
pub const OPTIMIZE: Operation = Operation::new("Optimize", FLOAT);
pub const HAMMER: Operation = Operation::new("Hammer", FLOAT);
pub const QUICK_FOCUS: Operation = Operation::new("QuickFocus", ReplyShape::Text);
pub const SET_VIG: Operation = Operation::new("SetVig", ReplyShape::Text);
pub const GET_TOL: Operation = Operation::new("GetTol", ReplyShape::Literals);

/// Every operation [`lookup`] can find, one entry per wire name.
pub static OPERATIONS: &[Operation] = &[
    GET_VERSION,
    GET_SERIAL,
    GET_DATE,
    GET_NAME,
    GET_FILE,
    GET_PATH,
    GET_ADDRESS,
    GET_COMMENT,
    LOAD_FILE,
    SAVE_FILE,
    NEW_LENS,
    EXPORT_CHECK,
    PUSH_LENS,
    PUSH_LENS_PERMISSION,
    GET_REFRESH,
    GET_UPDATE,
    GET_SEQUENCE,
    GET_SYSTEM,
    GET_SYSTEM_APER,
    GET_FIRST,
    GET_PUPIL,
    GET_APERTURE,
    GET_APODIZATION,
    GET_FIELD,
    GET_WAVE,
    GET_TRACE,
    GET_TRACE_DIRECT,
    GET_POL_TRACE,
    GET_POL_TRACE_DIRECT,
    GET_POL_STATE,
    GET_SURFACE_DATA,
    GET_SURFACE_PARAMETER,
    GET_INDEX,
    GET_SAG,
    GET_GLASS,
    GET_GLOBAL_MATRIX,
    GET_LABEL,
    SET_LABEL,
    FIND_LABEL,
    INSERT_SURFACE,
    DELETE_SURFACE,
    GET_SOLVE,
    GET_NSC_DATA,
    GET_CONFIG,
    SET_CONFIG,
    INSERT_CONFIG,
    DELETE_CONFIG,
    GET_MULTICON,
    INSERT_MCO,
    DELETE_MCO,
    GET_OPERAND,
    INSERT_MFO,
    DELETE_MFO,
    OPTIMIZE,
    HAMMER,
    QUICK_FOCUS,
    SET_VIG,
    GET_TOL,
];

/// Find an operation by wire name. The peer treats names case-insensitively,
/// so the lookup does too.
pub fn lookup(name: &str) -> Option<&'static Operation> {
    OPERATIONS
        .iter()
        .find(|op| op.name.eq_ignore_ascii_case(name))
}
