//! USD scene description: an in-memory stage, the USDA text parser and the
//! USDZ package reader.
//!
//! Only single-layer stages are supported. Composition arcs (references,
//! payloads, variants) are read as metadata but not resolved.

pub mod loader;
pub mod parser;
pub mod path;
pub mod prim;
pub mod stage;
pub mod types;
pub mod usdz;
pub mod xform;

pub use loader::{load_stage, load_stage_from_str, LoadError, LoadResult};
pub use parser::{parse_usda, ParseError, ParseResult};
pub use path::SdfPath;
pub use prim::{Attribute, Prim, Relationship, Specifier};
pub use stage::{Stage, StageError, StageMetadata};
pub use types::{TypeName, Value, ValueType};
pub use xform::{compose_xform_ops, RotationOrder, XformOp, Xformable};
