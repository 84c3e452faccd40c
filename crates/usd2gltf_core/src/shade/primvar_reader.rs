//! Texture-coordinate primvar reader setup for materials.
//!
//! Every material gets a `frame:stPrimvarName` input set to `st` and a child
//! `stReader` shader (`UsdPrimvarReader_float2`) reading the `st` primvar.
//! The material input is connected to the reader's `result` output so that
//! consumers which look for a texture-coordinate reader find one.

use crate::usd::{SdfPath, Stage, StageError, TypeName, Value, ValueType};

/// Name of the child reader shader.
pub const ST_READER_NAME: &str = "stReader";

/// Shader id of the float2 primvar reader.
pub const PRIMVAR_READER_FLOAT2: &str = "UsdPrimvarReader_float2";

/// Material input naming the texture-coordinate primvar.
pub const ST_PRIMVAR_NAME_INPUT: &str = "frame:stPrimvarName";

/// The texture-coordinate primvar every reader is pointed at.
pub const ST_PRIMVAR: &str = "st";

/// Configure the `st` primvar reader on every material of the stage.
///
/// Materials are collected first, so the readers defined here are never
/// visited themselves. Running the pass again reasserts the same values and
/// leaves exactly one connection per material.
///
/// Returns the paths of the configured materials in traversal order.
pub fn normalize_st_primvar_readers(stage: &mut Stage) -> Result<Vec<SdfPath>, StageError> {
    normalize_st_primvar_readers_with(stage, |_| {})
}

/// Like [`normalize_st_primvar_readers`], calling `on_configured` as soon as
/// each material is done. Materials configured before a failing one have
/// already been reported when the error is returned.
pub fn normalize_st_primvar_readers_with<F>(
    stage: &mut Stage,
    mut on_configured: F,
) -> Result<Vec<SdfPath>, StageError>
where
    F: FnMut(&SdfPath),
{
    let materials: Vec<SdfPath> = stage
        .traverse()
        .into_iter()
        .filter(|prim| prim.is_a("Material"))
        .map(|prim| prim.path().clone())
        .collect();

    for path in &materials {
        configure_material(stage, path)?;
        log::info!("Configured '{}' primvar reader for material: {}", ST_PRIMVAR, path);
        on_configured(path);
    }

    Ok(materials)
}

fn configure_material(stage: &mut Stage, material_path: &SdfPath) -> Result<(), StageError> {
    let material = stage.require_prim_mut(material_path)?;
    if material.input(ST_PRIMVAR_NAME_INPUT).is_none() {
        material.create_input(ST_PRIMVAR_NAME_INPUT, TypeName::token());
    }
    if let Some(input) = material.input_mut(ST_PRIMVAR_NAME_INPUT) {
        // An existing `string` input keeps its type.
        let value = match input.type_name.base {
            ValueType::String if !input.type_name.is_array => {
                Value::String(ST_PRIMVAR.to_string())
            }
            _ => Value::token(ST_PRIMVAR),
        };
        input.set(value)?;
    }

    let reader_path = material_path.append_child(ST_READER_NAME)?;
    let reader = stage.define_prim(&reader_path, "Shader")?;

    let id = reader.create_attribute("info:id", TypeName::token());
    id.uniform = true;
    id.set(Value::token(PRIMVAR_READER_FLOAT2))?;

    reader
        .create_input("varname", TypeName::token())
        .set(Value::token(ST_PRIMVAR))?;
    reader.create_output("result", TypeName::float2());

    let source = reader_path.append_property("outputs:result")?;
    let material = stage.require_prim_mut(material_path)?;
    match material.input_mut(ST_PRIMVAR_NAME_INPUT) {
        Some(input) => input.connect_to_source(source),
        None => Err(StageError::PrimNotFound(material_path.clone())),
    }
}
