//! Reading UsdPreviewSurface material networks.
//!
//! A material's `outputs:surface` is followed to its UsdPreviewSurface
//! shader. Each shader input is either a constant or a connection to a
//! UsdUVTexture, whose `st` input leads to the primvar reader that selects
//! the texture-coordinate set.

use glam::{Vec3, Vec4};

use crate::usd::{Attribute, Prim, SdfPath, Stage, Value};

use super::primvar_reader::ST_PRIMVAR_NAME_INPUT;

/// Upper bound on connection hops followed when resolving an input.
const MAX_CONNECTION_DEPTH: usize = 16;

/// Wrap mode for texture sampling.
///
/// Corresponds to UsdUVTexture's `inputs:wrapS` and `inputs:wrapT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WrapMode {
    /// Repeat the texture (default).
    #[default]
    Repeat,
    /// Clamp to edge.
    Clamp,
    /// Mirror the texture.
    Mirror,
    /// Use black outside [0,1] range.
    Black,
}

impl WrapMode {
    /// Parse wrap mode from USD token string.
    pub fn from_token(token: &str) -> Self {
        match token.to_lowercase().as_str() {
            "clamp" => WrapMode::Clamp,
            "mirror" => WrapMode::Mirror,
            "black" => WrapMode::Black,
            _ => WrapMode::Repeat,
        }
    }
}

/// Output channel of a texture a shader input is connected to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextureOutput {
    #[default]
    Rgb,
    Rgba,
    R,
    G,
    B,
    A,
}

impl TextureOutput {
    /// Parse from the output name (`outputs:rgb` -> `rgb`).
    pub fn from_output_name(name: &str) -> Self {
        match name.trim_start_matches("outputs:").to_lowercase().as_str() {
            "rgba" => TextureOutput::Rgba,
            "r" => TextureOutput::R,
            "g" => TextureOutput::G,
            "b" => TextureOutput::B,
            "a" => TextureOutput::A,
            _ => TextureOutput::Rgb,
        }
    }
}

/// A UsdUVTexture node.
#[derive(Debug, Clone, PartialEq)]
pub struct UvTexture {
    pub path: SdfPath,
    /// Asset path as authored, possibly relative to the layer
    pub file: String,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    /// `inputs:scale`, multiplied into the sampled value
    pub scale: Option<Vec4>,
    /// Texture coordinate set (TEXCOORD_n)
    pub uv_set: u32,
}

/// A shader input connected to a texture channel.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRef {
    pub texture: UvTexture,
    pub output: TextureOutput,
}

/// A material input that is either a texture or a constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureSlot {
    /// Connected to a texture.
    Texture(TextureRef),
    /// Constant color value.
    Color(Vec3),
    /// Constant scalar value.
    Scalar(f32),
}

impl TextureSlot {
    pub fn texture(&self) -> Option<&TextureRef> {
        match self {
            TextureSlot::Texture(t) => Some(t),
            _ => None,
        }
    }

    pub fn color(&self) -> Option<Vec3> {
        match self {
            TextureSlot::Color(c) => Some(*c),
            TextureSlot::Scalar(s) => Some(Vec3::splat(*s)),
            TextureSlot::Texture(_) => None,
        }
    }

    pub fn scalar(&self) -> Option<f32> {
        match self {
            TextureSlot::Scalar(s) => Some(*s),
            TextureSlot::Color(c) => Some(c.x),
            TextureSlot::Texture(_) => None,
        }
    }
}

/// A UsdPreviewSurface shader with schema defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewSurface {
    pub path: SdfPath,
    pub diffuse_color: TextureSlot,
    pub emissive_color: TextureSlot,
    pub metallic: TextureSlot,
    pub roughness: TextureSlot,
    pub opacity: TextureSlot,
    pub opacity_threshold: f32,
    pub normal: Option<TextureRef>,
    pub occlusion: Option<TextureRef>,
}

impl PreviewSurface {
    fn with_defaults(path: SdfPath) -> Self {
        Self {
            path,
            diffuse_color: TextureSlot::Color(Vec3::splat(0.18)),
            emissive_color: TextureSlot::Color(Vec3::ZERO),
            metallic: TextureSlot::Scalar(0.0),
            roughness: TextureSlot::Scalar(0.5),
            opacity: TextureSlot::Scalar(1.0),
            opacity_threshold: 0.0,
            normal: None,
            occlusion: None,
        }
    }
}

/// A material and its surface shader.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub path: SdfPath,
    pub name: String,
    pub surface: Option<PreviewSurface>,
}

/// Map a primvar name to a glTF texture-coordinate set.
pub fn resolve_uv_set(varname: &str) -> u32 {
    match varname.to_lowercase().as_str() {
        "st" | "st0" | "uv" | "uvmap" | "texture_uv" | "map1" => 0,
        "st1" | "uv1" | "uvmap1" | "map2" => 1,
        "st2" | "uv2" | "uvmap2" | "map3" => 2,
        "st3" | "uv3" | "uvmap3" | "map4" => 3,
        _ => 0,
    }
}

/// The material bound to a prim, searching the prim and then its ancestors.
pub fn bound_material<'a>(stage: &'a Stage, prim: &Prim) -> Option<&'a Prim> {
    let mut path = prim.path().clone();
    while !path.is_abs_root() {
        if let Some(target) = stage
            .prim(&path)
            .and_then(|p| p.relationship("material:binding"))
            .and_then(|rel| rel.targets.first())
        {
            return match stage.prim(target) {
                Some(material) if material.is_a("Material") => Some(material),
                _ => {
                    log::warn!("{}: material binding {} is not a material", path, target);
                    None
                }
            };
        }
        path = path.parent();
    }
    None
}

/// Shader id (`info:id`) of a prim, if any.
pub fn shader_id(prim: &Prim) -> Option<&str> {
    prim.value("info:id").and_then(Value::as_str)
}

/// Read a material network.
pub fn read_material(stage: &Stage, material: &Prim) -> Material {
    let surface = surface_shader(stage, material).map(|shader| read_surface(stage, material, shader));
    if surface.is_none() {
        log::warn!("{}: no UsdPreviewSurface shader found", material.path());
    }
    Material {
        path: material.path().clone(),
        name: material.name().to_string(),
        surface,
    }
}

fn surface_shader<'a>(stage: &'a Stage, material: &'a Prim) -> Option<&'a Prim> {
    let connected = material
        .attributes()
        .filter(|a| a.name.starts_with("outputs:") && a.name.ends_with("surface"))
        .flat_map(|a| a.connections())
        .filter_map(|target| stage.target_prim(target))
        .find(|shader| shader_id(shader) == Some("UsdPreviewSurface"));

    connected.or_else(|| {
        stage
            .children(material)
            .find(|child| shader_id(child) == Some("UsdPreviewSurface"))
    })
}

fn read_surface(stage: &Stage, material: &Prim, shader: &Prim) -> PreviewSurface {
    let mut surface = PreviewSurface::with_defaults(shader.path().clone());
    let reader = InputReader { stage, material };

    if let Some(slot) = reader.slot(shader, "diffuseColor") {
        surface.diffuse_color = slot;
    }
    if let Some(slot) = reader.slot(shader, "emissiveColor") {
        surface.emissive_color = slot;
    }
    if let Some(slot) = reader.slot(shader, "metallic") {
        surface.metallic = slot;
    }
    if let Some(slot) = reader.slot(shader, "roughness") {
        surface.roughness = slot;
    }
    if let Some(slot) = reader.slot(shader, "opacity") {
        surface.opacity = slot;
    }
    if let Some(threshold) = reader.slot(shader, "opacityThreshold").and_then(|s| s.scalar()) {
        surface.opacity_threshold = threshold;
    }
    surface.normal = reader
        .slot(shader, "normal")
        .and_then(|s| s.texture().cloned());
    surface.occlusion = reader
        .slot(shader, "occlusion")
        .and_then(|s| s.texture().cloned());

    surface
}

/// Resolves shader inputs through connections.
struct InputReader<'a> {
    stage: &'a Stage,
    material: &'a Prim,
}

enum Resolved<'a> {
    Output(&'a Prim, String),
    Value(Value),
}

impl<'a> InputReader<'a> {
    /// Follow an input's connections until a value or a shader output is
    /// reached. Interface inputs on the material are followed through.
    fn resolve(&self, attr: &'a Attribute) -> Option<Resolved<'a>> {
        let mut current = attr;
        for _ in 0..MAX_CONNECTION_DEPTH {
            let Some(target) = current.connections().first() else {
                return current.get().cloned().map(Resolved::Value);
            };
            let prim = self.stage.target_prim(target)?;
            let property = target.property_name()?;
            if property.starts_with("outputs:") && !prim.is_a("Material") {
                return Some(Resolved::Output(prim, property.to_string()));
            }
            current = prim.attribute(property)?;
        }
        log::warn!("{}: connection chain too deep", attr.name);
        None
    }

    fn slot(&self, shader: &'a Prim, input: &str) -> Option<TextureSlot> {
        let attr = shader.input(input)?;
        match self.resolve(attr)? {
            Resolved::Value(Value::Vec3(c)) => Some(TextureSlot::Color(c)),
            Resolved::Value(Value::Vec4(c)) => Some(TextureSlot::Color(c.truncate())),
            Resolved::Value(v) => v.as_f32().map(TextureSlot::Scalar),
            Resolved::Output(prim, output) => {
                if shader_id(prim) != Some("UsdUVTexture") {
                    log::debug!(
                        "{}: input {} connected to unsupported shader {}",
                        shader.path(),
                        input,
                        prim.path()
                    );
                    return None;
                }
                Some(TextureSlot::Texture(TextureRef {
                    texture: self.texture(prim),
                    output: TextureOutput::from_output_name(&output),
                }))
            }
        }
    }

    fn texture(&self, prim: &'a Prim) -> UvTexture {
        let token = |name: &str| {
            prim.input(name)
                .and_then(|a| self.resolve(a))
                .and_then(|r| match r {
                    Resolved::Value(v) => v.as_str().map(str::to_string),
                    Resolved::Output(..) => None,
                })
        };

        UvTexture {
            path: prim.path().clone(),
            file: token("file").unwrap_or_default(),
            wrap_s: token("wrapS").map(|t| WrapMode::from_token(&t)).unwrap_or_default(),
            wrap_t: token("wrapT").map(|t| WrapMode::from_token(&t)).unwrap_or_default(),
            scale: prim.input("scale").and_then(|a| match a.get() {
                Some(Value::Vec4(v)) => Some(*v),
                _ => None,
            }),
            uv_set: self.uv_set(prim),
        }
    }

    /// Texture-coordinate set from the reader feeding the texture's `st`,
    /// falling back to the material's `frame:stPrimvarName`.
    fn uv_set(&self, texture: &'a Prim) -> u32 {
        let from_reader = texture
            .input("st")
            .and_then(|a| self.resolve(a))
            .and_then(|r| match r {
                Resolved::Output(reader, _) => reader.input("varname"),
                Resolved::Value(_) => None,
            })
            .and_then(|varname| self.resolve(varname))
            .and_then(|r| match r {
                Resolved::Value(v) => v.as_str().map(str::to_string),
                Resolved::Output(..) => None,
            });

        let varname = from_reader.or_else(|| {
            self.material
                .input(ST_PRIMVAR_NAME_INPUT)
                .and_then(Attribute::get)
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        varname.map(|v| resolve_uv_set(&v)).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::load_stage_from_str;

    const TEXTURED: &str = r#"#usda 1.0

def Xform "World"
{
    def Mesh "Plane" (
        prepend apiSchemas = ["MaterialBindingAPI"]
    )
    {
        rel material:binding = </World/Looks/Wood>
    }

    def Scope "Looks"
    {
        def Material "Wood"
        {
            token inputs:uvName = "st1"
            token outputs:surface.connect = </World/Looks/Wood/PBR.outputs:surface>

            def Shader "PBR"
            {
                uniform token info:id = "UsdPreviewSurface"
                color3f inputs:diffuseColor.connect = </World/Looks/Wood/Albedo.outputs:rgb>
                float inputs:roughness.connect = </World/Looks/Wood/Rough.outputs:g>
                float inputs:metallic = 1
                float inputs:opacity = 0.5
                token outputs:surface
            }

            def Shader "Albedo"
            {
                uniform token info:id = "UsdUVTexture"
                asset inputs:file = @textures/wood.png@
                token inputs:wrapS = "clamp"
                float2 inputs:st.connect = </World/Looks/Wood/Reader.outputs:result>
                float3 outputs:rgb
            }

            def Shader "Rough"
            {
                uniform token info:id = "UsdUVTexture"
                asset inputs:file = @textures/rough.png@
                float outputs:g
            }

            def Shader "Reader"
            {
                uniform token info:id = "UsdPrimvarReader_float2"
                token inputs:varname.connect = </World/Looks/Wood.inputs:uvName>
                float2 outputs:result
            }
        }
    }
}
"#;

    fn path(s: &str) -> SdfPath {
        SdfPath::new(s).unwrap()
    }

    #[test]
    fn test_resolve_uv_set() {
        assert_eq!(resolve_uv_set("st"), 0);
        assert_eq!(resolve_uv_set("st0"), 0);
        assert_eq!(resolve_uv_set("st1"), 1);
        assert_eq!(resolve_uv_set("UVMap"), 0);
        assert_eq!(resolve_uv_set("st2"), 2);
    }

    #[test]
    fn test_wrap_mode_from_token() {
        assert_eq!(WrapMode::from_token("repeat"), WrapMode::Repeat);
        assert_eq!(WrapMode::from_token("Clamp"), WrapMode::Clamp);
        assert_eq!(WrapMode::from_token("unknown"), WrapMode::Repeat);
    }

    #[test]
    fn test_bound_material() {
        let stage = load_stage_from_str(TEXTURED, "test").unwrap();
        let plane = stage.prim(&path("/World/Plane")).unwrap();
        let material = bound_material(&stage, plane).unwrap();
        assert_eq!(material.path().to_string(), "/World/Looks/Wood");

        let looks = stage.prim(&path("/World/Looks")).unwrap();
        assert!(bound_material(&stage, looks).is_none());
    }

    #[test]
    fn test_read_textured_material() {
        let stage = load_stage_from_str(TEXTURED, "test").unwrap();
        let prim = stage.prim(&path("/World/Looks/Wood")).unwrap();
        let material = read_material(&stage, prim);
        let surface = material.surface.unwrap();

        let albedo = surface.diffuse_color.texture().unwrap();
        assert_eq!(albedo.texture.file, "textures/wood.png");
        assert_eq!(albedo.texture.wrap_s, WrapMode::Clamp);
        assert_eq!(albedo.texture.wrap_t, WrapMode::Repeat);
        assert_eq!(albedo.texture.uv_set, 1);
        assert_eq!(albedo.output, TextureOutput::Rgb);

        let rough = surface.roughness.texture().unwrap();
        assert_eq!(rough.output, TextureOutput::G);
        assert_eq!(rough.texture.uv_set, 0);

        assert_eq!(surface.metallic, TextureSlot::Scalar(1.0));
        assert_eq!(surface.opacity.scalar(), Some(0.5));
        assert_eq!(surface.emissive_color.color(), Some(Vec3::ZERO));
    }

    #[test]
    fn test_material_without_surface() {
        let stage = load_stage_from_str("def Material \"M\"\n{\n}\n", "test").unwrap();
        let prim = stage.prim(&path("/M")).unwrap();
        assert!(read_material(&stage, prim).surface.is_none());
    }
}
