//! Native conversion of a stage into a glTF document.
//!
//! Prims become nodes in the same hierarchy. Meshes are triangulated,
//! bound UsdPreviewSurface materials become metallic-roughness materials and
//! animated transforms become node animations. Stage units (`upAxis`,
//! `metersPerUnit`) are applied through a `Root` wrapper node.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use glam::{Quat, Vec3};

use crate::gltf::{self, BufferBuilder, Gltf};
use crate::mesh::Mesh;
use crate::shade::{self, PreviewSurface, TextureOutput, TextureRef, TextureSlot, UvTexture, WrapMode};
use crate::usd::{self, Prim, SdfPath, Specifier, Stage, StageMetadata, Xformable};

use super::animation::{self, AnimationInterpolation};
use super::transform::Transform;
use super::{ConvertResult, Converter, ConverterOptions};

/// Prim types that are never exported, together with their descendants.
const SKIPPED_TYPES: &[&str] = &["Material", "Shader", "NodeGraph", "GeomSubset"];

/// Prim types that always become nodes. Other types are kept only when they
/// carry a transform or have exported children.
const NODE_TYPES: &[&str] = &["", "Xform", "Scope", "Mesh"];

/// Converts stages to glTF 2.0.
#[derive(Debug, Default)]
pub struct GltfConverter {
    options: ConverterOptions,
}

impl GltfConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConverterOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConverterOptions {
        &self.options
    }

    /// Build the glTF document and its binary buffer in memory.
    pub fn build(&self, stage: &Stage) -> ConvertResult<(Gltf, Vec<u8>)> {
        let mut ctx = BuildContext::new(stage);

        let mut roots = Vec::new();
        for prim in stage.root_prims() {
            if let Some(index) = ctx.visit(prim)? {
                roots.push(index);
            }
        }

        if let Some(transform) = stage_root_transform(&stage.metadata) {
            log::info!(
                "Applying stage units (upAxis {}, metersPerUnit {})",
                stage.metadata.up_axis,
                stage.metadata.meters_per_unit()
            );
            let index = ctx.nodes.len();
            ctx.nodes.push(gltf::Node {
                name: Some("Root".to_string()),
                rotation: transform.rotation_field(),
                scale: transform.scale_field(),
                children: roots,
                ..Default::default()
            });
            roots = vec![index];
        }

        let interpolation = AnimationInterpolation::from_option(&self.options.interpolation);
        let animations = ctx.animations(interpolation, self.options.flatten_xform_animation);

        let scene_name = stage
            .metadata
            .default_prim
            .clone()
            .unwrap_or_else(|| "Scene".to_string());

        Ok(ctx.finish(scene_name, roots, animations))
    }
}

impl Converter for GltfConverter {
    fn options_mut(&mut self) -> &mut ConverterOptions {
        &mut self.options
    }

    fn load_usd(&self, path: &Path) -> ConvertResult<Stage> {
        Ok(usd::load_stage(path)?)
    }

    fn process(&self, stage: &Stage, output: &Path) -> ConvertResult<()> {
        let (document, binary) = self.build(stage)?;
        log::info!(
            "Exporting {} nodes, {} meshes, {} materials, {} animations",
            document.nodes.len(),
            document.meshes.len(),
            document.materials.len(),
            document.animations.len()
        );
        gltf::write_output(document, &binary, output)?;
        Ok(())
    }
}

/// Rotation and scale that bring the stage into glTF's Y-up meters.
///
/// Only an authored `metersPerUnit` triggers scaling.
fn stage_root_transform(metadata: &StageMetadata) -> Option<Transform> {
    let z_up = metadata.up_axis.eq_ignore_ascii_case("Z");
    let scale = match metadata.meters_per_unit {
        Some(m) if m > 0.0 && (m - 1.0).abs() > 1e-9 => Some(m as f32),
        Some(m) if m <= 0.0 => {
            log::warn!("Ignoring invalid metersPerUnit {}", m);
            None
        }
        _ => None,
    };

    if !z_up && scale.is_none() {
        return None;
    }

    Some(Transform {
        translation: Vec3::ZERO,
        rotation: if z_up {
            Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2)
        } else {
            Quat::IDENTITY
        },
        scale: Vec3::splat(scale.unwrap_or(1.0)),
    })
}

/// Accumulates the document while walking the stage.
struct BuildContext<'a> {
    stage: &'a Stage,
    /// Time code used for static transforms
    time: f64,
    nodes: Vec<gltf::Node>,
    meshes: Vec<gltf::Mesh>,
    materials: Vec<gltf::Material>,
    textures: Vec<gltf::Texture>,
    images: Vec<gltf::Image>,
    samplers: Vec<gltf::Sampler>,
    buffer: BufferBuilder,
    material_cache: HashMap<SdfPath, Option<usize>>,
    image_cache: HashMap<String, Option<usize>>,
    /// Animated prims and their node index
    animated: Vec<(usize, &'a Prim)>,
}

impl<'a> BuildContext<'a> {
    fn new(stage: &'a Stage) -> Self {
        Self {
            stage,
            time: stage.metadata.start_time_code.unwrap_or(0.0),
            nodes: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            textures: Vec::new(),
            images: Vec::new(),
            samplers: Vec::new(),
            buffer: BufferBuilder::new(),
            material_cache: HashMap::new(),
            image_cache: HashMap::new(),
            animated: Vec::new(),
        }
    }

    /// Export a prim and its subtree. Children are exported before their
    /// parent so the parent can list them.
    fn visit(&mut self, prim: &'a Prim) -> ConvertResult<Option<usize>> {
        if prim.specifier != Specifier::Def || !prim.is_active() {
            return Ok(None);
        }
        if SKIPPED_TYPES.iter().any(|t| prim.is_a(t)) {
            return Ok(None);
        }

        let stage = self.stage;
        let mut children = Vec::new();
        for child in stage.children(prim) {
            if let Some(index) = self.visit(child)? {
                children.push(index);
            }
        }

        let xformable = Xformable::new(prim);
        let keep = NODE_TYPES.contains(&prim.type_name.as_str())
            || !children.is_empty()
            || xformable.has_ops();
        if !keep {
            log::debug!("Skipping {} prim {}", prim.type_name, prim.path());
            return Ok(None);
        }

        if xformable.resets_xform_stack() {
            log::warn!(
                "{}: !resetXformStack! is not representable, keeping parent transform",
                prim.path()
            );
        }

        let transform = Transform::from_matrix(xformable.local_transform(self.time));
        let mesh = if prim.is_a("Mesh") {
            self.convert_mesh(prim)?
        } else {
            None
        };

        let index = self.nodes.len();
        self.nodes.push(gltf::Node {
            name: Some(prim.name().to_string()),
            mesh,
            translation: transform.translation_field(),
            rotation: transform.rotation_field(),
            scale: transform.scale_field(),
            children,
        });

        if xformable.is_animated() {
            self.animated.push((index, prim));
        }

        Ok(Some(index))
    }

    fn convert_mesh(&mut self, prim: &'a Prim) -> ConvertResult<Option<usize>> {
        let Some(mut mesh) = Mesh::from_prim(prim)? else {
            log::warn!("{}: mesh has no geometry, exporting node only", prim.path());
            return Ok(None);
        };
        mesh.ensure_normals();

        let mut attributes = BTreeMap::new();

        let positions: Vec<[f32; 3]> = mesh.positions.iter().map(|p| p.to_array()).collect();
        attributes.insert("POSITION".to_string(), self.buffer.add_attribute_vec3(&positions, true));

        if let Some(normals) = &mesh.normals {
            let normals: Vec<[f32; 3]> = normals.iter().map(|n| n.to_array()).collect();
            attributes.insert("NORMAL".to_string(), self.buffer.add_attribute_vec3(&normals, false));
        }

        for (set, uvs) in &mesh.uv_sets {
            let accessor = self.buffer.add_vec2(uvs, Some(gltf::TARGET_ARRAY_BUFFER));
            attributes.insert(format!("TEXCOORD_{}", set), accessor);
        }

        let indices = self.buffer.add_indices(&mesh.indices, mesh.vertex_count());

        let material = match shade::bound_material(self.stage, prim) {
            Some(material) => self.material_index(material),
            None => None,
        };

        log::debug!(
            "{}: {} vertices, {} triangles",
            prim.path(),
            mesh.vertex_count(),
            mesh.triangle_count()
        );

        let index = self.meshes.len();
        self.meshes.push(gltf::Mesh {
            name: Some(prim.name().to_string()),
            primitives: vec![gltf::Primitive {
                attributes,
                indices: Some(indices),
                material,
                mode: Some(gltf::MODE_TRIANGLES),
            }],
        });
        Ok(Some(index))
    }

    fn material_index(&mut self, material: &Prim) -> Option<usize> {
        if let Some(cached) = self.material_cache.get(material.path()) {
            return *cached;
        }

        let read = shade::read_material(self.stage, material);
        let index = match &read.surface {
            Some(surface) => {
                let converted = self.convert_surface(&read.name, surface);
                self.materials.push(converted);
                Some(self.materials.len() - 1)
            }
            None => None,
        };

        self.material_cache.insert(material.path().clone(), index);
        index
    }

    fn convert_surface(&mut self, name: &str, surface: &PreviewSurface) -> gltf::Material {
        let mut pbr = gltf::PbrMetallicRoughness::default();

        let opacity_texture = surface.opacity.texture();
        let alpha = surface.opacity.scalar().unwrap_or(1.0);

        // Base color
        let base_color = match &surface.diffuse_color {
            TextureSlot::Texture(texture) => {
                pbr.base_color_texture = self.texture_info(&texture.texture);
                texture.texture.scale.map(|s| s.truncate()).unwrap_or(Vec3::ONE)
            }
            slot => slot.color().unwrap_or(Vec3::splat(0.18)),
        };
        let factor = [base_color.x, base_color.y, base_color.z, alpha];
        pbr.base_color_factor = (factor != [1.0; 4]).then_some(factor);

        if let Some(opacity) = opacity_texture {
            let same_file = surface
                .diffuse_color
                .texture()
                .is_some_and(|diffuse| diffuse.texture.file == opacity.texture.file);
            if !same_file {
                log::warn!(
                    "{}: opacity texture {} differs from the base color texture, alpha comes from base color",
                    surface.path,
                    opacity.texture.file
                );
            }
        }

        // Metallic / roughness. glTF reads metallic from B and roughness from G.
        pbr.metallic_factor = Some(surface.metallic.scalar().unwrap_or(1.0));
        pbr.roughness_factor = Some(surface.roughness.scalar().unwrap_or(1.0));
        let packed = match (surface.metallic.texture(), surface.roughness.texture()) {
            (Some(metallic), Some(roughness)) => {
                if metallic.texture.file != roughness.texture.file {
                    log::warn!(
                        "{}: metallic and roughness use different textures, using {}",
                        surface.path,
                        roughness.texture.file
                    );
                }
                Some(roughness)
            }
            (Some(metallic), None) => Some(metallic),
            (None, Some(roughness)) => Some(roughness),
            (None, None) => None,
        };
        check_channel(surface.metallic.texture(), TextureOutput::B, "metallic");
        check_channel(surface.roughness.texture(), TextureOutput::G, "roughness");
        if let Some(texture) = packed {
            pbr.metallic_roughness_texture = self.texture_info(&texture.texture);
        }

        let mut material = gltf::Material {
            name: Some(name.to_string()),
            pbr_metallic_roughness: Some(pbr),
            ..Default::default()
        };

        // Emission
        match &surface.emissive_color {
            TextureSlot::Texture(texture) => {
                material.emissive_texture = self.texture_info(&texture.texture);
                material.emissive_factor = Some([1.0; 3]);
            }
            slot => {
                let color = slot.color().unwrap_or(Vec3::ZERO);
                if color != Vec3::ZERO {
                    material.emissive_factor = Some(color.to_array());
                }
            }
        }

        if let Some(normal) = &surface.normal {
            material.normal_texture = self.texture_info(&normal.texture).map(|info| {
                gltf::NormalTextureInfo {
                    index: info.index,
                    tex_coord: info.tex_coord,
                }
            });
        }
        if let Some(occlusion) = &surface.occlusion {
            material.occlusion_texture = self.texture_info(&occlusion.texture).map(|info| {
                gltf::OcclusionTextureInfo {
                    index: info.index,
                    tex_coord: info.tex_coord,
                }
            });
        }

        // Alpha
        if surface.opacity_threshold > 0.0 {
            material.alpha_mode = Some("MASK".to_string());
            material.alpha_cutoff = Some(surface.opacity_threshold);
        } else if alpha < 1.0 || opacity_texture.is_some() {
            material.alpha_mode = Some("BLEND".to_string());
        }

        material
    }

    fn texture_info(&mut self, texture: &UvTexture) -> Option<gltf::TextureInfo> {
        let source = self.image_index(&texture.file)?;
        let sampler = self.sampler_index(texture.wrap_s, texture.wrap_t);
        let entry = gltf::Texture {
            sampler: Some(sampler),
            source: Some(source),
        };

        let index = match self.textures.iter().position(|t| *t == entry) {
            Some(index) => index,
            None => {
                self.textures.push(entry);
                self.textures.len() - 1
            }
        };

        Some(gltf::TextureInfo {
            index,
            tex_coord: texture.uv_set,
        })
    }

    fn sampler_index(&mut self, wrap_s: WrapMode, wrap_t: WrapMode) -> usize {
        let sampler = gltf::Sampler {
            mag_filter: Some(gltf::FILTER_LINEAR),
            min_filter: Some(gltf::FILTER_LINEAR_MIPMAP_LINEAR),
            wrap_s: wrap_constant(wrap_s),
            wrap_t: wrap_constant(wrap_t),
        };
        match self.samplers.iter().position(|s| *s == sampler) {
            Some(index) => index,
            None => {
                self.samplers.push(sampler);
                self.samplers.len() - 1
            }
        }
    }

    fn image_index(&mut self, file: &str) -> Option<usize> {
        if file.is_empty() {
            return None;
        }
        if let Some(cached) = self.image_cache.get(file) {
            return *cached;
        }
        let index = self.load_image(file);
        self.image_cache.insert(file.to_string(), index);
        index
    }

    /// Embed an image in the binary buffer, or reference it by URI when its
    /// bytes cannot be found.
    fn load_image(&mut self, file: &str) -> Option<usize> {
        let asset = normalize_asset_path(file);
        let Some(mime_type) = mime_type(&asset) else {
            log::warn!("Skipping texture {}: only PNG and JPEG images are supported", file);
            return None;
        };

        let name = Path::new(&asset)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string);

        let stage = self.stage;
        let bytes: Option<Cow<'a, [u8]>> = packaged_asset(stage, &asset)
            .map(Cow::Borrowed)
            .or_else(|| read_beside_layer(stage, &asset).map(Cow::Owned));

        let image = match bytes {
            Some(bytes) => {
                let view = self.buffer.add_view(&bytes, None);
                log::debug!("Embedded image {} ({} bytes)", asset, bytes.len());
                gltf::Image {
                    name,
                    uri: None,
                    mime_type: Some(mime_type.to_string()),
                    buffer_view: Some(view),
                }
            }
            None => {
                log::warn!("Image {} not found, referencing it by URI", file);
                gltf::Image {
                    name,
                    uri: Some(asset),
                    mime_type: None,
                    buffer_view: None,
                }
            }
        };

        self.images.push(image);
        Some(self.images.len() - 1)
    }

    fn animations(
        &mut self,
        interpolation: AnimationInterpolation,
        flatten: bool,
    ) -> Vec<gltf::Animation> {
        if self.animated.is_empty() {
            return Vec::new();
        }

        let stage = self.stage;
        let metadata = &stage.metadata;
        let earliest = self
            .animated
            .iter()
            .filter_map(|(_, prim)| Xformable::new(prim).sample_times().first().copied())
            .fold(f64::INFINITY, f64::min);
        let origin = metadata.start_time_code.unwrap_or(0.0).min(earliest);

        let tracks: Vec<_> = self
            .animated
            .iter()
            .filter_map(|(node, prim)| {
                animation::sample_track(prim, *node, origin, metadata.time_codes_per_second)
            })
            .collect();

        animation::write_animations(&tracks, interpolation, flatten, &mut self.buffer)
    }

    fn finish(
        self,
        scene_name: String,
        roots: Vec<usize>,
        animations: Vec<gltf::Animation>,
    ) -> (Gltf, Vec<u8>) {
        let (binary, buffer_views, accessors) = self.buffer.finish();
        let document = Gltf {
            asset: gltf::Asset::default(),
            scene: Some(0),
            scenes: vec![gltf::Scene {
                name: Some(scene_name),
                nodes: roots,
            }],
            nodes: self.nodes,
            meshes: self.meshes,
            materials: self.materials,
            textures: self.textures,
            images: self.images,
            samplers: self.samplers,
            animations,
            accessors,
            buffer_views,
            buffers: Vec::new(),
        };
        (document, binary)
    }
}

fn check_channel(texture: Option<&TextureRef>, expected: TextureOutput, input: &str) {
    if let Some(texture) = texture {
        if texture.output != expected {
            log::debug!(
                "{}: {} reads {:?}, glTF samples {:?}",
                texture.texture.path,
                input,
                texture.output,
                expected
            );
        }
    }
}

fn wrap_constant(mode: WrapMode) -> u32 {
    match mode {
        WrapMode::Repeat => gltf::WRAP_REPEAT,
        WrapMode::Mirror => gltf::WRAP_MIRRORED_REPEAT,
        WrapMode::Clamp | WrapMode::Black => gltf::WRAP_CLAMP_TO_EDGE,
    }
}

/// Strip package brackets (`pkg.usdz[tex.png]`), `./` prefixes and
/// backslashes from an authored asset path.
fn normalize_asset_path(file: &str) -> String {
    let mut path = file.trim();
    if let (Some(open), true) = (path.find('['), path.ends_with(']')) {
        path = &path[open + 1..path.len() - 1];
    }
    let path = path.replace('\\', "/");
    path.trim_start_matches("./").to_string()
}

fn mime_type(asset: &str) -> Option<&'static str> {
    let extension = Path::new(asset).extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

/// Bytes of a file packaged with the stage (`.usdz`).
fn packaged_asset<'s>(stage: &'s Stage, asset: &str) -> Option<&'s [u8]> {
    if let Some(bytes) = stage.assets.get(asset) {
        return Some(bytes.as_slice());
    }
    let suffix = format!("/{}", asset);
    stage
        .assets
        .iter()
        .find(|(key, _)| key.ends_with(&suffix))
        .map(|(_, bytes)| bytes.as_slice())
}

/// Read an image relative to the directory of the root layer.
fn read_beside_layer(stage: &Stage, asset: &str) -> Option<Vec<u8>> {
    let asset_path = Path::new(asset);
    let path = if asset_path.is_absolute() {
        asset_path.to_path_buf()
    } else {
        stage
            .root_layer_path
            .as_deref()
            .and_then(Path::parent)
            .map(|dir| dir.join(asset_path))
            .unwrap_or_else(|| asset_path.to_path_buf())
    };

    match std::fs::read(&path) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            log::debug!("Could not read {}: {}", path.display(), err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::{load_stage, load_stage_from_str};

    const CUBE: &str = r#"#usda 1.0
(
    defaultPrim = "World"
    metersPerUnit = 1
    upAxis = "Y"
)

def Xform "World"
{
    def Mesh "Cube" (
        prepend apiSchemas = ["MaterialBindingAPI"]
    )
    {
        int[] faceVertexCounts = [4, 4, 4, 4, 4, 4]
        int[] faceVertexIndices = [0, 1, 3, 2, 2, 3, 7, 6, 6, 7, 5, 4, 4, 5, 1, 0, 2, 6, 4, 0, 7, 3, 1, 5]
        point3f[] points = [(-1, -1, 1), (1, -1, 1), (-1, 1, 1), (1, 1, 1), (-1, 1, -1), (1, 1, -1), (-1, -1, -1), (1, -1, -1)]
        rel material:binding = </World/Looks/Red>
        double3 xformOp:translate = (0, 2, 0)
        uniform token[] xformOpOrder = ["xformOp:translate"]
    }

    def Scope "Looks"
    {
        def Material "Red"
        {
            token outputs:surface.connect = </World/Looks/Red/Surface.outputs:surface>

            def Shader "Surface"
            {
                uniform token info:id = "UsdPreviewSurface"
                color3f inputs:diffuseColor.connect = </World/Looks/Red/Diffuse.outputs:rgb>
                float inputs:metallic = 1
                float inputs:roughness = 0.25
                float inputs:opacity = 0.5
                token outputs:surface
            }

            def Shader "Diffuse"
            {
                uniform token info:id = "UsdUVTexture"
                asset inputs:file = @./textures/red.png@
                token inputs:wrapS = "clamp"
                float2 inputs:st.connect = </World/Looks/Red/Reader.outputs:result>
                float3 outputs:rgb
            }

            def Shader "Reader"
            {
                uniform token info:id = "UsdPrimvarReader_float2"
                token inputs:varname = "st"
                float2 outputs:result
            }
        }
    }
}
"#;

    const QUAD: &str = r#"#usda 1.0
(
    upAxis = "Z"
    metersPerUnit = 0.01
)

def Mesh "Quad"
{
    int[] faceVertexCounts = [4]
    int[] faceVertexIndices = [0, 1, 2, 3]
    point3f[] points = [(0, 0, 0), (1, 0, 0), (1, 1, 0), (0, 1, 0)]
    texCoord2f[] primvars:st = [(0, 0), (1, 0), (1, 1), (0, 1)] (
        interpolation = "faceVarying"
    )
}
"#;

    const ANIMATED: &str = r#"#usda 1.0
(
    startTimeCode = 1
    timeCodesPerSecond = 24
)

def Xform "A"
{
    double3 xformOp:translate.timeSamples = {
        1: (0, 0, 0),
        25: (1, 0, 0),
    }
    uniform token[] xformOpOrder = ["xformOp:translate"]
}

def Xform "B"
{
    float xformOp:rotateY.timeSamples = {
        1: 0,
        13: 90,
        25: 180,
    }
    uniform token[] xformOpOrder = ["xformOp:rotateY"]
}
"#;

    fn floats(binary: &[u8], document: &Gltf, accessor: usize) -> Vec<f32> {
        let accessor = &document.accessors[accessor];
        let view = &document.buffer_views[accessor.buffer_view.unwrap()];
        let start = view.byte_offset.unwrap_or(0);
        binary[start..start + view.byte_length]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn find_node<'d>(document: &'d Gltf, name: &str) -> &'d gltf::Node {
        document
            .nodes
            .iter()
            .find(|n| n.name.as_deref() == Some(name))
            .unwrap()
    }

    #[test]
    fn test_cube_mesh_and_hierarchy() {
        let stage = load_stage_from_str(CUBE, "cube.usda").unwrap();
        let (document, _) = GltfConverter::new().build(&stage).unwrap();

        assert_eq!(document.meshes.len(), 1);
        let primitive = &document.meshes[0].primitives[0];
        assert!(primitive.attributes.contains_key("POSITION"));
        assert!(primitive.attributes.contains_key("NORMAL"));
        let indices = &document.accessors[primitive.indices.unwrap()];
        assert_eq!(indices.count / 3, 12);
        assert_eq!(indices.component_type, gltf::COMPONENT_TYPE_UNSIGNED_SHORT);

        let position = &document.accessors[primitive.attributes["POSITION"]];
        assert_eq!(position.min, Some(vec![-1.0, -1.0, -1.0]));
        assert_eq!(position.max, Some(vec![1.0, 1.0, 1.0]));

        // World, Cube and Looks; the material subtree is not exported
        assert_eq!(document.nodes.len(), 3);
        let cube = find_node(&document, "Cube");
        assert_eq!(cube.mesh, Some(0));
        assert_eq!(cube.translation, Some([0.0, 2.0, 0.0]));
        let world = find_node(&document, "World");
        assert_eq!(world.children.len(), 2);
        assert_eq!(document.scenes[0].name.as_deref(), Some("World"));
        assert_eq!(document.scenes[0].nodes.len(), 1);
    }

    #[test]
    fn test_face_varying_st_flips_v() {
        let stage = load_stage_from_str(QUAD, "quad.usda").unwrap();
        let (document, binary) = GltfConverter::new().build(&stage).unwrap();

        let primitive = &document.meshes[0].primitives[0];
        let positions = floats(&binary, &document, primitive.attributes["POSITION"]);
        let uvs = floats(&binary, &document, primitive.attributes["TEXCOORD_0"]);
        assert_eq!(positions.len() / 3, uvs.len() / 2);

        for (p, uv) in positions.chunks_exact(3).zip(uvs.chunks_exact(2)) {
            // st equals the point's xy, so the flipped V is 1 - y
            assert!((uv[0] - p[0]).abs() < 1e-6);
            assert!((uv[1] - (1.0 - p[1])).abs() < 1e-6);
        }
    }

    #[test]
    fn test_stage_units_root() {
        let stage = load_stage_from_str(QUAD, "quad.usda").unwrap();
        let (document, _) = GltfConverter::new().build(&stage).unwrap();

        let root_index = document.scenes[0].nodes[0];
        let root = &document.nodes[root_index];
        assert_eq!(root.name.as_deref(), Some("Root"));
        assert_eq!(root.scale, Some([0.01, 0.01, 0.01]));
        let rotation = Quat::from_array(root.rotation.unwrap());
        assert!(rotation.abs_diff_eq(Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2), 1e-6));
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_unauthored_units_have_no_root() {
        let stage = load_stage_from_str("#usda 1.0\ndef Xform \"A\"\n{\n}\n", "a.usda").unwrap();
        let (document, _) = GltfConverter::new().build(&stage).unwrap();
        assert_eq!(document.nodes.len(), 1);
        assert_eq!(document.nodes[0].name.as_deref(), Some("A"));
    }

    #[test]
    fn test_textured_material() {
        let dir = tempfile::tempdir().unwrap();
        let layer = dir.path().join("cube.usda");
        std::fs::write(&layer, CUBE).unwrap();
        std::fs::create_dir_all(dir.path().join("textures")).unwrap();
        std::fs::write(dir.path().join("textures/red.png"), b"\x89PNG fake").unwrap();

        let stage = load_stage(&layer).unwrap();
        let (document, _) = GltfConverter::new().build(&stage).unwrap();

        assert_eq!(document.materials.len(), 1);
        let material = &document.materials[0];
        assert_eq!(material.name.as_deref(), Some("Red"));
        assert_eq!(material.alpha_mode.as_deref(), Some("BLEND"));

        let pbr = material.pbr_metallic_roughness.as_ref().unwrap();
        assert_eq!(pbr.metallic_factor, Some(1.0));
        assert_eq!(pbr.roughness_factor, Some(0.25));
        assert_eq!(pbr.base_color_factor, Some([1.0, 1.0, 1.0, 0.5]));

        let info = pbr.base_color_texture.as_ref().unwrap();
        assert_eq!(info.tex_coord, 0);
        let texture = &document.textures[info.index];
        let image = &document.images[texture.source.unwrap()];
        assert_eq!(image.name.as_deref(), Some("red"));
        assert_eq!(image.mime_type.as_deref(), Some("image/png"));
        assert!(image.buffer_view.is_some());

        let sampler = &document.samplers[texture.sampler.unwrap()];
        assert_eq!(sampler.wrap_s, gltf::WRAP_CLAMP_TO_EDGE);
        assert_eq!(sampler.wrap_t, gltf::WRAP_REPEAT);

        assert_eq!(document.meshes[0].primitives[0].material, Some(0));
    }

    #[test]
    fn test_missing_image_is_referenced_by_uri() {
        let stage = load_stage_from_str(CUBE, "cube.usda").unwrap();
        let (document, _) = GltfConverter::new().build(&stage).unwrap();

        assert_eq!(document.images.len(), 1);
        assert_eq!(document.images[0].uri.as_deref(), Some("textures/red.png"));
        assert!(document.images[0].buffer_view.is_none());
    }

    #[test]
    fn test_packaged_image_is_embedded() {
        let mut stage = load_stage_from_str(CUBE, "cube.usda").unwrap();
        stage
            .assets
            .insert("textures/red.png".to_string(), b"\x89PNG packaged".to_vec());

        let (document, binary) = GltfConverter::new().build(&stage).unwrap();
        let view = &document.buffer_views[document.images[0].buffer_view.unwrap()];
        let start = view.byte_offset.unwrap();
        assert_eq!(&binary[start..start + view.byte_length], b"\x89PNG packaged");
    }

    #[test]
    fn test_animation_per_prim() {
        let stage = load_stage_from_str(ANIMATED, "anim.usda").unwrap();
        let (document, _) = GltfConverter::new().build(&stage).unwrap();

        assert_eq!(document.animations.len(), 2);
        let a = &document.animations[0];
        assert_eq!(a.name.as_deref(), Some("A"));
        let paths: Vec<_> = a.channels.iter().map(|c| c.target.path.as_str()).collect();
        assert_eq!(paths, ["translation", "rotation", "scale"]);
        assert!(a.samplers.iter().all(|s| s.interpolation == "LINEAR"));

        // startTimeCode 1 maps to zero seconds
        let input = &document.accessors[a.samplers[0].input];
        assert_eq!(input.min, Some(vec![0.0]));
        assert_eq!(input.max, Some(vec![1.0]));
    }

    #[test]
    fn test_step_interpolation_option() {
        let stage = load_stage_from_str(ANIMATED, "anim.usda").unwrap();
        let converter = GltfConverter::with_options(ConverterOptions {
            interpolation: "step".to_string(),
            ..Default::default()
        });
        assert_eq!(converter.options().interpolation, "step");
        assert!(!converter.options().flatten_xform_animation);

        let (document, _) = converter.build(&stage).unwrap();
        assert_eq!(document.animations.len(), 2);
        for animation in &document.animations {
            assert!(animation.samplers.iter().all(|s| s.interpolation == "STEP"));
        }
    }

    #[test]
    fn test_flattened_cubic_animation() {
        let stage = load_stage_from_str(ANIMATED, "anim.usda").unwrap();
        let mut converter = GltfConverter::new();
        converter.options_mut().interpolation = "CUBIC".to_string();
        converter.options_mut().flatten_xform_animation = true;
        let (document, _) = converter.build(&stage).unwrap();

        assert_eq!(document.animations.len(), 1);
        let animation = &document.animations[0];
        assert_eq!(animation.name.as_deref(), Some("Animation"));
        assert_eq!(animation.channels.len(), 6);

        for sampler in &animation.samplers {
            assert_eq!(sampler.interpolation, "CUBICSPLINE");
            let input = &document.accessors[sampler.input];
            let output = &document.accessors[sampler.output];
            assert_eq!(output.count, input.count * 3);
        }

        let b = find_node(&document, "B");
        let b_index = document.nodes.iter().position(|n| std::ptr::eq(n, b)).unwrap();
        assert!(animation.channels.iter().any(|c| c.target.node == b_index));
    }

    #[test]
    fn test_process_writes_glb() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out/cube.glb");
        let stage = load_stage_from_str(CUBE, "cube.usda").unwrap();

        GltfConverter::new().process(&stage, &output).unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(&bytes[0..4], b"glTF");
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 2);
        let length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(length as usize, bytes.len());
    }

    #[test]
    fn test_normalize_asset_path() {
        assert_eq!(normalize_asset_path("./tex/a.png"), "tex/a.png");
        assert_eq!(normalize_asset_path("pkg.usdz[0/a.jpg]"), "0/a.jpg");
        assert_eq!(normalize_asset_path("tex\\b.png"), "tex/b.png");
        assert_eq!(mime_type("a.JPG"), Some("image/jpeg"));
        assert_eq!(mime_type("a.exr"), None);
    }
}
