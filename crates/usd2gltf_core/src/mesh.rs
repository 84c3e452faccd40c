//! Triangle mesh extraction from USD `Mesh` prims.
//!
//! USD meshes are polygon soups with per-point, per-face or per-face-corner
//! primvars. glTF wants triangles over a single vertex stream, so faces are
//! fan-triangulated and, when any primvar varies per face corner or per
//! face, the vertex stream is unrolled to one vertex per face corner.

use std::collections::BTreeMap;

use glam::{Vec2, Vec3};
use thiserror::Error;

use crate::shade::resolve_uv_set;
use crate::usd::{Attribute, Prim, Value, ValueType};

/// Errors raised for inconsistent mesh topology.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("{path}: faceVertexCounts sum to {expected} but {found} faceVertexIndices are authored")]
    TopologyMismatch {
        path: String,
        expected: usize,
        found: usize,
    },

    #[error("{path}: face vertex index {index} out of range for {count} points")]
    IndexOutOfRange {
        path: String,
        index: i32,
        count: usize,
    },

    #[error("{path}: negative face vertex count {count}")]
    NegativeCount { path: String, count: i32 },
}

/// Primvar interpolation modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Constant,
    Uniform,
    Vertex,
    FaceVarying,
}

impl Interpolation {
    /// Parse an `interpolation` metadata token. `varying` is treated as `vertex`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "constant" => Some(Interpolation::Constant),
            "uniform" => Some(Interpolation::Uniform),
            "vertex" | "varying" => Some(Interpolation::Vertex),
            "faceVarying" => Some(Interpolation::FaceVarying),
            _ => None,
        }
    }

    fn is_per_point(self) -> bool {
        matches!(self, Interpolation::Constant | Interpolation::Vertex)
    }
}

/// Axis-aligned bounds of the mesh positions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

/// A triangle mesh ready for export.
#[derive(Clone, Debug)]
pub struct Mesh {
    /// Vertex positions (one Vec3 per vertex)
    pub positions: Vec<Vec3>,

    /// Vertex normals
    pub normals: Option<Vec<Vec3>>,

    /// Texture coordinates per set, V already flipped to glTF's top-left origin
    pub uv_sets: BTreeMap<u32, Vec<[f32; 2]>>,

    /// Triangle indices (every 3 indices form a triangle), counter-clockwise
    pub indices: Vec<u32>,

    pub bounds: Bounds,
}

impl Mesh {
    /// Create a new mesh from positions and indices, optionally with normals.
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>, normals: Option<Vec<Vec3>>) -> Self {
        let bounds = Self::compute_bounds(&positions);
        Self {
            positions,
            normals,
            uv_sets: BTreeMap::new(),
            indices,
            bounds,
        }
    }

    /// Compute axis-aligned bounding box from positions.
    fn compute_bounds(positions: &[Vec3]) -> Bounds {
        if positions.is_empty() {
            return Bounds {
                min: Vec3::ZERO,
                max: Vec3::ZERO,
            };
        }

        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);

        for pos in positions {
            min = min.min(*pos);
            max = max.max(*pos);
        }

        Bounds { min, max }
    }

    /// Compute smooth vertex normals by averaging face normals.
    pub fn compute_normals(&mut self) {
        self.normals = Some(smooth_normals(&self.positions, &self.indices));
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn has_uvs(&self) -> bool {
        !self.uv_sets.is_empty()
    }

    /// Ensure the mesh has normals, computing them if necessary.
    /// Also recomputes if existing normals don't match vertex count.
    pub fn ensure_normals(&mut self) {
        let should_compute = match &self.normals {
            None => true,
            Some(normals) => normals.len() != self.positions.len(),
        };

        if should_compute {
            if let Some(normals) = &self.normals {
                log::debug!(
                    "Normals array length ({}) doesn't match vertex count ({}), computing smooth normals",
                    normals.len(),
                    self.positions.len()
                );
            }
            self.compute_normals();
        }
    }

    /// Get the number of triangles in the mesh.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get the number of vertices in the mesh.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Build a triangle mesh from a USD `Mesh` prim.
    ///
    /// Returns `Ok(None)` when the prim has no points or no faces.
    pub fn from_prim(prim: &Prim) -> Result<Option<Self>, MeshError> {
        let path = prim.path().to_string();

        let points = match prim.attribute("points").and_then(authored_value) {
            Some(Value::Vec3Array(points)) if !points.is_empty() => points,
            _ => return Ok(None),
        };
        let counts = int_array(prim, "faceVertexCounts");
        let face_indices = int_array(prim, "faceVertexIndices");

        let topology = Topology::new(&path, &counts, &face_indices, points.len())?;
        if topology.face_count() == 0 {
            return Ok(None);
        }

        let left_handed =
            prim.value("orientation").and_then(Value::as_str) == Some("leftHanded");
        let corner_triangles = topology.triangles(left_handed);
        if corner_triangles.is_empty() {
            return Ok(None);
        }

        let normals = ["primvars:normals", "normals"]
            .iter()
            .find_map(|name| prim.attribute(name))
            .and_then(|attr| {
                Primvar::read(attr, prim.attribute(&format!("{}:indices", attr.name)), &topology, |v| {
                    v.as_vec3_array().map(<[Vec3]>::to_vec)
                })
            });

        let uv_sets = texcoord_primvars(prim, &topology);

        // Missing normals are computed smoothly over the original points so
        // unrolling does not facet them.
        let normals = normals.unwrap_or_else(|| {
            let point_triangles: Vec<u32> = corner_triangles
                .iter()
                .flatten()
                .map(|&c| topology.point_indices[c] as u32)
                .collect();
            Primvar {
                values: smooth_normals(&points, &point_triangles),
                indices: None,
                interpolation: Interpolation::Vertex,
            }
        });

        let per_point =
            normals.interpolation.is_per_point() && uv_sets.values().all(|p| p.interpolation.is_per_point());

        let mut mesh = if per_point {
            let indices: Vec<u32> = corner_triangles
                .iter()
                .flatten()
                .map(|&c| topology.point_indices[c] as u32)
                .collect();
            let mut mesh = Mesh::new(points.clone(), indices, None);
            mesh.normals = Some(
                (0..points.len())
                    .map(|p| normals.value(0, 0, p).unwrap_or(Vec3::Y).normalize_or_zero())
                    .collect(),
            );
            for (set, uvs) in &uv_sets {
                let values = (0..points.len())
                    .map(|p| flip_v(uvs.value(0, 0, p).unwrap_or(Vec2::ZERO)))
                    .collect();
                mesh.uv_sets.insert(*set, values);
            }
            mesh
        } else {
            log::debug!("{}: unrolling {} face corners", path, topology.corner_count());
            let corners = 0..topology.corner_count();
            let positions = corners
                .clone()
                .map(|c| points[topology.point_indices[c]])
                .collect();
            let indices = corner_triangles.iter().flatten().map(|&c| c as u32).collect();
            let mut mesh = Mesh::new(positions, indices, None);
            mesh.normals = Some(
                corners
                    .clone()
                    .map(|c| {
                        normals
                            .value(topology.corner_faces[c], c, topology.point_indices[c])
                            .unwrap_or(Vec3::Y)
                            .normalize_or_zero()
                    })
                    .collect(),
            );
            for (set, uvs) in &uv_sets {
                let values = corners
                    .clone()
                    .map(|c| {
                        flip_v(
                            uvs.value(topology.corner_faces[c], c, topology.point_indices[c])
                                .unwrap_or(Vec2::ZERO),
                        )
                    })
                    .collect();
                mesh.uv_sets.insert(*set, values);
            }
            mesh
        };

        mesh.ensure_normals();
        Ok(Some(mesh))
    }
}

fn flip_v(uv: Vec2) -> [f32; 2] {
    [uv.x, 1.0 - uv.y]
}

/// Default value, or the first time sample when only samples are authored.
fn authored_value(attr: &Attribute) -> Option<Value> {
    attr.get()
        .cloned()
        .or_else(|| attr.time_samples().first().map(|(_, v)| v.clone()))
}

fn int_array(prim: &Prim, name: &str) -> Vec<i32> {
    prim.attribute(name)
        .and_then(authored_value)
        .and_then(|v| v.as_int_array().map(<[i32]>::to_vec))
        .unwrap_or_default()
}

/// Smooth normals for counter-clockwise triangles.
fn smooth_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let vertex_count = positions.len();
    let mut normals = vec![Vec3::ZERO; vertex_count];

    for face in indices.chunks_exact(3) {
        let i0 = face[0] as usize;
        let i1 = face[1] as usize;
        let i2 = face[2] as usize;

        if i0 >= vertex_count || i1 >= vertex_count || i2 >= vertex_count {
            continue;
        }

        let edge1 = positions[i1] - positions[i0];
        let edge2 = positions[i2] - positions[i0];
        let face_normal = edge1.cross(edge2);

        normals[i0] += face_normal;
        normals[i1] += face_normal;
        normals[i2] += face_normal;
    }

    for normal in &mut normals {
        let len = normal.length();
        if len > 0.0 {
            *normal /= len;
        } else {
            *normal = Vec3::Y; // Default up normal for degenerate cases
        }
    }

    normals
}

/// Validated face topology.
struct Topology {
    counts: Vec<usize>,
    /// Point index per face corner
    point_indices: Vec<usize>,
    /// Face index per face corner
    corner_faces: Vec<usize>,
    point_count: usize,
}

impl Topology {
    fn new(path: &str, counts: &[i32], indices: &[i32], point_count: usize) -> Result<Self, MeshError> {
        let mut face_counts = Vec::with_capacity(counts.len());
        let mut corner_faces = Vec::with_capacity(indices.len());
        for (face, &count) in counts.iter().enumerate() {
            let count = usize::try_from(count).map_err(|_| MeshError::NegativeCount {
                path: path.to_string(),
                count,
            })?;
            face_counts.push(count);
            corner_faces.extend(std::iter::repeat(face).take(count));
        }

        if corner_faces.len() != indices.len() {
            return Err(MeshError::TopologyMismatch {
                path: path.to_string(),
                expected: corner_faces.len(),
                found: indices.len(),
            });
        }

        let point_indices = indices
            .iter()
            .map(|&i| match usize::try_from(i) {
                Ok(idx) if idx < point_count => Ok(idx),
                _ => Err(MeshError::IndexOutOfRange {
                    path: path.to_string(),
                    index: i,
                    count: point_count,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            counts: face_counts,
            point_indices,
            corner_faces,
            point_count,
        })
    }

    fn face_count(&self) -> usize {
        self.counts.len()
    }

    fn corner_count(&self) -> usize {
        self.point_indices.len()
    }

    /// Fan-triangulate every face, returning corner indices in
    /// counter-clockwise order. Faces with fewer than 3 corners are skipped.
    fn triangles(&self, left_handed: bool) -> Vec<[usize; 3]> {
        let mut triangles = Vec::new();
        let mut offset = 0usize;

        for &count in &self.counts {
            if count >= 3 {
                // (0,1,2), (0,2,3), ... (0,n-2,n-1)
                for i in 1..(count - 1) {
                    let (a, b, c) = (offset, offset + i, offset + i + 1);
                    triangles.push(if left_handed { [a, c, b] } else { [a, b, c] });
                }
            }
            offset += count;
        }

        triangles
    }

    /// Number of elements a primvar needs for an interpolation mode.
    fn element_count(&self, interpolation: Interpolation) -> usize {
        match interpolation {
            Interpolation::Constant => 1,
            Interpolation::Uniform => self.face_count(),
            Interpolation::Vertex => self.point_count,
            Interpolation::FaceVarying => self.corner_count(),
        }
    }

    /// Interpolation implied by an element count when none is authored.
    fn infer_interpolation(&self, len: usize) -> Option<Interpolation> {
        [
            Interpolation::Vertex,
            Interpolation::FaceVarying,
            Interpolation::Uniform,
            Interpolation::Constant,
        ]
        .into_iter()
        .find(|&i| self.element_count(i) == len)
    }
}

/// A primvar with its optional index array.
struct Primvar<T> {
    values: Vec<T>,
    indices: Option<Vec<usize>>,
    interpolation: Interpolation,
}

impl<T: Copy> Primvar<T> {
    fn read(
        attr: &Attribute,
        indices_attr: Option<&Attribute>,
        topology: &Topology,
        extract: impl Fn(&Value) -> Option<Vec<T>>,
    ) -> Option<Self> {
        let values = authored_value(attr).and_then(|v| extract(&v))?;
        let indices: Option<Vec<usize>> = indices_attr
            .and_then(authored_value)
            .and_then(|v| v.as_int_array().map(<[i32]>::to_vec))
            .map(|idx| idx.iter().map(|&i| usize::try_from(i).unwrap_or(usize::MAX)).collect());

        let len = indices.as_ref().map_or(values.len(), Vec::len);
        let interpolation = match attr.interpolation().and_then(Interpolation::from_token) {
            Some(i) if topology.element_count(i) <= len => i,
            Some(i) => {
                log::warn!(
                    "{}: {} interpolation needs {} elements but {} are authored, ignoring",
                    attr.name,
                    attr.interpolation().unwrap_or_default(),
                    topology.element_count(i),
                    len
                );
                return None;
            }
            None => match topology.infer_interpolation(len) {
                Some(i) => i,
                None => {
                    log::warn!("{}: cannot infer interpolation for {} elements", attr.name, len);
                    return None;
                }
            },
        };

        if let Some(idx) = &indices {
            if idx.iter().any(|&i| i >= values.len()) {
                log::warn!("{}: primvar indices out of range, ignoring", attr.name);
                return None;
            }
        }

        Some(Self {
            values,
            indices,
            interpolation,
        })
    }

    fn value(&self, face: usize, corner: usize, point: usize) -> Option<T> {
        let element = match self.interpolation {
            Interpolation::Constant => 0,
            Interpolation::Uniform => face,
            Interpolation::Vertex => point,
            Interpolation::FaceVarying => corner,
        };
        let element = match &self.indices {
            Some(indices) => *indices.get(element)?,
            None => element,
        };
        self.values.get(element).copied()
    }
}

/// Texture-coordinate primvars keyed by glTF set. `primvars:st` wins its set.
fn texcoord_primvars(prim: &Prim, topology: &Topology) -> BTreeMap<u32, Primvar<Vec2>> {
    let mut sets: BTreeMap<u32, (String, Primvar<Vec2>)> = BTreeMap::new();

    for attr in prim.attributes() {
        let Some(name) = attr.name.strip_prefix("primvars:") else {
            continue;
        };
        if name.ends_with(":indices") || !matches!(attr.type_name.base, ValueType::Vec2(_)) {
            continue;
        }
        if !attr.type_name.is_array {
            continue;
        }

        let indices = prim.attribute(&format!("{}:indices", attr.name));
        let Some(primvar) = Primvar::read(attr, indices, topology, |v| {
            v.as_vec2_array().map(<[Vec2]>::to_vec)
        }) else {
            continue;
        };

        let set = resolve_uv_set(name);
        let replace = match sets.get(&set) {
            None => true,
            Some((existing, _)) => name == "st" && existing != "st",
        };
        if replace {
            sets.insert(set, (name.to_string(), primvar));
        } else {
            log::debug!("{}: texture coordinate set {} already taken, skipping {}", prim.path(), set, name);
        }
    }

    sets.into_iter().map(|(set, (_, primvar))| (set, primvar)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::{load_stage_from_str, SdfPath};

    fn mesh_from(usda: &str) -> Option<Mesh> {
        let stage = load_stage_from_str(usda, "test").unwrap();
        let prim = stage.prim(&SdfPath::new("/M").unwrap()).unwrap();
        Mesh::from_prim(prim).unwrap()
    }

    #[test]
    fn test_mesh_creation() {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let mesh = Mesh::new(positions, vec![0, 1, 2], None);

        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.triangle_count(), 1);
        assert!(!mesh.has_normals());
    }

    #[test]
    fn test_compute_normals_ccw() {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let mut mesh = Mesh::new(positions, vec![0, 1, 2], None);
        mesh.compute_normals();

        for normal in mesh.normals.as_ref().unwrap() {
            assert!((normal.z - 1.0).abs() < 0.001);
        }
    }

    #[test]
    fn test_bounds_computation() {
        let positions = vec![
            Vec3::new(-1.0, -2.0, -3.0),
            Vec3::new(4.0, 5.0, 6.0),
            Vec3::new(0.0, 0.0, 0.0),
        ];
        let mesh = Mesh::new(positions, vec![0, 1, 2], None);

        assert_eq!(mesh.bounds.min, Vec3::new(-1.0, -2.0, -3.0));
        assert_eq!(mesh.bounds.max, Vec3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_quad_fan_triangulation() {
        let mesh = mesh_from(
            r#"
def Mesh "M"
{
    point3f[] points = [(0, 0, 0), (1, 0, 0), (1, 1, 0), (0, 1, 0)]
    int[] faceVertexCounts = [4]
    int[] faceVertexIndices = [0, 1, 2, 3]
}
"#,
        )
        .unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.vertex_count(), 4);
        assert!(mesh.normals.unwrap().iter().all(|n| (n.z - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_left_handed_flips_winding() {
        let mesh = mesh_from(
            r#"
def Mesh "M"
{
    uniform token orientation = "leftHanded"
    point3f[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
    int[] faceVertexCounts = [3]
    int[] faceVertexIndices = [0, 1, 2]
}
"#,
        )
        .unwrap();
        assert_eq!(mesh.indices, vec![0, 2, 1]);
        assert!(mesh.normals.unwrap().iter().all(|n| (n.z + 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_face_varying_uvs_unroll_and_flip() {
        let mesh = mesh_from(
            r#"
def Mesh "M"
{
    point3f[] points = [(0, 0, 0), (1, 0, 0), (1, 1, 0), (0, 1, 0)]
    int[] faceVertexCounts = [3, 3]
    int[] faceVertexIndices = [0, 1, 2, 0, 2, 3]
    texCoord2f[] primvars:st = [(0, 0), (1, 0), (1, 1), (0, 1)] (
        interpolation = "faceVarying"
    )
    int[] primvars:st:indices = [0, 1, 2, 0, 2, 3]
}
"#,
        )
        .unwrap();
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.indices, vec![0, 1, 2, 3, 4, 5]);

        let uvs = &mesh.uv_sets[&0];
        assert_eq!(uvs[0], [0.0, 1.0]);
        assert_eq!(uvs[2], [1.0, 0.0]);
        assert_eq!(uvs[5], [0.0, 0.0]);
        assert_eq!(mesh.positions[5], Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_vertex_uvs_stay_indexed() {
        let mesh = mesh_from(
            r#"
def Mesh "M"
{
    point3f[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
    int[] faceVertexCounts = [3]
    int[] faceVertexIndices = [0, 1, 2]
    texCoord2f[] primvars:st = [(0, 0), (1, 0), (0, 1)] (
        interpolation = "vertex"
    )
    texCoord2f[] primvars:st1 = [(0.5, 0.5)] (
        interpolation = "constant"
    )
}
"#,
        )
        .unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.uv_sets.len(), 2);
        assert_eq!(mesh.uv_sets[&1], vec![[0.5, 0.5]; 3]);
    }

    #[test]
    fn test_empty_mesh() {
        assert!(mesh_from("def Mesh \"M\"\n{\n}\n").is_none());
    }

    #[test]
    fn test_topology_mismatch() {
        let stage = load_stage_from_str(
            r#"
def Mesh "M"
{
    point3f[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
    int[] faceVertexCounts = [4]
    int[] faceVertexIndices = [0, 1, 2]
}
"#,
            "test",
        )
        .unwrap();
        let prim = stage.prim(&SdfPath::new("/M").unwrap()).unwrap();
        assert!(matches!(
            Mesh::from_prim(prim),
            Err(MeshError::TopologyMismatch { expected: 4, found: 3, .. })
        ));
    }

    #[test]
    fn test_index_out_of_range() {
        let stage = load_stage_from_str(
            r#"
def Mesh "M"
{
    point3f[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
    int[] faceVertexCounts = [3]
    int[] faceVertexIndices = [0, 1, 7]
}
"#,
            "test",
        )
        .unwrap();
        let prim = stage.prim(&SdfPath::new("/M").unwrap()).unwrap();
        assert!(matches!(
            Mesh::from_prim(prim),
            Err(MeshError::IndexOutOfRange { index: 7, .. })
        ));
    }
}
