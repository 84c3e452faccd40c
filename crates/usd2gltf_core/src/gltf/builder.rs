//! Binary buffer assembly.

use bytemuck::Pod;

use super::{
    Accessor, BufferView, COMPONENT_TYPE_FLOAT, COMPONENT_TYPE_UNSIGNED_INT,
    COMPONENT_TYPE_UNSIGNED_SHORT, TARGET_ARRAY_BUFFER, TARGET_ELEMENT_ARRAY_BUFFER,
};

/// Collects binary data for buffer 0 along with its views and accessors.
///
/// Every view starts on a 4-byte boundary.
#[derive(Debug, Default)]
pub struct BufferBuilder {
    binary_data: Vec<u8>,
    buffer_views: Vec<BufferView>,
    accessors: Vec<Accessor>,
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn align(&mut self) {
        while self.binary_data.len() % 4 != 0 {
            self.binary_data.push(0);
        }
    }

    /// Append raw bytes as a new buffer view.
    pub fn add_view(&mut self, bytes: &[u8], target: Option<u32>) -> usize {
        self.align();
        let offset = self.binary_data.len();
        self.binary_data.extend_from_slice(bytes);

        let index = self.buffer_views.len();
        self.buffer_views.push(BufferView {
            buffer: 0,
            byte_offset: Some(offset),
            byte_length: bytes.len(),
            byte_stride: None,
            target,
        });
        index
    }

    /// Add accessor and buffer view
    fn add_accessor<T: Pod>(
        &mut self,
        data: &[T],
        count: usize,
        accessor_type: &str,
        component_type: u32,
        min: Option<Vec<f32>>,
        max: Option<Vec<f32>>,
        target: Option<u32>,
    ) -> usize {
        let buffer_view_index = self.add_view(bytemuck::cast_slice(data), target);

        let accessor_index = self.accessors.len();
        self.accessors.push(Accessor {
            buffer_view: Some(buffer_view_index),
            byte_offset: None,
            component_type,
            count,
            accessor_type: accessor_type.to_string(),
            max,
            min,
        });
        accessor_index
    }

    /// Float scalars (animation key times). Min and max are always written.
    pub fn add_scalars(&mut self, values: &[f32]) -> usize {
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        self.add_accessor(
            values,
            values.len(),
            "SCALAR",
            COMPONENT_TYPE_FLOAT,
            Some(vec![min]),
            Some(vec![max]),
            None,
        )
    }

    pub fn add_vec2(&mut self, values: &[[f32; 2]], target: Option<u32>) -> usize {
        self.add_accessor(values, values.len(), "VEC2", COMPONENT_TYPE_FLOAT, None, None, target)
    }

    /// VEC3 floats. With `bounds`, min/max are computed (required for POSITION).
    pub fn add_vec3(&mut self, values: &[[f32; 3]], bounds: bool, target: Option<u32>) -> usize {
        let (min, max) = if bounds {
            let mut min = [f32::MAX; 3];
            let mut max = [f32::MIN; 3];
            for v in values {
                for i in 0..3 {
                    min[i] = min[i].min(v[i]);
                    max[i] = max[i].max(v[i]);
                }
            }
            (Some(min.to_vec()), Some(max.to_vec()))
        } else {
            (None, None)
        };
        self.add_accessor(values, values.len(), "VEC3", COMPONENT_TYPE_FLOAT, min, max, target)
    }

    pub fn add_vec4(&mut self, values: &[[f32; 4]], target: Option<u32>) -> usize {
        self.add_accessor(values, values.len(), "VEC4", COMPONENT_TYPE_FLOAT, None, None, target)
    }

    /// Vertex attribute helper.
    pub fn add_attribute_vec3(&mut self, values: &[[f32; 3]], bounds: bool) -> usize {
        self.add_vec3(values, bounds, Some(TARGET_ARRAY_BUFFER))
    }

    /// Triangle indices, as `u16` when every vertex fits, otherwise `u32`.
    pub fn add_indices(&mut self, indices: &[u32], vertex_count: usize) -> usize {
        if vertex_count < u16::MAX as usize + 1 {
            let short: Vec<u16> = indices.iter().map(|&i| i as u16).collect();
            self.add_accessor(
                &short,
                short.len(),
                "SCALAR",
                COMPONENT_TYPE_UNSIGNED_SHORT,
                None,
                None,
                Some(TARGET_ELEMENT_ARRAY_BUFFER),
            )
        } else {
            self.add_accessor(
                indices,
                indices.len(),
                "SCALAR",
                COMPONENT_TYPE_UNSIGNED_INT,
                None,
                None,
                Some(TARGET_ELEMENT_ARRAY_BUFFER),
            )
        }
    }

    pub fn accessor(&self, index: usize) -> Option<&Accessor> {
        self.accessors.get(index)
    }

    /// Consume the builder, returning the buffer bytes, views and accessors.
    pub fn finish(mut self) -> (Vec<u8>, Vec<BufferView>, Vec<Accessor>) {
        self.align();
        (self.binary_data, self.buffer_views, self.accessors)
    }
}
