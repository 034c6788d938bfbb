use anyhow::{anyhow, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use log::*;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use thiserror::Error;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::Device;

use crate::vulkan::buffer::Buffer;
use crate::vulkan::image::Texture;
use crate::vulkan::Gpu;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("pixel data not registered: `{0}`")]
    PixelsNotFound(String),
    #[error("mesh not registered: `{0}`")]
    MeshNotFound(String),
    #[error("texture not registered: `{0}`")]
    TextureNotFound(String),
}

/// Decoded, tightly packed RGBA8 pixels.
#[derive(Clone, Debug)]
pub struct PixelData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    pub fn new(pos: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription::builder()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::size_of::<Vec3>() as u32)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .location(2)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset((2 * std::mem::size_of::<Vec3>()) as u32)
                .build(),
        ]
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos && self.color == other.color && self.tex_coord == other.tex_coord
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        bytemuck::bytes_of(self).hash(state);
    }
}

/// Decoded mesh plus its device-resident buffers once uploaded.
#[derive(Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    vertex_buffer: Option<Buffer>,
    index_buffer: Option<Buffer>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            vertex_buffer: None,
            index_buffer: None,
        }
    }

    pub fn vertex_buffer(&self) -> Result<&Buffer> {
        self.vertex_buffer
            .as_ref()
            .ok_or_else(|| anyhow!("vertex buffer not uploaded"))
    }

    pub fn index_buffer(&self) -> Result<&Buffer> {
        self.index_buffer
            .as_ref()
            .ok_or_else(|| anyhow!("index buffer not uploaded"))
    }

    unsafe fn destroy(&mut self, device: &Device) {
        if let Some(buffer) = self.vertex_buffer.take() {
            buffer.destroy(device);
        }
        if let Some(buffer) = self.index_buffer.take() {
            buffer.destroy(device);
        }
    }
}

/// Builds a deduplicated vertex/index pair from decoded OBJ data.
pub fn dedup_mesh(positions: &[Vertex]) -> (Vec<Vertex>, Vec<u32>) {
    let mut unique = HashMap::new();
    let mut vertices = Vec::new();
    let mut indices = Vec::with_capacity(positions.len());
    for vertex in positions {
        let index = *unique.entry(*vertex).or_insert_with(|| {
            vertices.push(*vertex);
            (vertices.len() - 1) as u32
        });
        indices.push(index);
    }
    (vertices, indices)
}

/// Decoded pixel and mesh data plus the GPU resources built from them.
///
/// Owned by the engine and handed into actors by reference; reset at scene
/// transitions so nothing uploaded for scene k survives into scene k+1.
#[derive(Debug, Default)]
pub struct AssetCache {
    root: PathBuf,
    images: HashMap<String, PixelData>,
    meshes: HashMap<String, Mesh>,
    textures: HashMap<String, Texture>,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            images: HashMap::new(),
            meshes: HashMap::new(),
            textures: HashMap::new(),
        }
    }

    /// Decodes an image file under `img/` into RGBA8 pixels.
    pub fn register_pixels(&mut self, path: &str, key: &str) -> Result<()> {
        if self.images.contains_key(key) {
            return Ok(());
        }
        let full_path = self.root.join("img").join(path);
        let decoded = image::open(&full_path)
            .map_err(|e| anyhow!("failed to decode `{}`: {}", full_path.display(), e))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        self.images.insert(
            key.to_string(),
            PixelData {
                width,
                height,
                pixels: decoded.into_raw(),
            },
        );
        Ok(())
    }

    /// Decodes an OBJ file under `model/` into a deduplicated mesh.
    pub fn register_obj(&mut self, path: &str, key: &str) -> Result<()> {
        if self.meshes.contains_key(key) {
            return Ok(());
        }
        let full_path = self.root.join("model").join(path);
        let (models, _) = tobj::load_obj(
            &full_path,
            &tobj::LoadOptions {
                triangulate: true,
                ..Default::default()
            },
        )
        .map_err(|e| anyhow!("failed to decode `{}`: {}", full_path.display(), e))?;

        let mut raw_vertices = Vec::new();
        for model in &models {
            let mesh = &model.mesh;
            for index in &mesh.indices {
                let index = *index as usize;
                let pos = Vec3::new(
                    mesh.positions[3 * index],
                    mesh.positions[3 * index + 1],
                    mesh.positions[3 * index + 2],
                );
                let tex_coord = if mesh.texcoords.is_empty() {
                    Vec2::ZERO
                } else {
                    Vec2::new(
                        mesh.texcoords[2 * index],
                        1.0 - mesh.texcoords[2 * index + 1],
                    )
                };
                raw_vertices.push(Vertex::new(pos, Vec3::ONE, tex_coord));
            }
        }

        let (vertices, indices) = dedup_mesh(&raw_vertices);
        info!(
            "Loaded mesh `{}`: {} vertices, {} indices.",
            key,
            vertices.len(),
            indices.len()
        );
        self.meshes.insert(key.to_string(), Mesh::new(vertices, indices));
        Ok(())
    }

    /// Registers a mesh supplied directly as vertex/index arrays.
    pub fn register_mesh(&mut self, key: &str, vertices: Vec<Vertex>, indices: Vec<u32>) {
        self.meshes
            .entry(key.to_string())
            .or_insert_with(|| Mesh::new(vertices, indices));
    }

    pub fn pixels(&self, key: &str) -> Result<&PixelData, AssetError> {
        self.images
            .get(key)
            .ok_or_else(|| AssetError::PixelsNotFound(key.to_string()))
    }

    pub fn mesh(&self, key: &str) -> Result<&Mesh, AssetError> {
        self.meshes
            .get(key)
            .ok_or_else(|| AssetError::MeshNotFound(key.to_string()))
    }

    pub fn texture(&self, key: &str) -> Result<&Texture, AssetError> {
        self.textures
            .get(key)
            .ok_or_else(|| AssetError::TextureNotFound(key.to_string()))
    }

    /// Builds the device texture for registered pixels and records the
    /// staging upload (with mip-chain generation) into the "copy" stream.
    /// The staging buffer joins `staging_buffers` until the copy submission
    /// has completed.
    pub unsafe fn upload_texture(
        &mut self,
        gpu: &Gpu,
        key: &str,
        staging_buffers: &mut Vec<Buffer>,
    ) -> Result<()> {
        let pixels = self
            .images
            .get(key)
            .ok_or_else(|| AssetError::PixelsNotFound(key.to_string()))?;
        let device = gpu.device();

        let texture = Texture::new(gpu.vulkan_device(), pixels.width, pixels.height)?;
        let staging = Buffer::staging(gpu.vulkan_device(), pixels.pixels.len() as u64)?;
        staging.write(device, &pixels.pixels)?;

        let copy_command_buffer = gpu.graphic_command_buffer("copy")?;
        copy_command_buffer.transition_image_layout(
            device,
            texture.image(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            texture.mip_levels(),
        )?;
        copy_command_buffer.copy_buffer_to_image(
            device,
            &staging,
            texture.image(),
            texture.extent(),
        );
        if texture.mip_levels() > 1 {
            if !gpu.supports_linear_blit(Texture::FORMAT) {
                return Err(anyhow!(
                    "texture format does not support linear blitting for mip generation"
                ));
            }
            copy_command_buffer.generate_mipmaps(
                device,
                texture.image(),
                pixels.width,
                pixels.height,
                texture.mip_levels(),
            );
        } else {
            copy_command_buffer.transition_image_layout(
                device,
                texture.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                1,
            )?;
        }

        staging_buffers.push(staging);
        self.textures.insert(key.to_string(), texture);
        Ok(())
    }

    /// Creates the device-local vertex/index buffers of a registered mesh and
    /// records the staging copies into the "copy" stream.
    pub unsafe fn upload_mesh(
        &mut self,
        gpu: &Gpu,
        key: &str,
        staging_buffers: &mut Vec<Buffer>,
    ) -> Result<()> {
        let device = gpu.device();
        let mesh = self
            .meshes
            .get_mut(key)
            .ok_or_else(|| AssetError::MeshNotFound(key.to_string()))?;
        let copy_command_buffer = gpu.graphic_command_buffer("copy")?;

        let vertex_size = (std::mem::size_of::<Vertex>() * mesh.vertices.len()) as u64;
        let vertex_buffer = Buffer::device_local(
            gpu.vulkan_device(),
            vertex_size,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let vertex_staging = Buffer::staging(gpu.vulkan_device(), vertex_size)?;
        vertex_staging.write(device, &mesh.vertices)?;
        copy_command_buffer.copy_buffer(device, &vertex_staging, &vertex_buffer, vertex_size);
        staging_buffers.push(vertex_staging);

        let index_size = (std::mem::size_of::<u32>() * mesh.indices.len()) as u64;
        let index_buffer = Buffer::device_local(
            gpu.vulkan_device(),
            index_size,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        let index_staging = Buffer::staging(gpu.vulkan_device(), index_size)?;
        index_staging.write(device, &mesh.indices)?;
        copy_command_buffer.copy_buffer(device, &index_staging, &index_buffer, index_size);
        staging_buffers.push(index_staging);

        mesh.vertex_buffer = Some(vertex_buffer);
        mesh.index_buffer = Some(index_buffer);
        Ok(())
    }

    /// Destroys every GPU resource and forgets all decoded data. Called at
    /// scene boundaries after the device has gone idle.
    pub unsafe fn reset(&mut self, device: &Device) {
        for texture in self.textures.values() {
            texture.destroy(device);
        }
        self.textures.clear();
        for mesh in self.meshes.values_mut() {
            mesh.destroy(device);
        }
        self.meshes.clear();
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32) -> Vertex {
        Vertex::new(Vec3::new(x, 0.0, 0.0), Vec3::ONE, Vec2::ZERO)
    }

    #[test]
    fn dedup_collapses_repeated_vertices() {
        let raw = vec![vertex(0.0), vertex(1.0), vertex(0.0), vertex(2.0), vertex(1.0)];
        let (vertices, indices) = dedup_mesh(&raw);
        assert_eq!(vertices.len(), 3);
        assert_eq!(indices, vec![0, 1, 0, 2, 1]);
    }

    #[test]
    fn dedup_preserves_order_of_first_occurrence() {
        let raw = vec![vertex(5.0), vertex(3.0), vertex(5.0)];
        let (vertices, indices) = dedup_mesh(&raw);
        assert_eq!(vertices[0].pos.x, 5.0);
        assert_eq!(vertices[1].pos.x, 3.0);
        assert_eq!(indices, vec![0, 1, 0]);
    }

    #[test]
    fn missing_lookups_are_reported() {
        let cache = AssetCache::new("assets");
        assert!(matches!(
            cache.pixels("nope"),
            Err(AssetError::PixelsNotFound(_))
        ));
        assert!(matches!(cache.mesh("nope"), Err(AssetError::MeshNotFound(_))));
        assert!(matches!(
            cache.texture("nope"),
            Err(AssetError::TextureNotFound(_))
        ));
    }

    #[test]
    fn vertex_layout_matches_attribute_offsets() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
    }
}
