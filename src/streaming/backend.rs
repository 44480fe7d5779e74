//! Texture allocator backends for resident bricks
//!
//! The residency cache decides *what* is resident; an allocator owns the
//! actual GPU objects. `HeadlessAllocator` issues opaque ids and is used for
//! tests and simulation, `WgpuAllocator` creates 3D textures.

use std::collections::HashMap;

use crate::core::error::Error;
use crate::core::types::{Result, UVec3};
use crate::volume::{ComponentFormat, TexelType};

/// Sampling filter of a resident texture
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SampleFilter {
    #[default]
    Linear,
    Nearest,
}

/// Shape and format of one resident brick texture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub dims: UVec3,
    pub format: ComponentFormat,
    pub filter: SampleFilter,
}

impl TextureDesc {
    pub fn new(dims: UVec3, format: ComponentFormat, filter: SampleFilter) -> Self {
        Self { dims, format, filter }
    }

    pub fn size_bytes(&self) -> u64 {
        self.dims.x as u64 * self.dims.y as u64 * self.dims.z as u64 * self.format.bytes_per_texel()
    }

    /// Same allocation (filter aside)
    pub fn same_storage(&self, other: &TextureDesc) -> bool {
        self.dims == other.dims && self.format == other.format
    }
}

/// Creates and destroys GPU resources for the residency cache
pub trait TextureAllocator {
    type Handle: Clone;

    /// Allocate a texture, optionally uploading `data`
    fn create(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> Result<Self::Handle>;

    /// Release a texture; draws already recorded against it stay valid
    fn destroy(&mut self, handle: Self::Handle);

    /// Re-apply the sampling filter of a live texture
    fn set_filter(&mut self, handle: &mut Self::Handle, filter: SampleFilter);
}

/// Allocator without a GPU
#[derive(Debug, Default)]
pub struct HeadlessAllocator {
    next_id: u64,
    live: HashMap<u64, TextureDesc>,
    failing: bool,
}

impl HeadlessAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `create` fail (simulates a driver out-of-memory)
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// Number of live textures
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Description of a live texture
    pub fn desc(&self, handle: u64) -> Option<&TextureDesc> {
        self.live.get(&handle)
    }
}

impl TextureAllocator for HeadlessAllocator {
    type Handle = u64;

    fn create(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> Result<u64> {
        if self.failing {
            return Err(Error::Gpu("headless allocator is failing".into()));
        }
        if let Some(data) = data {
            if (data.len() as u64) < desc.size_bytes() {
                return Err(Error::Gpu(format!(
                    "upload of {} bytes for a {} byte texture", data.len(), desc.size_bytes()
                )));
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, *desc);
        Ok(id)
    }

    fn destroy(&mut self, handle: u64) {
        self.live.remove(&handle);
    }

    fn set_filter(&mut self, handle: &mut u64, filter: SampleFilter) {
        if let Some(desc) = self.live.get_mut(handle) {
            desc.filter = filter;
        }
    }
}

/// A brick texture on the GPU
#[derive(Clone, Debug)]
pub struct WgpuBrickTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    /// Sampler to bind with this texture (see `WgpuAllocator::sampler`)
    pub filter: SampleFilter,
}

/// Allocator creating 3D textures through wgpu
pub struct WgpuAllocator {
    device: wgpu::Device,
    queue: wgpu::Queue,
    linear: wgpu::Sampler,
    nearest: wgpu::Sampler,
}

impl WgpuAllocator {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let sampler = |label, filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        };
        let linear = sampler("brick_sampler_linear", wgpu::FilterMode::Linear);
        let nearest = sampler("brick_sampler_nearest", wgpu::FilterMode::Nearest);

        Self { device, queue, linear, nearest }
    }

    pub fn sampler(&self, filter: SampleFilter) -> &wgpu::Sampler {
        match filter {
            SampleFilter::Linear => &self.linear,
            SampleFilter::Nearest => &self.nearest,
        }
    }

    fn texture_format(format: &ComponentFormat) -> Result<wgpu::TextureFormat> {
        use wgpu::TextureFormat as F;
        let f = match (format.texel, format.channels) {
            (TexelType::U8, 1) => F::R8Unorm,
            (TexelType::U8, 2) => F::Rg8Unorm,
            (TexelType::U8, 4) => F::Rgba8Unorm,
            (TexelType::U16, 1) => F::R16Uint,
            (TexelType::U16, 2) => F::Rg16Uint,
            (TexelType::U16, 4) => F::Rgba16Uint,
            (TexelType::U32, 1) => F::R32Uint,
            (TexelType::U32, 2) => F::Rg32Uint,
            (TexelType::U32, 4) => F::Rgba32Uint,
            (texel, channels) => {
                return Err(Error::Gpu(format!(
                    "no texture format for {channels} x {texel:?}"
                )));
            }
        };
        Ok(f)
    }
}

impl TextureAllocator for WgpuAllocator {
    type Handle = WgpuBrickTexture;

    fn create(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> Result<WgpuBrickTexture> {
        let format = Self::texture_format(&desc.format)?;
        let size = wgpu::Extent3d {
            width: desc.dims.x,
            height: desc.dims.y,
            depth_or_array_layers: desc.dims.z,
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("volstream_brick"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        if let Some(data) = data {
            let bytes_per_row = desc.dims.x * desc.format.bytes_per_texel() as u32;
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(desc.dims.y),
                },
                size,
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuBrickTexture { texture, view, filter: desc.filter })
    }

    fn destroy(&mut self, handle: WgpuBrickTexture) {
        // Freed by wgpu once no pending submission uses it
        drop(handle);
    }

    fn set_filter(&mut self, handle: &mut WgpuBrickTexture, filter: SampleFilter) {
        handle.filter = filter;
    }
}
