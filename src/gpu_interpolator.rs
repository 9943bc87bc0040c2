use half::f16;
use ndarray::Array2;
use std::borrow::Cow;
use wgpu::{PollType, util::DeviceExt};

use crate::{error::MprError, slice::ObliquePlane, volume::Volume};

const WORKGROUP_SIZE: u32 = 8;

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

/// Oblique plane sampling on the GPU. The volume lives in a filterable 3D
/// texture so the sampler performs the trilinear interpolation.
pub struct GpuObliqueSampler {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    volume_view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    extent: [f32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct PlaneUniform {
    center: [f32; 4],
    u: [f32; 4],
    v: [f32; 4],
    dims: [f32; 4],
    size: [u32; 4],
}

impl PlaneUniform {
    fn new(plane: &ObliquePlane, extent: [f32; 3], background: f32) -> Self {
        let [x, y, z] = extent;
        Self {
            center: plane.center.extend(0.0).to_array(),
            u: plane.u.extend(0.0).to_array(),
            v: plane.v.extend(0.0).to_array(),
            dims: [x, y, z, background],
            size: [plane.width as u32, plane.height as u32, 0, 0],
        }
    }
}

fn compute_entry(binding: u32, ty: wgpu::BindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

fn buffer_binding(ty: wgpu::BufferBindingType) -> wgpu::BindingType {
    wgpu::BindingType::Buffer {
        ty,
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

/// Upload the voxels as a half-float 3D texture. `Volume` guarantees standard
/// layout, so iteration order is x-fastest like the texture rows.
fn upload_volume(device: &wgpu::Device, queue: &wgpu::Queue, volume: &Volume) -> wgpu::TextureView {
    let (nx, ny, nz) = volume.extent();
    let size = wgpu::Extent3d {
        width: nx as u32,
        height: ny as u32,
        depth_or_array_layers: nz as u32,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("MPR Volume Texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format: wgpu::TextureFormat::R16Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    let texels: Vec<f16> = volume
        .data()
        .iter()
        .map(|&v| f16::from_f32(f32::from(v)))
        .collect();
    queue.write_texture(
        wgpu::TexelCopyTextureInfoBase {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(&texels[..]),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(size.width * std::mem::size_of::<f16>() as u32),
            rows_per_image: Some(size.height),
        },
        size,
    );
    log::debug!("uploaded {nx}x{ny}x{nz} volume texture");

    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

impl GpuObliqueSampler {
    pub fn new(volume: &Volume, context: GpuContext) -> Self {
        let GpuContext { device, queue } = context;
        let volume_view = upload_volume(&device, &queue, volume);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("MPR Trilinear Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Oblique Plane Layout"),
            entries: &[
                compute_entry(
                    0,
                    wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D3,
                        multisampled: false,
                    },
                ),
                compute_entry(
                    1,
                    wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                ),
                compute_entry(
                    2,
                    buffer_binding(wgpu::BufferBindingType::Storage { read_only: false }),
                ),
                compute_entry(3, buffer_binding(wgpu::BufferBindingType::Uniform)),
            ],
        });

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Oblique Plane Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                "shaders/oblique_slice.wgsl"
            ))),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Oblique Plane Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Oblique Plane Pipeline"),
            layout: Some(&layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let (nx, ny, nz) = volume.extent();
        Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            volume_view,
            sampler,
            extent: [nx as f32, ny as f32, nz as f32],
        }
    }

    /// Sample `plane`, writing `background` outside the volume. The result is
    /// shaped `(plane.height, plane.width)` like a CPU-extracted slice.
    pub async fn extract(&self, plane: &ObliquePlane, background: f32) -> Result<Array2<f32>, MprError> {
        if plane.width == 0 || plane.height == 0 {
            return Ok(Array2::zeros((plane.height, plane.width)));
        }
        let uniform = PlaneUniform::new(plane, self.extent, background);
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Oblique Plane Uniform"),
                contents: bytemuck::bytes_of(&uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let byte_len = (plane.width * plane.height * std::mem::size_of::<f32>()) as u64;
        let samples = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Oblique Samples"),
            size: byte_len,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Oblique Readback"),
            size: byte_len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Oblique Plane Bindings"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.volume_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: samples.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Oblique Plane Commands"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Oblique Plane Sampling"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                (plane.width as u32).div_ceil(WORKGROUP_SIZE),
                (plane.height as u32).div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        encoder.copy_buffer_to_buffer(&samples, 0, &readback, 0, byte_len);
        self.queue.submit(Some(encoder.finish()));

        let values = self.read_back(&readback).await?;
        log::trace!("GPU oblique extraction {}x{}", plane.width, plane.height);
        Array2::from_shape_vec((plane.height, plane.width), values)
            .map_err(|e| MprError::Gpu(e.to_string()))
    }

    async fn read_back(&self, buffer: &wgpu::Buffer) -> Result<Vec<f32>, MprError> {
        let slice = buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| MprError::Gpu(e.to_string()))?;
        receiver
            .await
            .map_err(|e| MprError::Gpu(e.to_string()))?
            .map_err(|e| MprError::Gpu(e.to_string()))?;

        let mapped = slice.get_mapped_range();
        let values = bytemuck::cast_slice::<u8, f32>(&mapped[..]).to_vec();
        drop(mapped);
        buffer.unmap();
        Ok(values)
    }
}
