/// VulkanPipeline - render pass, pipeline layout and pipeline creation shared by every shader
///
/// Set 0 holds the bound uniform buffer as a dynamic uniform buffer at
/// binding 0; set 1 + n holds the combined image sampler of texture unit n.
/// Shader uniforms travel as one 128-byte push-constant range visible to
/// the vertex and fragment stages.

use ash::vk;
use fresh_render::engine_err;
use fresh_render::fresh::resource::{MeshVertex, MAX_TEXTURE_UNITS};
use fresh_render::fresh::Result;
use std::rc::Rc;

use crate::vulkan_device::VulkanDevice;
use crate::vulkan_util::{
    DEPTH_FORMAT, PUSH_CONSTANT_SIZE, SOURCE, TEXTURE_DESCRIPTOR_CAPACITY, UNIFORM_DESCRIPTOR_CAPACITY,
};

/// Stages the push-constant range is visible to
pub(crate) const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags =
    vk::ShaderStageFlags::from_raw(vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw());

pub struct VulkanPipeline {
    device: Rc<VulkanDevice>,
    color_format: vk::Format,
    render_pass: vk::RenderPass,
    uniform_set_layout: vk::DescriptorSetLayout,
    texture_set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    sampler: vk::Sampler,
    descriptor_pool: vk::DescriptorPool,
}

/// Color (cleared, presented) and depth (cleared, discarded) in one subpass
fn create_render_pass(device: &ash::Device, color_format: vk::Format) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        vk::AttachmentDescription::default()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)];
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .dst_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    unsafe { device.create_render_pass(&info, None) }
        .map_err(|e| engine_err!(SOURCE, "Failed to create render pass: {:?}", e))
}

impl VulkanPipeline {
    pub(crate) fn new(device: Rc<VulkanDevice>, color_format: vk::Format) -> Result<Self> {
        let vk_device = &device.device;
        unsafe {
            let render_pass = create_render_pass(vk_device, color_format)?;

            let uniform_bindings = [vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(1)
                .stage_flags(PUSH_CONSTANT_STAGES)];
            let uniform_set_layout = vk_device
                .create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo::default().bindings(&uniform_bindings),
                    None,
                )
                .map_err(|e| engine_err!(SOURCE, "Failed to create descriptor set layout: {:?}", e))?;

            let bindings = [vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)];
            let texture_set_layout = vk_device
                .create_descriptor_set_layout(&vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings), None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create descriptor set layout: {:?}", e))?;

            let mut set_layouts = vec![uniform_set_layout];
            set_layouts.extend(std::iter::repeat(texture_set_layout).take(MAX_TEXTURE_UNITS as usize));
            let push_constant_ranges = [vk::PushConstantRange {
                stage_flags: PUSH_CONSTANT_STAGES,
                offset: 0,
                size: PUSH_CONSTANT_SIZE,
            }];
            let layout = vk_device
                .create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::default()
                        .set_layouts(&set_layouts)
                        .push_constant_ranges(&push_constant_ranges),
                    None,
                )
                .map_err(|e| engine_err!(SOURCE, "Failed to create pipeline layout: {:?}", e))?;

            let sampler_info = vk::SamplerCreateInfo::default()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .max_lod(vk::LOD_CLAMP_NONE);
            let sampler = vk_device
                .create_sampler(&sampler_info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create sampler: {:?}", e))?;

            let pool_sizes = [
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: TEXTURE_DESCRIPTOR_CAPACITY,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                    descriptor_count: UNIFORM_DESCRIPTOR_CAPACITY,
                },
            ];
            let descriptor_pool = vk_device
                .create_descriptor_pool(
                    &vk::DescriptorPoolCreateInfo::default()
                        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                        .pool_sizes(&pool_sizes)
                        .max_sets(TEXTURE_DESCRIPTOR_CAPACITY + UNIFORM_DESCRIPTOR_CAPACITY),
                    None,
                )
                .map_err(|e| engine_err!(SOURCE, "Failed to create descriptor pool: {:?}", e))?;

            Ok(Self {
                device,
                color_format,
                render_pass,
                uniform_set_layout,
                texture_set_layout,
                layout,
                sampler,
                descriptor_pool,
            })
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Swapchain format the render pass was built for
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    pub(crate) fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.descriptor_pool
    }

    /// Descriptor set sampling `view` through the shared sampler
    pub(crate) fn allocate_texture_set(&self, view: vk::ImageView) -> Result<vk::DescriptorSet> {
        let layouts = [self.texture_set_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        unsafe {
            let set = self
                .device
                .device
                .allocate_descriptor_sets(&allocate_info)
                .map_err(|e| {
                    engine_err!(
                        SOURCE,
                        "Texture descriptor set allocation failed ({} sets max): {:?}",
                        TEXTURE_DESCRIPTOR_CAPACITY,
                        e
                    )
                })?[0];
            let image_info = [vk::DescriptorImageInfo {
                sampler: self.sampler,
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info);
            self.device.device.update_descriptor_sets(&[write], &[]);
            Ok(set)
        }
    }

    /// Descriptor set reading `range` bytes of `buffer` at a dynamic offset
    pub(crate) fn allocate_uniform_set(&self, buffer: vk::Buffer, range: u64) -> Result<vk::DescriptorSet> {
        let layouts = [self.uniform_set_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        unsafe {
            let set = self
                .device
                .device
                .allocate_descriptor_sets(&allocate_info)
                .map_err(|e| {
                    engine_err!(
                        SOURCE,
                        "Uniform descriptor set allocation failed ({} sets max): {:?}",
                        UNIFORM_DESCRIPTOR_CAPACITY,
                        e
                    )
                })?[0];
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            }];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .buffer_info(&buffer_info);
            self.device.device.update_descriptor_sets(&[write], &[]);
            Ok(set)
        }
    }

    /// Graphics pipeline drawing [`MeshVertex`] triangles into the render pass
    pub(crate) fn create_graphics_pipeline(
        &self,
        vertex: vk::ShaderModule,
        fragment: vk::ShaderModule,
    ) -> Result<vk::Pipeline> {
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(c"main"),
        ];

        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: MeshVertex::STRIDE,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_attributes = [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: MeshVertex::POSITION_OFFSET,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: MeshVertex::NORMAL_OFFSET,
            },
        ];
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic
        let viewports = [vk::Viewport::default()];
        let scissors = [vk::Rect2D::default()];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        // Vulkan clip space has Y down, so counter-clockwise meshes arrive clockwise
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD);
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(std::slice::from_ref(&color_blend_attachment));

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .depth_stencil_state(&depth_stencil_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(self.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| engine_err!(SOURCE, "Failed to create graphics pipeline: {:?}", e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| engine_err!(SOURCE, "Pipeline creation returned no pipeline"))
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        // Retired descriptor sets belong to the pool destroyed below
        if let Err(e) = self.device.wait_idle() {
            fresh_render::engine_warn!(SOURCE, "Wait before pipeline teardown failed: {}", e);
        }
        self.device.release_all_retired();
        unsafe {
            let device = &self.device.device;
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_sampler(self.sampler, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.texture_set_layout, None);
            device.destroy_descriptor_set_layout(self.uniform_set_layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}
