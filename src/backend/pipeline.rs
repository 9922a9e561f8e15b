// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.
// Viewport and scissor are dynamic so the pipeline outlives swapchain rebuilds.

use crate::backend::descriptor::create_frame_set_layout;
use crate::backend::gpu::Gpu;
use crate::backend::shader::{create_shader_module, read_spirv, shader_path, ShaderStage};
use crate::error::{RenderError, Result};
use crate::lifecycle::Lifecycle;
use ash::vk;
use std::path::Path;

/// Vertex buffer bindings and attributes consumed by the vertex shader
#[derive(Debug, Clone, Default)]
pub struct VertexInput {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Fixed inputs the pipeline and render pass are compiled against
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub vertex_input: VertexInput,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub clear_color: [f32; 4],
}

/// Render pass with color (presented) + depth attachments
fn create_render_pass<G: Gpu>(
    gpu: &G,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    // Depth attachment
    let depth_attachment = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE) // Don't need to store depth
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    // Single subpass with color and depth
    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_attachment_ref)
        .build();

    // Color writes wait for the acquire semaphore's stage
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();

    let attachments = &[color_attachment, depth_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    gpu.create_render_pass(&render_pass_info)
        .map_err(RenderError::creation("render pass"))
}

fn create_pipeline<G: Gpu>(
    gpu: &G,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vertex_input: &VertexInput,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let entry_point = c"main";

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(ShaderStage::Vertex.flags())
        .module(vert_shader)
        .name(entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(ShaderStage::Fragment.flags())
        .module(frag_shader)
        .name(entry_point)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&vertex_input.bindings)
        .vertex_attribute_descriptions(&vertex_input.attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Counts only; the actual rectangles are set per frame
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    // Multisampling (disabled)
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS) // Closer objects win
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    // Color blending (no blending, opaque)
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    gpu.create_graphics_pipeline(&pipeline_info)
        .map_err(RenderError::creation("graphics pipeline"))
}

/// Render pass + pipeline state compiled once, recorded every frame
pub struct GraphicsPipeline {
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    color_format: vk::Format,
    clear_color: [f32; 4],
    lifecycle: Lifecycle,
}

impl GraphicsPipeline {
    /// Load `<dir>/<name>.vert.spv` and `<dir>/<name>.frag.spv`
    pub fn load<G: Gpu>(gpu: &G, dir: &Path, name: &str, desc: &PipelineDesc) -> Result<Self> {
        let vert = read_spirv(&shader_path(dir, name, ShaderStage::Vertex))?;
        let frag = read_spirv(&shader_path(dir, name, ShaderStage::Fragment))?;
        log::info!("Loaded shaders '{}' from {}", name, dir.display());
        Self::from_spirv(gpu, &vert, &frag, desc)
    }

    pub fn from_spirv<G: Gpu>(gpu: &G, vert: &[u32], frag: &[u32], desc: &PipelineDesc) -> Result<Self> {
        let vert_module = create_shader_module(gpu, vert)?;
        let frag_module = match create_shader_module(gpu, frag) {
            Ok(module) => module,
            Err(err) => {
                gpu.destroy_shader_module(vert_module);
                return Err(err);
            }
        };

        let built = Self::build(gpu, vert_module, frag_module, desc);

        // Modules are only needed while the pipeline is compiled
        gpu.destroy_shader_module(vert_module);
        gpu.destroy_shader_module(frag_module);
        built
    }

    fn build<G: Gpu>(
        gpu: &G,
        vert_module: vk::ShaderModule,
        frag_module: vk::ShaderModule,
        desc: &PipelineDesc,
    ) -> Result<Self> {
        let render_pass = create_render_pass(gpu, desc.color_format, desc.depth_format)?;

        let set_layout = match create_frame_set_layout(gpu) {
            Ok(layout) => layout,
            Err(err) => {
                gpu.destroy_render_pass(render_pass);
                return Err(err);
            }
        };

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = match gpu.create_pipeline_layout(&layout_info) {
            Ok(layout) => layout,
            Err(result) => {
                gpu.destroy_descriptor_set_layout(set_layout);
                gpu.destroy_render_pass(render_pass);
                return Err(RenderError::creation("pipeline layout")(result));
            }
        };

        let pipeline = match create_pipeline(
            gpu,
            render_pass,
            layout,
            &desc.vertex_input,
            vert_module,
            frag_module,
        ) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                gpu.destroy_pipeline_layout(layout);
                gpu.destroy_descriptor_set_layout(set_layout);
                gpu.destroy_render_pass(render_pass);
                return Err(err);
            }
        };

        log::info!(
            "Graphics pipeline ready (color {:?}, depth {:?})",
            desc.color_format,
            desc.depth_format
        );

        Ok(Self {
            render_pass,
            set_layout,
            layout,
            pipeline,
            color_format: desc.color_format,
            clear_color: desc.clear_color,
            lifecycle: Lifecycle::Active,
        })
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    /// Record one render pass into `cmd` targeting `framebuffer`.
    ///
    /// `cmd` must already be reset. `draw` binds geometry and issues draws.
    pub fn record_command_buffer<G, F>(
        &self,
        gpu: &G,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        descriptor_set: vk::DescriptorSet,
        draw: F,
    ) -> Result<()>
    where
        G: Gpu,
        F: FnOnce(vk::CommandBuffer),
    {
        self.lifecycle.ensure_active("GraphicsPipeline")?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        gpu.begin_command_buffer(cmd, &begin_info)
            .map_err(RenderError::device("begin frame commands"))?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        gpu.cmd_begin_render_pass(cmd, &render_pass_info);
        gpu.cmd_bind_pipeline(cmd, self.pipeline);
        gpu.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        gpu.cmd_set_scissor(cmd, render_area);
        gpu.cmd_bind_descriptor_set(cmd, self.layout, descriptor_set);
        draw(cmd);
        gpu.cmd_end_render_pass(cmd);

        gpu.end_command_buffer(cmd)
            .map_err(RenderError::device("end frame commands"))
    }

    /// Destroys pipeline, layouts, then the render pass.
    /// Every framebuffer built against the render pass must be gone already.
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.lifecycle.ensure_active("GraphicsPipeline")?;
        gpu.destroy_pipeline(self.pipeline);
        gpu.destroy_pipeline_layout(self.layout);
        gpu.destroy_descriptor_set_layout(self.set_layout);
        gpu.destroy_render_pass(self.render_pass);
        self.lifecycle.tear_down();
        Ok(())
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.lifecycle.check_dropped("GraphicsPipeline");
    }
}
