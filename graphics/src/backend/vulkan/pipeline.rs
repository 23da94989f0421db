//! Graphics pipeline creation for dynamic rendering.

use ash::vk;

use crate::backend::{GpuPipelineLayout, GpuShaderModule, PipelineDescriptor};
use crate::error::GraphicsError;
use crate::gpu_failure;
use crate::types::VertexLayout;

use super::conversion::{
    convert_blend_mode, convert_cull_mode, convert_texture_format, convert_topology,
    convert_vertex_format,
};

fn raw_module(module: &GpuShaderModule) -> Result<vk::ShaderModule, GraphicsError> {
    match module {
        GpuShaderModule::Vulkan { module, .. } => Ok(*module),
        GpuShaderModule::Dummy(_) => Err(GraphicsError::InvalidParameter(
            "Expected Vulkan shader module".to_string(),
        )),
    }
}

pub fn raw_layout(layout: &GpuPipelineLayout) -> Option<vk::PipelineLayout> {
    match layout {
        GpuPipelineLayout::Vulkan { layout, .. } => Some(*layout),
        GpuPipelineLayout::Dummy(_) => None,
    }
}

/// Vertex attributes packed in location order inside one binding.
fn vertex_attributes(layout: VertexLayout) -> Vec<vk::VertexInputAttributeDescription> {
    let mut offset = 0;
    layout
        .attributes()
        .iter()
        .enumerate()
        .map(|(location, format)| {
            let attribute = vk::VertexInputAttributeDescription::default()
                .location(location as u32)
                .binding(0)
                .format(convert_vertex_format(*format))
                .offset(offset);
            offset += format.size();
            attribute
        })
        .collect()
}

/// Build a graphics pipeline. Viewport, scissor and depth bias are dynamic.
pub fn build_graphics_pipeline(
    device: &ash::Device,
    desc: &PipelineDescriptor<'_>,
) -> Result<vk::Pipeline, GraphicsError> {
    let layout = raw_layout(desc.layout).ok_or_else(|| {
        GraphicsError::InvalidParameter("Expected Vulkan pipeline layout".to_string())
    })?;

    let mut shader_stages = vec![
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(raw_module(desc.vertex)?)
            .name(c"main"),
    ];
    if let Some(pixel) = desc.pixel {
        shader_stages.push(
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(raw_module(pixel)?)
                .name(c"main"),
        );
    }

    let attribute_descriptions = vertex_attributes(desc.vertex_layout);
    let binding_descriptions: Vec<vk::VertexInputBindingDescription> =
        if attribute_descriptions.is_empty() {
            Vec::new()
        } else {
            vec![
                vk::VertexInputBindingDescription::default()
                    .binding(0)
                    .stride(desc.vertex_stride.max(desc.vertex_layout.packed_stride()))
                    .input_rate(vk::VertexInputRate::VERTEX),
            ]
        };

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(desc.topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(convert_cull_mode(desc.cull_mode))
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(desc.depth_bias);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let has_depth = desc.depth_format.is_some();
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(has_depth && desc.depth_test)
        .depth_write_enable(has_depth && desc.depth_write)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
        .color_formats
        .iter()
        .map(|_| convert_blend_mode(desc.blend))
        .collect();

    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let mut dynamic_states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    if desc.depth_bias {
        dynamic_states.push(vk::DynamicState::DEPTH_BIAS);
    }
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_attachment_formats: Vec<vk::Format> = desc
        .color_formats
        .iter()
        .map(|f| convert_texture_format(*f))
        .collect();
    let depth_attachment_format = desc
        .depth_format
        .map(convert_texture_format)
        .unwrap_or(vk::Format::UNDEFINED);
    let stencil_attachment_format = desc
        .depth_format
        .filter(|f| f.has_stencil())
        .map(convert_texture_format)
        .unwrap_or(vk::Format::UNDEFINED);

    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_attachment_formats)
        .depth_attachment_format(depth_attachment_format)
        .stencil_attachment_format(stencil_attachment_format);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    // SAFETY: Every state struct referenced by pipeline_info is alive here.
    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| {
        gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
            "Failed to create graphics pipeline {}: {:?}",
            desc.label, e
        )))
    })?;

    pipelines.into_iter().next().ok_or_else(|| {
        gpu_failure!(GraphicsError::ResourceCreationFailed(
            "Driver returned no pipeline".to_string()
        ))
    })
}
