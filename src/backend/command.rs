// Command pools and command buffer recording
//
// Draw commands are pre-recorded once per swapchain image and resubmitted
// every frame. Transfers go through `UploadContext::one_time_submit`.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::pipeline::{full_scissor, full_viewport, TrianglePipeline};
use super::VulkanDevice;

pub fn create_command_pool(
    device: &VulkanDevice,
    queue_family: u32,
    flags: vk::CommandPoolCreateFlags,
) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family)
        .flags(flags);

    unsafe { device.device.create_command_pool(&pool_info, None) }
        .context("Failed to create command pool")
}

pub fn allocate_command_buffers(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffers")
}

/// Everything a pre-recorded triangle draw needs
pub struct TriangleDraw<'a> {
    pub pipeline: &'a TrianglePipeline,
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub clear_color: [f32; 4],
}

/// Record one draw per command buffer, command buffer `i` targeting framebuffer `i`
pub fn record_triangle_commands(
    device: &ash::Device,
    command_buffers: &[vk::CommandBuffer],
    draw: &TriangleDraw<'_>,
) -> Result<()> {
    if command_buffers.len() != draw.framebuffers.len() {
        anyhow::bail!(
            "{} command buffers for {} framebuffers",
            command_buffers.len(),
            draw.framebuffers.len()
        );
    }

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: draw.clear_color,
        },
    }];

    for (&cmd, &framebuffer) in command_buffers.iter().zip(draw.framebuffers) {
        let begin_info = vk::CommandBufferBeginInfo::default();

        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(draw.pipeline.render_pass)
            .framebuffer(framebuffer)
            .render_area(full_scissor(draw.extent))
            .clear_values(&clear_values);

        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin recording command buffer")?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[full_viewport(draw.extent)]);
            device.cmd_set_scissor(cmd, 0, &[full_scissor(draw.extent)]);
            device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
            device.cmd_draw(cmd, draw.vertex_count, 1, 0, 0);
            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .context("Failed to record command buffer")?;
        }
    }

    Ok(())
}

/// Transient pool + queue for short blocking transfers
pub struct UploadContext {
    pool: vk::CommandPool,
    queue: vk::Queue,
    device: Arc<VulkanDevice>,
}

impl UploadContext {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool = create_command_pool(
            &device,
            device.graphics_family(),
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        Ok(Self {
            pool,
            queue: device.graphics_queue,
            device,
        })
    }

    /// Record with `record`, submit, and block until the queue is idle
    pub fn one_time_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.device.device;
        let command_buffer = allocate_command_buffers(&self.device, self.pool, 1)?
            .into_iter()
            .next()
            .context("Driver returned no command buffer")?;

        let result = self.submit_and_wait(command_buffer, record);

        unsafe {
            device.free_command_buffers(self.pool, &[command_buffer]);
        }

        result
    }

    fn submit_and_wait<F>(&self, command_buffer: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.device.device;
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .context("Failed to begin transfer command buffer")?;

            record(device, command_buffer);

            device
                .end_command_buffer(command_buffer)
                .context("Failed to record transfer command buffer")?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

            device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())
                .context("Failed to submit transfer command buffer")?;
            device
                .queue_wait_idle(self.queue)
                .context("Failed to wait for transfer queue")?;
        }

        Ok(())
    }
}

impl Drop for UploadContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
