// =============================================================================
// TRIANGLE RENDERER - every GPU object plus the per-frame loop
// =============================================================================
//
// FRAME FLOW:
// 1. Wait for the fence of the current frame slot
// 2. Acquire a swapchain image
// 3. Wait for any older frame still rendering to that image
// 4. Submit the image's pre-recorded command buffer
// 5. Present, then advance to the next frame slot

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use crate::backend::command::{self, TriangleDraw, UploadContext};
use crate::backend::pipeline::{self, TrianglePipeline};
use crate::backend::shader::TriangleShaders;
use crate::backend::swapchain::Acquired;
use crate::backend::sync::{self, FrameSync, FramesInFlight, SwapchainState};
use crate::backend::{Buffer, Instance, Surface, Swapchain, VulkanDevice};
use crate::config::Config;
use crate::triangle::TRIANGLE_VERTICES;

/// Owns all Vulkan resources.
///
/// Field order matters for Drop: the device must go before the surface,
/// and the instance (shared by both) goes last.
pub struct TriangleRenderer {
    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,
    shaders: TriangleShaders,
    state: SwapchainState,

    // ─────────────────────────────────────────────────────────────────────────
    // SYNCHRONIZATION
    // ─────────────────────────────────────────────────────────────────────────
    frame_sync: Vec<FrameSync>,
    frames: FramesInFlight,
    wait_stages: [vk::PipelineStageFlags; 1],

    // ─────────────────────────────────────────────────────────────────────────
    // COMMANDS
    // ─────────────────────────────────────────────────────────────────────────
    command_pool: vk::CommandPool,
    /// One command buffer per swapchain image, pre-recorded
    command_buffers: Vec<vk::CommandBuffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // PRESENTATION
    // ─────────────────────────────────────────────────────────────────────────
    framebuffers: Vec<vk::Framebuffer>,
    pipeline: Option<TrianglePipeline>,
    swapchain: Option<Swapchain>,

    vertex_buffer: Option<Buffer>,
    upload: Option<UploadContext>,

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN CORE
    // ─────────────────────────────────────────────────────────────────────────
    device: Arc<VulkanDevice>,
    surface: Surface,
}

impl TriangleRenderer {
    /// Initialize all Vulkan resources for `window`.
    ///
    /// create instance → surface → pick device → upload vertices →
    /// swapchain → pipeline → command buffers → sync objects
    pub fn new<W>(config: &Config, window: &W, width: u32, height: u32) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        log::info!("Initializing Vulkan...");

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();

        let instance = Arc::new(Instance::new(
            &config.window.title,
            display_handle,
            config.validation_enabled(),
            config.debug.list_extensions,
        )?);
        let surface = Surface::new(instance.clone(), window)?;
        let device = VulkanDevice::new(instance, &surface)?;

        let shaders = TriangleShaders::load(&config.paths.shader_dir)?;
        let frames_in_flight = config.frames_in_flight();

        // From here on Drop cleans up whatever was created
        let mut renderer = Self {
            clear_color: config.graphics.clear_color,
            present_mode: config.present_mode(),
            shaders,
            state: SwapchainState::new(width, height),
            frame_sync: Vec::new(),
            frames: FramesInFlight::new(frames_in_flight),
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            framebuffers: Vec::new(),
            pipeline: None,
            swapchain: None,
            vertex_buffer: None,
            upload: None,
            device,
            surface,
        };
        renderer.init_resources(frames_in_flight)?;

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    fn init_resources(&mut self, frames_in_flight: usize) -> Result<()> {
        let upload = UploadContext::new(self.device.clone())?;
        let vertex_buffer = Buffer::with_data(
            self.device.clone(),
            &upload,
            "triangle vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::GpuOnly,
            bytemuck::cast_slice(&TRIANGLE_VERTICES),
        )?;
        self.upload = Some(upload);
        self.vertex_buffer = Some(vertex_buffer);

        self.command_pool = command::create_command_pool(
            &self.device,
            self.device.graphics_family(),
            vk::CommandPoolCreateFlags::empty(),
        )?;

        // These don't need to be recreated on resize
        for _ in 0..frames_in_flight {
            self.frame_sync.push(FrameSync::new(&self.device)?);
        }

        self.create_swapchain_resources()
    }

    /// Create swapchain, framebuffers and command buffers.
    ///
    /// Called again whenever the swapchain has to be rebuilt.
    fn create_swapchain_resources(&mut self) -> Result<()> {
        // Don't create swapchain if window is minimized (size = 0)
        if !self.state.should_render() {
            return Ok(());
        }
        let vk::Extent2D { width, height } = self.state.extent();

        self.device.wait_idle()?;
        self.destroy_swapchain_resources();

        // The surface can only have one swapchain at a time
        let swapchain = Swapchain::new(
            self.device.clone(),
            &self.surface,
            self.present_mode,
            width,
            height,
        )?;

        // Render pass only depends on the format
        if self.pipeline.as_ref().map(|p| p.format) != Some(swapchain.format) {
            if let Some(old) = self.pipeline.take() {
                old.destroy(&self.device.device);
            }
            self.pipeline = Some(TrianglePipeline::new(
                &self.device,
                swapchain.format,
                &self.shaders,
            )?);
        }
        let pipeline = self.pipeline.as_ref().context("Pipeline not initialized")?;

        self.framebuffers = pipeline::create_framebuffers(
            &self.device,
            &swapchain.image_views,
            pipeline.render_pass,
            swapchain.extent,
        )?;

        self.command_buffers = command::allocate_command_buffers(
            &self.device,
            self.command_pool,
            swapchain.image_count() as u32,
        )?;

        let vertex_buffer = self
            .vertex_buffer
            .as_ref()
            .context("Vertex buffer not initialized")?;
        command::record_triangle_commands(
            &self.device.device,
            &self.command_buffers,
            &TriangleDraw {
                pipeline,
                framebuffers: &self.framebuffers,
                extent: swapchain.extent,
                vertex_buffer: vertex_buffer.buffer,
                vertex_count: TRIANGLE_VERTICES.len() as u32,
                clear_color: self.clear_color,
            },
        )?;

        log::info!("Created {} pre-recorded command buffers", self.command_buffers.len());

        let render_finished = sync::create_semaphores(&self.device, swapchain.image_count())?;
        let stale = self.frames.reset_images(render_finished);
        sync::destroy_semaphores(&self.device.device, &stale);

        self.swapchain = Some(swapchain);
        self.state.rebuilt();

        Ok(())
    }

    /// Destroy everything tied to the current swapchain (device must be idle)
    fn destroy_swapchain_resources(&mut self) {
        if !self.command_buffers.is_empty() {
            unsafe {
                self.device
                    .device
                    .free_command_buffers(self.command_pool, &self.command_buffers);
            }
            self.command_buffers.clear();
        }

        pipeline::destroy_framebuffers(&self.device, &self.framebuffers);
        self.framebuffers.clear();

        let render_finished = self.frames.reset_images(Vec::new());
        sync::destroy_semaphores(&self.device.device, &render_finished);

        self.swapchain = None;
    }

    /// Record the new window size; the swapchain is rebuilt before the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        self.state.resize(width, height);
    }

    /// Render a single frame.
    ///
    /// Returns `false` when nothing was presented (minimized or the swapchain
    /// had to be rebuilt first).
    pub fn render_frame(&mut self) -> Result<bool> {
        if !self.state.should_render() {
            return Ok(false);
        }

        if self.state.needs_rebuild() || self.swapchain.is_none() {
            self.create_swapchain_resources()?;
        }

        let device = &self.device;
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let frame = self
            .frame_sync
            .get(self.frames.current())
            .context("Frame sync not initialized")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until the GPU is done with this frame slot
        // ─────────────────────────────────────────────────────────────────────
        unsafe {
            device
                .device
                .wait_for_fences(&[frame.in_flight_fence], true, u64::MAX)
        }
        .context("Failed to wait for in-flight fence")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let image_index = match swapchain.acquire_next_image(frame.image_available)? {
            Acquired::Image { index, suboptimal } => {
                // Still usable, rebuild after this frame
                if suboptimal {
                    self.state.mark_stale();
                }
                index
            }
            Acquired::OutOfDate => {
                self.state.mark_stale();
                return Ok(false);
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Wait if an older frame is still rendering to this image
        // ─────────────────────────────────────────────────────────────────────
        if let Some(previous) = self
            .frames
            .claim_image(image_index as usize, frame.in_flight_fence)
        {
            unsafe { device.device.wait_for_fences(&[previous], true, u64::MAX) }
                .context("Failed to wait for image fence")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Submit command buffer
        // ─────────────────────────────────────────────────────────────────────
        let cmd = *self
            .command_buffers
            .get(image_index as usize)
            .context("No command buffer for swapchain image")?;

        let render_finished = self
            .frames
            .render_finished(image_index as usize)
            .context("No render semaphore for swapchain image")?;

        let wait_semaphores = [frame.image_available];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .reset_fences(&[frame.in_flight_fence])
                .context("Failed to reset in-flight fence")?;
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info], frame.in_flight_fence)
                .context("Failed to submit draw command buffer")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Present the image
        // ─────────────────────────────────────────────────────────────────────
        if swapchain.present(device.present_queue, image_index, &signal_semaphores)? {
            self.state.mark_stale();
        }

        self.frames.advance();

        Ok(true)
    }

    /// Wait for device to finish all submitted work
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for TriangleRenderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        let _ = self.device.wait_idle();

        // Destroy in reverse order of creation
        for frame in &self.frame_sync {
            frame.destroy(&self.device.device);
        }

        self.destroy_swapchain_resources();

        if let Some(pipeline) = self.pipeline.take() {
            pipeline.destroy(&self.device.device);
        }

        unsafe {
            // Also frees any remaining command buffers
            self.device.device.destroy_command_pool(self.command_pool, None);
        }

        self.vertex_buffer = None;
        self.upload = None;

        // Device, surface and instance drop with the remaining fields

        log::info!("Cleanup complete");
    }
}
