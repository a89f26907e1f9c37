// Window surface - connection between Vulkan and the OS window

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use super::Instance;

/// Owns a `vk::SurfaceKHR` and destroys it on drop.
///
/// Holds the instance so it cannot be destroyed first.
pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
    _instance: Arc<Instance>,
}

impl Surface {
    pub fn new<W>(instance: Arc<Instance>, window: &W) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .context("Failed to create window surface")?;

        let loader = ash::khr::surface::Instance::new(&instance.entry, &instance.instance);

        Ok(Self {
            surface,
            loader,
            _instance: instance,
        })
    }

    /// Whether `queue_family` on `physical_device` can present to this surface
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family: u32) -> Result<bool> {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.surface,
            )
        }
        .context("Failed to query surface support")
    }

    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .context("Failed to query surface capabilities")
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .context("Failed to query surface formats")
    }

    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .context("Failed to query surface present modes")
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
        log::debug!("Vulkan surface destroyed");
    }
}
