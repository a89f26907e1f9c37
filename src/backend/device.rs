// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (must present to our surface, prefer discrete GPU)
// - Graphics + present queue family discovery
// - Logical device + queue creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

use super::{Instance, Surface};

/// Device extensions every candidate GPU must support
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue families the renderer needs.
///
/// Graphics and present may resolve to the same family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics.into_iter().chain(self.present).collect();
        families.dedup();
        families
    }
}

/// Find graphics and present queue families.
///
/// `supports_present` is asked for each family index until a present-capable
/// one is found.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<QueueFamilyIndices>
where
    F: FnMut(u32) -> Result<bool>,
{
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }

        if indices.present.is_none() && supports_present(index)? {
            indices.present = Some(index);
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// Score device (prefer discrete GPU)
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        _ => 1,
    }
}

/// Extensions from `required` the device does not offer
pub fn missing_extensions<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|ext| !available.iter().any(|name| *name == *ext))
        .collect()
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Taken in Drop so its memory blocks are freed before the device goes away
    allocator: Mutex<Option<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: Arc<Instance>,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,
}

impl VulkanDevice {
    /// Pick a GPU able to render and present to `surface`, then create the
    /// logical device and allocator.
    pub fn new(instance: Arc<Instance>, surface: &Surface) -> Result<Arc<Self>> {
        let (physical_device, queue_families) = Self::pick_physical_device(&instance, surface)?;

        let properties = unsafe {
            instance.instance.get_physical_device_properties(physical_device)
        };
        log::info!(
            "Selected GPU: {}",
            properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, &queue_families)?;

        if queue_families.graphics != queue_families.present {
            log::info!(
                "Using separate queue families: graphics={:?}, present={:?}",
                queue_families.graphics,
                queue_families.present
            );
        }

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e).context("Failed to create memory allocator");
            }
        };

        Ok(Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            device,
            physical_device,
            instance,
            graphics_queue,
            present_queue,
            queue_families,
        }))
    }

    fn pick_physical_device(
        instance: &Instance,
        surface: &Surface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let Some(queue_families) = Self::check_device(instance, surface, device)? else {
                continue;
            };

            let props = unsafe { instance.instance.get_physical_device_properties(device) };
            let score = device_type_score(props.device_type);

            if score > best_score {
                best_score = score;
                best_device = Some((device, queue_families));
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    /// Queue families of `device` if it can drive our surface, `None` otherwise
    fn check_device(
        instance: &Instance,
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<Option<QueueFamilyIndices>> {
        let families = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(device)
        };
        let queue_families =
            find_queue_families(&families, |index| surface.supports_present(device, index))?;
        if !queue_families.is_complete() {
            return Ok(None);
        }

        let extensions = unsafe { instance.instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let extension_names: Vec<&CStr> = extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();
        let missing = missing_extensions(REQUIRED_DEVICE_EXTENSIONS, &extension_names);
        if !missing.is_empty() {
            log::debug!("Skipping GPU without {:?}", missing);
            return Ok(None);
        }

        // Swapchain support is only meaningful once the extension is known to exist
        if surface.formats(device)?.is_empty() || surface.present_modes(device)?.is_empty() {
            return Ok(None);
        }

        Ok(Some(queue_families))
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilyIndices,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let graphics_family = queue_families.graphics.context("No graphics queue family")?;
        let present_family = queue_families.present.context("No present queue family")?;

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions: Vec<_> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    pub fn graphics_family(&self) -> u32 {
        // Complete by construction
        self.queue_families.graphics.unwrap_or_default()
    }

    /// Run `f` with exclusive access to the memory allocator
    pub fn with_allocator<T>(&self, f: impl FnOnce(&mut Allocator) -> Result<T>) -> Result<T> {
        let mut guard = self.allocator.lock();
        let allocator = guard.as_mut().context("Allocator already released")?;
        f(allocator)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Allocator first: it frees its memory blocks through the device
        drop(self.allocator.lock().take());

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_shared_graphics_and_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn test_separate_present_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = find_queue_families(&families, |index| Ok(index == 2)).unwrap();

        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
        assert_eq!(indices.unique(), vec![1, 2]);
    }

    #[test]
    fn test_first_matching_family_wins() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut asked = Vec::new();
        let indices = find_queue_families(&families, |index| {
            asked.push(index);
            Ok(true)
        })
        .unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        // Search stops once both families are known
        assert_eq!(asked, vec![0]);
    }

    #[test]
    fn test_incomplete_without_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| Ok(false)).unwrap();

        assert!(!indices.is_complete());
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn test_present_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = find_queue_families(&families, |_| anyhow::bail!("surface lost"));
        assert!(result.is_err());
    }

    #[test]
    fn test_discrete_gpu_preferred() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
        assert!(device_type_score(vk::PhysicalDeviceType::OTHER) > 0);
    }

    #[test]
    fn test_swapchain_extension_required() {
        let available = [c"VK_KHR_maintenance1"];
        assert_eq!(
            missing_extensions(REQUIRED_DEVICE_EXTENSIONS, &available),
            vec![ash::khr::swapchain::NAME]
        );

        let available = [c"VK_KHR_maintenance1", c"VK_KHR_swapchain"];
        assert!(missing_extensions(REQUIRED_DEVICE_EXTENSIONS, &available).is_empty());
    }
}
