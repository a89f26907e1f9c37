// GPU buffers and the upload helper
//
// Memory comes from gpu-allocator. Data lands in the buffer directly when the
// allocation is host-visible; otherwise it goes through a staging buffer and a
// one-shot copy on the graphics queue.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::command::UploadContext;
use super::VulkanDevice;

/// How bytes reach a freshly allocated buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPath {
    /// Host-visible memory, copy through the mapping
    Direct,
    /// Device-local memory, copy through a staging buffer
    Staged,
}

impl UploadPath {
    pub fn for_allocation(host_visible: bool) -> Self {
        if host_visible {
            UploadPath::Direct
        } else {
            UploadPath::Staged
        }
    }
}

/// Usage flags for a buffer in `location`.
///
/// GPU-only buffers can only be filled by a transfer, so they are always
/// valid copy destinations.
pub fn buffer_usage(usage: vk::BufferUsageFlags, location: MemoryLocation) -> vk::BufferUsageFlags {
    if location == MemoryLocation::GpuOnly {
        usage | vk::BufferUsageFlags::TRANSFER_DST
    } else {
        usage
    }
}

/// A `vk::Buffer` bound to allocator-managed memory
pub struct Buffer {
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        if size == 0 {
            anyhow::bail!("Cannot create empty buffer '{}'", name);
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(buffer_usage(usage, location))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.with_allocator(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .context("Failed to allocate buffer memory")
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            let _ = device.with_allocator(|allocator| Ok(allocator.free(allocation)?));
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e).context("Failed to bind buffer memory");
        }

        log::debug!("Created buffer '{}' ({} bytes, {:?})", name, size, location);

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            device,
        })
    }

    /// Create a buffer in `location` and fill it with `data`
    pub fn with_data(
        device: Arc<VulkanDevice>,
        upload: &UploadContext,
        name: &str,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        data: &[u8],
    ) -> Result<Self> {
        let size = data.len() as vk::DeviceSize;
        let mut buffer = Self::new(device.clone(), name, size, usage, location)?;

        match UploadPath::for_allocation(buffer.is_host_visible()) {
            UploadPath::Direct => buffer.write(data)?,
            UploadPath::Staged => {
                let mut staging = Self::new(
                    device,
                    "staging",
                    size,
                    vk::BufferUsageFlags::TRANSFER_SRC,
                    MemoryLocation::CpuToGpu,
                )?;
                staging.write(data)?;

                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                };
                upload.one_time_submit(|device, cmd| unsafe {
                    device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
                })?;
                log::debug!("Uploaded {} bytes to '{}' via staging buffer", size, name);
            }
        }

        Ok(buffer)
    }

    /// Whether the allocation is mapped into host memory
    pub fn is_host_visible(&self) -> bool {
        self.allocation
            .as_ref()
            .is_some_and(|allocation| allocation.mapped_ptr().is_some())
    }

    /// Copy `data` to the start of a host-visible buffer
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;

        let target = mapped
            .get_mut(..data.len())
            .context("Data does not fit in buffer")?;
        target.copy_from_slice(data);

        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }

        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self
                .device
                .with_allocator(|allocator| Ok(allocator.free(allocation)?))
            {
                log::warn!("Failed to free buffer memory: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_visible_memory_written_directly() {
        assert_eq!(UploadPath::for_allocation(true), UploadPath::Direct);
    }

    #[test]
    fn test_device_local_memory_needs_staging() {
        assert_eq!(UploadPath::for_allocation(false), UploadPath::Staged);
    }

    #[test]
    fn test_gpu_only_buffers_accept_transfers() {
        let usage = buffer_usage(vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::GpuOnly);
        assert!(usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn test_host_buffers_keep_requested_usage() {
        let usage = buffer_usage(vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu);
        assert_eq!(usage, vk::BufferUsageFlags::TRANSFER_SRC);
    }
}
