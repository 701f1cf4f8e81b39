//! Physical device (GPU) selection.
//!
//! The selection process:
//! 1. Enumerate all adapters
//! 2. Keep those with graphics and present queue families and Vulkan 1.3
//! 3. Honor the adapter preference: hardware adapters normally, a software
//!    (CPU) adapter when one is forced
//! 4. Pick the highest score (discrete GPUs first)

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Which kind of adapter to select.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AdapterPreference {
    /// Any hardware adapter; software rasterizers are skipped.
    #[default]
    Hardware,
    /// A software (CPU) rasterizer only.
    Software,
}

impl AdapterPreference {
    /// Whether a device of this type may be selected.
    pub fn accepts(self, device_type: vk::PhysicalDeviceType) -> bool {
        let is_cpu = device_type == vk::PhysicalDeviceType::CPU;
        match self {
            AdapterPreference::Hardware => !is_cpu,
            AdapterPreference::Software => is_cpu,
        }
    }
}

/// Queue family indices for different queue types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Index of the queue family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// Index of the queue family that supports presentation to a surface.
    pub present_family: Option<u32>,
    /// Index of the queue family used for compute; a dedicated family when
    /// the device has one, otherwise the graphics family.
    pub compute_family: Option<u32>,
    /// Number of queues in the graphics family.
    pub graphics_queue_count: u32,
}

impl QueueFamilyIndices {
    /// Checks if the minimum required queue families are available.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// True when compute work goes to a different family than graphics.
    pub fn has_dedicated_compute(&self) -> bool {
        self.compute_family.is_some() && self.compute_family != self.graphics_family
    }

    /// Queue index within its family for the compute queue. Shares the
    /// graphics family's second queue when there is one.
    pub fn compute_queue_index(&self) -> u32 {
        if !self.has_dedicated_compute() && self.graphics_queue_count > 1 {
            1
        } else {
            0
        }
    }

    /// Returns the unique queue family indices as a vector.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);

        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        if let Some(compute) = self.compute_family
            && !families.contains(&compute)
        {
            families.push(compute);
        }

        families
    }
}

/// An adapter that passed the suitability checks.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("unnamed adapter")
    }

    /// Total size of the device-local heaps in bytes.
    pub fn device_local_memory(&self) -> u64 {
        let heaps = &self.memory_properties.memory_heaps
            [..self.memory_properties.memory_heap_count as usize];
        heaps
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.properties.device_type)
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Pick the best adapter matching `preference` that can present to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no adapter matches.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    preference: AdapterPreference,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} adapter(s), selecting {:?}", devices.len(), preference);

    let selected = devices
        .into_iter()
        .filter_map(|device| inspect(instance, device, surface, surface_loader, preference))
        .map(|info| {
            let score = rate_device(&info);
            debug!("Adapter '{}' scored {}", info.device_name(), score);
            (info, score)
        })
        .max_by_key(|(_, score)| *score);

    match selected {
        Some((info, score)) => {
            info!(
                "Selected adapter '{}' ({:?}, score {})",
                info.device_name(),
                info.properties.device_type,
                score
            );
            Ok(info)
        }
        None => {
            warn!("No adapter satisfies {:?} with graphics, present and Vulkan 1.3", preference);
            Err(RhiError::NoSuitableGpu)
        }
    }
}

/// Adapters older than this lack timeline semaphores or dynamic rendering.
const MIN_API_VERSION: u32 = vk::API_VERSION_1_3;

fn inspect(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    preference: AdapterPreference,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .map(CStr::to_string_lossy)
        .unwrap_or_default();

    if !preference.accepts(properties.device_type) {
        debug!("Skipping '{}': {:?} not wanted", name, properties.device_type);
        return None;
    }
    if properties.api_version < MIN_API_VERSION {
        debug!(
            "Skipping '{}': Vulkan {}.{}",
            name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        );
        return None;
    }

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!("Skipping '{}': {:?}", name, queue_families);
        return None;
    }

    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();
    let mut dedicated_compute_family: Option<u32> = None;

    for (i, family) in queue_families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_compute = family.queue_flags.contains(vk::QueueFlags::COMPUTE);

        if has_graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
            indices.graphics_queue_count = family.queue_count;
        }

        if has_compute && !has_graphics && dedicated_compute_family.is_none() {
            dedicated_compute_family = Some(i);
        }

        if indices.present_family.is_none() {
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, i, surface)
                    .unwrap_or(false)
            };

            if present_support {
                indices.present_family = Some(i);
            }
        }
    }

    // Graphics families always support compute.
    indices.compute_family = dedicated_compute_family.or(indices.graphics_family);

    indices
}

/// Higher is better: device type dominates, then image limits and VRAM.
fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    score += info.properties.limits.max_image_dimension2_d;

    let vram_mb = (info.device_local_memory() / (1024 * 1024)) as u32;
    score += vram_mb.min(16000);

    if info.queue_families.has_dedicated_compute() {
        score += 100;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with(device_type: vk::PhysicalDeviceType, families: QueueFamilyIndices) -> PhysicalDeviceInfo {
        let properties = vk::PhysicalDeviceProperties {
            device_type,
            ..Default::default()
        };
        PhysicalDeviceInfo {
            device: vk::PhysicalDevice::null(),
            properties,
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            queue_families: families,
        }
    }

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(indices.present_family.is_none());
        assert!(indices.compute_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_queue_family_indices_incomplete() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            ..Default::default()
        };
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_unique_families_with_duplicates() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
            compute_family: Some(2),
            graphics_queue_count: 1,
        };
        assert_eq!(indices.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_compute_queue_index() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
            compute_family: Some(0),
            graphics_queue_count: 16,
        };
        assert!(!shared.has_dedicated_compute());
        assert_eq!(shared.compute_queue_index(), 1);

        let single = QueueFamilyIndices {
            graphics_queue_count: 1,
            ..shared
        };
        assert_eq!(single.compute_queue_index(), 0);

        let dedicated = QueueFamilyIndices {
            compute_family: Some(2),
            ..shared
        };
        assert!(dedicated.has_dedicated_compute());
        assert_eq!(dedicated.compute_queue_index(), 0);
    }

    #[test]
    fn test_adapter_preference() {
        let hw = AdapterPreference::Hardware;
        assert!(hw.accepts(vk::PhysicalDeviceType::DISCRETE_GPU));
        assert!(hw.accepts(vk::PhysicalDeviceType::INTEGRATED_GPU));
        assert!(!hw.accepts(vk::PhysicalDeviceType::CPU));

        let sw = AdapterPreference::Software;
        assert!(sw.accepts(vk::PhysicalDeviceType::CPU));
        assert!(!sw.accepts(vk::PhysicalDeviceType::DISCRETE_GPU));
    }

    #[test]
    fn test_rate_device_prefers_discrete() {
        let families = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
            compute_family: Some(0),
            graphics_queue_count: 1,
        };
        let discrete = rate_device(&info_with(vk::PhysicalDeviceType::DISCRETE_GPU, families));
        let integrated = rate_device(&info_with(vk::PhysicalDeviceType::INTEGRATED_GPU, families));
        let cpu = rate_device(&info_with(vk::PhysicalDeviceType::CPU, families));
        assert!(discrete > integrated);
        assert!(integrated > cpu);
    }
}
