// Memory type selection
//
// First fit: the lowest index allowed by the resource's type mask whose flags
// cover the request. No size or heap balancing.

use ash::vk;

use crate::error::GpuError;

/// Find a suitable memory type index
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, GpuError> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);

    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            (type_bits >> i) & 1 == 1 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::NoCompatibleMemoryType {
            type_bits,
            required,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    fn properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        props
    }

    fn typical() -> vk::PhysicalDeviceMemoryProperties {
        properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            HOST,
            HOST | vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ])
    }

    #[test]
    fn returns_first_index_that_is_allowed_and_covers_flags() {
        let props = typical();
        assert_eq!(find_memory_type(&props, 0b1111, HOST).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn type_mask_excludes_otherwise_matching_types() {
        let props = typical();
        assert_eq!(find_memory_type(&props, 0b1000, HOST).unwrap(), 3);
        assert_eq!(
            find_memory_type(&props, 0b1110, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            3
        );
    }

    #[test]
    fn no_match_is_an_error() {
        let props = typical();
        let err = find_memory_type(&props, 0b0011, HOST).unwrap_err();
        assert!(matches!(err, GpuError::NoCompatibleMemoryType { type_bits: 0b0011, .. }));
    }

    #[test]
    fn bits_beyond_type_count_are_ignored() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty()).is_err());
    }

    #[test]
    fn result_always_satisfies_mask_and_superset() {
        let props = typical();
        let requests = [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
            HOST | vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        ];
        for type_bits in 0u32..16 {
            for &required in &requests {
                match find_memory_type(&props, type_bits, required) {
                    Ok(i) => {
                        assert_eq!((type_bits >> i) & 1, 1);
                        assert!(props.memory_types[i as usize].property_flags.contains(required));
                        // nothing lower would also have matched
                        for lower in 0..i {
                            let ok = (type_bits >> lower) & 1 == 1
                                && props.memory_types[lower as usize].property_flags.contains(required);
                            assert!(!ok);
                        }
                    }
                    Err(_) => {
                        let any = (0..4).any(|i| {
                            (type_bits >> i) & 1 == 1
                                && props.memory_types[i].property_flags.contains(required)
                        });
                        assert!(!any, "bits {type_bits:#b} flags {required:?}");
                    }
                }
            }
        }
    }
}
