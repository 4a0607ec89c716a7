//! Translation of captured memory type indices to the replay device.

use ash::vk;
use tracing::{debug, warn};

/// Flags that matter when picking a substitute memory type.
const SCORED_FLAGS: [vk::MemoryPropertyFlags; 4] = [
    vk::MemoryPropertyFlags::DEVICE_LOCAL,
    vk::MemoryPropertyFlags::HOST_VISIBLE,
    vk::MemoryPropertyFlags::HOST_COHERENT,
    vk::MemoryPropertyFlags::HOST_CACHED,
];

/// How a reconciled index was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePath {
    /// The replay type at the captured index already has every captured flag.
    SameIndex,
    /// First replay type whose flags are a superset of the captured flags.
    Superset,
    /// Best partial match by shared flag count.
    Scored { score: u32 },
    /// Nothing matched; the captured index is returned unchanged.
    Fallback,
    /// Remapping is turned off in the configuration.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub index: u32,
    pub path: ReconcilePath,
}

/// Picks replay memory type indices for captured allocations.
/// A pure function of its inputs: same arguments, same answer.
#[derive(Debug, Clone)]
pub struct MemoryTypeReconciler {
    properties: vk::PhysicalDeviceMemoryProperties,
    enabled: bool,
}

impl MemoryTypeReconciler {
    pub fn new(properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            properties,
            enabled: true,
        }
    }

    /// A reconciler that hands every captured index back untouched.
    pub fn disabled(properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            properties,
            enabled: false,
        }
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.properties
    }

    pub fn type_flags(&self, index: u32) -> Option<vk::MemoryPropertyFlags> {
        if index < self.properties.memory_type_count {
            Some(self.properties.memory_types[index as usize].property_flags)
        } else {
            None
        }
    }

    /// Replay type index for a captured `(index, flags)` pair, considering
    /// every replay memory type.
    pub fn reconcile(&self, captured_index: u32, captured_flags: vk::MemoryPropertyFlags) -> Reconciliation {
        self.reconcile_with_requirements(captured_index, captured_flags, u32::MAX)
    }

    /// Like [`reconcile`](Self::reconcile), restricted to the types set in
    /// a resource's `memory_type_bits`.
    pub fn reconcile_with_requirements(
        &self,
        captured_index: u32,
        captured_flags: vk::MemoryPropertyFlags,
        type_bits: u32,
    ) -> Reconciliation {
        if !self.enabled {
            return Reconciliation {
                index: captured_index,
                path: ReconcilePath::Disabled,
            };
        }

        let allowed = |i: u32| i < 32 && type_bits & (1 << i) != 0;

        if allowed(captured_index) {
            if let Some(flags) = self.type_flags(captured_index) {
                if flags.contains(captured_flags) {
                    return Reconciliation {
                        index: captured_index,
                        path: ReconcilePath::SameIndex,
                    };
                }
            }
        }

        let count = self.properties.memory_type_count;
        for i in (0..count).filter(|&i| allowed(i)) {
            let flags = self.properties.memory_types[i as usize].property_flags;
            if flags.contains(captured_flags) {
                debug!(
                    "memory type {} ({:?}) remapped to {} ({:?})",
                    captured_index, captured_flags, i, flags
                );
                return Reconciliation {
                    index: i,
                    path: ReconcilePath::Superset,
                };
            }
        }

        let mut best: Option<(u32, u32)> = None;
        for i in (0..count).filter(|&i| allowed(i)) {
            let flags = self.properties.memory_types[i as usize].property_flags;
            let score = shared_flag_count(flags, captured_flags);
            // Strictly greater keeps the first of equal scores.
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        match best {
            Some((index, score)) => {
                warn!(
                    "no replay memory type has all of {:?}; using type {} (score {})",
                    captured_flags, index, score
                );
                Reconciliation {
                    index,
                    path: ReconcilePath::Scored { score },
                }
            }
            None => {
                warn!(
                    "no compatible replay memory type for captured type {} ({:?}); keeping the captured index",
                    captured_index, captured_flags
                );
                Reconciliation {
                    index: captured_index,
                    path: ReconcilePath::Fallback,
                }
            }
        }
    }
}

fn shared_flag_count(candidate: vk::MemoryPropertyFlags, target: vk::MemoryPropertyFlags) -> u32 {
    SCORED_FLAGS
        .iter()
        .filter(|f| candidate.contains(**f) && target.contains(**f))
        .count() as u32
}

/// First memory type allowed by `type_bits` that has every `required` flag.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..properties.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && properties.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}
