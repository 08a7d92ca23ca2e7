use ash::vk;
use smallvec::SmallVec;

/// Graphics and present queue family indices discovered for one physical device
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scans the families in order. Both roles keep being overwritten until each one has been
    /// seen once, so a family that can do both wins when it is reached first.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(i);
            }
            if supports_present(i) {
                indices.present = Some(i);
            }
            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Returns `(graphics, present)` once both are known
    pub fn pair(&self) -> Option<(u32, u32)> {
        Some((self.graphics?, self.present?))
    }

    /// Distinct family indices, graphics first. One entry when both roles share a family.
    pub fn unique(&self) -> SmallVec<[u32; 2]> {
        let mut families = SmallVec::new();
        for index in [self.graphics, self.present].into_iter().flatten() {
            if !families.contains(&index) {
                families.push(index);
            }
        }
        families
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub family: u32,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(family: u32, handle: vk::Queue) -> Self {
        Self { family, handle }
    }
}
