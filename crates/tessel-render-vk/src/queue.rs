// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

/// Sharing mode plus the unique, valid family list to hand to a buffer,
/// image or swapchain create call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSharing {
    mode: vk::SharingMode,
    families: Vec<u32>,
}

impl QueueSharing {
    /// Drops `QUEUE_FAMILY_IGNORED` and duplicates, keeping first-seen order.
    /// More than one family left means concurrent sharing.
    pub fn new(candidates: &[u32]) -> Self {
        let mut families = Vec::with_capacity(candidates.len());
        for &family in candidates {
            if family != vk::QUEUE_FAMILY_IGNORED && !families.contains(&family) {
                families.push(family);
            }
        }
        let mode = if families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        Self { mode, families }
    }

    pub fn mode(&self) -> vk::SharingMode {
        self.mode
    }

    pub fn families(&self) -> &[u32] {
        &self.families
    }

    /// Family list for the create info; exclusive resources pass none.
    pub fn create_info_families(&self) -> &[u32] {
        if self.mode == vk::SharingMode::CONCURRENT {
            &self.families
        } else {
            &[]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_family_never_survives() {
        let sharing = QueueSharing::new(&[0, vk::QUEUE_FAMILY_IGNORED]);
        assert_eq!(sharing.families(), &[0]);
        assert_eq!(sharing.mode(), vk::SharingMode::EXCLUSIVE);
        assert!(sharing.create_info_families().is_empty());

        let none = QueueSharing::new(&[vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED]);
        assert!(none.families().is_empty());
        assert_eq!(none.mode(), vk::SharingMode::EXCLUSIVE);
    }

    #[test]
    fn duplicates_collapse_to_exclusive() {
        let sharing = QueueSharing::new(&[2, 2, 2]);
        assert_eq!(sharing.families(), &[2]);
        assert_eq!(sharing.mode(), vk::SharingMode::EXCLUSIVE);
    }

    #[test]
    fn distinct_families_share_concurrently_in_order() {
        let sharing = QueueSharing::new(&[3, 0, 3, vk::QUEUE_FAMILY_IGNORED, 1]);
        assert_eq!(sharing.families(), &[3, 0, 1]);
        assert_eq!(sharing.mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(sharing.create_info_families(), &[3, 0, 1]);
    }
}
