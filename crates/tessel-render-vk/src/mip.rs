// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

/// `floor(log2(max(width, height))) + 1`; a 0-sized axis counts as 1.
pub fn full_chain_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Number of levels actually created for a request. Clamped to the full
/// chain, never below 1, and 1 when the format cannot be blitted linearly.
pub fn resolve_mip_levels(requested: u32, width: u32, height: u32, linear_blit: bool) -> u32 {
    if !linear_blit {
        return 1;
    }
    requested.clamp(1, full_chain_levels(width, height))
}

/// An explicit level count above the full chain. `u32::MAX` means "all of
/// them" and is never an over-request.
pub(crate) fn exceeds_full_chain(requested: u32, width: u32, height: u32) -> bool {
    requested != u32::MAX && requested > full_chain_levels(width, height)
}

/// Extent of `level` below a base extent: floor halving, at least 1 per axis.
pub fn mip_extent(base: vk::Extent2D, level: u32) -> vk::Extent2D {
    let shrink = |v: u32| v.checked_shr(level).unwrap_or(0).max(1);
    vk::Extent2D {
        width: shrink(base.width),
        height: shrink(base.height),
    }
}

/// Far corner of a level, for blit regions.
pub(crate) fn mip_corner(base: vk::Extent2D, level: u32) -> vk::Offset3D {
    let e = mip_extent(base, level);
    vk::Offset3D {
        x: e.width as i32,
        y: e.height as i32,
        z: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_request_on_512x256_yields_ten_levels() {
        assert_eq!(full_chain_levels(512, 256), 10);
        assert_eq!(resolve_mip_levels(u32::MAX, 512, 256, true), 10);
        assert_eq!(resolve_mip_levels(i32::MAX as u32, 512, 256, true), 10);
    }

    #[test]
    fn single_level_request_stays_single() {
        assert_eq!(resolve_mip_levels(1, 512, 256, true), 1);
        assert_eq!(resolve_mip_levels(0, 512, 256, true), 1);
    }

    #[test]
    fn no_linear_blit_degrades_to_one_level() {
        assert_eq!(resolve_mip_levels(u32::MAX, 512, 256, false), 1);
        assert_eq!(resolve_mip_levels(4, 512, 256, false), 1);
    }

    #[test]
    fn only_explicit_over_requests_are_flagged() {
        assert!(exceeds_full_chain(11, 512, 256));
        assert!(exceeds_full_chain(u32::MAX - 1, 512, 256));
        assert!(!exceeds_full_chain(10, 512, 256));
        assert!(!exceeds_full_chain(u32::MAX, 512, 256));
        assert!(!exceeds_full_chain(1, 1, 1));
        assert_eq!(resolve_mip_levels(11, 512, 256, true), 10);
    }

    #[test]
    fn chain_length_for_odd_sizes() {
        assert_eq!(full_chain_levels(1, 1), 1);
        assert_eq!(full_chain_levels(0, 0), 1);
        assert_eq!(full_chain_levels(3, 1), 2);
        assert_eq!(full_chain_levels(1000, 7), 10);
        assert_eq!(full_chain_levels(1024, 1024), 11);
    }

    #[test]
    fn extents_halve_with_floor_and_stop_at_one() {
        let base = vk::Extent2D {
            width: 512,
            height: 5,
        };
        let dims: Vec<(u32, u32)> = (0..10)
            .map(|l| mip_extent(base, l))
            .map(|e| (e.width, e.height))
            .collect();
        assert_eq!(dims[0], (512, 5));
        assert_eq!(dims[1], (256, 2));
        assert_eq!(dims[2], (128, 1));
        assert_eq!(dims[3], (64, 1));
        assert_eq!(dims[9], (1, 1));
        assert_eq!(mip_extent(base, 40).width, 1);
    }
}
