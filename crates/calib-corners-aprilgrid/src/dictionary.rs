//! Tag family metadata and packed codes.

/// A fixed AprilTag family.
#[derive(Clone, Copy, Debug)]
pub struct Dictionary {
    /// Family name as written in target descriptors.
    pub name: &'static str,
    /// Number of data bits per side.
    pub marker_size: usize,
    /// Maximum error-correcting Hamming distance supported by the family.
    pub max_correction_bits: u8,
    /// One `u64` per tag id, encoding the inner `marker_size × marker_size` bits.
    ///
    /// Bits are stored in row-major order (`idx = y * N + x`) with **white = 1**.
    pub codes: &'static [u64],
}

impl Dictionary {
    /// Total number of inner bits per marker.
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }
}

#[rustfmt::skip]
const TAG16H5_CODES: [u64; 30] = [
    0xe960, 0x91ce, 0x1d29, 0x707c, 0x2d9e, 0xbd7b, 0xe721, 0xb3d1,
    0xd773, 0x34e9, 0x0d62, 0x0f7c, 0x3086, 0xf898, 0x5a0b, 0xf302,
    0x60aa, 0xe68c, 0x3b40, 0x98f4, 0x6bd8, 0xf4d4, 0xbe13, 0x54e2,
    0x63b7, 0xa5fc, 0x7be3, 0x7618, 0xb825, 0xbbaa,
];

/// AprilTag 16h5: 4x4 data bits, minimum Hamming distance 5.
pub const TAG16H5: Dictionary = Dictionary {
    name: "16h5",
    marker_size: 4,
    max_correction_bits: 2,
    codes: &TAG16H5_CODES,
};

/// Look up a family by the name used in target descriptors.
///
/// Accepts the bare name as well as the `tag`/`t` prefixed spellings.
pub fn family_dictionary(name: &str) -> Option<Dictionary> {
    let lower = name.trim().to_ascii_lowercase();
    let bare = lower
        .strip_prefix("tag")
        .or_else(|| lower.strip_prefix('t'))
        .unwrap_or(&lower);
    match bare {
        "16h5" => Some(TAG16H5),
        _ => None,
    }
}
