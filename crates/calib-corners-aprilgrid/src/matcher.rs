//! Dictionary matching and rotation helpers.

use crate::Dictionary;

/// A dictionary match for an observed tag code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Tag id in the dictionary.
    pub id: u32,
    /// Rotation `0..=3` such that: `observed_code == rotate(dict_code, rotation)`.
    pub rotation: u8,
    /// Hamming distance between observed and dictionary code (after rotation).
    pub hamming: u8,
}

/// Brute-force matcher over all ids and rotations.
///
/// Tag families used for calibration grids are small, so the four rotated
/// code tables are precomputed once per matcher.
#[derive(Clone, Debug)]
pub struct Matcher {
    dict: Dictionary,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}

impl Matcher {
    /// Build a matcher; `max_hamming` is capped at the family's correction capacity.
    pub fn new(dict: Dictionary, max_hamming: u8) -> Self {
        debug_assert!(dict.bit_count() <= 64);

        let rotated = dict
            .codes
            .iter()
            .map(|&base| {
                [
                    rotate_code_u64(base, dict.marker_size, 0),
                    rotate_code_u64(base, dict.marker_size, 1),
                    rotate_code_u64(base, dict.marker_size, 2),
                    rotate_code_u64(base, dict.marker_size, 3),
                ]
            })
            .collect();

        Self {
            dict,
            max_hamming: max_hamming.min(dict.max_correction_bits),
            rotated,
        }
    }

    #[inline]
    pub fn dictionary(&self) -> Dictionary {
        self.dict
    }

    #[inline]
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Find the best match within `max_hamming`.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        let mut best: Option<Match> = None;

        for (id, rots) in self.rotated.iter().enumerate() {
            for (rot, &cand) in rots.iter().enumerate() {
                let h = (observed ^ cand).count_ones() as u8;
                if h > self.max_hamming {
                    continue;
                }
                let m = Match {
                    id: id as u32,
                    rotation: rot as u8,
                    hamming: h,
                };
                if h == 0 {
                    return Some(m);
                }
                if best.map_or(true, |prev| h < prev.hamming) {
                    best = Some(m);
                }
            }
        }

        best
    }
}

/// Rotate a code stored in row-major bits: `idx = y * N + x`.
pub fn rotate_code_u64(code: u64, n: usize, rot: u8) -> u64 {
    let rot = rot & 3;
    if rot == 0 {
        return code;
    }

    let mut out = 0u64;
    for y in 0..n {
        for x in 0..n {
            let (sx, sy) = match rot {
                1 => (y, n - 1 - x),
                2 => (n - 1 - x, n - 1 - y),
                _ => (n - 1 - y, x),
            };
            let bit = (code >> (sy * n + sx)) & 1;
            out |= bit << (y * n + x);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TAG16H5;

    #[test]
    fn rotate_four_times_is_identity() {
        let code = 0x0123_4567_89ab_cdef_u64;
        let mut r = code;
        for _ in 0..4 {
            r = rotate_code_u64(r, 8, 1);
        }
        assert_eq!(code, r);
    }

    #[test]
    fn matcher_finds_rotated_code() {
        let matcher = Matcher::new(TAG16H5, 0);
        let observed = rotate_code_u64(TAG16H5.codes[7], 4, 3);
        let m = matcher.match_code(observed).expect("match");
        assert_eq!((m.id, m.rotation, m.hamming), (7, 3, 0));
    }

    #[test]
    fn corrects_up_to_two_bit_errors() {
        let matcher = Matcher::new(TAG16H5, 2);
        let observed = TAG16H5.codes[12] ^ 0b1000_0000_0001;
        let m = matcher.match_code(observed).expect("match");
        assert_eq!((m.id, m.rotation, m.hamming), (12, 0, 2));
    }

    #[test]
    fn hamming_cap_follows_family() {
        let matcher = Matcher::new(TAG16H5, 9);
        assert_eq!(matcher.max_hamming(), 2);
        assert!(matcher.match_code(0).is_none());
    }
}
