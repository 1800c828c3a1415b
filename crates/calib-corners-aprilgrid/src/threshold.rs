//! Thresholding for quad extraction and bit decoding.

use calib_corners_core::GrayImageView;

/// Compute Otsu threshold from a set of sample intensities.
pub(crate) fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 127;
    }

    let mut hist = [0u32; 256];
    let mut min_v = 255u8;
    let mut max_v = 0u8;
    for &v in samples {
        hist[v as usize] += 1;
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    if min_v == max_v {
        return min_v;
    }
    let nonzero_bins = hist.iter().filter(|&&h| h > 0).count();
    if nonzero_bins <= 2 {
        return ((min_v as u16 + max_v as u16 + 1) / 2) as u8;
    }

    let total = samples.len() as f64;
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += (t as f64) * (h as f64);
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            // pixels `<= t` form the dark class
            best_t = (t + 1).min(255) as u8;
        }
    }

    best_t
}

/// Dark-pixel mask (`true` = dark).
///
/// The threshold of each pixel is the midpoint between the min and max of
/// the surrounding 3x3 tiles. Tiles without enough contrast fall back to a
/// global Otsu threshold, so large uniform areas keep their class.
pub(crate) fn dark_mask(img: &GrayImageView<'_>, tile: usize, min_contrast: u8) -> Vec<bool> {
    let (w, h) = (img.width, img.height);
    let tile = tile.max(2);
    let tw = w.div_ceil(tile);
    let th = h.div_ceil(tile);

    let mut tmin = vec![255u8; tw * th];
    let mut tmax = vec![0u8; tw * th];
    for y in 0..h {
        let ty = y / tile;
        for x in 0..w {
            let v = img.data[y * w + x];
            let t = ty * tw + x / tile;
            tmin[t] = tmin[t].min(v);
            tmax[t] = tmax[t].max(v);
        }
    }

    let global = otsu_threshold_from_samples(img.data);

    let mut thr = vec![global; tw * th];
    for ty in 0..th {
        for tx in 0..tw {
            let mut lo = 255u8;
            let mut hi = 0u8;
            for ny in ty.saturating_sub(1)..(ty + 2).min(th) {
                for nx in tx.saturating_sub(1)..(tx + 2).min(tw) {
                    lo = lo.min(tmin[ny * tw + nx]);
                    hi = hi.max(tmax[ny * tw + nx]);
                }
            }
            if hi.saturating_sub(lo) >= min_contrast {
                thr[ty * tw + tx] = ((lo as u16 + hi as u16 + 1) / 2) as u8;
            }
        }
    }

    let mut mask = vec![false; w * h];
    for y in 0..h {
        let ty = y / tile;
        for x in 0..w {
            mask[y * w + x] = img.data[y * w + x] < thr[ty * tw + x / tile];
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_corners_core::GrayImage;

    #[test]
    fn otsu_splits_bimodal_samples() {
        let mut samples = vec![20u8; 50];
        samples.extend(std::iter::repeat(200u8).take(50));
        samples.push(90);
        let t = otsu_threshold_from_samples(&samples);
        assert!(t > 20 && t <= 200, "t = {t}");
    }

    #[test]
    fn uniform_dark_area_stays_dark() {
        // 60x60 white image with a 40x40 black block: the block interior has
        // no local contrast and must still be classified as dark.
        let mut img = GrayImage::filled(60, 60, 230);
        for y in 10..50 {
            for x in 10..50 {
                img.set(x, y, 15);
            }
        }
        let mask = dark_mask(&img.view(), 4, 20);
        assert!(mask[30 * 60 + 30]);
        assert!(mask[10 * 60 + 10]);
        assert!(!mask[5 * 60 + 5]);
        assert!(!mask[30 * 60 + 55]);
    }
}
