//! Peak picking by topographic prominence.

/// Indices of strict local maxima. A flat top counts once, at its middle
/// sample; the first and last samples are never peaks.
pub fn local_maxima(x: &[f32]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Height of `peak` above the higher of its two bases, where each base is the
/// lowest sample passed before meeting a sample higher than the peak.
pub fn prominence(x: &[f32], peak: usize) -> f32 {
    let height = x[peak];

    let mut left_min = height;
    for &v in x[..=peak].iter().rev() {
        if v > height {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = height;
    for &v in &x[peak..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}

/// Local maxima whose prominence is at least `min_prominence`.
pub fn find_peaks(x: &[f32], min_prominence: f32) -> Vec<usize> {
    local_maxima(x)
        .into_iter()
        .filter(|&p| prominence(x, p) >= min_prominence)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_simple_peaks() {
        let x = [0.0, 5.0, 0.0, 1.0, 0.0, 7.0, 0.0];
        assert_eq!(local_maxima(&x), vec![1, 3, 5]);
        assert_eq!(find_peaks(&x, 3.0), vec![1, 5]);
    }

    #[test]
    fn plateau_reports_middle() {
        let x = [0.0, 2.0, 2.0, 2.0, 0.0];
        assert_eq!(local_maxima(&x), vec![2]);
        let x = [0.0, 2.0, 2.0, 0.0];
        assert_eq!(local_maxima(&x), vec![1]);
    }

    #[test]
    fn rising_plateau_is_not_a_peak() {
        let x = [0.0, 2.0, 2.0, 3.0, 0.0];
        assert_eq!(local_maxima(&x), vec![3]);
    }

    #[test]
    fn edges_are_never_peaks() {
        assert!(local_maxima(&[5.0, 1.0, 0.0]).is_empty());
        assert!(local_maxima(&[0.0, 1.0, 5.0]).is_empty());
        assert!(local_maxima(&[1.0, 2.0]).is_empty());
    }

    #[test]
    fn prominence_uses_higher_base() {
        // left base 1, right base 3
        let x = [1.0, 6.0, 3.0, 8.0, 0.0];
        assert_eq!(prominence(&x, 1), 3.0);
        assert_eq!(prominence(&x, 3), 7.0);
        let x = [9.0, 1.0, 6.0, 3.0, 8.0];
        assert_eq!(prominence(&x, 2), 3.0);
    }

    #[test]
    fn log_of_silence_has_no_peaks_and_no_nan() {
        let x = vec![f32::NEG_INFINITY; 16];
        assert!(find_peaks(&x, 3.0).is_empty());
    }

    #[test]
    fn isolated_value_over_log_zero_is_infinitely_prominent() {
        let x = [f32::NEG_INFINITY, 0.5f32.ln(), f32::NEG_INFINITY];
        assert_eq!(find_peaks(&x, 3.0), vec![1]);
    }
}
