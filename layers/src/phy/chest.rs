//! Channel and noise estimation
//!
//! Two independent estimators share this module: the uplink one interpolates
//! across NPUSCH's per-slot DMRS symbol to track the channel within a slot,
//! and the downlink one (used by the zmq-rf test loopback's soft receive
//! path, not by anything this eNB transmits) reads back NRS to estimate the
//! channel a UE would see. Both reduce to the same shape: a handful of known
//! reference points, a smoothing filter across them, and a residual-power
//! noise estimate.

use num_complex::Complex32;

/// Smooth a sequence of per-symbol channel estimates with a 3-tap triangular
/// filter (`[1/3, 1/3, 1/3]`), replicating edge values at the boundaries
/// (zeroth-order hold) instead of zero-padding, so the filtered estimate at
/// the first/last symbol isn't biased toward zero.
pub fn triangular_smooth(estimates: &[Complex32]) -> Vec<Complex32> {
    if estimates.is_empty() {
        return Vec::new();
    }
    let n = estimates.len();
    let at = |i: isize| -> Complex32 {
        if i < 0 {
            estimates[0]
        } else if i as usize >= n {
            estimates[n - 1]
        } else {
            estimates[i as usize]
        }
    };

    (0..n as isize)
        .map(|i| (at(i - 1) + at(i) + at(i + 1)) / 3.0)
        .collect()
}

/// Estimate the uplink channel per subcarrier from one slot's DMRS symbol,
/// dividing the received DMRS by the known transmitted DMRS sequence, then
/// smoothing across subcarriers with `triangular_smooth`.
pub fn estimate_ul_channel(received_dmrs: &[Complex32], known_dmrs: &[Complex32]) -> Vec<Complex32> {
    debug_assert_eq!(received_dmrs.len(), known_dmrs.len());
    let raw: Vec<Complex32> = received_dmrs
        .iter()
        .zip(known_dmrs.iter())
        .map(|(&r, &k)| if k.norm_sqr() > 0.0 { r / k } else { Complex32::new(0.0, 0.0) })
        .collect();
    triangular_smooth(&raw)
}

/// Hold a per-slot channel estimate across the data symbols of that slot
/// (zeroth-order hold): every data symbol uses the single DMRS-derived
/// estimate for its subcarrier, since NPUSCH only transmits one DMRS symbol
/// per slot to interpolate from.
pub fn zero_order_hold(estimate: &[Complex32], num_symbols: usize) -> Vec<Vec<Complex32>> {
    (0..num_symbols).map(|_| estimate.to_vec()).collect()
}

/// Estimate noise power from the residual after equalizing known DMRS
/// symbols against the smoothed channel estimate: `mean(|r - h*k|^2)`.
/// This calibrates the SINR used by the scheduler's MCS selection and by
/// NPRACH-adjacent UL demodulation confidence.
pub fn estimate_noise_power(
    received_dmrs: &[Complex32],
    known_dmrs: &[Complex32],
    channel_estimate: &[Complex32],
) -> f32 {
    debug_assert_eq!(received_dmrs.len(), known_dmrs.len());
    debug_assert_eq!(received_dmrs.len(), channel_estimate.len());
    if received_dmrs.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = received_dmrs
        .iter()
        .zip(known_dmrs.iter())
        .zip(channel_estimate.iter())
        .map(|((&r, &k), &h)| (r - h * k).norm_sqr())
        .sum();
    sum_sq / received_dmrs.len() as f32
}

/// Downlink NRS-based channel estimate: same ratio-then-smooth approach as
/// the uplink path, reused here since NRS and DMRS are both known pilot
/// sequences inserted at fixed resource elements.
pub fn estimate_dl_channel(received_nrs: &[Complex32], known_nrs: &[Complex32]) -> Vec<Complex32> {
    estimate_ul_channel(received_nrs, known_nrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangular_smooth_constant_input_is_unchanged() {
        let estimates = vec![Complex32::new(2.0, 1.0); 5];
        let smoothed = triangular_smooth(&estimates);
        for s in smoothed {
            assert!((s - Complex32::new(2.0, 1.0)).norm() < 1e-6);
        }
    }

    #[test]
    fn test_triangular_smooth_single_element() {
        let estimates = vec![Complex32::new(3.0, -1.0)];
        let smoothed = triangular_smooth(&estimates);
        assert_eq!(smoothed.len(), 1);
        assert!((smoothed[0] - estimates[0]).norm() < 1e-6);
    }

    #[test]
    fn test_estimate_ul_channel_perfect_conditions() {
        let known: Vec<Complex32> = (0..12).map(|_| Complex32::new(1.0, 0.0)).collect();
        let h = Complex32::new(0.5, 0.5);
        let received: Vec<Complex32> = known.iter().map(|&k| k * h).collect();
        let est = estimate_ul_channel(&received, &known);
        for e in est {
            assert!((e - h).norm() < 1e-3);
        }
    }

    #[test]
    fn test_noise_power_zero_when_noiseless() {
        let known: Vec<Complex32> = (0..12).map(|_| Complex32::new(1.0, 0.0)).collect();
        let h = Complex32::new(1.0, 0.0);
        let received = known.clone();
        let channel_estimate = vec![h; 12];
        let noise = estimate_noise_power(&received, &known, &channel_estimate);
        assert!(noise < 1e-6);
    }

    #[test]
    fn test_zero_order_hold_replicates_estimate() {
        let estimate = vec![Complex32::new(1.0, 0.0), Complex32::new(0.0, 1.0)];
        let held = zero_order_hold(&estimate, 7);
        assert_eq!(held.len(), 7);
        for slot in held {
            assert_eq!(slot, estimate);
        }
    }
}
