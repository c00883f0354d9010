//! OFDM modulation and demodulation for the NB-IoT anchor carrier
//!
//! NB-IoT uses a single fixed numerology: 15 kHz subcarrier spacing, a
//! 128-point FFT (1.92 MHz baseband sample rate), normal cyclic prefix only,
//! 14 OFDM symbols per 1ms subframe. Per 3GPP 36.211 §5.6, the 12 occupied
//! subcarriers are **not** DC-centered in the 128-point FFT the way a wider
//! NR/LTE carrier would be; the resource grid mapper places them at a
//! raster-dependent offset and this module applies a ±7.5 kHz post-FFT
//! frequency shift to align the anchor PRB when NB-IoT is deployed in-band
//! or guard-band (36.211 §5.7.3). Standalone deployments use a zero shift.

use crate::LayerError;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::resource_grid::ResourceGrid;

/// FFT size for the NB-IoT anchor carrier (1.92 MHz / 15 kHz).
pub const FFT_SIZE: usize = 128;
/// OFDM symbols per subframe (2 slots x 7 symbols, normal CP only).
pub const SYMBOLS_PER_SUBFRAME: usize = 14;

/// Half-subcarrier raster shift applied for in-band/guard-band deployments,
/// per 36.211 §5.7.3. Standalone deployments use `0.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RasterShift {
    None,
    PlusHalf,
    MinusHalf,
}

impl RasterShift {
    fn hz(&self) -> f32 {
        match self {
            RasterShift::None => 0.0,
            RasterShift::PlusHalf => 7_500.0,
            RasterShift::MinusHalf => -7_500.0,
        }
    }
}

/// OFDM modulator for the downlink anchor carrier (NPSS/NSSS/NPBCH/NPDSCH/NPDCCH).
#[derive(Clone)]
pub struct OfdmModulator {
    cp_lengths: [usize; SYMBOLS_PER_SUBFRAME],
    ifft: Arc<dyn Fft<f32>>,
    scratch: Arc<Mutex<Vec<Complex32>>>,
    baseband_gain_db: f32,
    raster_shift: RasterShift,
}

impl OfdmModulator {
    /// Create a new OFDM modulator for the fixed 128-point NB-IoT numerology.
    pub fn new(raster_shift: RasterShift) -> Result<Self, LayerError> {
        let mut planner = FftPlanner::new();
        let ifft = planner.plan_fft_inverse(FFT_SIZE);
        let scratch = Arc::new(Mutex::new(vec![
            Complex32::new(0.0, 0.0);
            ifft.get_inplace_scratch_len()
        ]));

        Ok(Self {
            cp_lengths: calculate_cp_lengths(),
            ifft,
            scratch,
            baseband_gain_db: -3.0,
            raster_shift,
        })
    }

    /// Modulate one OFDM symbol from the resource grid into time-domain
    /// samples, including cyclic prefix.
    pub fn modulate(&self, resource_grid: &ResourceGrid, symbol_index: u8) -> Vec<Complex32> {
        let mut freq_samples = resource_grid.get_symbol(symbol_index);

        {
            let mut scratch = self.scratch.lock().unwrap();
            self.ifft.process_with_scratch(&mut freq_samples, &mut scratch);
        }

        let fft_scale = 1.0 / (FFT_SIZE as f32).sqrt();
        let baseband_gain = 10.0_f32.powf(self.baseband_gain_db / 20.0);
        let total_scale = fft_scale * baseband_gain;

        for sample in &mut freq_samples {
            *sample *= total_scale;
        }

        if self.raster_shift != RasterShift::None {
            apply_frequency_shift(&mut freq_samples, self.raster_shift.hz(), 1.92e6, 0);
        }

        let avg_power: f32 =
            freq_samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / freq_samples.len() as f32;
        debug!(
            "OFDM symbol {}: avg power={:.6} ({:.1} dB)",
            symbol_index,
            avg_power,
            10.0 * avg_power.log10()
        );

        let cp_len = self.cp_lengths[symbol_index as usize % SYMBOLS_PER_SUBFRAME];
        let mut output = Vec::with_capacity(FFT_SIZE + cp_len);
        output.extend_from_slice(&freq_samples[FFT_SIZE - cp_len..]);
        output.extend_from_slice(&freq_samples);
        output
    }

    /// Modulate a complete 1ms subframe (14 symbols).
    pub fn modulate_subframe(&self, resource_grid: &ResourceGrid) -> Vec<Complex32> {
        let mut output = Vec::new();
        for symbol in 0..SYMBOLS_PER_SUBFRAME as u8 {
            output.extend(self.modulate(resource_grid, symbol));
        }
        output
    }

    /// Total samples per symbol including CP, for the given symbol index.
    pub fn symbol_length(&self, symbol_index: u8) -> usize {
        FFT_SIZE + self.cp_lengths[symbol_index as usize % SYMBOLS_PER_SUBFRAME]
    }

    pub fn set_baseband_gain_db(&mut self, gain_db: f32) {
        self.baseband_gain_db = gain_db;
    }
}

/// OFDM demodulator for the uplink (NPRACH energy detection feeds its own
/// correlator; NPUSCH demodulation after CP removal/FFT uses this path).
#[derive(Clone)]
pub struct OfdmDemodulator {
    cp_lengths: [usize; SYMBOLS_PER_SUBFRAME],
    fft: Arc<dyn Fft<f32>>,
    scratch: Arc<Mutex<Vec<Complex32>>>,
}

impl OfdmDemodulator {
    pub fn new() -> Result<Self, LayerError> {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let scratch = Arc::new(Mutex::new(vec![
            Complex32::new(0.0, 0.0);
            fft.get_inplace_scratch_len()
        ]));

        Ok(Self {
            cp_lengths: calculate_cp_lengths(),
            fft,
            scratch,
        })
    }

    /// Demodulate one OFDM symbol (CP removal + FFT + descaling).
    pub fn demodulate_symbol(
        &self,
        time_samples: &[Complex32],
        symbol_index: u8,
    ) -> Result<Vec<Complex32>, LayerError> {
        let cp_len = self.cp_lengths[symbol_index as usize % SYMBOLS_PER_SUBFRAME];
        let expected_len = FFT_SIZE + cp_len;

        if time_samples.len() != expected_len {
            return Err(LayerError::InvalidConfiguration(format!(
                "expected {} samples, got {}",
                expected_len,
                time_samples.len()
            )));
        }

        let mut fft_input: Vec<Complex32> = time_samples[cp_len..].to_vec();

        {
            let mut scratch = self.scratch.lock().unwrap();
            self.fft.process_with_scratch(&mut fft_input, &mut scratch);
        }

        let scale = 1.0 / (FFT_SIZE as f32).sqrt();
        for sample in &mut fft_input {
            *sample *= scale;
        }

        Ok(fft_input)
    }

    /// Estimate timing offset via CP correlation against the end of the
    /// same symbol, used to track NPUSCH transmit timing drift.
    pub fn estimate_timing_offset(&self, samples: &[Complex32]) -> f32 {
        let cp_len = self.cp_lengths[0];
        if samples.len() < FFT_SIZE + cp_len {
            return 0.0;
        }

        let mut correlation = Complex32::new(0.0, 0.0);
        let mut power = 0.0;

        for i in 0..cp_len {
            correlation += samples[i] * samples[i + FFT_SIZE].conj();
            power += samples[i].norm_sqr() + samples[i + FFT_SIZE].norm_sqr();
        }

        let metric = correlation.norm() / (power / 2.0);
        metric * cp_len as f32
    }

    /// Estimate carrier frequency offset via CP correlation phase.
    pub fn estimate_cfo(&self, samples: &[Complex32]) -> f32 {
        let cp_len = self.cp_lengths[0];
        if samples.len() < FFT_SIZE + cp_len {
            return 0.0;
        }

        let mut phase_sum = 0.0;
        let mut count = 0;

        for i in 0..cp_len {
            let correlation = samples[i] * samples[i + FFT_SIZE].conj();
            if correlation.norm() > 0.0 {
                phase_sum += correlation.arg();
                count += 1;
            }
        }

        if count > 0 {
            let avg_phase = phase_sum / count as f32;
            avg_phase * 1.92e6 / (2.0 * PI * FFT_SIZE as f32)
        } else {
            0.0
        }
    }
}

impl Default for OfdmDemodulator {
    fn default() -> Self {
        Self::new().expect("fixed FFT size always constructs")
    }
}

/// Apply a constant frequency shift to a block of time-domain samples,
/// continuing the phase accumulator from `start_sample` so consecutive
/// blocks stay phase-continuous.
fn apply_frequency_shift(samples: &mut [Complex32], shift_hz: f32, sample_rate: f32, start_sample: usize) {
    let phase_increment = 2.0 * PI * shift_hz / sample_rate;
    let mut phase = phase_increment * start_sample as f32;

    for sample in samples {
        let rot = Complex32::new(phase.cos(), phase.sin());
        *sample *= rot;
        phase += phase_increment;
        if phase > PI {
            phase -= 2.0 * PI;
        } else if phase < -PI {
            phase += 2.0 * PI;
        }
    }
}

/// Per-symbol cyclic prefix length for the 128-point NB-IoT FFT, normal CP
/// only. Scaled from the 2048-point/30.72 MHz LTE reference lengths
/// (160/144 samples) the same way srsRAN/teacher code scales CP length by
/// FFT size ratio.
fn calculate_cp_lengths() -> [usize; SYMBOLS_PER_SUBFRAME] {
    let extended_cp = (FFT_SIZE as f32 * 160.0 / 2048.0).round() as usize;
    let base_cp = (FFT_SIZE as f32 * 144.0 / 2048.0).round() as usize;

    let mut lengths = [base_cp; SYMBOLS_PER_SUBFRAME];
    lengths[0] = extended_cp;
    lengths[7] = extended_cp;
    lengths
}

/// OFDM symbol timing within a subframe.
#[derive(Debug, Clone)]
pub struct OfdmSymbolTiming {
    pub start_sample: usize,
    pub duration: usize,
    pub cp_length: usize,
}

/// Calculate sample timing for every symbol in a 1ms subframe.
pub fn calculate_subframe_timing() -> Vec<OfdmSymbolTiming> {
    let cp_lengths = calculate_cp_lengths();
    let mut timings = Vec::with_capacity(SYMBOLS_PER_SUBFRAME);
    let mut start = 0;

    for &cp_len in cp_lengths.iter() {
        let duration = FFT_SIZE + cp_len;
        timings.push(OfdmSymbolTiming {
            start_sample: start,
            duration,
            cp_length: cp_len,
        });
        start += duration;
    }

    timings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cp_lengths_sum_to_subframe() {
        let lengths = calculate_cp_lengths();
        let total: usize = lengths.iter().map(|&cp| cp + FFT_SIZE).sum();
        // 1ms at 1.92 MHz is 1920 samples.
        assert_eq!(total, 1920);
    }

    #[test]
    fn test_cp_lengths_extended_on_first_and_eighth_symbol() {
        let lengths = calculate_cp_lengths();
        assert_eq!(lengths[0], 10);
        assert_eq!(lengths[1], 9);
        assert_eq!(lengths[7], 10);
    }

    #[test]
    fn test_subframe_timing_is_contiguous() {
        let timings = calculate_subframe_timing();
        assert_eq!(timings.len(), SYMBOLS_PER_SUBFRAME);
        for pair in timings.windows(2) {
            assert_eq!(pair[0].start_sample + pair[0].duration, pair[1].start_sample);
        }
    }

    #[test]
    fn test_modulator_round_trip_preserves_length() {
        let modulator = OfdmModulator::new(RasterShift::None).unwrap();
        let grid = ResourceGrid::new(0);
        let samples = modulator.modulate(&grid, 1);
        assert_eq!(samples.len(), modulator.symbol_length(1));
    }
}
