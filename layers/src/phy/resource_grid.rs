//! NB-IoT anchor-carrier resource grid
//!
//! Unlike a wide NR/LTE carrier, NB-IoT's downlink resource grid is a single
//! physical resource block: 12 subcarriers x 14 OFDM symbols per 1ms
//! subframe, per 3GPP 36.211 §8. The grid still sits inside a 128-point FFT,
//! so this module is responsible for placing the 12 occupied subcarriers at
//! the correct FFT bins (DC-centered, bin 0 unused as a guard per 36.211
//! §5.6) and clearing/reading back whole OFDM symbols for the OFDM front end.

use num_complex::Complex32;
use ndarray::Array2;

use super::ofdm::FFT_SIZE;

/// Subcarriers in the single NB-IoT anchor PRB.
pub const SUBCARRIERS_PER_PRB: usize = 12;
/// OFDM symbols per 1ms subframe (2 slots x 7 symbols).
pub const SYMBOLS_PER_SUBFRAME: usize = 14;

/// A single resource element address within the anchor PRB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceElement {
    /// Subcarrier index within the PRB, 0..=11.
    pub subcarrier: u8,
    /// OFDM symbol index within the subframe, 0..=13.
    pub symbol: u8,
}

/// Downlink resource grid for one subframe of the NB-IoT anchor carrier.
///
/// Stored as a `[FFT_SIZE x SYMBOLS_PER_SUBFRAME]` frequency-domain array so
/// it can be handed directly to `OfdmModulator::modulate`; only the 12
/// occupied bins (plus DC guard) are ever written by the mapping helpers.
#[derive(Debug, Clone)]
pub struct ResourceGrid {
    grid: Array2<Complex32>,
    cell_id_mod4: u8,
}

impl ResourceGrid {
    /// Create an empty grid. `pci` seeds the subcarrier shift used by
    /// NRS/DMRS mapping helpers elsewhere (`pci % 4`, not used for data RE
    /// placement, which is fixed at a 1:1 mapping for the single PRB).
    pub fn new(pci: u16) -> Self {
        Self {
            grid: Array2::from_elem((FFT_SIZE, SYMBOLS_PER_SUBFRAME), Complex32::new(0.0, 0.0)),
            cell_id_mod4: (pci % 4) as u8,
        }
    }

    /// Clear the whole subframe (all symbols) to zero.
    pub fn clear(&mut self) {
        self.grid.fill(Complex32::new(0.0, 0.0));
    }

    /// Clear a single OFDM symbol to zero.
    pub fn clear_symbol(&mut self, symbol: u8) {
        for row in self.grid.column_mut(symbol as usize).iter_mut() {
            *row = Complex32::new(0.0, 0.0);
        }
    }

    /// Map a single resource element.
    pub fn map_re(&mut self, re: ResourceElement, value: Complex32) {
        let fft_index = subcarrier_to_fft_index(re.subcarrier);
        self.grid[[fft_index, re.symbol as usize]] = value;
    }

    /// Read back a single resource element.
    pub fn get_re(&self, re: ResourceElement) -> Complex32 {
        let fft_index = subcarrier_to_fft_index(re.subcarrier);
        self.grid[[fft_index, re.symbol as usize]]
    }

    /// Map all 12 subcarriers of one OFDM symbol from a dense slice
    /// (index 0 = subcarrier 0). `values.len()` must be `SUBCARRIERS_PER_PRB`.
    pub fn map_symbol(&mut self, symbol: u8, values: &[Complex32]) {
        debug_assert_eq!(values.len(), SUBCARRIERS_PER_PRB);
        for (sc, &value) in values.iter().enumerate() {
            self.map_re(
                ResourceElement {
                    subcarrier: sc as u8,
                    symbol,
                },
                value,
            );
        }
    }

    /// Get the full FFT-width frequency-domain vector for one symbol,
    /// ready for `OfdmModulator::modulate`.
    pub fn get_symbol(&self, symbol: u8) -> Vec<Complex32> {
        self.grid.column(symbol as usize).to_vec()
    }

    /// Overwrite a full FFT-width frequency-domain vector for one symbol
    /// (used when demodulating an uplink subframe into this grid).
    pub fn set_symbol(&mut self, symbol: u8, values: &[Complex32]) {
        debug_assert_eq!(values.len(), FFT_SIZE);
        for (i, &value) in values.iter().enumerate() {
            self.grid[[i, symbol as usize]] = value;
        }
    }

    /// `pci % 4`, the shift applied by NRS/DMRS sequence mapping.
    pub fn cell_id_mod4(&self) -> u8 {
        self.cell_id_mod4
    }
}

/// Map a PRB-relative subcarrier index (0..=11) to its DC-centered FFT bin,
/// matching 36.211 §5.6's "no-DC-bin" convention: bin 0 is unused, the
/// occupied band sits symmetrically either side of it.
pub fn subcarrier_to_fft_index(subcarrier: u8) -> usize {
    let k = subcarrier as i32 - (SUBCARRIERS_PER_PRB as i32 / 2);
    // k runs -6..=5; shift into -6..=-1 and 0..=5, skipping DC (bin 0).
    let k = if k >= 0 { k + 1 } else { k };
    ((k + FFT_SIZE as i32) % FFT_SIZE as i32) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcarrier_mapping_is_injective() {
        let mut seen = std::collections::HashSet::new();
        for sc in 0..SUBCARRIERS_PER_PRB as u8 {
            let idx = subcarrier_to_fft_index(sc);
            assert!(seen.insert(idx), "duplicate FFT bin for subcarrier {}", sc);
        }
    }

    #[test]
    fn test_subcarrier_mapping_avoids_dc() {
        for sc in 0..SUBCARRIERS_PER_PRB as u8 {
            assert_ne!(subcarrier_to_fft_index(sc), 0);
        }
    }

    #[test]
    fn test_map_and_read_back_re() {
        let mut grid = ResourceGrid::new(42);
        let re = ResourceElement { subcarrier: 3, symbol: 5 };
        grid.map_re(re, Complex32::new(1.0, -1.0));
        assert_eq!(grid.get_re(re), Complex32::new(1.0, -1.0));
    }

    #[test]
    fn test_clear_symbol_only_clears_target_symbol() {
        let mut grid = ResourceGrid::new(0);
        let re0 = ResourceElement { subcarrier: 0, symbol: 0 };
        let re1 = ResourceElement { subcarrier: 0, symbol: 1 };
        grid.map_re(re0, Complex32::new(1.0, 0.0));
        grid.map_re(re1, Complex32::new(1.0, 0.0));
        grid.clear_symbol(0);
        assert_eq!(grid.get_re(re0), Complex32::new(0.0, 0.0));
        assert_eq!(grid.get_re(re1), Complex32::new(1.0, 0.0));
    }

    #[test]
    fn test_cell_id_mod4() {
        let grid = ResourceGrid::new(503);
        assert_eq!(grid.cell_id_mod4(), 503 % 4);
    }
}
