//! Tail-biting convolutional code for NPDCCH/DCI
//!
//! DCI messages are too short to amortize a turbo code's tail/interleaver
//! overhead, so 36.212 §5.1.3.1 mandates the same rate-1/3, 64-state
//! tail-biting convolutional code LTE PDCCH uses. Generator polynomials
//! `G0 = 133(octal)`, `G1 = 171(octal)`, `G2 = 165(octal)`.

const CONSTRAINT_LENGTH: u32 = 7;
const NUM_STATES: usize = 1 << (CONSTRAINT_LENGTH - 1);
const G0: u8 = 0o133;
const G1: u8 = 0o171;
const G2: u8 = 0o165;

/// Tail-bite by priming the encoder's shift register with the last
/// `constraint_length - 1` input bits before encoding, per 36.212 §5.1.3.1,
/// so the trellis starts and ends in the same state without explicit tail
/// bits (avoiding the rate loss a terminated code would pay on short DCI).
pub fn conv_encode(input_bits: &[u8]) -> Vec<u8> {
    let m = (CONSTRAINT_LENGTH - 1) as usize;
    let tail_primed_len = input_bits.len() + m;
    let mut history = vec![0u8; tail_primed_len];
    for i in 0..m {
        history[i] = input_bits[input_bits.len() - m + i];
    }
    history[m..].copy_from_slice(input_bits);

    let mut output = Vec::with_capacity(input_bits.len() * 3);
    for i in m..tail_primed_len {
        let window = &history[i - m..=i];
        output.push(apply_generator(window, G0));
        output.push(apply_generator(window, G1));
        output.push(apply_generator(window, G2));
    }

    output
}

/// Apply one generator polynomial's tap pattern to a `constraint_length`-wide
/// bit window (most recent bit last), XOR-ing every tapped bit together.
fn apply_generator(window: &[u8], poly_octal: u8) -> u8 {
    let mut acc = 0u8;
    for (i, &bit) in window.iter().enumerate() {
        let tap_index = window.len() - 1 - i;
        if (poly_octal >> tap_index) & 1 == 1 {
            acc ^= bit;
        }
    }
    acc
}

/// Viterbi-decode a rate-1/3 tail-biting convolutional codeword back into
/// the original input bits. Runs the Viterbi trellis twice around the
/// circular tail-biting boundary (a standard approach for short tail-biting
/// codes) and takes the converged path metric's survivor.
pub fn conv_decode(received: &[u8], input_len: usize) -> Vec<u8> {
    debug_assert_eq!(received.len(), input_len * 3);

    let m = (CONSTRAINT_LENGTH - 1) as usize;
    let mut best_path: Option<Vec<u8>> = None;
    let mut best_metric = i32::MAX;

    // Try every possible starting state (tail-biting requires start == end
    // state); with NUM_STATES small for a DCI-sized codeword this exhaustive
    // search is cheap and exact.
    for start_state in 0..NUM_STATES {
        let (path, metric) = viterbi_run(received, input_len, start_state);
        if let Some(end_state) = path_end_state(&path, start_state, m) {
            if end_state == start_state && metric < best_metric {
                best_metric = metric;
                best_path = Some(path);
            }
        }
    }

    best_path.unwrap_or_else(|| viterbi_run(received, input_len, 0).0)
}

fn path_end_state(path: &[u8], start_state: usize, m: usize) -> Option<usize> {
    if path.len() < m {
        return None;
    }
    let mut state = start_state;
    for &bit in &path[path.len() - m..] {
        state = ((state << 1) | bit as usize) & (NUM_STATES - 1);
    }
    Some(state)
}

/// Run the Viterbi algorithm assuming the shift register starts in
/// `start_state`, returning `(decoded_bits, path_metric)`.
fn viterbi_run(received: &[u8], input_len: usize, start_state: usize) -> (Vec<u8>, i32) {
    let mut path_metrics = vec![i32::MAX; NUM_STATES];
    path_metrics[start_state] = 0;
    let mut backpointers: Vec<[usize; NUM_STATES]> = Vec::with_capacity(input_len);
    let mut input_bits_at_step: Vec<[u8; NUM_STATES]> = Vec::with_capacity(input_len);

    for t in 0..input_len {
        let symbol = &received[t * 3..t * 3 + 3];
        let mut next_metrics = vec![i32::MAX; NUM_STATES];
        let mut bp = [0usize; NUM_STATES];
        let mut ib = [0u8; NUM_STATES];

        for state in 0..NUM_STATES {
            if path_metrics[state] == i32::MAX {
                continue;
            }
            for bit in 0..2u8 {
                let window_val = (state << 1) | bit as usize;
                let window: Vec<u8> = (0..CONSTRAINT_LENGTH as usize)
                    .rev()
                    .map(|i| ((window_val >> i) & 1) as u8)
                    .collect();
                let c0 = apply_generator(&window, G0);
                let c1 = apply_generator(&window, G1);
                let c2 = apply_generator(&window, G2);
                let metric = path_metrics[state]
                    + hamming(c0, symbol[0])
                    + hamming(c1, symbol[1])
                    + hamming(c2, symbol[2]);

                let next_state = window_val & (NUM_STATES - 1);
                if metric < next_metrics[next_state] {
                    next_metrics[next_state] = metric;
                    bp[next_state] = state;
                    ib[next_state] = bit;
                }
            }
        }

        path_metrics = next_metrics;
        backpointers.push(bp);
        input_bits_at_step.push(ib);
    }

    let (best_state, &best_metric) = path_metrics
        .iter()
        .enumerate()
        .min_by_key(|&(_, &m)| m)
        .unwrap();

    let mut bits = vec![0u8; input_len];
    let mut state = best_state;
    for t in (0..input_len).rev() {
        bits[t] = input_bits_at_step[t][state];
        state = backpointers[t][state];
    }

    (bits, best_metric)
}

fn hamming(a: u8, b: u8) -> i32 {
    if a == b {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_encode_rate_is_one_third() {
        let input = vec![1u8, 0, 1, 1, 0, 0, 1, 0];
        let encoded = conv_encode(&input);
        assert_eq!(encoded.len(), input.len() * 3);
    }

    #[test]
    fn test_conv_round_trip_no_noise() {
        let input = vec![1u8, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0, 1];
        let encoded = conv_encode(&input);
        let decoded = conv_decode(&encoded, input.len());
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_conv_round_trip_all_zero() {
        let input = vec![0u8; 16];
        let encoded = conv_encode(&input);
        let decoded = conv_decode(&encoded, input.len());
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_conv_decode_corrects_single_bit_error() {
        let input = vec![1u8, 1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1];
        let mut encoded = conv_encode(&input);
        encoded[5] ^= 1;
        let decoded = conv_decode(&encoded, input.len());
        assert_eq!(decoded, input);
    }
}
