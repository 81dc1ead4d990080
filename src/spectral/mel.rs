//! Mel scale conversion, triangular filterbank and analysis window.

use std::f32::consts::PI;

/// Hz to mel (HTK formula).
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Mel to Hz (inverse of [`hz_to_mel`]).
pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// Periodic Hann window of `size` samples.
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// One triangular band, stored sparsely from its first non-zero bin.
#[derive(Debug, Clone)]
struct Band {
    first_bin: usize,
    weights: Vec<f32>,
}

/// Triangular filters evenly spaced on the mel scale.
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    bands: Vec<Band>,
    centers_hz: Vec<f32>,
    n_bins: usize,
}

impl MelFilterbank {
    /// Build `n_mels` filters over the `fft_size / 2 + 1` power bins,
    /// spanning `[fmin, fmax]` Hz.
    pub fn new(fft_size: usize, n_mels: usize, sample_rate: f32, fmin: f32, fmax: f32) -> Self {
        let n_bins = fft_size / 2 + 1;
        let bin_hz = sample_rate / fft_size as f32;

        let mel_min = hz_to_mel(fmin);
        let mel_max = hz_to_mel(fmax);
        let edges: Vec<f32> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
            .collect();

        let bands = edges
            .windows(3)
            .map(|edge| {
                let (left, center, right) = (edge[0], edge[1], edge[2]);
                let weights: Vec<(usize, f32)> = (0..n_bins)
                    .filter_map(|bin| {
                        let freq = bin as f32 * bin_hz;
                        let w = if freq >= left && freq <= center {
                            (freq - left) / (center - left)
                        } else if freq > center && freq <= right {
                            (right - freq) / (right - center)
                        } else {
                            0.0
                        };
                        (w > 0.0).then_some((bin, w))
                    })
                    .collect();
                match weights.first() {
                    Some(&(first_bin, _)) => Band {
                        first_bin,
                        weights: weights.iter().map(|&(_, w)| w).collect(),
                    },
                    None => Band {
                        first_bin: 0,
                        weights: Vec::new(),
                    },
                }
            })
            .collect();

        Self {
            bands,
            centers_hz: edges[1..=n_mels].to_vec(),
            n_bins,
        }
    }

    /// Project `power` (length `n_bins`) onto the bands, writing one value
    /// per band into `out`.
    pub fn apply(&self, power: &[f32], out: &mut [f32]) {
        debug_assert_eq!(power.len(), self.n_bins);
        for (band, value) in self.bands.iter().zip(out.iter_mut()) {
            *value = band
                .weights
                .iter()
                .zip(&power[band.first_bin..])
                .map(|(w, p)| w * p)
                .sum();
        }
    }

    pub fn n_mels(&self) -> usize {
        self.bands.len()
    }

    /// Center frequency of every band in Hz.
    pub fn center_frequencies(&self) -> &[f32] {
        &self.centers_hz
    }
}
