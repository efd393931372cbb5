//! Chunk error-rate model.
//!
//! Maps an SNR and a number of bits sent with a given mode to a success
//! probability. The model uses uncoded bit error rates for
//! the constellation, a fixed coding gain per code rate, and independent bit
//! errors across the chunk.

use hesim_common::{CodeRate, ModulationClass, TxVector, WifiMode};

/// Error-rate model used by the interference tracker.
pub trait ErrorRateModel: Send {
    /// Probability that `nbits` bits sent with `mode` at linear SNR `snr`
    /// are all received correctly.
    fn chunk_success_rate(&self, mode: WifiMode, tx_vector: &TxVector, snr: f64, nbits: u64) -> f64;
}

/// Complementary error function (Abramowitz & Stegun 7.1.26).
pub fn erfc(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    let p = 0.3275911;
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;

    let t = 1.0 / (1.0 + p * x);
    let poly = t * (a1 + t * (a2 + t * (a3 + t * (a4 + t * a5))));
    poly * (-x * x).exp()
}

/// Bit error rate of BPSK.
pub fn bpsk_ber(snr: f64) -> f64 {
    0.5 * erfc(snr.max(0.0).sqrt())
}

/// Bit error rate of square M-QAM with Gray coding (QPSK for M = 4).
pub fn qam_ber(snr: f64, m: u16) -> f64 {
    let m = m as f64;
    let bits = m.log2();
    let z = (3.0 * snr.max(0.0) / (2.0 * (m - 1.0))).sqrt();
    ((2.0 / bits) * (1.0 - 1.0 / m.sqrt()) * erfc(z)).min(0.5)
}

/// NIST-style error-rate model with a coding gain per code rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NistErrorRateModel;

impl NistErrorRateModel {
    /// Effective SNR multiplier from forward error correction or spreading.
    fn processing_gain(mode: &WifiMode) -> f64 {
        let db = match mode.code_rate() {
            CodeRate::Half => 5.0,
            CodeRate::TwoThirds => 4.0,
            CodeRate::ThreeQuarters => 3.5,
            CodeRate::FiveSixths => 2.5,
            CodeRate::Uncoded => {
                // Chips per symbol over bits per symbol
                let bits = (mode.constellation_size() as f64).log2();
                let chips = match mode.class {
                    ModulationClass::Dsss => 11.0,
                    _ => 8.0,
                };
                return chips / bits;
            }
        };
        10f64.powf(db / 10.0)
    }

    /// Bit error rate of a mode at a linear SNR.
    pub fn ber(mode: &WifiMode, snr: f64) -> f64 {
        let effective = snr * Self::processing_gain(mode);
        match mode.constellation_size() {
            2 => bpsk_ber(effective),
            m => qam_ber(effective, m),
        }
    }
}

impl ErrorRateModel for NistErrorRateModel {
    fn chunk_success_rate(&self, mode: WifiMode, _tx_vector: &TxVector, snr: f64, nbits: u64) -> f64 {
        if nbits == 0 {
            return 1.0;
        }
        let ber = Self::ber(&mode, snr);
        (1.0 - ber).powf(nbits as f64).clamp(0.0, 1.0)
    }
}
