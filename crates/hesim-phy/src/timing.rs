//! PPDU duration calculator.
//!
//! Pure functions of a [`TxVector`], preamble format and aggregation position.

use hesim_common::{ModulationClass, MpduType, SimTime, TxVector, WifiMode, WifiPreamble};
use hesim_common::tx_vector::symbol_duration_ns;

const SERVICE_BITS: f64 = 16.0;
const TAIL_BITS: f64 = 6.0;
// Signal extension appended to ERP-OFDM, HT and HE PPDUs in the 2.4 GHz band.
const SIGNAL_EXTENSION: SimTime = SimTime::from_micros(6);

/// Number of HT/VHT long training fields for a stream count.
fn ht_ltf_count(nss: u8) -> u64 {
    match nss {
        0 | 1 => 1,
        2 => 2,
        _ => 4,
    }
}

/// Duration of the training part of the preamble.
pub fn preamble_duration(tx_vector: &TxVector, preamble: WifiPreamble) -> SimTime {
    if !preamble.is_present() {
        return SimTime::ZERO;
    }
    match tx_vector.mode.class {
        ModulationClass::Dsss | ModulationClass::HrDsss => match preamble {
            WifiPreamble::Short => SimTime::from_micros(72),
            _ => SimTime::from_micros(144),
        },
        // L-STF + L-LTF
        _ => SimTime::from_micros(16),
    }
}

/// Duration of the PLCP header (signal fields and non-legacy training).
pub fn header_duration(tx_vector: &TxVector, preamble: WifiPreamble) -> SimTime {
    let nss = tx_vector.nss;
    let us = match (tx_vector.mode.class, preamble) {
        (_, WifiPreamble::None) => 0,
        (ModulationClass::Dsss | ModulationClass::HrDsss, WifiPreamble::Short) => 24,
        (ModulationClass::Dsss | ModulationClass::HrDsss, _) => 48,
        (_, WifiPreamble::HtMixed) => 4 + 8 + 4 + 4 * ht_ltf_count(nss),
        (_, WifiPreamble::HtGreenfield) => 8 + 4 * ht_ltf_count(nss),
        (_, WifiPreamble::VhtSu) => 4 + 8 + 4 + 4 * ht_ltf_count(nss) + 4,
        // L-SIG, RL-SIG, HE-SIG-A, HE-STF, 2x HE-LTF per stream
        (_, WifiPreamble::HeSu) => 4 + 4 + 8 + 4 + 8 * nss.max(1) as u64,
        (_, WifiPreamble::HeMu) => 4 + 4 + 8 + 4 + 4 + 8 * nss.max(1) as u64,
        (_, WifiPreamble::HeTb) => 4 + 4 + 8 + 8 + 8 * nss.max(1) as u64,
        // Legacy OFDM: L-SIG
        _ => 4,
    };
    SimTime::from_micros(us)
}

/// Combined preamble and header duration: the point at which the header
/// can be decoded.
pub fn preamble_and_header_duration(tx_vector: &TxVector, preamble: WifiPreamble) -> SimTime {
    preamble_duration(tx_vector, preamble) + header_duration(tx_vector, preamble)
}

/// Mode used to transmit the PLCP header.
pub fn header_mode(tx_vector: &TxVector) -> WifiMode {
    if tx_vector.mode.class.is_dsss() {
        WifiMode::dsss_1mbps()
    } else {
        WifiMode::ofdm_6mbps()
    }
}

/// Duration of the payload of `size` bytes.
///
/// Symbol counts are rounded up for standalone and last subframes; first and
/// middle subframes keep fractional symbols so an aggregate adds up to one PPDU.
pub fn payload_duration(size: u32, tx_vector: &TxVector, frequency_mhz: u16, mpdu_type: MpduType) -> SimTime {
    let rate = tx_vector.data_rate_bps();
    if rate == 0 {
        return SimTime::ZERO;
    }
    let class = tx_vector.mode.class;
    if class.is_dsss() {
        let ns = (size as f64 * 8.0 * 1e9 / rate as f64).ceil();
        return SimTime::from_nanos(ns as u64);
    }

    let symbol_ns = symbol_duration_ns(class, tx_vector.short_guard_interval);
    let bits_per_symbol = rate as f64 * symbol_ns as f64 / 1e9;
    let mut bits = size as f64 * 8.0;
    if matches!(mpdu_type, MpduType::Normal | MpduType::FirstInAggregate) {
        bits += SERVICE_BITS;
    }
    let closes_ppdu = matches!(mpdu_type, MpduType::Normal | MpduType::LastInAggregate);
    if closes_ppdu {
        bits += TAIL_BITS;
    }
    let symbols = bits / bits_per_symbol;
    let symbols = if closes_ppdu { symbols.ceil() } else { symbols };
    let mut duration = SimTime::from_nanos((symbols * symbol_ns as f64).round() as u64);

    let extended = matches!(class, ModulationClass::ErpOfdm | ModulationClass::Ht | ModulationClass::He);
    if closes_ppdu && extended && frequency_mhz < 2500 {
        duration = duration + SIGNAL_EXTENSION;
    }
    duration
}

/// Total time on air of a frame.
pub fn calculate_tx_duration(
    size: u32,
    tx_vector: &TxVector,
    preamble: WifiPreamble,
    frequency_mhz: u16,
    mpdu_type: MpduType,
) -> SimTime {
    preamble_and_header_duration(tx_vector, preamble) + payload_duration(size, tx_vector, frequency_mhz, mpdu_type)
}
