//! Transmission descriptor types.
//!
//! A [`TxVector`] describes how a PPDU was put on the air: modulation, width,
//! guard interval, spatial streams, BSS color and an optional resource unit.
//! Descriptors are plain values, copied between the transmit and receive side.

use serde::{Deserialize, Serialize};

// ============================================================================
// Modulation
// ============================================================================

/// Modulation class of a [`WifiMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationClass {
    /// 802.11b DSSS (1 and 2 Mb/s).
    Dsss,
    /// 802.11b HR/DSSS (5.5 and 11 Mb/s).
    HrDsss,
    /// 802.11g ERP-OFDM.
    ErpOfdm,
    /// 802.11a OFDM.
    Ofdm,
    /// 802.11n HT.
    Ht,
    /// 802.11ac VHT.
    Vht,
    /// 802.11ax HE.
    He,
}

impl ModulationClass {
    /// Highest MCS index defined for the class.
    pub fn max_mcs(&self) -> u8 {
        match self {
            ModulationClass::Dsss | ModulationClass::HrDsss => 1,
            ModulationClass::ErpOfdm | ModulationClass::Ofdm | ModulationClass::Ht => 7,
            ModulationClass::Vht => 9,
            ModulationClass::He => 11,
        }
    }

    /// Whether the class uses an MCS index on the air (HT and later).
    pub fn uses_mcs(&self) -> bool {
        matches!(self, ModulationClass::Ht | ModulationClass::Vht | ModulationClass::He)
    }

    /// Whether the class is one of the DSSS flavours.
    pub fn is_dsss(&self) -> bool {
        matches!(self, ModulationClass::Dsss | ModulationClass::HrDsss)
    }

    /// Short label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ModulationClass::Dsss => "dsss",
            ModulationClass::HrDsss => "hr_dsss",
            ModulationClass::ErpOfdm => "erp_ofdm",
            ModulationClass::Ofdm => "ofdm",
            ModulationClass::Ht => "ht",
            ModulationClass::Vht => "vht",
            ModulationClass::He => "he",
        }
    }
}

/// Forward error correction code rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRate {
    /// No convolutional coding (DSSS/CCK).
    Uncoded,
    /// Rate 1/2.
    Half,
    /// Rate 2/3.
    TwoThirds,
    /// Rate 3/4.
    ThreeQuarters,
    /// Rate 5/6.
    FiveSixths,
}

impl CodeRate {
    /// Code rate as a ratio.
    pub fn ratio(&self) -> f64 {
        match self {
            CodeRate::Uncoded => 1.0,
            CodeRate::Half => 1.0 / 2.0,
            CodeRate::TwoThirds => 2.0 / 3.0,
            CodeRate::ThreeQuarters => 3.0 / 4.0,
            CodeRate::FiveSixths => 5.0 / 6.0,
        }
    }
}

/// A modulation and coding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WifiMode {
    /// Modulation class.
    pub class: ModulationClass,
    /// MCS index within the class. For DSSS/OFDM classes this is the rate index.
    pub mcs: u8,
}

// (constellation size, code rate) per MCS for the HT family, indexed by MCS.
const HT_FAMILY_TABLE: [(u16, CodeRate); 12] = [
    (2, CodeRate::Half),
    (4, CodeRate::Half),
    (4, CodeRate::ThreeQuarters),
    (16, CodeRate::Half),
    (16, CodeRate::ThreeQuarters),
    (64, CodeRate::TwoThirds),
    (64, CodeRate::ThreeQuarters),
    (64, CodeRate::FiveSixths),
    (256, CodeRate::ThreeQuarters),
    (256, CodeRate::FiveSixths),
    (1024, CodeRate::ThreeQuarters),
    (1024, CodeRate::FiveSixths),
];

// Legacy OFDM rate index 0..=7 (6 to 54 Mb/s).
const OFDM_TABLE: [(u16, CodeRate); 8] = [
    (2, CodeRate::Half),
    (2, CodeRate::ThreeQuarters),
    (4, CodeRate::Half),
    (4, CodeRate::ThreeQuarters),
    (16, CodeRate::Half),
    (16, CodeRate::ThreeQuarters),
    (64, CodeRate::TwoThirds),
    (64, CodeRate::ThreeQuarters),
];

impl WifiMode {
    /// Create a mode. The MCS is clamped to the class maximum.
    pub fn new(class: ModulationClass, mcs: u8) -> Self {
        WifiMode {
            class,
            mcs: mcs.min(class.max_mcs()),
        }
    }

    /// HE mode with the given MCS.
    pub fn he(mcs: u8) -> Self {
        Self::new(ModulationClass::He, mcs)
    }

    /// Legacy OFDM 6 Mb/s, the mode used to signal PLCP headers.
    pub fn ofdm_6mbps() -> Self {
        Self::new(ModulationClass::Ofdm, 0)
    }

    /// DSSS 1 Mb/s, the mode used to signal DSSS PLCP headers.
    pub fn dsss_1mbps() -> Self {
        Self::new(ModulationClass::Dsss, 0)
    }

    /// Number of points in the constellation.
    pub fn constellation_size(&self) -> u16 {
        match self.class {
            // DBPSK / DQPSK
            ModulationClass::Dsss => 2 << self.mcs,
            // CCK 5.5 / 11 carry 4 or 8 bits per symbol
            ModulationClass::HrDsss => 16 << (4 * self.mcs as u16),
            ModulationClass::ErpOfdm | ModulationClass::Ofdm => OFDM_TABLE[self.mcs as usize].0,
            _ => HT_FAMILY_TABLE[self.mcs as usize].0,
        }
    }

    /// Coding rate of the mode.
    pub fn code_rate(&self) -> CodeRate {
        match self.class {
            ModulationClass::Dsss | ModulationClass::HrDsss => CodeRate::Uncoded,
            ModulationClass::ErpOfdm | ModulationClass::Ofdm => OFDM_TABLE[self.mcs as usize].1,
            _ => HT_FAMILY_TABLE[self.mcs as usize].1,
        }
    }

    /// Data rate in bits per second for the given descriptor parameters.
    pub fn data_rate_bps(&self, tx_vector: &TxVector) -> u64 {
        match self.class {
            ModulationClass::Dsss => [1_000_000, 2_000_000][self.mcs as usize],
            ModulationClass::HrDsss => [5_500_000, 11_000_000][self.mcs as usize],
            _ => {
                let bits_per_subcarrier = (self.constellation_size() as f64).log2();
                let subcarriers = data_subcarriers(self.class, tx_vector) as f64;
                let streams = if self.class.uses_mcs() {
                    tx_vector.nss.max(1) as f64
                } else {
                    1.0
                };
                let symbol_s = symbol_duration_ns(self.class, tx_vector.short_guard_interval) as f64 * 1e-9;
                (subcarriers * bits_per_subcarrier * self.code_rate().ratio() * streams / symbol_s).round() as u64
            }
        }
    }
}

impl std::fmt::Display for WifiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-mcs{}", self.class.as_label(), self.mcs)
    }
}

/// Number of data subcarriers used by a mode class for a descriptor.
pub fn data_subcarriers(class: ModulationClass, tx_vector: &TxVector) -> u16 {
    match class {
        ModulationClass::Dsss | ModulationClass::HrDsss => 1,
        ModulationClass::ErpOfdm | ModulationClass::Ofdm => 48,
        ModulationClass::Ht | ModulationClass::Vht => match tx_vector.channel_width_mhz {
            0..=20 => 52,
            21..=40 => 108,
            41..=80 => 234,
            _ => 468,
        },
        ModulationClass::He => match tx_vector.ru {
            Some(ru) => ru.size.data_subcarriers(),
            None => match tx_vector.channel_width_mhz {
                0..=20 => 234,
                21..=40 => 468,
                41..=80 => 980,
                _ => 1960,
            },
        },
    }
}

/// OFDM symbol duration including guard interval, in nanoseconds.
pub fn symbol_duration_ns(class: ModulationClass, short_guard_interval: bool) -> u64 {
    match class {
        ModulationClass::Dsss | ModulationClass::HrDsss => 1_000,
        ModulationClass::ErpOfdm | ModulationClass::Ofdm => 4_000,
        ModulationClass::Ht | ModulationClass::Vht => {
            if short_guard_interval {
                3_600
            } else {
                4_000
            }
        }
        ModulationClass::He => {
            if short_guard_interval {
                12_800 + 800
            } else {
                12_800 + 3_200
            }
        }
    }
}

// ============================================================================
// Resource Units
// ============================================================================

/// Resource unit size in tones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuSize {
    /// 26-tone RU.
    #[serde(rename = "26")]
    Tones26,
    /// 52-tone RU.
    #[serde(rename = "52")]
    Tones52,
    /// 106-tone RU.
    #[serde(rename = "106")]
    Tones106,
    /// 242-tone RU (a 20 MHz channel).
    #[serde(rename = "242")]
    Tones242,
    /// 484-tone RU.
    #[serde(rename = "484")]
    Tones484,
    /// 996-tone RU.
    #[serde(rename = "996")]
    Tones996,
}

impl RuSize {
    /// Total tones of the RU.
    pub fn tones(&self) -> u16 {
        match self {
            RuSize::Tones26 => 26,
            RuSize::Tones52 => 52,
            RuSize::Tones106 => 106,
            RuSize::Tones242 => 242,
            RuSize::Tones484 => 484,
            RuSize::Tones996 => 996,
        }
    }

    /// Data subcarriers carried by the RU.
    pub fn data_subcarriers(&self) -> u16 {
        match self {
            RuSize::Tones26 => 24,
            RuSize::Tones52 => 48,
            RuSize::Tones106 => 102,
            RuSize::Tones242 => 234,
            RuSize::Tones484 => 468,
            RuSize::Tones996 => 980,
        }
    }
}

/// A resource unit allocation inside the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceUnit {
    /// RU index within the channel.
    pub index: u8,
    /// RU size.
    pub size: RuSize,
}

/// HE subcarrier spacing in Hz.
pub const HE_SUBCARRIER_SPACING_HZ: u64 = 78_125;

impl ResourceUnit {
    /// Create a resource unit.
    pub fn new(index: u8, size: RuSize) -> Self {
        ResourceUnit { index, size }
    }

    /// Occupied bandwidth in Hz.
    pub fn bandwidth_hz(&self) -> u64 {
        self.size.tones() as u64 * HE_SUBCARRIER_SPACING_HZ
    }
}

// ============================================================================
// Descriptor
// ============================================================================

/// PHY parameters of one transmission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TxVector {
    /// Payload mode.
    pub mode: WifiMode,
    /// Transmit power level index into the station's power range.
    pub tx_power_level: u8,
    /// Channel width in MHz.
    pub channel_width_mhz: u16,
    /// Short guard interval.
    pub short_guard_interval: bool,
    /// Number of spatial streams.
    pub nss: u8,
    /// BSS color. Zero means unset.
    pub color: u8,
    /// Resource unit, or `None` for a whole-channel transmission.
    pub ru: Option<ResourceUnit>,
}

impl TxVector {
    /// Whole-channel, single-stream, 20 MHz descriptor for `mode`.
    pub fn new(mode: WifiMode) -> Self {
        TxVector {
            mode,
            tx_power_level: 0,
            channel_width_mhz: 20,
            short_guard_interval: false,
            nss: 1,
            color: 0,
            ru: None,
        }
    }

    /// Set the channel width.
    pub fn with_channel_width(mut self, mhz: u16) -> Self {
        self.channel_width_mhz = mhz;
        self
    }

    /// Set the resource unit.
    pub fn with_ru(mut self, ru: ResourceUnit) -> Self {
        self.ru = Some(ru);
        self
    }

    /// Set the number of spatial streams.
    pub fn with_nss(mut self, nss: u8) -> Self {
        self.nss = nss;
        self
    }

    /// Set the guard interval flag.
    pub fn with_short_guard_interval(mut self, short: bool) -> Self {
        self.short_guard_interval = short;
        self
    }

    /// Set the transmit power level.
    pub fn with_power_level(mut self, level: u8) -> Self {
        self.tx_power_level = level;
        self
    }

    /// Whether this descriptor covers the whole channel.
    pub fn is_full_channel(&self) -> bool {
        self.ru.is_none()
    }

    /// Occupied bandwidth in Hz, narrowed to the RU if one is set.
    pub fn bandwidth_hz(&self) -> u64 {
        match self.ru {
            Some(ru) => ru.bandwidth_hz(),
            None => self.channel_width_mhz as u64 * 1_000_000,
        }
    }

    /// Payload data rate in bits per second.
    pub fn data_rate_bps(&self) -> u64 {
        self.mode.data_rate_bps(self)
    }
}

/// PLCP preamble format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WifiPreamble {
    /// DSSS long preamble.
    Long,
    /// DSSS short preamble.
    Short,
    /// HT mixed format.
    HtMixed,
    /// HT greenfield.
    HtGreenfield,
    /// VHT single user.
    VhtSu,
    /// HE single user.
    HeSu,
    /// HE multi user (downlink OFDMA).
    HeMu,
    /// HE trigger based (uplink OFDMA).
    HeTb,
    /// No preamble: a continuation subframe of an aggregate.
    None,
}

impl WifiPreamble {
    /// Whether a preamble is actually sent.
    pub fn is_present(&self) -> bool {
        !matches!(self, WifiPreamble::None)
    }
}

/// Position of an MPDU with respect to aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MpduType {
    /// A standalone MPDU.
    Normal,
    /// First subframe of an A-MPDU.
    FirstInAggregate,
    /// Middle subframe of an A-MPDU.
    MiddleInAggregate,
    /// Last subframe of an A-MPDU.
    LastInAggregate,
}

impl MpduType {
    /// Whether the MPDU is part of an aggregate.
    pub fn is_aggregated(&self) -> bool {
        !matches!(self, MpduType::Normal)
    }
}

// ============================================================================
// Packet
// ============================================================================

/// A-MPDU tag carried by every subframe of an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmpduTag {
    /// Number of subframes still to come, including this one.
    pub remaining_mpdus: u16,
}

/// A frame handed to the PHY. The payload itself is not modelled, only its size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiPacket {
    /// Unique packet identifier.
    pub uid: u64,
    /// Size in bytes.
    pub size: u32,
    /// A-MPDU tag, if the packet is an aggregate subframe.
    pub ampdu: Option<AmpduTag>,
}

impl WifiPacket {
    /// Create a packet without an A-MPDU tag.
    pub fn new(uid: u64, size: u32) -> Self {
        WifiPacket { uid, size, ampdu: None }
    }

    /// Attach an A-MPDU tag.
    pub fn with_ampdu(mut self, remaining_mpdus: u16) -> Self {
        self.ampdu = Some(AmpduTag { remaining_mpdus });
        self
    }
}
