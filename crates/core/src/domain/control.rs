//! Control-message decoding
//!
//! The effect selector speaks two packed formats: a four-byte serial frame
//! carrying raw parameters, and a one-byte pin state selecting a built-in
//! preset. Both are decoded here into an [`EffectConfig`]; nothing downstream
//! ever sees the raw bytes.

use crate::domain::audio::StreamConfig;
use crate::domain::config::{
    CompressorConfig, DelayConfig, EffectConfig, EffectKind, EqualizerConfig,
};
use crate::domain::dsp::DelayMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors decoding or encoding control messages
#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("Unknown effect code: {0}")]
    UnknownEffect(u8),

    #[error("Unknown preset selection {bits:#010b} for {effect}")]
    UnknownPreset { effect: EffectKind, bits: u8 },

    #[error("Unknown preset: {0}")]
    UnknownPresetName(String),

    #[error("Decoded parameters out of range: {0}")]
    OutOfRange(String),

    #[error("Value cannot be represented in a control byte: {0}")]
    Unrepresentable(String),

    #[error("Malformed control frame: {0}")]
    Malformed(String),
}

impl EffectKind {
    /// Effect code used by the serial frame
    pub fn code(&self) -> u8 {
        match self {
            EffectKind::Delay => 1,
            EffectKind::Compressor => 2,
            EffectKind::Equalizer => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(EffectKind::Delay),
            2 => Ok(EffectKind::Compressor),
            3 => Ok(EffectKind::Equalizer),
            other => Err(ControlError::UnknownEffect(other)),
        }
    }
}

// ============================================================================
// SERIAL FRAME
// ============================================================================

/// Scale between delay seconds and the first delay byte
const DELAY_TIME_SCALE: f32 = 510.0;
/// Scale between delay gain and the second delay byte
const DELAY_GAIN_SCALE: f32 = 255.0;
/// Offset added to the compressor threshold in dB
const THRESHOLD_OFFSET_DB: f32 = 200.0;
/// Offset added to each equalizer band gain in dB
const BAND_OFFSET_DB: f32 = 10.0;

/// Four-byte serial frame `[effect, p1, p2, p3]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame(pub [u8; 4]);

impl ControlFrame {
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }

    /// Decode into a validated effect configuration
    ///
    /// Parameters are checked against the default stream (48 kHz, 100-sample
    /// blocks); every frame-representable value is stream independent.
    pub fn decode(&self) -> Result<EffectConfig> {
        let [code, p1, p2, p3] = self.0;
        let effect = match EffectKind::from_code(code)? {
            EffectKind::Delay => EffectConfig::Delay(DelayConfig {
                time_s: f32::from(p1) / DELAY_TIME_SCALE,
                gain: f32::from(p2) / DELAY_GAIN_SCALE,
                mode: DelayMode::Additive,
            }),
            EffectKind::Compressor => EffectConfig::Compressor(CompressorConfig {
                threshold_db: f32::from(p1) - THRESHOLD_OFFSET_DB,
                ratio: f32::from(p2),
                window_size: None,
            }),
            EffectKind::Equalizer => EffectConfig::Equalizer(EqualizerConfig::with_gains(
                f32::from(p1) - BAND_OFFSET_DB,
                f32::from(p2) - BAND_OFFSET_DB,
                f32::from(p3) - BAND_OFFSET_DB,
            )),
        };

        effect
            .validate(&StreamConfig::default())
            .map_err(|e| ControlError::OutOfRange(e.to_string()))?;
        Ok(effect)
    }

    /// Encode an effect configuration, rounding to the nearest byte
    ///
    /// Fields the frame does not carry (delay mode, RMS window, crossovers)
    /// are dropped.
    pub fn encode(effect: &EffectConfig) -> Result<Self> {
        let code = effect.kind().code();
        let bytes = match effect {
            EffectConfig::Delay(delay) => [
                code,
                to_byte("delay time", delay.time_s * DELAY_TIME_SCALE)?,
                to_byte("delay gain", delay.gain * DELAY_GAIN_SCALE)?,
                0,
            ],
            EffectConfig::Compressor(comp) => [
                code,
                to_byte("threshold", comp.threshold_db + THRESHOLD_OFFSET_DB)?,
                to_byte("ratio", comp.ratio)?,
                0,
            ],
            EffectConfig::Equalizer(eq) => [
                code,
                to_byte("low band", eq.low_db + BAND_OFFSET_DB)?,
                to_byte("mid band", eq.mid_db + BAND_OFFSET_DB)?,
                to_byte("high band", eq.high_db + BAND_OFFSET_DB)?,
            ],
        };
        Ok(Self(bytes))
    }
}

fn to_byte(field: &str, value: f32) -> Result<u8> {
    let rounded = value.round();
    if !(0.0..=255.0).contains(&rounded) {
        return Err(ControlError::Unrepresentable(format!(
            "{} encodes to {}",
            field, value
        )));
    }
    Ok(rounded as u8)
}

impl FromStr for ControlFrame {
    type Err = ControlError;

    /// Parse `"B0,B1,B2,B3"`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(ControlError::Malformed(format!(
                "expected 4 comma-separated bytes, got {}",
                parts.len()
            )));
        }

        let mut bytes = [0u8; 4];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            *byte = part
                .parse()
                .map_err(|_| ControlError::Malformed(format!("'{}' is not a byte", part)))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for ControlFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{},{},{},{}", a, b, c, d)
    }
}

// ============================================================================
// BUILT-IN PRESETS
// ============================================================================

/// The eleven factory presets, numbered 1 to 11
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinPreset {
    LargeRoom,
    SmallRoom,
    CoffeeShop,
    CelestialImmolation,
    BassBoost,
    MidBoost,
    TrebleBoost,
    BassCut,
    MidCut,
    TrebleCut,
    Flat,
}

impl BuiltinPreset {
    pub const ALL: [BuiltinPreset; 11] = [
        BuiltinPreset::LargeRoom,
        BuiltinPreset::SmallRoom,
        BuiltinPreset::CoffeeShop,
        BuiltinPreset::CelestialImmolation,
        BuiltinPreset::BassBoost,
        BuiltinPreset::MidBoost,
        BuiltinPreset::TrebleBoost,
        BuiltinPreset::BassCut,
        BuiltinPreset::MidCut,
        BuiltinPreset::TrebleCut,
        BuiltinPreset::Flat,
    ];

    /// Preset number, 1 to 11
    pub fn number(&self) -> u8 {
        match self {
            BuiltinPreset::LargeRoom => 1,
            BuiltinPreset::SmallRoom => 2,
            BuiltinPreset::CoffeeShop => 3,
            BuiltinPreset::CelestialImmolation => 4,
            BuiltinPreset::BassBoost => 5,
            BuiltinPreset::MidBoost => 6,
            BuiltinPreset::TrebleBoost => 7,
            BuiltinPreset::BassCut => 8,
            BuiltinPreset::MidCut => 9,
            BuiltinPreset::TrebleCut => 10,
            BuiltinPreset::Flat => 11,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.number() == number)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinPreset::LargeRoom => "Large Room",
            BuiltinPreset::SmallRoom => "Small Room",
            BuiltinPreset::CoffeeShop => "Coffee Shop",
            BuiltinPreset::CelestialImmolation => "Celestial Immolation",
            BuiltinPreset::BassBoost => "Bass Boost",
            BuiltinPreset::MidBoost => "Mid Boost",
            BuiltinPreset::TrebleBoost => "Treble Boost",
            BuiltinPreset::BassCut => "Bass Cut",
            BuiltinPreset::MidCut => "Mid Cut",
            BuiltinPreset::TrebleCut => "Treble Cut",
            BuiltinPreset::Flat => "Flat",
        }
    }

    /// Look up by number or by name, ignoring case, spaces, dashes and underscores
    pub fn lookup(query: &str) -> Option<Self> {
        if let Ok(number) = query.trim().parse::<u8>() {
            return Self::from_number(number);
        }

        let normalize = |s: &str| -> String {
            s.chars()
                .filter(|c| !matches!(c, ' ' | '-' | '_'))
                .flat_map(char::to_lowercase)
                .collect()
        };
        let wanted = normalize(query);
        Self::ALL
            .iter()
            .copied()
            .find(|p| normalize(p.name()) == wanted)
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            BuiltinPreset::LargeRoom | BuiltinPreset::SmallRoom => EffectKind::Delay,
            BuiltinPreset::CoffeeShop | BuiltinPreset::CelestialImmolation => {
                EffectKind::Compressor
            }
            _ => EffectKind::Equalizer,
        }
    }

    pub fn effect_config(&self) -> EffectConfig {
        let delay = |time_s, gain| {
            EffectConfig::Delay(DelayConfig {
                time_s,
                gain,
                mode: DelayMode::Additive,
            })
        };
        let compressor = |threshold_db, ratio| {
            EffectConfig::Compressor(CompressorConfig {
                threshold_db,
                ratio,
                window_size: None,
            })
        };
        let eq = |low, mid, high| EffectConfig::Equalizer(EqualizerConfig::with_gains(low, mid, high));

        match self {
            BuiltinPreset::LargeRoom => delay(0.5, 0.5),
            BuiltinPreset::SmallRoom => delay(0.25, 1.0),
            BuiltinPreset::CoffeeShop => compressor(-12.0, 2.0),
            BuiltinPreset::CelestialImmolation => compressor(-2.0, 9.0),
            BuiltinPreset::BassBoost => eq(10.0, 0.0, 0.0),
            BuiltinPreset::MidBoost => eq(0.0, 10.0, 0.0),
            BuiltinPreset::TrebleBoost => eq(0.0, 0.0, 10.0),
            BuiltinPreset::BassCut => eq(-10.0, 0.0, 0.0),
            BuiltinPreset::MidCut => eq(0.0, -10.0, 0.0),
            BuiltinPreset::TrebleCut => eq(0.0, 0.0, -10.0),
            BuiltinPreset::Flat => eq(0.0, 0.0, 0.0),
        }
    }

    /// Pin state that selects this preset
    pub fn pins(&self) -> PinState {
        PinState::encode(*self)
    }
}

impl fmt::Display for BuiltinPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinPreset {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::lookup(s).ok_or_else(|| ControlError::UnknownPresetName(s.to_string()))
    }
}

// ============================================================================
// PIN STATE
// ============================================================================

const EFFECT_MASK: u8 = 0b0000_0011;
const PRESET_SHIFT: u8 = 2;

/// Selector pins as one byte, bit n = PDn
///
/// Bits 1..0 pick the effect (`01` delay, `10` compressor, `11` equalizer).
/// Bits 7..2 pick one preset of that effect, one-hot in table order; the
/// equalizer's flat preset sets bits 2 and 3 together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinState(pub u8);

impl PinState {
    pub fn effect_kind(&self) -> Result<EffectKind> {
        match self.0 & EFFECT_MASK {
            0b01 => Ok(EffectKind::Delay),
            0b10 => Ok(EffectKind::Compressor),
            0b11 => Ok(EffectKind::Equalizer),
            _ => Err(ControlError::UnknownEffect(0)),
        }
    }

    /// Resolve the selected built-in preset
    pub fn decode(&self) -> Result<BuiltinPreset> {
        let effect = self.effect_kind()?;
        let bits = self.0 >> PRESET_SHIFT;

        let preset = match (effect, bits) {
            (EffectKind::Delay, 0b01) => BuiltinPreset::LargeRoom,
            (EffectKind::Delay, 0b10) => BuiltinPreset::SmallRoom,
            (EffectKind::Compressor, 0b01) => BuiltinPreset::CoffeeShop,
            (EffectKind::Compressor, 0b10) => BuiltinPreset::CelestialImmolation,
            (EffectKind::Equalizer, 0b00_0001) => BuiltinPreset::BassBoost,
            (EffectKind::Equalizer, 0b00_0010) => BuiltinPreset::MidBoost,
            (EffectKind::Equalizer, 0b00_0100) => BuiltinPreset::TrebleBoost,
            (EffectKind::Equalizer, 0b00_1000) => BuiltinPreset::BassCut,
            (EffectKind::Equalizer, 0b01_0000) => BuiltinPreset::MidCut,
            (EffectKind::Equalizer, 0b10_0000) => BuiltinPreset::TrebleCut,
            (EffectKind::Equalizer, 0b00_0011) => BuiltinPreset::Flat,
            (effect, bits) => return Err(ControlError::UnknownPreset { effect, bits }),
        };
        Ok(preset)
    }

    pub fn encode(preset: BuiltinPreset) -> Self {
        let effect = match preset.kind() {
            EffectKind::Delay => 0b01,
            EffectKind::Compressor => 0b10,
            EffectKind::Equalizer => 0b11,
        };
        let bits: u8 = match preset {
            BuiltinPreset::LargeRoom | BuiltinPreset::CoffeeShop | BuiltinPreset::BassBoost => {
                0b00_0001
            }
            BuiltinPreset::SmallRoom
            | BuiltinPreset::CelestialImmolation
            | BuiltinPreset::MidBoost => 0b00_0010,
            BuiltinPreset::TrebleBoost => 0b00_0100,
            BuiltinPreset::BassCut => 0b00_1000,
            BuiltinPreset::MidCut => 0b01_0000,
            BuiltinPreset::TrebleCut => 0b10_0000,
            BuiltinPreset::Flat => 0b00_0011,
        };
        Self(effect | (bits << PRESET_SHIFT))
    }
}

impl FromStr for PinState {
    type Err = ControlError;

    /// Parse a decimal, `0x` hex or `0b` binary byte
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parsed = if let Some(hex) = s.strip_prefix("0x") {
            u8::from_str_radix(hex, 16)
        } else if let Some(bin) = s.strip_prefix("0b") {
            u8::from_str_radix(&bin.replace('_', ""), 2)
        } else {
            s.parse()
        };
        parsed
            .map(PinState)
            .map_err(|_| ControlError::Malformed(format!("'{}' is not a pin byte", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Serial frame
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_delay_frame() {
        let effect = ControlFrame::new([1, 255, 128, 0]).decode().unwrap();
        match effect {
            EffectConfig::Delay(delay) => {
                assert!((delay.time_s - 0.5).abs() < 1e-6);
                assert!((delay.gain - 128.0 / 255.0).abs() < 1e-6);
                assert_eq!(delay.mode, DelayMode::Additive);
            }
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_decode_compressor_frame() {
        let effect = ControlFrame::new([2, 188, 2, 0]).decode().unwrap();
        assert_eq!(
            effect,
            EffectConfig::Compressor(CompressorConfig {
                threshold_db: -12.0,
                ratio: 2.0,
                window_size: None,
            })
        );
    }

    #[test]
    fn test_decode_equalizer_frame() {
        let effect = ControlFrame::new([3, 20, 10, 0]).decode().unwrap();
        assert_eq!(
            effect,
            EffectConfig::Equalizer(EqualizerConfig::with_gains(10.0, 0.0, -10.0))
        );
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert_eq!(
            ControlFrame::new([4, 0, 0, 0]).decode(),
            Err(ControlError::UnknownEffect(4))
        );
        // zero delay time
        assert!(matches!(
            ControlFrame::new([1, 0, 100, 0]).decode(),
            Err(ControlError::OutOfRange(_))
        ));
        // threshold +10 dB
        assert!(matches!(
            ControlFrame::new([2, 210, 2, 0]).decode(),
            Err(ControlError::OutOfRange(_))
        ));
        // ratio 0
        assert!(ControlFrame::new([2, 190, 0, 0]).decode().is_err());
        // band +20 dB
        assert!(ControlFrame::new([3, 30, 10, 10]).decode().is_err());
    }

    #[test]
    fn test_encode_matches_gui_scaling() {
        let frame = ControlFrame::encode(&BuiltinPreset::LargeRoom.effect_config()).unwrap();
        assert_eq!(frame.bytes(), [1, 255, 128, 0]);

        let frame = ControlFrame::encode(&BuiltinPreset::CelestialImmolation.effect_config()).unwrap();
        assert_eq!(frame.bytes(), [2, 198, 9, 0]);

        let frame = ControlFrame::encode(&BuiltinPreset::TrebleCut.effect_config()).unwrap();
        assert_eq!(frame.bytes(), [3, 10, 10, 0]);
    }

    #[test]
    fn test_encode_rejects_unrepresentable() {
        let effect = EffectConfig::Equalizer(EqualizerConfig::with_gains(-15.0, 0.0, 0.0));
        assert!(matches!(
            ControlFrame::encode(&effect),
            Err(ControlError::Unrepresentable(_))
        ));
    }

    #[test]
    fn test_builtin_presets_survive_frames() {
        for preset in BuiltinPreset::ALL {
            let frame = ControlFrame::encode(&preset.effect_config()).unwrap();
            let decoded = frame.decode().unwrap();
            assert_eq!(decoded.kind(), preset.kind(), "{}", preset);
        }
    }

    #[test]
    fn test_frame_parse_and_display() {
        let frame: ControlFrame = "3, 20,10,0".parse().unwrap();
        assert_eq!(frame.bytes(), [3, 20, 10, 0]);
        assert_eq!(frame.to_string(), "3,20,10,0");

        assert!("1,2,3".parse::<ControlFrame>().is_err());
        assert!("1,2,3,256".parse::<ControlFrame>().is_err());
    }

    // -------------------------------------------------------------------------
    // Presets and pins
    // -------------------------------------------------------------------------

    #[test]
    fn test_preset_numbers_and_lookup() {
        for (i, preset) in BuiltinPreset::ALL.iter().enumerate() {
            assert_eq!(preset.number() as usize, i + 1);
        }
        assert_eq!(BuiltinPreset::lookup("4"), Some(BuiltinPreset::CelestialImmolation));
        assert_eq!(BuiltinPreset::lookup("bass_boost"), Some(BuiltinPreset::BassBoost));
        assert_eq!(BuiltinPreset::lookup("Treble-Cut"), Some(BuiltinPreset::TrebleCut));
        assert_eq!(BuiltinPreset::lookup("12"), None);
        assert!("nope".parse::<BuiltinPreset>().is_err());
    }

    #[test]
    fn test_builtin_presets_are_valid() {
        let stream = StreamConfig::default();
        for preset in BuiltinPreset::ALL {
            assert!(preset.effect_config().validate(&stream).is_ok(), "{}", preset);
            assert_eq!(preset.effect_config().kind(), preset.kind());
        }
    }

    #[test]
    fn test_pin_table() {
        assert_eq!(BuiltinPreset::LargeRoom.pins(), PinState(0b0000_0101));
        assert_eq!(BuiltinPreset::SmallRoom.pins(), PinState(0b0000_1001));
        assert_eq!(BuiltinPreset::CoffeeShop.pins(), PinState(0b0000_0110));
        assert_eq!(BuiltinPreset::TrebleBoost.pins(), PinState(0b0001_0011));
        assert_eq!(BuiltinPreset::TrebleCut.pins(), PinState(0b1000_0011));
        assert_eq!(BuiltinPreset::Flat.pins(), PinState(0b0000_1111));
    }

    #[test]
    fn test_pins_decode_every_preset() {
        for preset in BuiltinPreset::ALL {
            assert_eq!(preset.pins().decode(), Ok(preset));
        }
    }

    #[test]
    fn test_pins_reject_invalid_states() {
        assert!(matches!(
            PinState(0b0000_0100).decode(),
            Err(ControlError::UnknownEffect(_))
        ));
        // two delay presets at once
        assert!(matches!(
            PinState(0b0000_1101).decode(),
            Err(ControlError::UnknownPreset { .. })
        ));
        // no preset bit
        assert!(PinState(0b0000_0011).decode().is_err());
    }

    #[test]
    fn test_pin_parse() {
        assert_eq!("0x0f".parse::<PinState>(), Ok(PinState(15)));
        assert_eq!("0b0000_0101".parse::<PinState>(), Ok(PinState(5)));
        assert_eq!("9".parse::<PinState>(), Ok(PinState(9)));
        assert!("0x100".parse::<PinState>().is_err());
    }
}
