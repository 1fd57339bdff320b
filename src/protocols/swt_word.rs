//! 76-bit SWT word.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AlfError;

/// Which parts of an SWT word travel over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwtWordSize {
    /// Low 32 bits only
    #[default]
    Low,
    /// Low and medium 32-bit parts
    #[serde(alias = "med")]
    Medium,
    /// All 76 bits
    High,
}

impl FromStr for SwtWordSize {
    type Err = AlfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(SwtWordSize::Low),
            "med" | "medium" => Ok(SwtWordSize::Medium),
            "high" => Ok(SwtWordSize::High),
            other => Err(AlfError::Parse(format!(
                "cannot parse SWT word size from \"{other}\", expected \"low\", \"med\", \"medium\" or \"high\""
            ))),
        }
    }
}

/// One SWT word: 32 low bits, 32 medium bits and 12 high bits.
///
/// Equality compares the value only, not the size.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SwtWord {
    low: u32,
    med: u32,
    high: u16,
    #[serde(default)]
    size: SwtWordSize,
}

impl SwtWord {
    pub fn new(low: u32, med: u32, high: u16, size: SwtWordSize) -> Self {
        Self {
            low,
            med,
            high: high & 0xfff,
            size,
        }
    }

    pub fn low(&self) -> u32 {
        self.low
    }

    pub fn med(&self) -> u32 {
        self.med
    }

    pub fn high(&self) -> u16 {
        self.high & 0xfff
    }

    pub fn size(&self) -> SwtWordSize {
        self.size
    }

    pub fn with_size(mut self, size: SwtWordSize) -> Self {
        self.size = size;
        self
    }

    pub fn set_low(&mut self, low: u32) {
        self.low = low;
    }

    pub fn set_med(&mut self, med: u32) {
        self.med = med;
    }

    pub fn set_high(&mut self, high: u16) {
        self.high = high & 0xfff;
    }

    /// Low and medium parts as one integer; the high part is dropped.
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.med) << 32) | u64::from(self.low)
    }
}

impl PartialEq for SwtWord {
    fn eq(&self, other: &Self) -> bool {
        self.low == other.low && self.med == other.med && self.high() == other.high()
    }
}

impl Eq for SwtWord {}

impl From<u64> for SwtWord {
    fn from(value: u64) -> Self {
        Self::new(
            (value & 0xffff_ffff) as u32,
            (value >> 32) as u32,
            0,
            SwtWordSize::Low,
        )
    }
}

impl From<u32> for SwtWord {
    fn from(value: u32) -> Self {
        Self::from(u64::from(value))
    }
}

impl fmt::Display for SwtWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03x}{:08x}{:08x}", self.high(), self.med, self.low)
    }
}

impl FromStr for SwtWord {
    type Err = AlfError;

    /// Parse up to 19 hex digits, with or without a leading `0x`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AlfError::Parse(format!("invalid SWT word \"{s}\"")));
        }
        if digits.len() > 19 {
            return Err(AlfError::Parse(format!(
                "SWT word \"{s}\" does not fit in 76 bits"
            )));
        }

        let padded = format!("{digits:0>19}");
        let parse = |part: &str| {
            u32::from_str_radix(part, 16)
                .map_err(|e| AlfError::Parse(format!("invalid SWT word \"{s}\": {e}")))
        };
        let high = parse(&padded[0..3])? as u16;
        let med = parse(&padded[3..11])?;
        let low = parse(&padded[11..19])?;
        Ok(Self::new(low, med, high, SwtWordSize::Low))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u64_splits_parts() {
        let word = SwtWord::from(0x1234_5678_9abc_def0_u64);
        assert_eq!(word.low(), 0x9abc_def0);
        assert_eq!(word.med(), 0x1234_5678);
        assert_eq!(word.high(), 0);
        assert_eq!(word.as_u64(), 0x1234_5678_9abc_def0);
    }

    #[test]
    fn test_display_pads_to_19_digits() {
        let word = SwtWord::new(0xdeadbeef, 0x1, 0xabc, SwtWordSize::High);
        assert_eq!(word.to_string(), "0xabc00000001deadbeef");
    }

    #[test]
    fn test_parse_full_width() {
        let word: SwtWord = "0xabc00000001deadbeef".parse().unwrap();
        assert_eq!(word, SwtWord::new(0xdeadbeef, 0x1, 0xabc, SwtWordSize::High));
        let short: SwtWord = "dd".parse().unwrap();
        assert_eq!(short, SwtWord::from(0xdd_u32));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("0x".parse::<SwtWord>().is_err());
        assert!("0xzz".parse::<SwtWord>().is_err());
        assert!("0x11112222333344445555".parse::<SwtWord>().is_err());
    }

    #[test]
    fn test_equality_ignores_size_and_masks_high() {
        let a = SwtWord::new(1, 2, 0xfff, SwtWordSize::High);
        let b = SwtWord::new(1, 2, 0xffff, SwtWordSize::Low);
        assert_eq!(a, b);
    }

    #[test]
    fn test_size_from_str() {
        assert_eq!("MED".parse::<SwtWordSize>().unwrap(), SwtWordSize::Medium);
        assert!("huge".parse::<SwtWordSize>().is_err());
    }
}
