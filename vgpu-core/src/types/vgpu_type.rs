//! vGPU type name grammar.
//!
//! Time-sliced vGPU types appear as `<gpu>-<gb><series>` (e.g. `A100-40C`,
//! `M60-0Q`). MIG-backed vGPU types appear as `<gpu>-<g>-<gb><series>[attr]`
//! (e.g. `A100-1-5C`, `A100-1-5CME`, `DC-1-24QGFX`).
//!
//! A framebuffer size of `0` is valid and means 512MiB.

use crate::error::{Result, VgpuError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Time-sliced form. The GPU token may carry dash-separated alphabetic
/// qualifiers (e.g. `RTX6000-Ada-4Q`).
static TIME_SLICED_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<gpu>[A-Z0-9]+(-[a-zA-Z]+)*)-(?P<gb>0|[1-9][0-9]*)(?P<s>[ABCQ])$")
        .expect("Invalid time-sliced vGPU type regex")
});

/// MIG-backed form, with the number of GPU instances and an optional attribute.
static MIG_BACKED_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?P<gpu>[A-Z0-9]+)-(?P<g>[1-9])-(?P<gb>0|[1-9][0-9]*)",
        r"(?P<s>[ABCQ])(?P<attr>ME|NOME|MEALL|GFX)?$",
    ))
    .expect("Invalid MIG-backed vGPU type regex")
});

/// Workload class of a vGPU type, identified by the last letter of the
/// type name (`A100-5C` is a C-series type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Series {
    A,
    B,
    C,
    Q,
}

impl Series {
    pub fn as_char(self) -> char {
        match self {
            Series::A => 'A',
            Series::B => 'B',
            Series::C => 'C',
            Series::Q => 'Q',
        }
    }
}

impl TryFrom<char> for Series {
    type Error = VgpuError;

    fn try_from(c: char) -> Result<Self> {
        match c {
            'A' => Ok(Series::A),
            'B' => Ok(Series::B),
            'C' => Ok(Series::C),
            'Q' => Ok(Series::Q),
            other => Err(VgpuError::malformed(other.to_string(), "invalid series")),
        }
    }
}

/// MIG profile attribute carried as a suffix on MIG-backed type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// `+me`
    MediaExtensions,
    /// `-me`
    NoMediaExtensions,
    /// `+me.all`
    MediaExtensionsAll,
    /// `+gfx`
    Graphics,
}

impl Attribute {
    /// Suffixes in stripping order. `MEALL` must be tested before `ME`.
    pub const STRIP_ORDER: [Attribute; 4] = [
        Attribute::MediaExtensionsAll,
        Attribute::NoMediaExtensions,
        Attribute::MediaExtensions,
        Attribute::Graphics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Attribute::MediaExtensions => "ME",
            Attribute::NoMediaExtensions => "NOME",
            Attribute::MediaExtensionsAll => "MEALL",
            Attribute::Graphics => "GFX",
        }
    }
}

impl FromStr for Attribute {
    type Err = VgpuError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ME" => Ok(Attribute::MediaExtensions),
            "NOME" => Ok(Attribute::NoMediaExtensions),
            "MEALL" => Ok(Attribute::MediaExtensionsAll),
            "GFX" => Ok(Attribute::Graphics),
            other => Err(VgpuError::malformed(other, "unknown MIG profile attribute")),
        }
    }
}

/// A parsed vGPU type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VgpuType {
    /// GPU model token (e.g. "A100", "DC")
    pub gpu: String,
    /// GPU instances consumed when MIG-backed; 0 for time-sliced types
    pub g: u32,
    /// Framebuffer size in GiB (0 means 512MiB)
    pub gb: u32,
    pub series: Series,
    /// Only ever set on MIG-backed types
    pub attr: Option<Attribute>,
}

impl VgpuType {
    /// Parse a vGPU type name. Equivalent to `s.parse()`.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    /// Whether this type is layered on a MIG GPU instance.
    pub fn is_mig_backed(&self) -> bool {
        self.g > 0
    }
}

impl FromStr for VgpuType {
    type Err = VgpuError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(VgpuError::malformed(s, "empty vGPU type string"));
        }

        let caps = TIME_SLICED_REGEX
            .captures(s)
            .or_else(|| MIG_BACKED_REGEX.captures(s))
            .ok_or_else(|| VgpuError::malformed(s, "does not match any vGPU type format"))?;

        let gb_str = &caps["gb"];
        let gb: u32 = gb_str.parse().map_err(|_| {
            VgpuError::malformed(s, format!("malformed number for framebuffer size '{}'", gb_str))
        })?;

        let series_char = caps["s"].chars().next().unwrap_or_default();
        let series = Series::try_from(series_char)
            .map_err(|_| VgpuError::malformed(s, format!("invalid series '{}'", series_char)))?;

        let g = match caps.name("g") {
            Some(m) => m.as_str().parse().map_err(|_| {
                VgpuError::malformed(
                    s,
                    format!("malformed number for GPU instances '{}'", m.as_str()),
                )
            })?,
            None => 0,
        };

        let attr = caps.name("attr").map(|m| m.as_str().parse()).transpose()?;

        Ok(Self { gpu: caps["gpu"].to_string(), g, gb, series, attr })
    }
}

impl fmt::Display for VgpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.g == 0 {
            return write!(f, "{}-{}{}", self.gpu, self.gb, self.series.as_char());
        }

        let suffix = self.attr.map(Attribute::as_str).unwrap_or("");
        write!(f, "{}-{}-{}{}{}", self.gpu, self.g, self.gb, self.series.as_char(), suffix)
    }
}

/// Extract the canonical type name from a vendor-reported name that may
/// carry a product prefix.
///
/// - `"NVIDIA A100-4C"` -> `"A100-4C"`
/// - `"NVIDIA RTX Pro 6000 Blackwell DC-48C"` -> `"DC-48C"`
pub fn strip_product_prefix(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let name = trimmed.split(' ').last().unwrap_or_default();
    if name.is_empty() {
        return Err(VgpuError::malformed(raw, "unable to extract vGPU type name"));
    }
    Ok(name.to_string())
}

/// Remove at most one trailing MIG attribute suffix from a type name.
///
/// Some GPUs only expose MIG-backed types on GPU instances created with an
/// attribute while the type name itself omits it (`DC-1-24QGFX` is created
/// as `DC-1-24Q`).
pub fn strip_attribute_suffix(name: &str) -> &str {
    for attr in Attribute::STRIP_ORDER {
        if let Some(stripped) = name.strip_suffix(attr.as_str()) {
            return stripped;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vgpu_type() {
        let cases = [
            ("", false),
            ("A16-8Q", true),
            ("A16-8A", true),
            ("A16-8B", true),
            ("A16-8C", true),
            ("A16-8E", false),
            ("A100-5C", true),
            (" A100-5C", false),
            ("A100 -5C", false),
            ("A100- 5C", false),
            ("A100-5C ", false),
            ("A100-1-5C", true),
            (" A100-1-5C", false),
            ("A100 -1-5C", false),
            ("A100- 1-5C", false),
            ("A100-1 -5C", false),
            ("A100-1- 5C", false),
            ("A100-1-5 C", false),
            ("A100-1-5C ", false),
            ("A100-1-5CME", true),
            ("A100-1-5Cme", false),
            ("A100-1-5C Me", false),
            ("A100-1-5Cab", false),
            ("A100-5c", false),
            ("bogus", false),
        ];

        for (input, valid) in cases {
            let result = VgpuType::parse(input);
            assert_eq!(result.is_ok(), valid, "unexpected result for {:?}: {:?}", input, result);
        }
    }

    #[test]
    fn test_parse_fields() {
        let t = VgpuType::parse("A100-1-5CME").unwrap();
        assert_eq!(t.gpu, "A100");
        assert_eq!(t.g, 1);
        assert_eq!(t.gb, 5);
        assert_eq!(t.series, Series::C);
        assert_eq!(t.attr, Some(Attribute::MediaExtensions));

        let t = VgpuType::parse("M60-0Q").unwrap();
        assert_eq!(t.gpu, "M60");
        assert_eq!(t.g, 0);
        assert_eq!(t.gb, 0);
        assert_eq!(t.series, Series::Q);
        assert_eq!(t.attr, None);

        let t = VgpuType::parse("RTX6000-Ada-4Q").unwrap();
        assert_eq!(t.gpu, "RTX6000-Ada");
        assert_eq!(t.gb, 4);
    }

    #[test]
    fn test_round_trip() {
        for name in [
            "A100-40C",
            "A100D-80C",
            "M60-0Q",
            "RTX6000-Ada-4Q",
            "A100-1-5C",
            "A100-1-5CME",
            "A100-7-40CMEALL",
            "A100-1-5CNOME",
            "DC-1-24QGFX",
            "H100-3-40C",
        ] {
            assert_eq!(VgpuType::parse(name).unwrap().to_string(), name);
        }
    }

    #[test]
    fn test_malformed_error_carries_input() {
        match VgpuType::parse("A16-8E") {
            Err(VgpuError::Malformed { input, .. }) => assert_eq!(input, "A16-8E"),
            other => panic!("Expected Malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_mig_classification_is_unambiguous() {
        let corpus = [
            "A100-40C",
            "A100-1-5C",
            "A100-2-10C",
            "A100-3-20CME",
            "A100-7-40CMEALL",
            "A30-1-6C",
            "A30-4-24CNOME",
            "A16-16Q",
            "L4-24Q",
            "M60-0Q",
            "DC-1-24QGFX",
            "DC-48C",
            "T4-1Q",
        ];

        for name in corpus {
            let time_sliced = TIME_SLICED_REGEX.is_match(name);
            let mig_backed = MIG_BACKED_REGEX.is_match(name);
            assert!(time_sliced ^ mig_backed, "{} matched both or neither form", name);
            assert_eq!(VgpuType::parse(name).unwrap().is_mig_backed(), mig_backed);
        }
    }

    #[test]
    fn test_strip_attribute_suffix() {
        assert_eq!(strip_attribute_suffix("A100-7-40CMEALL"), "A100-7-40C");
        assert_eq!(strip_attribute_suffix("A100-1-5CNOMEME"), "A100-1-5CNOME");
        assert_eq!(strip_attribute_suffix("A100-1-5CNOME"), "A100-1-5C");
        assert_eq!(strip_attribute_suffix("A100-1-5CME"), "A100-1-5C");
        assert_eq!(strip_attribute_suffix("DC-1-24QGFX"), "DC-1-24Q");
        assert_eq!(strip_attribute_suffix("A100-40C"), "A100-40C");
    }

    #[test]
    fn test_strip_product_prefix() {
        assert_eq!(strip_product_prefix("NVIDIA A100-4C").unwrap(), "A100-4C");
        assert_eq!(
            strip_product_prefix("NVIDIA RTX Pro 6000 Blackwell DC-48C\n").unwrap(),
            "DC-48C"
        );
        assert_eq!(strip_product_prefix("GRID T4-1Q").unwrap(), "T4-1Q");
        assert_eq!(strip_product_prefix("A16-2Q").unwrap(), "A16-2Q");
        assert!(strip_product_prefix("   ").is_err());
    }
}
