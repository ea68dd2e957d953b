//! Effect parameter store
//!
//! Holds the 13 host-visible parameters of the threshold effect and exposes
//! them through the indexed get/set contract the host uses. Floats are stored
//! verbatim; booleans travel as float-encoded values where "true" is any
//! value strictly greater than zero.

use std::fmt;

/// Number of host-visible parameters.
pub const PARAM_COUNT: usize = 13;

/// Stable parameter indices, as enumerated to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ParamIndex {
    Threshold = 0,
    Smoothness = 1,
    Auto = 2,
    TwoTone = 3,
    Chroma = 4,
    Red1 = 5,
    Grn1 = 6,
    Blu1 = 7,
    Alf1 = 8,
    Red2 = 9,
    Grn2 = 10,
    Blu2 = 11,
    Alf2 = 12,
}

impl ParamIndex {
    /// Map a raw host index to a parameter, or `None` if out of range.
    pub fn from_index(index: usize) -> Option<Self> {
        use ParamIndex::*;
        const ALL: [ParamIndex; PARAM_COUNT] = [
            Threshold, Smoothness, Auto, TwoTone, Chroma, Red1, Grn1, Blu1, Alf1, Red2, Grn2,
            Blu2, Alf2,
        ];
        ALL.get(index).copied()
    }

    /// Display name as shown to the host.
    pub fn name(self) -> &'static str {
        match self {
            ParamIndex::Threshold => "Threshold",
            ParamIndex::Smoothness => "Smoothness",
            ParamIndex::Auto => "Auto",
            ParamIndex::TwoTone => "Two tone",
            ParamIndex::Chroma => "Chroma",
            ParamIndex::Red1 => "Red 1",
            ParamIndex::Grn1 => "Green 1",
            ParamIndex::Blu1 => "Blue 1",
            ParamIndex::Alf1 => "Alpha 1",
            ParamIndex::Red2 => "Red 2",
            ParamIndex::Grn2 => "Green 2",
            ParamIndex::Blu2 => "Blue 2",
            ParamIndex::Alf2 => "Alpha 2",
        }
    }

    /// Whether this parameter is a float-encoded boolean.
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            ParamIndex::Auto | ParamIndex::TwoTone | ParamIndex::Chroma
        )
    }
}

/// Error returned when the host passes an index outside 0..13.
///
/// The failed call has no effect on any stored parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidParamIndex(pub usize);

impl fmt::Display for InvalidParamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parameter index {} out of range (0..{})", self.0, PARAM_COUNT)
    }
}

impl std::error::Error for InvalidParamIndex {}

/// The effect configuration, single source of truth for a frame.
#[derive(Clone, Debug)]
pub struct ParameterStore {
    user_threshold: f32,
    smoothness: f32,
    auto: bool,
    two_tone: bool,
    chroma: bool,
    color1: [f32; 4],
    color2: [f32; 4],
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self {
            user_threshold: 0.5,
            smoothness: 0.0,
            auto: false,
            two_tone: false,
            chroma: false,
            color1: [1.0, 0.82, 1.0, 1.0],
            color2: [0.93, 0.0, 0.0, 1.0],
        }
    }
}

impl ParameterStore {
    /// Create a store with the default parameter values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a parameter by host index. Booleans read back as 0.0 or 1.0.
    pub fn get(&self, index: usize) -> Result<f32, InvalidParamIndex> {
        let param = ParamIndex::from_index(index).ok_or(InvalidParamIndex(index))?;
        Ok(match param {
            ParamIndex::Threshold => self.user_threshold,
            ParamIndex::Smoothness => self.smoothness,
            ParamIndex::Auto => bool_to_float(self.auto),
            ParamIndex::TwoTone => bool_to_float(self.two_tone),
            ParamIndex::Chroma => bool_to_float(self.chroma),
            ParamIndex::Red1 => self.color1[0],
            ParamIndex::Grn1 => self.color1[1],
            ParamIndex::Blu1 => self.color1[2],
            ParamIndex::Alf1 => self.color1[3],
            ParamIndex::Red2 => self.color2[0],
            ParamIndex::Grn2 => self.color2[1],
            ParamIndex::Blu2 => self.color2[2],
            ParamIndex::Alf2 => self.color2[3],
        })
    }

    /// Write a parameter by host index.
    ///
    /// Floats are stored exactly as given, including values outside [0, 1];
    /// any clamping is the compositor's business. Booleans coerce with the
    /// host's asymmetric rule: strictly positive is true, everything else
    /// (zero, negative, and so on) is false.
    pub fn set(&mut self, index: usize, value: f32) -> Result<(), InvalidParamIndex> {
        let param = ParamIndex::from_index(index).ok_or(InvalidParamIndex(index))?;
        match param {
            ParamIndex::Threshold => self.user_threshold = value,
            ParamIndex::Smoothness => self.smoothness = value,
            ParamIndex::Auto => self.auto = value > 0.0,
            ParamIndex::TwoTone => self.two_tone = value > 0.0,
            ParamIndex::Chroma => self.chroma = value > 0.0,
            ParamIndex::Red1 => self.color1[0] = value,
            ParamIndex::Grn1 => self.color1[1] = value,
            ParamIndex::Blu1 => self.color1[2] = value,
            ParamIndex::Alf1 => self.color1[3] = value,
            ParamIndex::Red2 => self.color2[0] = value,
            ParamIndex::Grn2 => self.color2[1] = value,
            ParamIndex::Blu2 => self.color2[2] = value,
            ParamIndex::Alf2 => self.color2[3] = value,
        }
        Ok(())
    }

    /// User threshold bias (Threshold slider, unclamped).
    pub fn user_threshold(&self) -> f32 {
        self.user_threshold
    }

    /// Width of the dark/light transition band.
    pub fn smoothness(&self) -> f32 {
        self.smoothness
    }

    /// Whether the adaptive threshold is active.
    pub fn auto(&self) -> bool {
        self.auto
    }

    /// Two-tone mode flag.
    pub fn two_tone(&self) -> bool {
        self.two_tone
    }

    /// Chroma mode flag.
    pub fn chroma(&self) -> bool {
        self.chroma
    }

    /// RGBA of the dark class.
    pub fn color1(&self) -> [f32; 4] {
        self.color1
    }

    /// RGBA of the light class.
    pub fn color2(&self) -> [f32; 4] {
        self.color2
    }
}

fn bool_to_float(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_declared_values() {
        let store = ParameterStore::new();
        assert_eq!(store.get(ParamIndex::Threshold as usize).unwrap(), 0.5);
        assert_eq!(store.get(ParamIndex::Smoothness as usize).unwrap(), 0.0);
        assert_eq!(store.get(ParamIndex::Auto as usize).unwrap(), 0.0);
        assert_eq!(store.get(ParamIndex::TwoTone as usize).unwrap(), 0.0);
        assert_eq!(store.get(ParamIndex::Chroma as usize).unwrap(), 0.0);
        assert_eq!(store.color1(), [1.0, 0.82, 1.0, 1.0]);
        assert_eq!(store.color2(), [0.93, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn boolean_coercion_is_asymmetric() {
        let mut store = ParameterStore::new();

        store.set(ParamIndex::Auto as usize, -3.0).unwrap();
        assert!(!store.auto());

        store.set(ParamIndex::Auto as usize, 0.0001).unwrap();
        assert!(store.auto());

        // Exactly zero is false, not an edge case of true.
        store.set(ParamIndex::Auto as usize, 0.0).unwrap();
        assert!(!store.auto());

        store.set(ParamIndex::TwoTone as usize, 1.0).unwrap();
        assert_eq!(store.get(ParamIndex::TwoTone as usize).unwrap(), 1.0);
    }

    #[test]
    fn floats_are_stored_verbatim() {
        let mut store = ParameterStore::new();
        store.set(ParamIndex::Threshold as usize, 1.75).unwrap();
        assert_eq!(store.user_threshold(), 1.75);

        store.set(ParamIndex::Smoothness as usize, -0.25).unwrap();
        assert_eq!(store.smoothness(), -0.25);

        store.set(ParamIndex::Grn2 as usize, 2.5).unwrap();
        assert_eq!(store.color2()[1], 2.5);
    }

    #[test]
    fn out_of_range_index_reports_error_and_leaves_state() {
        let mut store = ParameterStore::new();
        let before = store.clone();

        assert_eq!(store.get(PARAM_COUNT), Err(InvalidParamIndex(PARAM_COUNT)));
        assert_eq!(store.set(99, 0.7), Err(InvalidParamIndex(99)));

        for i in 0..PARAM_COUNT {
            assert_eq!(store.get(i).unwrap(), before.get(i).unwrap());
        }
    }

    #[test]
    fn every_index_round_trips() {
        let mut store = ParameterStore::new();
        for i in 0..PARAM_COUNT {
            let param = ParamIndex::from_index(i).unwrap();
            let value = if param.is_boolean() { 1.0 } else { 0.25 + i as f32 * 0.01 };
            store.set(i, value).unwrap();
            assert_eq!(store.get(i).unwrap(), value, "index {}", i);
        }
        assert!(ParamIndex::from_index(PARAM_COUNT).is_none());
    }
}
