//! Flight phases and installation identity

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Flight phase a report was taken in.
///
/// Each phase has its own table and its own signature library; the three
/// phases only meet again in the cross-phase correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlightPhase {
    TakeOff,
    Climb,
    Cruise,
}

impl FlightPhase {
    /// All phases in flight order.
    pub const ALL: [FlightPhase; 3] = [FlightPhase::TakeOff, FlightPhase::Climb, FlightPhase::Cruise];

    /// Stable key used in file names and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightPhase::TakeOff => "take-off",
            FlightPhase::Climb => "climb",
            FlightPhase::Cruise => "cruise",
        }
    }
}

impl std::fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown flight phase key: '{0}' (expected take-off, climb or cruise)")]
pub struct UnknownFlightPhase(pub String);

impl FromStr for FlightPhase {
    type Err = UnknownFlightPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "take-off" | "takeoff" | "take_off" => Ok(FlightPhase::TakeOff),
            "climb" => Ok(FlightPhase::Climb),
            "cruise" => Ok(FlightPhase::Cruise),
            other => Err(UnknownFlightPhase(other.to_string())),
        }
    }
}

/// One physical engine mounted at one position of one aircraft.
///
/// Ordering is lexicographic on (engine, aircraft, position) so per-installation
/// iteration is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Installation {
    /// Engine serial number
    pub engine_id: String,
    /// Aircraft identifier
    pub aircraft_id: String,
    /// Engine position on the aircraft (1-based)
    pub engine_position: u8,
}

impl Installation {
    pub fn new(engine_id: impl Into<String>, aircraft_id: impl Into<String>, engine_position: u8) -> Self {
        Self {
            engine_id: engine_id.into(),
            aircraft_id: aircraft_id.into(),
            engine_position,
        }
    }
}

impl std::fmt::Display for Installation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}#{}", self.engine_id, self.aircraft_id, self.engine_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parsing_accepts_common_spellings() {
        assert_eq!("Take-off".parse::<FlightPhase>(), Ok(FlightPhase::TakeOff));
        assert_eq!("takeoff".parse::<FlightPhase>(), Ok(FlightPhase::TakeOff));
        assert_eq!(" CRUISE ".parse::<FlightPhase>(), Ok(FlightPhase::Cruise));
        assert!("descent".parse::<FlightPhase>().is_err());
    }

    #[test]
    fn test_phase_serde_uses_kebab_keys() {
        let json = serde_json::to_string(&FlightPhase::TakeOff).unwrap();
        assert_eq!(json, "\"take-off\"");
        let back: FlightPhase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FlightPhase::TakeOff);
    }

    #[test]
    fn test_installation_display() {
        let inst = Installation::new("ESN1001", "AC-7", 2);
        assert_eq!(inst.to_string(), "ESN1001@AC-7#2");
    }
}
