//! Canned scenarios exercising the kernel end to end.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// Radio beacons between hovering bees
    Chatter,

    /// Flower sensing over a planted meadow
    Forage,

    /// Greetings through the network simulator with the clock held
    NsRelay,

    /// Bursty senders against a small radio queue
    Backpressure,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Chatter,
            ScenarioId::Forage,
            ScenarioId::NsRelay,
            ScenarioId::Backpressure,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Chatter => "chatter",
            ScenarioId::Forage => "forage",
            ScenarioId::NsRelay => "ns_relay",
            ScenarioId::Backpressure => "backpressure",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Chatter => "Bees beacon every 500ms; everyone must hear a neighbour",
            ScenarioId::Forage => "Flower under every spawn point; every bee must see one",
            ScenarioId::NsRelay => "One NS broadcast per bee through the bridge; all delivered, clock released",
            ScenarioId::Backpressure => "10-packet bursts into a 4-slot queue; overflow rejected, queue drains",
        }
    }

    /// Returns true if the scenario needs the network-simulator bridge.
    pub fn uses_network(&self) -> bool {
        matches!(self, ScenarioId::NsRelay)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl serde::Serialize for ScenarioId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chatter" | "radio" => Ok(ScenarioId::Chatter),
            "forage" | "flowers" => Ok(ScenarioId::Forage),
            "ns_relay" | "nsrelay" | "ns" => Ok(ScenarioId::NsRelay),
            "backpressure" | "back_pressure" => Ok(ScenarioId::Backpressure),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert_eq!(scenario.to_string(), scenario.name());
        }
        assert_eq!("NS".parse::<ScenarioId>(), Ok(ScenarioId::NsRelay));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_only_relay_needs_network() {
        let networked: Vec<ScenarioId> = ScenarioId::all()
            .into_iter()
            .filter(|s| s.uses_network())
            .collect();
        assert_eq!(networked, vec![ScenarioId::NsRelay]);
    }
}
