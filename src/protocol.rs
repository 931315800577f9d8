use serde::{Deserialize, Serialize};

// -- Analysis REST types ----------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub bait: String,
}

/// Four-part verse analysis returned by the analysis service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    /// Rhyme letter / scheme.
    #[serde(default)]
    pub qafya: String,
    /// Poetic meter.
    #[serde(default)]
    pub meter: String,
    #[serde(default)]
    pub critic: String,
    #[serde(default)]
    pub rhetorical: String,
}

impl AnalysisResponse {
    /// Newline-joined fields in service order, empty fields skipped.
    pub fn to_display_text(&self) -> String {
        [&self.qafya, &self.meter, &self.critic, &self.rhetorical]
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// -- Socket handshakes ------------------------------------------------------

/// First frame sent on a simulation channel.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationHandshake {
    pub verse: String,
}

/// First frame sent on a battle channel.
#[derive(Debug, Clone, Serialize)]
pub struct BattleHandshake {
    pub verse: String,
    pub verse2: String,
    pub topics: Vec<String>,
}
