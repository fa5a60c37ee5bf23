use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tunables shared by the live and batch paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// First node number handed out to voices.
    #[serde(default = "EngineConfig::default_first_node")]
    pub first_node: i32,
    /// Attack time in seconds when a voice names none.
    #[serde(default)]
    pub default_attack: f32,
    /// Release time in seconds when a voice names none.
    #[serde(default = "EngineConfig::default_release")]
    pub default_release: f32,
    /// Playback length assumed for samples whose duration is unknown.
    #[serde(default = "EngineConfig::default_sample_seconds")]
    pub default_sample_seconds: f32,
    #[serde(default = "EngineConfig::default_attack_keys")]
    pub attack_keys: Vec<String>,
    #[serde(default = "EngineConfig::default_release_keys")]
    pub release_keys: Vec<String>,
    /// Synth definition used to play sample buffers.
    #[serde(default = "EngineConfig::default_sampler")]
    pub sampler_definition: String,
}

impl EngineConfig {
    fn default_first_node() -> i32 {
        100
    }

    fn default_release() -> f32 {
        0.2
    }

    fn default_sample_seconds() -> f32 {
        1.0
    }

    fn default_attack_keys() -> Vec<String> {
        ["attT", "att", "attack"].map(String::from).to_vec()
    }

    fn default_release_keys() -> Vec<String> {
        ["relT", "rel", "release"].map(String::from).to_vec()
    }

    fn default_sampler() -> String {
        "sampler".to_owned()
    }

    /// Attack time named by `params`, or the default.
    pub fn attack_of(&self, params: &BTreeMap<String, f32>) -> f32 {
        first_present(&self.attack_keys, params)
            .unwrap_or(self.default_attack)
            .max(0.0)
    }

    /// Release time named by `params`, or the default.
    pub fn release_of(&self, params: &BTreeMap<String, f32>) -> f32 {
        first_present(&self.release_keys, params)
            .unwrap_or(self.default_release)
            .max(0.0)
    }
}

fn first_present(keys: &[String], params: &BTreeMap<String, f32>) -> Option<f32> {
    keys.iter().find_map(|key| params.get(key).copied())
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            first_node: Self::default_first_node(),
            default_attack: 0.0,
            default_release: Self::default_release(),
            default_sample_seconds: Self::default_sample_seconds(),
            attack_keys: Self::default_attack_keys(),
            release_keys: Self::default_release_keys(),
            sampler_definition: Self::default_sampler(),
        }
    }
}
