//! Sample packs and buffer lookup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub path: PathBuf,
    pub buffer: i32,
    pub category: String,
    pub tone_index: i32,
    /// Natural playback length, when the file header could be read.
    pub seconds: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplePack {
    samples: Vec<Sample>,
}

impl SamplePack {
    /// Finds the sample with `tone_index`, searching the whole pack when
    /// `category` is `None`.
    pub fn find(&self, tone_index: i32, category: Option<&str>) -> Option<&Sample> {
        self.samples
            .iter()
            .filter(|sample| category.map_or(true, |category| sample.category == category))
            .find(|sample| sample.tone_index == tone_index)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    fn next_tone_index(&self, category: &str) -> i32 {
        let count = self
            .samples
            .iter()
            .filter(|sample| sample.category == category)
            .count();
        i32::try_from(count).unwrap_or(i32::MAX)
    }
}

/// Request to register a sample file under a pack.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEntry {
    pub path: PathBuf,
    pub pack: String,
    pub buffer: i32,
    /// Empty means "detect from the file name".
    pub category: String,
    pub tone_index: Option<i32>,
    pub seconds: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleLibrary {
    packs: BTreeMap<String, SamplePack>,
}

impl SampleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sample, replacing any sample in the pack with the same
    /// category and tone index. A file already in the pack keeps its
    /// existing entry.
    pub fn register(&mut self, entry: SampleEntry) -> Sample {
        let category = if entry.category.is_empty() {
            category_for(&entry.path).to_owned()
        } else {
            entry.category
        };
        let pack = self.packs.entry(entry.pack).or_default();
        let tone_index = entry
            .tone_index
            .unwrap_or_else(|| pack.next_tone_index(&category));

        pack.samples
            .retain(|sample| !(sample.category == category && sample.tone_index == tone_index));
        if let Some(existing) = pack.samples.iter().find(|sample| sample.path == entry.path) {
            return existing.clone();
        }
        let sample = Sample {
            path: entry.path,
            buffer: entry.buffer,
            category,
            tone_index,
            seconds: entry.seconds,
        };
        pack.samples.push(sample.clone());
        sample
    }

    pub fn find(&self, pack: &str, tone_index: i32, category: Option<&str>) -> Option<&Sample> {
        self.packs.get(pack)?.find(tone_index, category)
    }

    pub fn pack(&self, name: &str) -> Option<&SamplePack> {
        self.packs.get(name)
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.packs.values().flat_map(|pack| pack.samples.iter())
    }

    pub fn len(&self) -> usize {
        self.packs.values().map(|pack| pack.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Category {
    key: &'static str,
    includes: &'static [&'static str],
    excludes: &'static [&'static str],
}

const CATEGORIES: &[Category] = &[
    Category {
        key: "hh",
        includes: &["hat", "stick", "hh"],
        excludes: &[],
    },
    Category {
        key: "bd",
        includes: &["bass", "drum", "kick", "bd"],
        excludes: &["crash"],
    },
    Category {
        key: "sh",
        includes: &["maraca", "shake", "tamb", "casta"],
        excludes: &[],
    },
    Category {
        key: "to",
        includes: &["tom", "conga", "block", "bongo"],
        excludes: &[],
    },
    Category {
        key: "sn",
        includes: &["snare", "clap", "sn", "sd"],
        excludes: &[],
    },
    Category {
        key: "cy",
        includes: &["cymbal", "crash", "ride"],
        excludes: &[],
    },
    Category {
        key: "be",
        includes: &["bell", "ring", "glass"],
        excludes: &[],
    },
];

/// Files matching no keyword land here.
pub const MISC_CATEGORY: &str = "mi";

/// Drum category guessed from keywords in the file name.
pub fn category_for(path: &Path) -> &'static str {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    CATEGORIES
        .iter()
        .find(|category| {
            category.includes.iter().any(|word| name.contains(word))
                && !category.excludes.iter().any(|word| name.contains(word))
        })
        .map_or(MISC_CATEGORY, |category| category.key)
}
