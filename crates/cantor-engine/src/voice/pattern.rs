use regex::Regex;

/// Regular expression matched against whole external ids.
#[derive(Debug, Clone)]
pub struct VoicePattern {
    source: String,
    regex: Regex,
}

impl VoicePattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{source})$"))?;
        Ok(Self {
            source: source.to_owned(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, external_id: &str) -> bool {
        self.regex.is_match(external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_id_only() {
        let pattern = VoicePattern::new("lead").expect("pattern");
        assert!(pattern.matches("lead"));
        assert!(!pattern.matches("lead2"));
        assert!(!pattern.matches("my-lead"));
    }

    #[test]
    fn alternation_is_anchored_as_a_group() {
        let pattern = VoicePattern::new("a|b.*").expect("pattern");
        assert!(pattern.matches("a"));
        assert!(pattern.matches("bass"));
        assert!(!pattern.matches("xa"));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(VoicePattern::new("(unclosed").is_err());
    }
}
