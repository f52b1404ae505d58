//! Structured post-filters applied to candidate documents before scoring.
//!
//! Bounds on experience, seniority-level membership, and case-insensitive
//! required/excluded skill sets. Unknown keys at a host boundary are simply
//! never constructed here, since there is no dynamic-dict layer in this core:
//! "unknown keys ignored" reduces to "only these fields exist."

use std::collections::HashSet;

use crate::document::DocumentMetadata;
use crate::error::ValidationError;

const MAX_EXPERIENCE_YEARS: u32 = 50;
const MAX_REQUIRED_SKILLS: usize = 20;
const MAX_EXCLUDED_SKILLS: usize = 10;

/// Structured search filters. Construct via `SearchFilters::new` (or build
/// the struct directly and call `validate()`): `Engine::search` rejects an
/// invalid filter with `ValidationError` rather than silently clamping it.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub min_experience: Option<u32>,
    pub max_experience: Option<u32>,
    pub seniority_levels: Option<HashSet<String>>,
    pub required_skills: Option<HashSet<String>>,
    pub excluded_skills: Option<HashSet<String>>,
}

impl SearchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds-check this filter set: `0 <= min/max_experience <= 50`,
    /// `max_experience >= min_experience` when both are present, and
    /// `required_skills`/`excluded_skills` capped at 20/10 entries.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(min) = self.min_experience {
            if min > MAX_EXPERIENCE_YEARS {
                return Err(ValidationError::on_field(
                    format!("min_experience must be <= {}", MAX_EXPERIENCE_YEARS),
                    "min_experience",
                ));
            }
        }
        if let Some(max) = self.max_experience {
            if max > MAX_EXPERIENCE_YEARS {
                return Err(ValidationError::on_field(
                    format!("max_experience must be <= {}", MAX_EXPERIENCE_YEARS),
                    "max_experience",
                ));
            }
        }
        if let (Some(min), Some(max)) = (self.min_experience, self.max_experience) {
            if max < min {
                return Err(ValidationError::on_field(
                    "max_experience must be >= min_experience",
                    "max_experience",
                ));
            }
        }
        if let Some(required) = &self.required_skills {
            if required.len() > MAX_REQUIRED_SKILLS {
                return Err(ValidationError::on_field(
                    format!("required_skills must have at most {} entries", MAX_REQUIRED_SKILLS),
                    "required_skills",
                ));
            }
        }
        if let Some(excluded) = &self.excluded_skills {
            if excluded.len() > MAX_EXCLUDED_SKILLS {
                return Err(ValidationError::on_field(
                    format!("excluded_skills must have at most {} entries", MAX_EXCLUDED_SKILLS),
                    "excluded_skills",
                ));
            }
        }
        Ok(())
    }

    /// Whether `metadata` satisfies every configured predicate. Pure and
    /// infallible by construction: once a `SearchFilters` has passed
    /// `validate()`, applying it to a candidate cannot itself fail.
    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        if let Some(min) = self.min_experience {
            if (metadata.experience_years as i64) < min as i64 {
                return false;
            }
        }
        if let Some(max) = self.max_experience {
            if (metadata.experience_years as i64) > max as i64 {
                return false;
            }
        }
        if let Some(levels) = &self.seniority_levels {
            let level = metadata.seniority_level.to_lowercase();
            if !levels.iter().any(|l| l.to_lowercase() == level) {
                return false;
            }
        }
        if let Some(required) = &self.required_skills {
            let doc_skills: HashSet<String> = metadata.skills.iter().map(|s| s.to_lowercase()).collect();
            for skill in required {
                if !doc_skills.contains(&skill.to_lowercase()) {
                    return false;
                }
            }
        }
        if let Some(excluded) = &self.excluded_skills {
            let doc_skills: HashSet<String> = metadata.skills.iter().map(|s| s.to_lowercase()).collect();
            for skill in excluded {
                if doc_skills.contains(&skill.to_lowercase()) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(experience_years: i32, seniority: &str, skills: &[&str]) -> DocumentMetadata {
        DocumentMetadata {
            name: "x".into(),
            experience_years,
            skills: skills.iter().map(|s| s.to_string()).collect(),
            seniority_level: seniority.to_string(),
        }
    }

    #[test]
    fn min_experience_excludes_below_threshold() {
        let filters = SearchFilters { min_experience: Some(6), ..Default::default() };
        assert!(!filters.matches(&metadata(5, "senior", &[])));
        assert!(filters.matches(&metadata(10, "senior", &[])));
    }

    #[test]
    fn required_skills_is_case_insensitive_subset_check() {
        let filters = SearchFilters {
            required_skills: Some(HashSet::from(["Rust".to_string()])),
            ..Default::default()
        };
        assert!(filters.matches(&metadata(5, "senior", &["rust", "go"])));
        assert!(!filters.matches(&metadata(5, "senior", &["python"])));
    }

    #[test]
    fn excluded_skills_rejects_overlap() {
        let filters = SearchFilters {
            excluded_skills: Some(HashSet::from(["cobol".to_string()])),
            ..Default::default()
        };
        assert!(!filters.matches(&metadata(5, "senior", &["COBOL"])));
        assert!(filters.matches(&metadata(5, "senior", &["rust"])));
    }

    #[test]
    fn validate_rejects_max_below_min() {
        let filters = SearchFilters { min_experience: Some(10), max_experience: Some(5), ..Default::default() };
        assert!(filters.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_experience() {
        let filters = SearchFilters { min_experience: Some(51), ..Default::default() };
        assert!(filters.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_skill_lists() {
        let required: HashSet<String> = (0..21).map(|i| format!("skill{}", i)).collect();
        let filters = SearchFilters { required_skills: Some(required), ..Default::default() };
        assert!(filters.validate().is_err());
    }

    #[test]
    fn default_filters_matches_everything() {
        let filters = SearchFilters::new();
        assert!(filters.matches(&metadata(0, "junior", &[])));
    }
}
