//! Input document record, its derived text/feature projections, and the
//! structural validation applied before a document enters any index.

use std::collections::HashSet;
use std::fmt;

use crate::error::ValidationError;

/// Seniority tag attached to a document. `Unknown` preserves forward
/// compatibility with values the corpus hasn't standardized on yet, rather
/// than rejecting the document outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeniorityLevel {
    Junior,
    Mid,
    Senior,
    Lead,
    Principal,
    Unknown(String),
}

impl SeniorityLevel {
    pub fn as_str(&self) -> &str {
        match self {
            SeniorityLevel::Junior => "junior",
            SeniorityLevel::Mid => "mid",
            SeniorityLevel::Senior => "senior",
            SeniorityLevel::Lead => "lead",
            SeniorityLevel::Principal => "principal",
            SeniorityLevel::Unknown(s) => s,
        }
    }
}

impl fmt::Display for SeniorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for SeniorityLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "junior" => SeniorityLevel::Junior,
            "mid" => SeniorityLevel::Mid,
            "senior" => SeniorityLevel::Senior,
            "lead" => SeniorityLevel::Lead,
            "principal" => SeniorityLevel::Principal,
            other => SeniorityLevel::Unknown(other.to_string()),
        }
    }
}

impl Default for SeniorityLevel {
    fn default() -> Self {
        SeniorityLevel::Unknown("unknown".to_string())
    }
}

/// A document as the host submits it. Only `id` and `name` are required;
/// every other field defaults to empty/zero when absent.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub experience: Option<String>,
    pub projects: Option<String>,
    pub skills: Vec<String>,
    pub technologies: Vec<String>,
    pub experience_years: i32,
    pub seniority_level: SeniorityLevel,
}

/// The subset of a document's fields consulted by filters at query time.
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    pub name: String,
    pub experience_years: i32,
    pub skills: Vec<String>,
    pub seniority_level: String,
}

impl From<&Document> for DocumentMetadata {
    fn from(doc: &Document) -> Self {
        Self {
            name: doc.name.clone(),
            experience_years: doc.experience_years,
            skills: doc.skills.clone(),
            seniority_level: doc.seniority_level.as_str().to_string(),
        }
    }
}

impl Document {
    /// Structural validation: non-empty `id`/`name`, non-negative
    /// `experience_years`. Applied at the boundary before a document reaches
    /// any index.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::on_field("document id must not be empty", "id"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::on_field("document name must not be empty", "name"));
        }
        if self.experience_years < 0 {
            return Err(ValidationError::on_field(
                "experience_years must be non-negative",
                "experience_years",
            ));
        }
        Ok(())
    }

    /// The concatenated text used for both BM25 indexing and embedding:
    /// `name`, `title`, `description`, `experience`, `projects`, `skills`,
    /// `technologies`, space-joined in that order.
    pub fn text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.name];
        if let Some(t) = &self.title {
            parts.push(t);
        }
        if let Some(d) = &self.description {
            parts.push(d);
        }
        if let Some(e) = &self.experience {
            parts.push(e);
        }
        if let Some(p) = &self.projects {
            parts.push(p);
        }
        for s in &self.skills {
            parts.push(s);
        }
        for t in &self.technologies {
            parts.push(t);
        }
        parts.join(" ")
    }

    /// Deduplicated lowercase whitespace-split tokens of `text()`, unioned
    /// with lowercased skills and technologies. Used as the LSH shingle set.
    pub fn text_features(&self) -> Vec<String> {
        tokenize(&self.text())
    }

    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata::from(self)
    }
}

/// Lowercase, whitespace-split, deduplicated tokenization shared by document
/// feature extraction, BM25 indexing, and query tokenization: no stemming,
/// no stopword removal, per the BM25 contract.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    for word in text.split_whitespace() {
        let lower = word.to_lowercase();
        if seen.insert(lower.clone()) {
            tokens.push(lower);
        }
    }
    tokens
}

/// BM25 indexing tokenizes with repeats (term frequency matters there),
/// unlike `tokenize`'s deduplicated feature-set variant.
pub fn tokenize_with_repeats(text: &str) -> Vec<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document {
            id: "a".into(),
            name: "Ada Lovelace".into(),
            title: Some("Systems Engineer".into()),
            description: None,
            experience: None,
            projects: None,
            skills: vec!["Rust".into(), "Systems".into()],
            technologies: vec!["HNSW".into()],
            experience_years: 5,
            seniority_level: SeniorityLevel::Senior,
        }
    }

    #[test]
    fn validate_rejects_empty_id() {
        let mut doc = sample();
        doc.id = "".into();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_experience() {
        let mut doc = sample();
        doc.experience_years = -1;
        assert!(doc.validate().is_err());
    }

    #[test]
    fn validate_accepts_minimal_document() {
        let doc = Document { id: "a".into(), name: "x".into(), ..Default::default() };
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn text_concatenates_fields_in_order() {
        let doc = sample();
        assert_eq!(doc.text(), "Ada Lovelace Systems Engineer Rust Systems HNSW");
    }

    #[test]
    fn text_features_are_lowercase_and_deduplicated() {
        let doc = sample();
        let features = doc.text_features();
        assert!(features.contains(&"rust".to_string()));
        assert!(features.contains(&"systems".to_string()));
        let systems_count = features.iter().filter(|f| *f == "systems").count();
        assert_eq!(systems_count, 1);
    }

    #[test]
    fn seniority_level_roundtrips_known_values() {
        assert_eq!(SeniorityLevel::from("senior"), SeniorityLevel::Senior);
        assert_eq!(SeniorityLevel::from("SENIOR"), SeniorityLevel::Senior);
        assert_eq!(SeniorityLevel::from("staff").as_str(), "staff");
    }
}
