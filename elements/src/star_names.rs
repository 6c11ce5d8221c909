// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use canonical_error::{CanonicalError, failed_precondition_error,
                      invalid_argument_error};
use log::warn;

const GREEK_LETTERS: &[(&str, &str)] = &[
    ("alf", "α"), ("bet", "β"), ("gam", "γ"), ("del", "δ"),
    ("eps", "ε"), ("zet", "ζ"), ("eta", "η"), ("tet", "θ"),
    ("iot", "ι"), ("kap", "κ"), ("lam", "λ"), ("mu", "μ"),
    ("nu", "ν"), ("ksi", "ξ"), ("xi", "ξ"), ("omi", "ο"),
    ("pi", "π"), ("rho", "ρ"), ("sig", "σ"), ("tau", "τ"),
    ("ups", "υ"), ("phi", "φ"), ("chi", "χ"), ("psi", "ψ"),
    ("ome", "ω"),
];

// Maps catalog identifiers (as reported in solver star matches) to display
// names such as "58 alf Ori".
#[derive(Debug, Default, Clone)]
pub struct StarNames {
    names: HashMap<String, String>,
}

impl StarNames {
    pub fn new(names: HashMap<String, String>) -> Self {
        StarNames{names}
    }

    // Loads a JSON object of the form {"27989": "58 alf Ori", ...}.
    pub fn load(path: &Path) -> Result<Self, CanonicalError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            failed_precondition_error(
                format!("Could not read star names {:?}: {:?}", path, e).as_str())
        })?;
        Self::parse_json(&contents)
    }

    pub fn parse_json(contents: &str) -> Result<Self, CanonicalError> {
        let value: serde_json::Value = serde_json::from_str(contents).map_err(|e| {
            invalid_argument_error(format!("Invalid star names JSON: {}", e).as_str())
        })?;
        let Some(object) = value.as_object() else {
            return Err(invalid_argument_error("Star names JSON must be an object"));
        };
        let mut names = HashMap::with_capacity(object.len());
        for (id, name) in object {
            match name.as_str() {
                Some(n) => { names.insert(id.clone(), n.to_string()); },
                None => warn!("Ignoring non-string star name for {}", id),
            }
        }
        Ok(StarNames{names})
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    // Label to draw for the star with `catalog_id`. Falls back to the raw
    // identifier when the catalog has no name for it.
    pub fn label(&self, catalog_id: &str) -> String {
        match self.names.get(catalog_id) {
            Some(name) => display_name(name),
            None => catalog_id.to_string(),
        }
    }
}

// Converts a catalog name such as "58 alf Ori" to "α Ori": a leading bare
// designator (all digits) is dropped and Greek letter abbreviations become
// glyphs. Component suffixes are kept, so "alf02 Lib" becomes "α2 Lib".
pub fn display_name(catalog_name: &str) -> String {
    let mut tokens: Vec<&str> = catalog_name.split_whitespace().collect();
    if tokens.len() > 1 && tokens[0].chars().all(|c| c.is_ascii_digit()) {
        tokens.remove(0);
    }
    tokens.iter()
        .map(|t| expand_greek(t).unwrap_or_else(|| t.to_string()))
        .collect::<Vec<String>>()
        .join(" ")
}

fn expand_greek(token: &str) -> Option<String> {
    let digits_at = token.find(|c: char| c.is_ascii_digit()).unwrap_or(token.len());
    let (letters, suffix) = token.split_at(digits_at);
    if !suffix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let lowered = letters.to_ascii_lowercase();
    let glyph = GREEK_LETTERS.iter().find(|(abbrev, _)| *abbrev == lowered)?.1;
    let suffix = suffix.trim_start_matches('0');
    Some(format!("{}{}", glyph, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("58 alf Ori"), "α Ori");
        assert_eq!(display_name("bet Ori"), "β Ori");
        assert_eq!(display_name("alf02 Lib"), "α2 Lib");
        assert_eq!(display_name("mu. Cep"), "mu. Cep");
        // A lone number is the whole name; keep it.
        assert_eq!(display_name("61"), "61");
        assert_eq!(display_name("Betelgeuse"), "Betelgeuse");
        // Tokens that merely start with Greek abbreviations are untouched.
        assert_eq!(display_name("Alfirk"), "Alfirk");
        assert_eq!(display_name("61 Cyg"), "Cyg");
    }

    #[test]
    fn test_label_lookup() {
        let names = StarNames::parse_json(
            r#"{"27989": "58 alf Ori", "24436": "19 bet Ori", "bad": 7}"#).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names.label("27989"), "α Ori");
        assert_eq!(names.label("24436"), "β Ori");
        assert_eq!(names.label("11767"), "11767");
    }

    #[test]
    fn test_parse_json_errors() {
        assert!(StarNames::parse_json("[1, 2]").is_err());
        assert!(StarNames::parse_json("{").is_err());
    }
}  // mod tests.
