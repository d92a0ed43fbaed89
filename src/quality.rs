// 🔎 Naming checks for reference data
//
// Display names that read badly ("Korea, Republic of", "Bolivia
// (Plurinational State of)") are reported for a human to add to the
// override table. They never block a run.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamingRule {
    /// Comma without " and " (inverted "Korea, Republic of")
    InvertedComma,
    /// First or last word starts lowercase
    LowercaseWord,
    /// Formal name containing "Republic"
    FormalRepublic,
    /// Parenthesised qualifier
    Parentheses,
}

impl NamingRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamingRule::InvertedComma => "inverted_comma",
            NamingRule::LowercaseWord => "lowercase_word",
            NamingRule::FormalRepublic => "formal_republic",
            NamingRule::Parentheses => "parentheses",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingIssue {
    pub code: String,
    pub name: String,
    pub rule: NamingRule,
}

fn has_inverted_comma(name: &str) -> bool {
    name.contains(',') && !name.contains(" and ")
}

fn has_parentheses(name: &str) -> bool {
    name.contains('(') || name.contains(')')
}

fn starts_lowercase(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_lowercase())
}

/// First rule a country display name breaks, if any.
pub fn check_country_name(name: &str) -> Option<NamingRule> {
    let words: Vec<&str> = name.split_whitespace().collect();

    if has_inverted_comma(name) {
        return Some(NamingRule::InvertedComma);
    }
    if words.last().is_some_and(|w| starts_lowercase(w))
        || words.first().is_some_and(|w| starts_lowercase(w))
    {
        return Some(NamingRule::LowercaseWord);
    }
    if words.contains(&"Republic") {
        return Some(NamingRule::FormalRepublic);
    }
    if has_parentheses(name) {
        return Some(NamingRule::Parentheses);
    }
    None
}

/// Subdivisions are only held to the comma and parentheses rules.
pub fn check_subdivision_name(name: &str) -> Option<NamingRule> {
    if has_inverted_comma(name) {
        return Some(NamingRule::InvertedComma);
    }
    if has_parentheses(name) {
        return Some(NamingRule::Parentheses);
    }
    None
}
