//! Named regex rules for pulling candidate repository names out of text.
//!
//! A [`Rule`] either has a capture group, in which case the first group is the
//! candidate, or it doesn't, in which case the whole match is. Extraction is
//! infallible: callers lossily decode bytes before handing text over. Rule
//! sets drop (and log) any rule whose pattern fails to compile.

use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};

/// Characters allowed in a GitHub repository name.
const NAME_CHARS: &str = "[A-Za-z0-9._-]";

#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    regex: Regex,
}

impl Rule {
    /// Build a rule from a raw pattern.
    pub fn new(name: impl Into<String>, pattern: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self {
            name: name.into(),
            regex,
        })
    }

    // Keywords are escaped, so only the regex size limit can reject these.
    fn from_template(name: String, pattern: String) -> Result<Self, regex::Error> {
        Self::new(name, &pattern, true)
    }

    /// `github.com/<owner>/<name>` or `github.com:<owner>/<name>`; captures the name.
    pub fn owner_url(owner: &str) -> Result<Self, regex::Error> {
        Self::from_template(
            format!("owner-url:{owner}"),
            format!(r"github\.com[/:]{}[/:]({NAME_CHARS}+)", regex::escape(owner)),
        )
    }

    /// Bare keyword followed by name characters, e.g. `powerauto_v3`.
    pub fn keyword(word: &str) -> Result<Self, regex::Error> {
        Self::from_template(
            format!("keyword:{word}"),
            format!("{}{NAME_CHARS}*", regex::escape(word)),
        )
    }

    /// A double-quoted JSON string whose contents contain `word`.
    pub fn quoted_keyword(word: &str) -> Result<Self, regex::Error> {
        Self::from_template(
            format!("quoted:{word}"),
            format!(r#""({NAME_CHARS}*{}{NAME_CHARS}*)""#, regex::escape(word)),
        )
    }

    /// `word` with name characters on both sides, anywhere in the text.
    pub fn embedded_keyword(word: &str) -> Result<Self, regex::Error> {
        Self::from_template(
            format!("embedded:{word}"),
            format!("({NAME_CHARS}*{}{NAME_CHARS}*)", regex::escape(word)),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn collect_into(&self, text: &str, out: &mut BTreeSet<String>) {
        let before = out.len();
        if self.regex.captures_len() > 1 {
            for caps in self.regex.captures_iter(text) {
                if let Some(m) = caps.get(1) {
                    out.insert(m.as_str().to_string());
                }
            }
        } else {
            out.extend(self.regex.find_iter(text).map(|m| m.as_str().to_string()));
        }
        if out.len() > before {
            tracing::trace!(rule = self.name(), added = out.len() - before, "rule matched");
        }
    }
}

/// Run every rule over `text` and return the union of candidates.
pub fn extract(text: &str, rules: &[Rule]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for rule in rules {
        rule.collect_into(text, &mut out);
    }
    out.retain(|c| !c.is_empty());
    out
}

fn compiled(rules: impl IntoIterator<Item = Result<Rule, regex::Error>>) -> Vec<Rule> {
    rules
        .into_iter()
        .filter_map(|rule| {
            rule.map_err(|e| tracing::warn!(error = %e, "dropping extraction rule"))
                .ok()
        })
        .collect()
}

/// Rules used on stringified database rows.
pub fn row_rules(owner: &str, keywords: &[String]) -> Vec<Rule> {
    compiled(std::iter::once(Rule::owner_url(owner)).chain(keywords.iter().map(|k| Rule::keyword(k))))
}

/// Rules used on raw history-file text.
pub fn history_rules(owner: &str, keywords: &[String]) -> Vec<Rule> {
    compiled(
        keywords
            .iter()
            .map(|k| Rule::quoted_keyword(k))
            .chain(std::iter::once(Rule::owner_url(owner))),
    )
}

/// Rules used on attachment file names.
pub fn filename_rules(keywords: &[String]) -> Vec<Rule> {
    compiled(keywords.iter().map(|k| Rule::embedded_keyword(k)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(ws: &[&str]) -> Vec<String> {
        ws.iter().map(|s| s.to_string()).collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn owner_url_captures_repository_name() {
        let rules = [Rule::owner_url("alex").unwrap()];
        let text = "remote = https://github.com/alex/powerauto_v3 and git@github.com:alex/ourdaily.git";
        assert_eq!(
            extract(text, &rules),
            set(&["powerauto_v3", "ourdaily.git"])
        );
    }

    #[test]
    fn owner_url_ignores_other_owners() {
        let rules = [Rule::owner_url("alex").unwrap()];
        assert!(extract("https://github.com/someone/else", &rules).is_empty());
    }

    #[test]
    fn owner_is_escaped() {
        let rules = [Rule::owner_url("a.b").unwrap()];
        assert!(extract("github.com/axb/repo", &rules).is_empty());
        assert_eq!(extract("github.com/a.b/repo", &rules), set(&["repo"]));
    }

    #[test]
    fn keyword_matches_case_insensitively_without_group() {
        let rules = [Rule::keyword("powerauto").unwrap()];
        assert_eq!(
            extract("open PowerAuto.ai_0.53 now; also powerauto", &rules),
            set(&["PowerAuto.ai_0.53", "powerauto"])
        );
    }

    #[test]
    fn quoted_keyword_only_matches_inside_quotes() {
        let rules = [Rule::quoted_keyword("community").unwrap()];
        let text = r#"{"folder": "communitypowerauto", "note": community_free}"#;
        assert_eq!(extract(text, &rules), set(&["communitypowerauto"]));
    }

    #[test]
    fn embedded_keyword_captures_surrounding_name_chars() {
        let rules = [Rule::embedded_keyword("automation").unwrap()];
        assert_eq!(
            extract("screenshot of my-automation_tool.png", &rules),
            set(&["my-automation_tool.png"])
        );
    }

    #[test]
    fn union_across_rules_deduplicates() {
        let rules = row_rules("alex", &words(&["powerauto"]));
        let text = "github.com/alex/powerauto and powerauto";
        assert_eq!(extract(text, &rules), set(&["powerauto"]));
    }

    #[test]
    fn malformed_text_yields_empty_set() {
        let rules = history_rules("alex", &words(&["powerauto"]));
        assert!(extract("\u{fffd}\u{fffd}{{{\"unterminated", &rules).is_empty());
        assert!(extract("", &rules).is_empty());
    }

    #[test]
    fn user_supplied_pattern_errors_surface() {
        assert!(Rule::new("bad", "(unclosed", false).is_err());
    }

    #[test]
    fn rules_that_fail_to_compile_are_dropped() {
        let rules = compiled([
            Rule::owner_url("alex"),
            Rule::new("bad", "(unclosed", false),
            Rule::keyword("powerauto"),
        ]);
        let names: Vec<&str> = rules.iter().map(Rule::name).collect();
        assert_eq!(names, vec!["owner-url:alex", "keyword:powerauto"]);
    }

    #[test]
    fn keyword_metacharacters_are_literal() {
        let rules = filename_rules(&words(&["a+b"]));
        assert_eq!(extract("xa+by", &rules), set(&["xa+by"]));
        assert!(extract("aab", &rules).is_empty());
    }

    #[test]
    fn rule_names_describe_origin() {
        assert_eq!(Rule::keyword("community").unwrap().name(), "keyword:community");
        assert_eq!(Rule::owner_url("alex").unwrap().name(), "owner-url:alex");
    }
}
