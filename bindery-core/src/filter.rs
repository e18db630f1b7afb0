use crate::error::{CatalogError, Result};
use glob::Pattern;

/// What a matching rule decides for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Accept,
    Reject,
}

/// One glob rule: a `+`/`-` action token followed by the pattern text.
#[derive(Debug, Clone)]
pub struct Rule {
    action: RuleAction,
    pattern: Pattern,
}

impl Rule {
    /// Parse rule text like `"+ assets/*.png"` or `"- *"`.
    ///
    /// The first whitespace-separated token selects the action; the remainder
    /// is rejoined with single spaces to form the glob pattern.
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let action = match tokens.next() {
            Some("+") => RuleAction::Accept,
            Some("-") => RuleAction::Reject,
            _ => return Err(CatalogError::InvalidFlavorRule(text.to_string())),
        };

        let pattern_text = tokens.collect::<Vec<_>>().join(" ");
        let pattern = Pattern::new(&pattern_text)
            .map_err(|_| CatalogError::InvalidFlavorRule(text.to_string()))?;

        Ok(Self { action, pattern })
    }

    pub fn action(&self) -> RuleAction {
        self.action
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches(path)
    }
}

/// An ordered chain of glob rules classifying file paths.
///
/// Rules are evaluated in order; the first whose pattern matches decides the
/// result. A path matched by no rule is accepted, and an empty chain accepts
/// everything.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    rules: Vec<Rule>,
}

impl PathFilter {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn parse(rule_texts: &[String]) -> Result<Self> {
        let rules = rule_texts
            .iter()
            .map(|text| Rule::parse(text))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    pub fn matches(&self, path: &str) -> bool {
        for rule in &self.rules {
            if rule.matches(path) {
                return rule.action() == RuleAction::Accept;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_matching_rule_wins() {
        let filter = PathFilter::parse(&["+ */100/*".to_string(), "- *".to_string()]).unwrap();

        assert!(filter.matches("a/100/b.png"));
        assert!(!filter.matches("a/20/b.png"));
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = PathFilter::default();
        assert!(filter.matches("anything/at/all"));
        assert!(filter.matches(""));
    }

    #[test]
    fn test_default_is_accept_when_no_rule_matches() {
        let filter = PathFilter::parse(&["- *.tmp".to_string()]).unwrap();
        assert!(filter.matches("keep/me.png"));
        assert!(!filter.matches("scratch.tmp"));
    }

    #[test]
    fn test_pattern_whitespace_is_preserved() {
        let rule = Rule::parse("+ with space/*").unwrap();
        assert!(rule.matches("with space/file"));
        assert!(!rule.matches("without/file"));
    }

    #[test]
    fn test_unknown_action_token_is_an_error() {
        let err = Rule::parse("* whatever").unwrap_err();
        assert!(matches!(err, CatalogError::InvalidFlavorRule(_)));

        let err = Rule::parse("").unwrap_err();
        assert!(matches!(err, CatalogError::InvalidFlavorRule(_)));
    }
}
