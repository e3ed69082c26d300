//! Allowlist and keyword gating for routed group messages.

use std::collections::HashSet;

use {
    regex::{Regex, RegexBuilder},
    warelay_config::FilterConfig,
};

use crate::Result;

/// Immutable filter settings, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct FilterContext {
    allowlist: HashSet<String>,
    keyword: Option<Regex>,
}

impl FilterContext {
    /// Build a context. An empty allowlist admits every group; the keyword
    /// pattern is compiled case-insensitively.
    pub fn new<I, S>(allowlist: I, keyword: Option<&str>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowlist = allowlist
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let keyword = match keyword.map(str::trim).filter(|k| !k.is_empty()) {
            Some(pattern) => Some(RegexBuilder::new(pattern).case_insensitive(true).build()?),
            None => None,
        };
        Ok(Self { allowlist, keyword })
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        Self::new(&config.allowed_groups, config.keyword.as_deref())
    }

    pub fn allowlist_len(&self) -> usize {
        self.allowlist.len()
    }

    pub fn keyword_pattern(&self) -> Option<&str> {
        self.keyword.as_ref().map(Regex::as_str)
    }
}

/// Outcome of filtering one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    ThreadNotAllowed,
    KeywordMismatch,
}

impl Verdict {
    #[must_use]
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::ThreadNotAllowed => "thread_not_allowed",
            Self::KeywordMismatch => "keyword_mismatch",
        }
    }
}

/// Applies a [`FilterContext`] to routed messages.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    context: FilterContext,
}

impl MessageFilter {
    pub fn new(context: FilterContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &FilterContext {
        &self.context
    }

    /// Allowlist half of [`evaluate`](Self::evaluate); needs no text, so it
    /// can run before normalization.
    pub fn allows_thread(&self, thread_id: &str) -> bool {
        let allowlist = &self.context.allowlist;
        allowlist.is_empty() || allowlist.contains(thread_id)
    }

    /// Check the thread against the allowlist, then the text against the
    /// keyword pattern. Empty text never matches a configured pattern.
    pub fn evaluate(&self, thread_id: &str, text: &str) -> Verdict {
        if !self.allows_thread(thread_id) {
            return Verdict::ThreadNotAllowed;
        }
        if let Some(re) = &self.context.keyword
            && (text.is_empty() || !re.is_match(text))
        {
            return Verdict::KeywordMismatch;
        }
        Verdict::Accepted
    }

    pub fn accepts(&self, thread_id: &str, text: &str) -> bool {
        self.evaluate(thread_id, text).is_accepted()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn filter(allow: &[&str], keyword: Option<&str>) -> MessageFilter {
        MessageFilter::new(FilterContext::new(allow, keyword).unwrap())
    }

    #[test]
    fn empty_allowlist_admits_all_groups() {
        let f = filter(&[], None);
        assert!(f.accepts("120@g.us", "anything"));
        assert!(f.accepts("999@g.us", ""));
    }

    #[test]
    fn allowlist_is_exact_match() {
        let f = filter(&["120@g.us"], None);
        assert!(f.accepts("120@g.us", "hi"));
        assert_eq!(f.evaluate("999@g.us", "hi"), Verdict::ThreadNotAllowed);
        assert_eq!(f.evaluate("1200@g.us", "hi"), Verdict::ThreadNotAllowed);
    }

    #[rstest]
    #[case("Please see the INVOICE attached", true)]
    #[case("invoice", true)]
    #[case("lunch?", false)]
    #[case("", false)]
    fn keyword_is_case_insensitive(#[case] text: &str, #[case] accepted: bool) {
        let f = filter(&[], Some("invoice"));
        assert_eq!(f.accepts("120@g.us", text), accepted);
    }

    #[test]
    fn keyword_supports_alternation() {
        let f = filter(&[], Some("invoice|receipt"));
        assert!(f.accepts("120@g.us", "new Receipt"));
    }

    #[test]
    fn allowlist_checked_before_keyword() {
        let f = filter(&["120@g.us"], Some("invoice"));
        assert_eq!(f.evaluate("999@g.us", "lunch"), Verdict::ThreadNotAllowed);
        assert_eq!(f.evaluate("120@g.us", "lunch"), Verdict::KeywordMismatch);
    }

    #[test]
    fn thread_check_ignores_keyword() {
        let f = filter(&["120@g.us"], Some("invoice"));
        assert!(f.allows_thread("120@g.us"));
        assert!(!f.allows_thread("999@g.us"));
        assert!(filter(&[], Some("invoice")).allows_thread("999@g.us"));
    }

    #[test]
    fn blank_entries_are_ignored() {
        let ctx = FilterContext::new(["", "  ", "120@g.us"], Some("  ")).unwrap();
        assert_eq!(ctx.allowlist_len(), 1);
        assert!(ctx.keyword_pattern().is_none());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(matches!(
            FilterContext::new(Vec::<String>::new(), Some("(unclosed")),
            Err(crate::Error::Pattern(_))
        ));
    }

    #[test]
    fn from_config() {
        let config = FilterConfig {
            allowed_groups: vec!["120@g.us".into()],
            keyword: Some("invoice".into()),
        };
        let ctx = FilterContext::from_config(&config).unwrap();
        assert_eq!(ctx.keyword_pattern(), Some("invoice"));
        assert_eq!(ctx.allowlist_len(), 1);
    }
}
