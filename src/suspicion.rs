//! Risk-signal detection over free-text model output.
//!
//! A [`RuleSet`] is an ordered list of `(predicate, label)` pairs. Every
//! non-empty trimmed line of a response is checked against every rule;
//! matching lines make up the finding's summary. Phrase rules also scan the
//! whole response, because the model does not always keep one field per
//! line. A rule fires when either scan reaches its `min_occurrences`.
//!
//! Built-in rules (simplified and traditional script, case-sensitive):
//!
//! | Label | Line matches when |
//! |-------|-------------------|
//! | `pre_invoicing_risk` | mentions 预开发票风险 but not a negated form such as 不存在预开发票风险 |
//! | `not_stated` | contains 未明确提及 or 未提及 |
//! | `open_contract` | contains 开口合同 |

use crate::config::{RuleConfig, SuspicionConfig};
use crate::models::SuspicionFinding;

/// Summary used when no line matched. Never a finding in itself.
pub const NO_SUSPICION_PLACEHOLDER: &str = "未发现可疑段落";

/// Separator between summary lines.
const SUMMARY_SEPARATOR: &str = "\n\n";

/// Decides whether one line (or a whole response) carries a risk signal.
pub trait Predicate: Send + Sync {
    fn matches_line(&self, line: &str) -> bool;

    /// Occurrences of the signal across the whole response. Line-only
    /// predicates leave this at zero.
    fn text_occurrences(&self, _text: &str) -> usize {
        0
    }
}

impl<F> Predicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches_line(&self, line: &str) -> bool {
        self(line)
    }
}

/// Matches when any phrase of `any_of` is present and none of `none_of` is.
#[derive(Debug, Clone)]
pub struct PhrasePredicate {
    any_of: Vec<String>,
    none_of: Vec<String>,
}

impl PhrasePredicate {
    pub fn new<S: Into<String>>(
        any_of: impl IntoIterator<Item = S>,
        none_of: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            any_of: any_of.into_iter().map(Into::into).collect(),
            none_of: none_of.into_iter().map(Into::into).collect(),
        }
    }

    fn negated(&self, s: &str) -> bool {
        self.none_of.iter().any(|n| s.contains(n.as_str()))
    }
}

impl Predicate for PhrasePredicate {
    fn matches_line(&self, line: &str) -> bool {
        self.any_of.iter().any(|p| line.contains(p.as_str())) && !self.negated(line)
    }

    fn text_occurrences(&self, text: &str) -> usize {
        if self.negated(text) {
            return 0;
        }
        self.any_of
            .iter()
            .map(|p| text.matches(p.as_str()).count())
            .sum()
    }
}

/// One labelled rule.
pub struct Rule {
    label: String,
    predicate: Box<dyn Predicate>,
    min_occurrences: usize,
}

impl Rule {
    pub fn new(label: impl Into<String>, predicate: impl Predicate + 'static) -> Self {
        Self {
            label: label.into(),
            predicate: Box::new(predicate),
            min_occurrences: 1,
        }
    }

    /// Require at least `n` occurrences before the rule fires (minimum 1).
    pub fn with_min_occurrences(mut self, n: usize) -> Self {
        self.min_occurrences = n.max(1);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn fires(&self, raw: &str, lines: &[&str]) -> bool {
        let line_hits = lines
            .iter()
            .filter(|l| self.predicate.matches_line(l))
            .count();
        line_hits >= self.min_occurrences
            || self.predicate.text_occurrences(raw) >= self.min_occurrences
    }
}

impl From<&RuleConfig> for Rule {
    fn from(config: &RuleConfig) -> Self {
        Rule::new(
            config.label.clone(),
            PhrasePredicate::new(config.any_of.clone(), config.none_of.clone()),
        )
        .with_min_occurrences(config.min_occurrences)
    }
}

pub fn pre_invoicing_rule() -> Rule {
    Rule::new(
        "pre_invoicing_risk",
        PhrasePredicate::new(
            ["预开发票风险", "預開發票風險"],
            [
                "不存在预开发票风险",
                "没有预开发票风险",
                "无预开发票风险",
                "不存在預開發票風險",
                "沒有預開發票風險",
                "無預開發票風險",
            ],
        ),
    )
}

pub fn not_stated_rule() -> Rule {
    Rule::new(
        "not_stated",
        PhrasePredicate::new(["未明确提及", "未提及", "未明確提及"], []),
    )
}

pub fn open_contract_rule(min_occurrences: usize) -> Rule {
    Rule::new("open_contract", PhrasePredicate::new(["开口合同", "開口合同"], []))
        .with_min_occurrences(min_occurrences)
}

/// Ordered rules applied to every analysis response.
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::builtin(1)
    }
}

impl RuleSet {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn builtin(open_contract_min: usize) -> Self {
        Self {
            rules: vec![
                pre_invoicing_rule(),
                not_stated_rule(),
                open_contract_rule(open_contract_min),
            ],
        }
    }

    /// Built-in rules followed by any configured extras.
    pub fn from_config(config: &SuspicionConfig) -> Self {
        let mut set = Self::builtin(config.open_contract_min_occurrences);
        for extra in &config.extra_rules {
            set.push(Rule::from(extra));
        }
        set
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn labels(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.label()).collect()
    }

    /// Classify a raw model response.
    pub fn detect(&self, raw: &str) -> SuspicionFinding {
        let lines: Vec<&str> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let fired: Vec<&Rule> = self.rules.iter().filter(|r| r.fires(raw, &lines)).collect();

        let summary_lines = lines
            .iter()
            .filter(|l| fired.iter().any(|r| r.predicate.matches_line(l)))
            .map(|l| l.to_string())
            .collect();

        SuspicionFinding {
            summary_lines,
            labels: fired.iter().map(|r| r.label.clone()).collect(),
            suspicious: !fired.is_empty(),
        }
    }
}

impl SuspicionFinding {
    /// Matching lines separated by blank lines.
    ///
    /// A rule that fired on the whole-text scan alone leaves no line behind;
    /// its label stands in. The placeholder is only for clean responses.
    pub fn summary(&self) -> String {
        if !self.summary_lines.is_empty() {
            self.summary_lines.join(SUMMARY_SEPARATOR)
        } else if self.suspicious {
            self.labels.join(SUMMARY_SEPARATOR)
        } else {
            NO_SUSPICION_PLACEHOLDER.to_string()
        }
    }
}
