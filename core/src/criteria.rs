//! Acceptance-criteria runners.

use async_trait::async_trait;
use thiserror::Error;

use crate::lineage::GeneratedContent;
use crate::spec_record::AcceptanceCriterion;
use crate::types::Verdict;

/// The runner could not produce a verdict at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("criteria runner failed: {0}")]
pub struct RunnerError(pub String);

/// Evaluates one criterion against one piece of content.
#[async_trait]
pub trait CriteriaRunner: Send + Sync {
    async fn evaluate(
        &self,
        criterion: &AcceptanceCriterion,
        content: &GeneratedContent,
    ) -> Result<Verdict, RunnerError>;

    fn name(&self) -> &str;
}

/// Reads check marks left in the content or its captured test log.
///
/// `✓ <criterion>` or `PASS: <criterion>` counts as a pass, `✗ <criterion>`
/// or `FAIL: <criterion>` as a failure. When a criterion is marked more than
/// once the last mark wins; an unmarked criterion is inconclusive.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerRunner;

const PASS_MARKERS: [&str; 2] = ["✓", "PASS:"];
const FAIL_MARKERS: [&str; 2] = ["✗", "FAIL:"];

impl MarkerRunner {
    pub fn new() -> Self {
        Self
    }

    pub fn verdict_for(criterion: &str, body: &str) -> Verdict {
        let mut verdict = Verdict::Inconclusive;
        for line in body.lines() {
            let line = strip_comment_prefix(line.trim());
            if let Some(marked) = marked_name(line, &PASS_MARKERS)
                && marked == criterion
            {
                verdict = Verdict::Pass;
            } else if let Some(marked) = marked_name(line, &FAIL_MARKERS)
                && marked == criterion
            {
                verdict = Verdict::Fail;
            }
        }
        verdict
    }
}

// Markers usually live inside comments of the generated source.
fn strip_comment_prefix(line: &str) -> &str {
    ["//", "#", "--", ";"]
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .map(str::trim_start)
        .unwrap_or(line)
}

fn marked_name<'a>(line: &'a str, markers: &[&str]) -> Option<&'a str> {
    markers
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
        .map(str::trim)
}

#[async_trait]
impl CriteriaRunner for MarkerRunner {
    async fn evaluate(
        &self,
        criterion: &AcceptanceCriterion,
        content: &GeneratedContent,
    ) -> Result<Verdict, RunnerError> {
        Ok(Self::verdict_for(&criterion.name, &content.body))
    }

    fn name(&self) -> &str {
        "marker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOG: &str = "\
def tokenize(s):
    return s.split()
# ✓ C1
# ✗ C2
PASS: C3
";

    #[test]
    fn test_reads_pass_and_fail_marks() {
        assert_eq!(MarkerRunner::verdict_for("C1", LOG), Verdict::Pass);
        assert_eq!(MarkerRunner::verdict_for("C2", LOG), Verdict::Fail);
        assert_eq!(MarkerRunner::verdict_for("C3", LOG), Verdict::Pass);
    }

    #[test]
    fn test_unmarked_criterion_is_inconclusive() {
        assert_eq!(MarkerRunner::verdict_for("C4", LOG), Verdict::Inconclusive);
    }

    #[test]
    fn test_names_match_exactly() {
        assert_eq!(MarkerRunner::verdict_for("C", "✓ C1"), Verdict::Inconclusive);
    }

    #[test]
    fn test_last_mark_wins() {
        let body = "// ✗ C1\n// ✓ C1\n";
        assert_eq!(MarkerRunner::verdict_for("C1", body), Verdict::Pass);
    }

    #[tokio::test]
    async fn test_evaluates_through_trait() {
        let content = GeneratedContent::new(LOG, "python", "test");
        let verdict = MarkerRunner::new()
            .evaluate(&AcceptanceCriterion::new("C2", "drops empties"), &content)
            .await
            .expect("marker runner never errors");
        assert_eq!(verdict, Verdict::Fail);
    }
}
