//! "Did you mean" hints for rejected names

use crate::registry::is_reflection_name;

const THRESHOLD: f64 = 0.7;
const MAX_SUGGESTIONS: usize = 3;

/// Up to three candidates similar to `input`, best first.
///
/// Reflection names are never suggested.
pub fn did_you_mean<'a, I>(input: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scored: Vec<(f64, &str)> = candidates
        .into_iter()
        .filter(|c| *c != input && !is_reflection_name(c))
        .map(|c| (strsim::jaro(input, c), c))
        .filter(|(score, _)| *score > THRESHOLD)
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, c)| c.to_string())
        .collect()
}
