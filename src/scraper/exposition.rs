//! Minimal Prometheus text-exposition parsing.
//!
//! The adapters only ever need one view of a scrape: the sum of all samples
//! of a metric family across its label sets. This parser produces exactly
//! that — a flat `family name → summed value` map — and tolerates the
//! quirks real endpoints emit (comments, trailing timestamps, partial
//! lines at the end of a truncated body).

use std::collections::HashMap;

/// Summed sample values keyed by metric family name.
#[derive(Debug, Clone, Default)]
pub struct Families(HashMap<String, f64>);

impl Families {
    /// Summed value of the family, or 0 when the metric is absent from the
    /// scrape.
    pub fn get(&self, name: &str) -> f64 {
        self.0.get(name).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parses a text exposition body, summing every sample of the same family
/// across label sets. Unparseable lines are skipped rather than failing the
/// whole scrape; NaN and infinite samples are ignored.
pub fn parse(body: &str) -> Families {
    let mut out: HashMap<String, f64> = HashMap::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (name, rest) = match line.find('{') {
            Some(brace) => {
                // Value follows the closing brace of the label set.
                let Some(close) = line.rfind('}') else {
                    continue;
                };
                (&line[..brace], &line[close + 1..])
            }
            None => match line.split_once(char::is_whitespace) {
                Some((name, rest)) => (name, rest),
                None => continue,
            },
        };

        if name.is_empty() {
            continue;
        }

        // First token after the name/labels is the value; an optional
        // timestamp may follow it.
        let Some(value_str) = rest.split_whitespace().next() else {
            continue;
        };
        let Ok(value) = value_str.parse::<f64>() else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }

        *out.entry(name.to_string()).or_insert(0.0) += value;
    }

    Families(out)
}
