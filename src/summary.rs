//! Detection of subtotal lines inside a trial balance.
//!
//! Exports usually repeat each account family as a rollup line whose code ends in zero
//! segments (`100-000-000`). Counting those alongside their children would double the totals.

use crate::schema::LedgerRow;

const ROOT_SUMMARY_PREFIX: &str = "000-000-";

/// A non-empty segment made only of `'0'`.
pub fn is_zero_segment(segment: &str) -> bool {
    let segment = segment.trim();
    !segment.is_empty() && segment.chars().all(|c| c == '0')
}

/// Prefix shared by the children of a candidate subtotal code.
///
/// `None` when the code has no trailing zero segment. `Some("")` when every segment is zero.
fn rollup_prefix(code: &str) -> Option<String> {
    let segments: Vec<&str> = code.split('-').collect();
    let trailing_zeros = segments
        .iter()
        .rev()
        .take_while(|s| is_zero_segment(s))
        .count();

    if trailing_zeros == 0 {
        return None;
    }

    let leading = segments.len() - trailing_zeros;
    if leading == 0 {
        return Some(String::new());
    }
    Some(format!("{}-", segments[..leading].join("-")))
}

/// Evaluates codes against one fixed row set.
pub struct SummaryDetector<'a> {
    codes: Vec<&'a str>,
}

impl<'a> SummaryDetector<'a> {
    pub fn new(rows: &'a [LedgerRow]) -> Self {
        Self {
            codes: rows.iter().map(|r| r.code.trim()).collect(),
        }
    }

    pub fn from_codes(codes: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            codes: codes.into_iter().map(str::trim).collect(),
        }
    }

    pub fn is_summary(&self, code: &str) -> bool {
        let code = code.trim();
        if code.is_empty() {
            return false;
        }
        if code.starts_with(ROOT_SUMMARY_PREFIX) {
            return true;
        }

        match rollup_prefix(code) {
            None => false,
            Some(prefix) if prefix.is_empty() => true,
            Some(prefix) => self
                .codes
                .iter()
                .any(|other| *other != code && other.starts_with(&prefix)),
        }
    }
}

pub fn is_summary_line(code: &str, rows: &[LedgerRow]) -> bool {
    SummaryDetector::new(rows).is_summary(code)
}
