//! Diff-match-patch text deltas.
//!
//! Produces and consumes the textual hunk format used by `diffMatchPatch`
//! operations:
//!
//! ```text
//! @@ -3,5 +3,5 @@
//!  r%0Aba
//! -z
//! +t
//! ```
//!
//! Hunks carry a few characters of surrounding context so they can be located
//! again when the target text has shifted. Positions and lengths count Unicode
//! scalar values.

use std::fmt;
use thiserror::Error;

/// Context characters added on each side of a hunk.
const MARGIN: usize = 4;
/// Upper bound on a hunk's context pattern while making it unique.
const MAX_PATTERN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DmpError {
    #[error("invalid patch text: {0}")]
    InvalidPatch(String),

    #[error("hunk {index} does not match the target text")]
    HunkNotApplied { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Del,
    Eql,
    Ins,
}

pub type Diff = (DiffOp, String);

/// One hunk of a text patch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DmpPatch {
    pub diffs: Vec<Diff>,
    pub start1: usize,
    pub start2: usize,
    pub length1: usize,
    pub length2: usize,
}

impl DmpPatch {
    /// Text this hunk expects to find.
    pub fn source(&self) -> String {
        src(&self.diffs)
    }

    /// Text this hunk writes.
    pub fn target(&self) -> String {
        dst(&self.diffs)
    }
}

impl fmt::Display for DmpPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "@@ -{} +{} @@",
            coords(self.start1, self.length1),
            coords(self.start2, self.length2)
        )?;
        for (op, text) in &self.diffs {
            let sign = match op {
                DiffOp::Ins => '+',
                DiffOp::Del => '-',
                DiffOp::Eql => ' ',
            };
            writeln!(f, "{}{}", sign, encode(text))?;
        }
        Ok(())
    }
}

fn coords(start: usize, length: usize) -> String {
    match length {
        0 => format!("{},0", start),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, length),
    }
}

/// Concatenated source side of a diff.
pub fn src(diffs: &[Diff]) -> String {
    diffs
        .iter()
        .filter(|(op, _)| *op != DiffOp::Ins)
        .map(|(_, s)| s.as_str())
        .collect()
}

/// Concatenated destination side of a diff.
pub fn dst(diffs: &[Diff]) -> String {
    diffs
        .iter()
        .filter(|(op, _)| *op != DiffOp::Del)
        .map(|(_, s)| s.as_str())
        .collect()
}

/// Compute a character diff from `text1` to `text2`.
pub fn diff(text1: &str, text2: &str) -> Vec<Diff> {
    let a: Vec<char> = text1.chars().collect();
    let b: Vec<char> = text2.chars().collect();

    let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];

    let mut out: Vec<Diff> = Vec::new();
    if prefix > 0 {
        out.push((DiffOp::Eql, a[..prefix].iter().collect()));
    }
    for (op, c) in myers(mid_a, mid_b) {
        match out.last_mut() {
            Some((last, text)) if *last == op => text.push(c),
            _ => out.push((op, c.to_string())),
        }
    }
    if suffix > 0 {
        out.push((DiffOp::Eql, a[a.len() - suffix..].iter().collect()));
    }
    cleanup_merge(out)
}

/// Shortest edit script between two char slices, one entry per character.
fn myers(a: &[char], b: &[char]) -> Vec<(DiffOp, char)> {
    if a.is_empty() {
        return b.iter().map(|c| (DiffOp::Ins, *c)).collect();
    }
    if b.is_empty() {
        return a.iter().map(|c| (DiffOp::Del, *c)).collect();
    }

    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = n + m;
    let offset = max;
    let mut v = vec![0isize; 2 * max as usize + 2];
    let mut trace: Vec<Vec<isize>> = Vec::new();

    'search: for d in 0..=max {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let idx = (k + offset) as usize;
            let mut x = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                break 'search;
            }
            k += 2;
        }
    }

    let mut ops = Vec::with_capacity(a.len() + b.len());
    let (mut x, mut y) = (n, m);
    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let k = x - y;
        let idx = (k + offset) as usize;
        let prev_k = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[(prev_k + offset) as usize];
        let prev_y = prev_x - prev_k;
        while x > prev_x && y > prev_y {
            ops.push((DiffOp::Eql, a[(x - 1) as usize]));
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                ops.push((DiffOp::Ins, b[(y - 1) as usize]));
            } else {
                ops.push((DiffOp::Del, a[(x - 1) as usize]));
            }
        }
        x = prev_x;
        y = prev_y;
    }
    ops.reverse();
    ops
}

/// Merge runs: between equalities all deletions come first, then insertions.
fn cleanup_merge(diffs: Vec<Diff>) -> Vec<Diff> {
    let mut out: Vec<Diff> = Vec::with_capacity(diffs.len());
    let mut del = String::new();
    let mut ins = String::new();

    let flush = |out: &mut Vec<Diff>, del: &mut String, ins: &mut String| {
        if !del.is_empty() {
            out.push((DiffOp::Del, std::mem::take(del)));
        }
        if !ins.is_empty() {
            out.push((DiffOp::Ins, std::mem::take(ins)));
        }
    };

    for (op, text) in diffs {
        if text.is_empty() {
            continue;
        }
        match op {
            DiffOp::Del => del.push_str(&text),
            DiffOp::Ins => ins.push_str(&text),
            DiffOp::Eql => {
                flush(&mut out, &mut del, &mut ins);
                match out.last_mut() {
                    Some((DiffOp::Eql, last)) => last.push_str(&text),
                    _ => out.push((DiffOp::Eql, text)),
                }
            }
        }
    }
    flush(&mut out, &mut del, &mut ins);
    out
}

/// Build the hunks turning `text1` into `text2`.
pub fn make_patch(text1: &str, text2: &str) -> Vec<DmpPatch> {
    let diffs = diff(text1, text2);
    if diffs.iter().all(|(op, _)| *op == DiffOp::Eql) {
        return Vec::new();
    }

    let mut patches = Vec::new();
    let mut patch = DmpPatch::default();
    let mut count1 = 0usize;
    let mut count2 = 0usize;
    let mut prepatch: Vec<char> = text1.chars().collect();
    let mut postpatch: Vec<char> = prepatch.clone();

    let last = diffs.len() - 1;
    for (i, (op, text)) in diffs.iter().enumerate() {
        let len = text.chars().count();
        if patch.diffs.is_empty() && *op != DiffOp::Eql {
            patch.start1 = count1;
            patch.start2 = count2;
        }
        match op {
            DiffOp::Ins => {
                patch.diffs.push((*op, text.clone()));
                patch.length2 += len;
                postpatch.splice(count2..count2, text.chars());
            }
            DiffOp::Del => {
                patch.diffs.push((*op, text.clone()));
                patch.length1 += len;
                postpatch.drain(count2..count2 + len);
            }
            DiffOp::Eql => {
                if len <= 2 * MARGIN && !patch.diffs.is_empty() && i != last {
                    patch.diffs.push((*op, text.clone()));
                    patch.length1 += len;
                    patch.length2 += len;
                } else if len >= 2 * MARGIN && !patch.diffs.is_empty() {
                    add_context(&mut patch, &prepatch);
                    patches.push(std::mem::take(&mut patch));
                    prepatch = postpatch.clone();
                    count1 = count2;
                }
            }
        }
        if *op != DiffOp::Ins {
            count1 += len;
        }
        if *op != DiffOp::Del {
            count2 += len;
        }
    }
    if !patch.diffs.is_empty() {
        add_context(&mut patch, &prepatch);
        patches.push(patch);
    }
    patches
}

fn add_context(patch: &mut DmpPatch, text: &[char]) {
    if text.is_empty() {
        return;
    }
    let mut padding = 0;
    let mut pattern = window(text, patch.start2, patch.length1, padding);
    while !is_unique(text, pattern) && pattern.len() < MAX_PATTERN - 2 * MARGIN {
        padding += MARGIN;
        pattern = window(text, patch.start2, patch.length1, padding);
    }
    padding += MARGIN;

    let prefix_from = patch.start2.saturating_sub(padding);
    let prefix: String = text[prefix_from..patch.start2.min(text.len())].iter().collect();
    let suffix_from = (patch.start2 + patch.length1).min(text.len());
    let suffix_to = (patch.start2 + patch.length1 + padding).min(text.len());
    let suffix: String = text[suffix_from..suffix_to].iter().collect();

    let prefix_len = prefix.chars().count();
    let suffix_len = suffix.chars().count();
    if prefix_len > 0 {
        patch.diffs.insert(0, (DiffOp::Eql, prefix));
    }
    if suffix_len > 0 {
        patch.diffs.push((DiffOp::Eql, suffix));
    }
    patch.start1 -= prefix_len;
    patch.start2 -= prefix_len;
    patch.length1 += prefix_len + suffix_len;
    patch.length2 += prefix_len + suffix_len;
}

fn window(text: &[char], start: usize, len: usize, padding: usize) -> &[char] {
    let from = start.saturating_sub(padding).min(text.len());
    let to = (start + len + padding).min(text.len());
    &text[from..to]
}

fn is_unique(text: &[char], pattern: &[char]) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let mut hits = text.windows(pattern.len()).filter(|w| *w == pattern);
    hits.next().is_some() && hits.next().is_none()
}

/// Serialize hunks to the textual patch format.
pub fn patch_to_text(patches: &[DmpPatch]) -> String {
    patches.iter().map(|p| p.to_string()).collect()
}

/// Parse the textual patch format.
pub fn parse_patch(text: &str) -> Result<Vec<DmpPatch>, DmpError> {
    let mut patches = Vec::new();
    let mut lines = text.split('\n').peekable();

    while let Some(line) = lines.next() {
        if line.is_empty() {
            continue;
        }
        let mut patch = parse_header(line)?;
        while let Some(next) = lines.peek() {
            if next.starts_with("@@") {
                break;
            }
            let body = lines.next().unwrap_or_default();
            let mut chars = body.chars();
            let Some(sign) = chars.next() else {
                continue;
            };
            let content = decode(chars.as_str())?;
            let op = match sign {
                '-' => DiffOp::Del,
                '+' => DiffOp::Ins,
                ' ' => DiffOp::Eql,
                other => {
                    return Err(DmpError::InvalidPatch(format!(
                        "invalid hunk line prefix '{}'",
                        other
                    )))
                }
            };
            patch.diffs.push((op, content));
        }
        patches.push(patch);
    }
    Ok(patches)
}

fn parse_header(line: &str) -> Result<DmpPatch, DmpError> {
    let invalid = || DmpError::InvalidPatch(format!("invalid hunk header '{}'", line));
    let inner = line
        .strip_prefix("@@ -")
        .and_then(|l| l.strip_suffix(" @@"))
        .ok_or_else(invalid)?;
    let (left, right) = inner.split_once(" +").ok_or_else(invalid)?;
    let (start1, length1) = parse_coords(left).ok_or_else(invalid)?;
    let (start2, length2) = parse_coords(right).ok_or_else(invalid)?;
    Ok(DmpPatch {
        diffs: Vec::new(),
        start1,
        start2,
        length1,
        length2,
    })
}

fn parse_coords(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        None => {
            let start: usize = s.parse().ok()?;
            Some((start.checked_sub(1)?, 1))
        }
        Some((start, "0")) => Some((start.parse().ok()?, 0)),
        Some((start, len)) => {
            let start: usize = start.parse().ok()?;
            Some((start.checked_sub(1)?, len.parse().ok()?))
        }
    }
}

/// Apply hunks to `text`, locating each by its source text nearest to where it
/// is expected.
pub fn apply_patch(text: &str, patches: &[DmpPatch]) -> Result<String, DmpError> {
    let mut chars: Vec<char> = text.chars().collect();
    let mut delta: isize = 0;

    for (index, patch) in patches.iter().enumerate() {
        let expected = (patch.start2 as isize + delta).max(0) as usize;
        let source: Vec<char> = patch.source().chars().collect();
        let start = locate(&chars, &source, expected).ok_or(DmpError::HunkNotApplied { index })?;
        delta = start as isize - expected as isize;
        let target = patch.target();
        chars.splice(start..start + source.len(), target.chars());
    }
    Ok(chars.into_iter().collect())
}

fn locate(text: &[char], pattern: &[char], expected: usize) -> Option<usize> {
    if pattern.is_empty() {
        return Some(expected.min(text.len()));
    }
    if pattern.len() > text.len() {
        return None;
    }
    text.windows(pattern.len())
        .enumerate()
        .filter(|(_, w)| *w == pattern)
        .map(|(i, _)| i)
        .min_by_key(|i| i.abs_diff(expected))
}

/// Characters left unescaped, matching `encodeURI` plus space.
fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || " ;,/?:@&=+$-_.!~*'()#".contains(c)
}

fn encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_unreserved(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    out
}

fn decode(text: &str) -> Result<String, DmpError> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = text
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| DmpError::InvalidPatch(format!("bad escape in '{}'", text)))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| DmpError::InvalidPatch(format!("invalid utf-8 in '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_basic() {
        assert_eq!(diff("abc", "abc"), vec![(DiffOp::Eql, "abc".to_string())]);
        assert_eq!(
            diff("abc", "axc"),
            vec![
                (DiffOp::Eql, "a".to_string()),
                (DiffOp::Del, "b".to_string()),
                (DiffOp::Ins, "x".to_string()),
                (DiffOp::Eql, "c".to_string()),
            ]
        );
        assert_eq!(diff("", "new"), vec![(DiffOp::Ins, "new".to_string())]);
    }

    #[test]
    fn test_diff_sides_reconstruct() {
        let pairs = [
            ("kitten", "sitting"),
            ("The quick brown fox", "A quick brown dog jumps"),
            ("æøå over", "åøæ under"),
            ("", ""),
        ];
        for (a, b) in pairs {
            let d = diff(a, b);
            assert_eq!(src(&d), a);
            assert_eq!(dst(&d), b);
        }
    }

    #[test]
    fn test_make_patch_text() {
        let patches = make_patch("bar\nbaz", "bar\nbat");
        assert_eq!(patch_to_text(&patches), "@@ -3,5 +3,5 @@\n r%0Aba\n-z\n+t\n");
    }

    #[test]
    fn test_parse_round_trip() {
        let text = "@@ -3,5 +3,5 @@\n r%0Aba\n-z\n+t\n";
        let patches = parse_patch(text).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].start1, 2);
        assert_eq!(patches[0].length1, 5);
        assert_eq!(patch_to_text(&patches), text);
    }

    #[test]
    fn test_apply_shifted_text() {
        let patches = make_patch("The quick brown fox", "The quick red fox");
        // prepend text so the hunk no longer sits at its recorded offset
        let out = apply_patch("Yes! The quick brown fox", &patches).unwrap();
        assert_eq!(out, "Yes! The quick red fox");
    }

    #[test]
    fn test_apply_multiple_hunks() {
        let a = "alpha beta gamma delta epsilon zeta eta theta";
        let b = "alpha BETA gamma delta epsilon zeta eta THETA";
        let patches = make_patch(a, b);
        assert!(patches.len() >= 2);
        assert_eq!(apply_patch(a, &patches).unwrap(), b);
    }

    #[test]
    fn test_apply_mismatch() {
        let patches = make_patch("hello world", "hello there");
        let err = apply_patch("completely different", &patches).unwrap_err();
        assert_eq!(err, DmpError::HunkNotApplied { index: 0 });
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_patch("@@ nonsense @@\n").is_err());
        assert!(parse_patch("@@ -1,2 +1,2 @@\n*ab\n").is_err());
        assert!(parse_patch("@@ -1 +1 @@\n %ZZ\n").is_err());
        assert_eq!(parse_patch("").unwrap(), vec![]);
    }

    #[test]
    fn test_unicode_escaping() {
        let patches = make_patch("smørbrød 🥪", "smørbrød 🍕");
        let text = patch_to_text(&patches);
        assert!(text.is_ascii());
        let parsed = parse_patch(&text).unwrap();
        assert_eq!(apply_patch("smørbrød 🥪", &parsed).unwrap(), "smørbrød 🍕");
    }
}
