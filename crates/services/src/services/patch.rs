use db::models::file_change::Hunk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchApplyError {
    #[error("hunk {hunk_id} expected {expected:?} at line {line}, found {found:?}")]
    ContextMismatch {
        hunk_id: String,
        line: usize,
        expected: String,
        found: String,
    },
    #[error("hunk {hunk_id} extends past the end of the file")]
    OutOfBounds { hunk_id: String },
    #[error("hunk {hunk_id} contains a malformed diff line {line:?}")]
    MalformedLine { hunk_id: String, line: String },
}

struct ParsedHunk<'a> {
    hunk: &'a Hunk,
    /// Context + deletion lines, in order: what the base must contain.
    expected: Vec<String>,
    /// Context + addition lines, in order: what replaces them.
    replacement: Vec<String>,
}

fn parse_hunk(hunk: &Hunk) -> Result<ParsedHunk<'_>, PatchApplyError> {
    let mut expected = Vec::new();
    let mut replacement = Vec::new();

    for line in hunk.content.lines() {
        if line.starts_with("\\ No newline") {
            continue;
        }
        match line.chars().next() {
            Some(' ') | None => {
                let text = line.get(1..).unwrap_or("").to_string();
                expected.push(text.clone());
                replacement.push(text);
            }
            Some('-') => expected.push(line[1..].to_string()),
            Some('+') => replacement.push(line[1..].to_string()),
            _ => {
                return Err(PatchApplyError::MalformedLine {
                    hunk_id: hunk.id.clone(),
                    line: line.to_string(),
                });
            }
        }
    }

    Ok(ParsedHunk {
        hunk,
        expected,
        replacement,
    })
}

/// Applies the approved subset of a file change's hunks to `base`.
///
/// Hunk coordinates reference the original file, so hunks are applied in
/// ascending `old_start` order with a running line offset. Context and
/// deletion lines must match the base exactly; drift is a conflict the
/// caller surfaces for re-proposal.
pub fn apply_hunks(base: &str, hunks: &[&Hunk]) -> Result<String, PatchApplyError> {
    let had_trailing_newline = base.ends_with('\n');
    let mut lines: Vec<String> = base.lines().map(String::from).collect();

    let mut ordered: Vec<&Hunk> = hunks.to_vec();
    ordered.sort_by_key(|hunk| hunk.old_start);

    let mut offset: i64 = 0;
    for hunk in ordered {
        let parsed = parse_hunk(hunk)?;
        let start = i64::from(parsed.hunk.old_start.saturating_sub(1)) + offset;
        let start = usize::try_from(start).map_err(|_| PatchApplyError::OutOfBounds {
            hunk_id: hunk.id.clone(),
        })?;

        if start + parsed.expected.len() > lines.len() && !parsed.expected.is_empty() {
            return Err(PatchApplyError::OutOfBounds {
                hunk_id: hunk.id.clone(),
            });
        }
        if parsed.expected.is_empty() && start > lines.len() {
            return Err(PatchApplyError::OutOfBounds {
                hunk_id: hunk.id.clone(),
            });
        }

        for (index, expected) in parsed.expected.iter().enumerate() {
            let found = &lines[start + index];
            if found != expected {
                return Err(PatchApplyError::ContextMismatch {
                    hunk_id: hunk.id.clone(),
                    line: start + index + 1,
                    expected: expected.clone(),
                    found: found.clone(),
                });
            }
        }

        let removed = parsed.expected.len();
        let added = parsed.replacement.len();
        lines.splice(start..start + removed, parsed.replacement);
        offset += added as i64 - removed as i64;
    }

    let mut result = lines.join("\n");
    if (had_trailing_newline || base.is_empty()) && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hunk(id: &str, old_start: u32, content: &str) -> Hunk {
        Hunk {
            id: id.to_string(),
            old_start,
            old_lines: content.lines().filter(|l| !l.starts_with('+')).count() as u32,
            new_start: old_start,
            new_lines: content.lines().filter(|l| !l.starts_with('-')).count() as u32,
            content: content.to_string(),
            rationale: String::new(),
            approved: true,
        }
    }

    #[test]
    fn replaces_a_line_in_place() {
        let base = "fn main() {\n    println!(\"old\");\n}\n";
        let h = hunk("h1", 2, "-    println!(\"old\");\n+    println!(\"new\");\n");

        let patched = apply_hunks(base, &[&h]).unwrap();
        assert_eq!(patched, "fn main() {\n    println!(\"new\");\n}\n");
    }

    #[test]
    fn applies_multiple_hunks_with_offsets() {
        let base = "a\nb\nc\nd\n";
        let first = hunk("h1", 1, "-a\n+a1\n+a2\n");
        let second = hunk("h2", 4, "-d\n+d1\n");

        let patched = apply_hunks(base, &[&second, &first]).unwrap();
        assert_eq!(patched, "a1\na2\nb\nc\nd1\n");
    }

    #[test]
    fn creates_content_in_an_empty_file() {
        let h = hunk("h1", 0, "+line one\n+line two\n");
        let patched = apply_hunks("", &[&h]).unwrap();
        assert_eq!(patched, "line one\nline two\n");
    }

    #[test]
    fn context_drift_is_a_conflict() {
        let base = "a\nb\n";
        let h = hunk("h1", 1, "-z\n+y\n");

        let err = apply_hunks(base, &[&h]).unwrap_err();
        assert!(matches!(err, PatchApplyError::ContextMismatch { line: 1, .. }));
    }

    #[test]
    fn hunk_past_end_of_file_is_rejected() {
        let base = "a\n";
        let h = hunk("h1", 5, "-a\n+b\n");

        let err = apply_hunks(base, &[&h]).unwrap_err();
        assert!(matches!(err, PatchApplyError::OutOfBounds { .. }));
    }

    #[test]
    fn reapplying_to_pre_image_is_stable() {
        let base = "a\nb\n";
        let h = hunk("h1", 1, "-a\n+x\n");

        let once = apply_hunks(base, &[&h]).unwrap();
        let twice = apply_hunks(base, &[&h]).unwrap();
        assert_eq!(once, twice);
    }
}
