//! Placeholder injection into a larger source artifact.
//!
//! The region is delimited by two marker lines:
//!
//! ```text
//! // @modelkit:begin model
//! ...replaced...
//! // @modelkit:end model
//! ```
//!
//! The markers may live inside any comment syntax; only the tokens matter.
//! Both marker lines and every byte outside the region are preserved.

use std::ops::Range;
use std::path::Path;

use tracing::info;

use crate::config::{EmbedMode, PlaceholderConfig};
use crate::emit::EmittedUnit;
use crate::error::{ModelkitError, Result};
use crate::io;

const BEGIN_PREFIX: &str = "@modelkit:begin";
const END_PREFIX: &str = "@modelkit:end";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    begin: String,
    end: String,
}

impl Placeholder {
    pub fn named(name: &str) -> Self {
        Self {
            begin: format!("{} {}", BEGIN_PREFIX, name),
            end: format!("{} {}", END_PREFIX, name),
        }
    }

    pub fn begin_marker(&self) -> &str {
        &self.begin
    }

    pub fn end_marker(&self) -> &str {
        &self.end
    }

    /// Byte range of the region's content inside `text`. Begin and end
    /// markers must sit on separate lines.
    pub fn locate(&self, text: &str) -> Result<Range<usize>> {
        let mut begins = Vec::new();
        let mut ends = Vec::new();
        let mut offset = 0usize;
        for (index, line) in text.split_inclusive('\n').enumerate() {
            let is_begin = has_marker(line, &self.begin);
            if is_begin && has_marker(line, &self.end) {
                return Err(ModelkitError::MarkersOnSameLine {
                    marker: self.begin.clone(),
                    line: index + 1,
                });
            }
            if is_begin {
                begins.push((index + 1, offset + line.len()));
            } else if has_marker(line, &self.end) {
                ends.push(offset);
            }
            offset += line.len();
        }

        match begins.len() {
            0 => {
                return Err(ModelkitError::PlaceholderNotFound {
                    marker: self.begin.clone(),
                })
            }
            1 => {}
            count => {
                return Err(ModelkitError::AmbiguousPlaceholder {
                    marker: self.begin.clone(),
                    count,
                })
            }
        }
        if ends.len() > 1 {
            return Err(ModelkitError::AmbiguousPlaceholder {
                marker: self.end.clone(),
                count: ends.len(),
            });
        }

        let (line, start) = begins[0];
        match ends.first() {
            Some(&end) if end >= start => Ok(start..end),
            _ => Err(ModelkitError::UnterminatedPlaceholder {
                marker: self.begin.clone(),
                line,
            }),
        }
    }
}

impl From<&PlaceholderConfig> for Placeholder {
    fn from(config: &PlaceholderConfig) -> Self {
        Self::named(&config.name)
    }
}

/// True if `line` contains `marker` as a whole token.
fn has_marker(line: &str, marker: &str) -> bool {
    line.match_indices(marker).any(|(at, _)| {
        line[at + marker.len()..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace)
    })
}

/// Escape `text` for embedding according to `mode`.
pub fn escape(text: &str, mode: EmbedMode) -> String {
    match mode {
        EmbedMode::Raw => text.to_string(),
        EmbedMode::TemplateLiteral => {
            let mut out = String::with_capacity(text.len());
            let mut chars = text.chars().peekable();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '`' => out.push_str("\\`"),
                    '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
                    _ => out.push(c),
                }
            }
            out
        }
    }
}

/// Replace the placeholder region of `template` with `unit`.
pub fn inject_str(
    template: &str,
    unit: &EmittedUnit,
    placeholder: &Placeholder,
    mode: EmbedMode,
) -> Result<String> {
    let region = placeholder.locate(template)?;
    let body = escape(unit.as_str(), mode);
    // A marker inside the body would make the patched file unlocatable.
    for marker in [placeholder.begin_marker(), placeholder.end_marker()] {
        if body.lines().any(|line| has_marker(line, marker)) {
            return Err(ModelkitError::MarkerInUnit {
                marker: marker.to_string(),
            });
        }
    }
    let mut out = String::with_capacity(template.len() - region.len() + body.len());
    out.push_str(&template[..region.start]);
    out.push_str(&body);
    out.push_str(&template[region.end..]);
    Ok(out)
}

/// Result of [`inject_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    Updated,
    Unchanged,
}

/// Inject `unit` into the file at `path`.
///
/// The file is only written when its contents change, and then atomically;
/// on any error it is left as it was.
pub fn inject_file(
    path: impl AsRef<Path>,
    unit: &EmittedUnit,
    placeholder: &Placeholder,
    mode: EmbedMode,
) -> Result<InjectOutcome> {
    let path = path.as_ref();
    let template = io::read_to_string(path)?;
    let patched = inject_str(&template, unit, placeholder, mode)?;
    if patched == template {
        info!(path = %path.display(), "template already up to date");
        return Ok(InjectOutcome::Unchanged);
    }
    io::write_atomic(path, patched.as_bytes())?;
    info!(
        path = %path.display(),
        marker = placeholder.begin_marker(),
        bytes = patched.len(),
        "injected unit"
    );
    Ok(InjectOutcome::Updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TEMPLATE: &str = "\
#![no_std]
const BEFORE: u32 = 1;
// @modelkit:begin model
// placeholder
// @modelkit:end model
const AFTER: u32 = 2;
";

    fn unit() -> EmittedUnit {
        EmittedUnit::from_text("pub const X: i64 = 3;\n")
    }

    fn placeholder() -> Placeholder {
        Placeholder::named("model")
    }

    #[test]
    fn test_single_placeholder_replaced() {
        let out = inject_str(TEMPLATE, &unit(), &placeholder(), EmbedMode::Raw).unwrap();
        assert_eq!(
            out,
            "#![no_std]\n\
             const BEFORE: u32 = 1;\n\
             // @modelkit:begin model\n\
             pub const X: i64 = 3;\n\
             // @modelkit:end model\n\
             const AFTER: u32 = 2;\n"
        );
    }

    #[test]
    fn test_bytes_outside_region_untouched() {
        let region = placeholder().locate(TEMPLATE).unwrap();
        let out = inject_str(TEMPLATE, &unit(), &placeholder(), EmbedMode::Raw).unwrap();
        assert!(out.starts_with(&TEMPLATE[..region.start]));
        assert!(out.ends_with(&TEMPLATE[region.end..]));
    }

    #[test]
    fn test_injection_is_idempotent() {
        let once = inject_str(TEMPLATE, &unit(), &placeholder(), EmbedMode::Raw).unwrap();
        let twice = inject_str(&once, &unit(), &placeholder(), EmbedMode::Raw).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_region() {
        let template = "a\n# @modelkit:begin model\n# @modelkit:end model\nb";
        let out = inject_str(template, &unit(), &placeholder(), EmbedMode::Raw).unwrap();
        assert_eq!(
            out,
            "a\n# @modelkit:begin model\npub const X: i64 = 3;\n# @modelkit:end model\nb"
        );
    }

    #[test]
    fn test_missing_placeholder() {
        let err = inject_str("no markers\n", &unit(), &placeholder(), EmbedMode::Raw).unwrap_err();
        assert!(matches!(err, ModelkitError::PlaceholderNotFound { .. }));
    }

    #[test]
    fn test_duplicate_placeholder() {
        let doubled = format!("{TEMPLATE}{TEMPLATE}");
        match inject_str(&doubled, &unit(), &placeholder(), EmbedMode::Raw) {
            Err(ModelkitError::AmbiguousPlaceholder { count, .. }) => assert_eq!(count, 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_placeholder() {
        let template = "// @modelkit:end model\n// @modelkit:begin model\nx\n";
        assert!(matches!(
            inject_str(template, &unit(), &placeholder(), EmbedMode::Raw),
            Err(ModelkitError::UnterminatedPlaceholder { line: 2, .. })
        ));
    }

    #[test]
    fn test_marker_names_must_match_exactly() {
        let template = "// @modelkit:begin models\n// @modelkit:end models\n";
        assert!(matches!(
            placeholder().locate(template),
            Err(ModelkitError::PlaceholderNotFound { .. })
        ));
        assert!(Placeholder::named("models").locate(template).is_ok());
    }

    #[test]
    fn test_template_literal_escaping() {
        let unit = EmittedUnit::from_text("let s = `a\\b ${x}`; $y\n");
        let template = "code: `\n// @modelkit:begin model\n// @modelkit:end model\n`,\n";
        let out = inject_str(template, &unit, &placeholder(), EmbedMode::TemplateLiteral).unwrap();
        assert!(out.contains("let s = \\`a\\\\b \\${x}\\`; $y\n"), "{out}");
    }

    #[test]
    fn test_unit_containing_marker_rejected() {
        let template = "x\n// @modelkit:begin model\n// @modelkit:end model\ny\n";
        for text in ["// @modelkit:end model\n", "a\n/* @modelkit:begin model */\n"] {
            let unit = EmittedUnit::from_text(text);
            assert!(matches!(
                inject_str(template, &unit, &placeholder(), EmbedMode::Raw),
                Err(ModelkitError::MarkerInUnit { .. })
            ));
        }

        // Other placeholder names are plain text.
        let unit = EmittedUnit::from_text("// @modelkit:end other\n");
        let once = inject_str(template, &unit, &placeholder(), EmbedMode::Raw).unwrap();
        let twice = inject_str(&once, &unit, &placeholder(), EmbedMode::Raw).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_markers_on_one_line_rejected() {
        let template = "x\n/* @modelkit:begin model */ x /* @modelkit:end model */\ny\n";
        match placeholder().locate(template) {
            Err(err @ ModelkitError::MarkersOnSameLine { line, .. }) => {
                assert_eq!(line, 2);
                assert!(err.to_string().contains("separate lines"));
            }
            other => panic!("expected same-line markers, got {other:?}"),
        }
    }

    #[test]
    fn test_template_literal_injection_is_idempotent() {
        let unit = EmittedUnit::from_text("let s = `a\\b ${x}`;\n");
        let template = "code: `\n// @modelkit:begin model\n// @modelkit:end model\n`,\n";
        let once = inject_str(template, &unit, &placeholder(), EmbedMode::TemplateLiteral).unwrap();
        let twice = inject_str(&once, &unit, &placeholder(), EmbedMode::TemplateLiteral).unwrap();
        assert_eq!(once, twice);
        assert!(once.starts_with("code: `\n// @modelkit:begin model\nlet s = \\`"));
    }

    #[test]
    fn test_inject_file_updates_then_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.rs");
        fs::write(&path, TEMPLATE).unwrap();

        let first = inject_file(&path, &unit(), &placeholder(), EmbedMode::Raw).unwrap();
        assert_eq!(first, InjectOutcome::Updated);
        let after_first = fs::read_to_string(&path).unwrap();

        let second = inject_file(&path, &unit(), &placeholder(), EmbedMode::Raw).unwrap();
        assert_eq!(second, InjectOutcome::Unchanged);
        assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
    }

    #[test]
    fn test_failed_injection_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.rs");
        let doubled = format!("{TEMPLATE}{TEMPLATE}");
        fs::write(&path, &doubled).unwrap();

        assert!(inject_file(&path, &unit(), &placeholder(), EmbedMode::Raw).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), doubled);

        let empty = dir.path().join("empty.rs");
        fs::write(&empty, "fn main() {}\n").unwrap();
        assert!(inject_file(&empty, &unit(), &placeholder(), EmbedMode::Raw).is_err());
        assert_eq!(fs::read_to_string(&empty).unwrap(), "fn main() {}\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
