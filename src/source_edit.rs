//! Position-preserving source overwrite.
//!
//! Edits are recorded as byte ranges of the original text and applied in one
//! pass. Text outside the ranges is copied through untouched, so its original
//! positions can be mapped exactly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Overwrite {
    start: usize,
    end: usize,
    content: String,
}

#[derive(Debug)]
pub struct SourceEdit<'a> {
    original: &'a str,
    overwrites: Vec<Overwrite>,
}

impl<'a> SourceEdit<'a> {
    pub fn new(original: &'a str) -> Self {
        Self {
            original,
            overwrites: Vec::new(),
        }
    }

    /// Replace `start..end` with `content`. Rejects ranges that are empty,
    /// out of bounds, not on char boundaries, or that overlap an earlier
    /// overwrite; the earlier overwrite wins.
    pub fn overwrite(&mut self, start: usize, end: usize, content: impl Into<String>) -> bool {
        if start >= end
            || end > self.original.len()
            || !self.original.is_char_boundary(start)
            || !self.original.is_char_boundary(end)
        {
            return false;
        }
        if self.overlaps(start, end) {
            return false;
        }

        let index = self.overwrites.partition_point(|o| o.start < start);
        self.overwrites.insert(
            index,
            Overwrite {
                start,
                end,
                content: content.into(),
            },
        );
        true
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.overwrites.iter().any(|o| start < o.end && o.start < end)
    }

    pub fn has_changes(&self) -> bool {
        !self.overwrites.is_empty()
    }

    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.original.len());
        let mut cursor = 0;
        for o in &self.overwrites {
            out.push_str(&self.original[cursor..o.start]);
            out.push_str(&o.content);
            cursor = o.end;
        }
        out.push_str(&self.original[cursor..]);
        out
    }

    /// Map generated positions back to the original. A segment starts every
    /// line and every boundary between copied and overwritten text. Columns
    /// are counted in UTF-16 code units.
    pub fn generate_position_map(&self, file: &str) -> PositionMap {
        let mut builder = MappingBuilder::default();
        let mut cursor = 0;

        for o in &self.overwrites {
            builder.copy_through(&self.original[cursor..o.start]);
            builder.replace(&o.content, &self.original[o.start..o.end]);
            cursor = o.end;
        }
        builder.copy_through(&self.original[cursor..]);

        PositionMap {
            version: 3,
            file: file.to_string(),
            sources: vec![file.to_string()],
            sources_content: vec![Some(self.original.to_string())],
            names: Vec::new(),
            mappings: builder.lines,
        }
    }
}

/// One mapping: `[generated column, source index, original line, original column]`.
pub type Segment = [u32; 4];

/// Decoded source map (v3). The host encodes the mappings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionMap {
    pub version: u32,
    pub file: String,
    pub sources: Vec<String>,
    pub sources_content: Vec<Option<String>>,
    pub names: Vec<String>,
    pub mappings: Vec<Vec<Segment>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Position {
    line: u32,
    column: u32,
}

impl Position {
    fn advance(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += c.len_utf16() as u32;
            }
        }
    }
}

struct MappingBuilder {
    lines: Vec<Vec<Segment>>,
    generated: Position,
    original: Position,
}

impl Default for MappingBuilder {
    fn default() -> Self {
        Self {
            lines: vec![Vec::new()],
            generated: Position::default(),
            original: Position::default(),
        }
    }
}

impl MappingBuilder {
    fn mark(&mut self) {
        let segment = [
            self.generated.column,
            0,
            self.original.line,
            self.original.column,
        ];
        let line = self.generated.line as usize;
        while self.lines.len() <= line {
            self.lines.push(Vec::new());
        }
        if self.lines[line].last() != Some(&segment) {
            self.lines[line].push(segment);
        }
    }

    /// Unchanged text: a segment at its start and at each new line.
    fn copy_through(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.mark();
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.generated.line += 1;
                self.generated.column = 0;
                self.original.line += 1;
                self.original.column = 0;
                if !line.is_empty() {
                    self.mark();
                }
            }
            self.generated.advance(line);
            self.original.advance(line);
        }
    }

    /// Overwritten text: one segment pointing at the start of the replaced
    /// range.
    fn replace(&mut self, content: &str, replaced: &str) {
        self.mark();
        self.generated.advance(content);
        self.original.advance(replaced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_keeps_surrounding_text() {
        let code = "const a = require('x');\nconst b = 1;";
        let mut edit = SourceEdit::new(code);
        let start = code.find("require").unwrap();
        let end = code.find(';').unwrap();
        assert!(edit.overwrite(start, end, "import(\"y\")"));
        assert_eq!(edit.to_text(), "const a = import(\"y\");\nconst b = 1;");
    }

    #[test]
    fn test_overlapping_overwrite_rejected() {
        let mut edit = SourceEdit::new("abcdefgh");
        assert!(edit.overwrite(2, 5, "X"));
        assert!(!edit.overwrite(4, 6, "Y"));
        assert!(!edit.overwrite(0, 3, "Y"));
        assert!(edit.overwrite(5, 6, "Z"));
        assert!(edit.overwrite(0, 1, "W"));
        assert_eq!(edit.to_text(), "WbXZgh");
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let mut edit = SourceEdit::new("héllo");
        assert!(!edit.overwrite(3, 3, "x"));
        assert!(!edit.overwrite(0, 99, "x"));
        assert!(!edit.overwrite(2, 4, "x"));
        assert!(!edit.has_changes());
    }

    #[test]
    fn test_position_map_tracks_shifted_text() {
        let code = "a(require('x'));\nnext();";
        let mut edit = SourceEdit::new(code);
        let start = code.find("require").unwrap();
        let end = start + "require('x')".len();
        edit.overwrite(start, end, "import(\"\\u0000natives:./x.node\")");

        let map = edit.generate_position_map("/src/index.js");
        assert_eq!(map.version, 3);
        assert_eq!(map.sources, vec!["/src/index.js".to_string()]);

        // "a(" then replacement then "));"
        let first_line = &map.mappings[0];
        assert_eq!(first_line[0], [0, 0, 0, 0]);
        assert_eq!(first_line[1], [2, 0, 0, 2]);
        let replacement_len = "import(\"\\u0000natives:./x.node\")".len() as u32;
        assert_eq!(first_line[2], [2 + replacement_len, 0, 0, 14]);

        assert_eq!(map.mappings[1], vec![[0, 0, 1, 0]]);
    }

    #[test]
    fn test_position_map_serializes_camel_case() {
        let edit = SourceEdit::new("x");
        let json = serde_json::to_value(edit.generate_position_map("f.js")).unwrap();
        assert!(json.get("sourcesContent").is_some());
        assert_eq!(json["mappings"], serde_json::json!([[[0, 0, 0, 0]]]));
    }
}
