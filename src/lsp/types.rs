//! Helper types and conversions for working with LSP positions and URIs.
//!
//! Positions on the wire are zero-based with UTF-16 code-unit columns. The
//! byte-span helpers here are the single place that mapping is done; the
//! symbol model (body slices) and the edit engine (splices) both go through
//! them.

use std::path::{Path, PathBuf};

use lsp_types::{Position, Range, Url};

use crate::error::LspError;

use super::LspResult;

/// Converts a path to an LSP file:// URI.
///
/// Relative paths are resolved against the current directory; the result is
/// canonicalized so that one file always maps to one URI.
pub fn path_to_url(path: &Path) -> LspResult<Url> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| LspError::Protocol(format!("failed to get current directory: {e}")))?
            .join(path)
    };

    let canonical = absolute.canonicalize().map_err(|e| {
        LspError::Protocol(format!(
            "failed to canonicalize path '{}': {}",
            path.display(),
            e
        ))
    })?;

    Url::from_file_path(&canonical)
        .map_err(|()| LspError::Protocol(format!("invalid path: {}", canonical.display())))
}

/// Converts an LSP URI back to a filesystem path.
pub fn url_to_path(url: &Url) -> LspResult<PathBuf> {
    url.to_file_path()
        .map_err(|()| LspError::Protocol(format!("not a file URI: {url}")))
}

/// Converts user-facing 1-indexed `(line, column)` to an LSP 0-indexed
/// position. Rejects zero coordinates.
pub fn to_lsp_position(line: u32, column: u32) -> LspResult<Position> {
    if line == 0 || column == 0 {
        return Err(LspError::Protocol(format!(
            "positions are 1-indexed, got line {line}, column {column}"
        )));
    }
    Ok(Position {
        line: line - 1,
        character: column - 1,
    })
}

/// Converts LSP 0-indexed position to user-facing 1-indexed `(line, column)`.
pub fn display_position(position: Position) -> (u32, u32) {
    (position.line + 1, position.character + 1)
}

/// Parses a human-readable kind name back into an LSP symbol kind.
pub fn symbol_kind_from_name(name: &str) -> Option<lsp_types::SymbolKind> {
    use lsp_types::SymbolKind;
    let kind = match name {
        "file" => SymbolKind::FILE,
        "module" => SymbolKind::MODULE,
        "namespace" => SymbolKind::NAMESPACE,
        "package" => SymbolKind::PACKAGE,
        "class" => SymbolKind::CLASS,
        "method" => SymbolKind::METHOD,
        "property" => SymbolKind::PROPERTY,
        "field" => SymbolKind::FIELD,
        "constructor" => SymbolKind::CONSTRUCTOR,
        "enum" => SymbolKind::ENUM,
        "interface" => SymbolKind::INTERFACE,
        "function" => SymbolKind::FUNCTION,
        "variable" => SymbolKind::VARIABLE,
        "constant" => SymbolKind::CONSTANT,
        "string" => SymbolKind::STRING,
        "number" => SymbolKind::NUMBER,
        "boolean" => SymbolKind::BOOLEAN,
        "array" => SymbolKind::ARRAY,
        "object" => SymbolKind::OBJECT,
        "key" => SymbolKind::KEY,
        "null" => SymbolKind::NULL,
        "enum_member" => SymbolKind::ENUM_MEMBER,
        "struct" => SymbolKind::STRUCT,
        "event" => SymbolKind::EVENT,
        "operator" => SymbolKind::OPERATOR,
        "type_parameter" => SymbolKind::TYPE_PARAMETER,
        _ => return None,
    };
    Some(kind)
}

/// Converts an LSP symbol kind to a human-readable string.
pub fn symbol_kind_name(kind: lsp_types::SymbolKind) -> &'static str {
    use lsp_types::SymbolKind;
    match kind {
        SymbolKind::FILE => "file",
        SymbolKind::MODULE => "module",
        SymbolKind::NAMESPACE => "namespace",
        SymbolKind::PACKAGE => "package",
        SymbolKind::CLASS => "class",
        SymbolKind::METHOD => "method",
        SymbolKind::PROPERTY => "property",
        SymbolKind::FIELD => "field",
        SymbolKind::CONSTRUCTOR => "constructor",
        SymbolKind::ENUM => "enum",
        SymbolKind::INTERFACE => "interface",
        SymbolKind::FUNCTION => "function",
        SymbolKind::VARIABLE => "variable",
        SymbolKind::CONSTANT => "constant",
        SymbolKind::STRING => "string",
        SymbolKind::NUMBER => "number",
        SymbolKind::BOOLEAN => "boolean",
        SymbolKind::ARRAY => "array",
        SymbolKind::OBJECT => "object",
        SymbolKind::KEY => "key",
        SymbolKind::NULL => "null",
        SymbolKind::ENUM_MEMBER => "enum_member",
        SymbolKind::STRUCT => "struct",
        SymbolKind::EVENT => "event",
        SymbolKind::OPERATOR => "operator",
        SymbolKind::TYPE_PARAMETER => "type_parameter",
        _ => "unknown",
    }
}

/// Maps an LSP position to a byte offset in `text`.
///
/// Columns are UTF-16 code units. Positions past the end of a line clamp to
/// the line end (before the terminator); lines past the end of the text clamp
/// to `text.len()`.
pub fn position_to_byte_offset(text: &str, position: Position) -> usize {
    let mut offset = 0usize;
    let mut remaining = position.line;
    while remaining > 0 {
        match text[offset..].find('\n') {
            Some(idx) => {
                offset += idx + 1;
                remaining -= 1;
            }
            None => return text.len(),
        }
    }

    let rest = &text[offset..];
    let line_end = match rest.find('\n') {
        Some(i) if i > 0 && rest.as_bytes()[i - 1] == b'\r' => i - 1,
        Some(i) => i,
        None => rest.len(),
    };
    let line = &rest[..line_end];

    let mut utf16 = 0u32;
    for (byte_idx, ch) in line.char_indices() {
        if utf16 >= position.character {
            return offset + byte_idx;
        }
        utf16 += ch.len_utf16() as u32;
    }
    offset + line_end
}

/// Maps an LSP range to a byte span `[start, end)` in `text`.
pub fn range_to_byte_span(text: &str, range: Range) -> std::ops::Range<usize> {
    let start = position_to_byte_offset(text, range.start);
    let end = position_to_byte_offset(text, range.end);
    start..end.max(start)
}

/// True when `range` contains `position` (start inclusive, end exclusive).
pub fn range_contains(range: Range, position: Position) -> bool {
    position >= range.start && position < range.end
}

/// True when `outer` contains every position of `inner`.
pub fn range_encloses(outer: Range, inner: Range) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_lsp_position() {
        let pos = to_lsp_position(1, 1).unwrap();
        assert_eq!((pos.line, pos.character), (0, 0));

        let pos = to_lsp_position(10, 5).unwrap();
        assert_eq!((pos.line, pos.character), (9, 4));

        assert!(to_lsp_position(0, 1).is_err());
        assert!(to_lsp_position(1, 0).is_err());
    }

    #[test]
    fn test_symbol_kind_name_round_trip() {
        for name in ["class", "method", "function", "enum_member", "struct"] {
            let kind = symbol_kind_from_name(name).unwrap();
            assert_eq!(symbol_kind_name(kind), name);
        }
        assert!(symbol_kind_from_name("gadget").is_none());
    }

    #[test]
    fn test_display_position() {
        let (line, col) = display_position(Position {
            line: 0,
            character: 0,
        });
        assert_eq!((line, col), (1, 1));

        let (line, col) = display_position(Position {
            line: 9,
            character: 4,
        });
        assert_eq!((line, col), (10, 5));
    }

    #[test]
    fn test_symbol_kind_name() {
        assert_eq!(symbol_kind_name(lsp_types::SymbolKind::FUNCTION), "function");
        assert_eq!(symbol_kind_name(lsp_types::SymbolKind::STRUCT), "struct");
        assert_eq!(symbol_kind_name(lsp_types::SymbolKind::METHOD), "method");
    }

    #[test]
    fn test_position_to_byte_offset_ascii() {
        let text = "fn a() {}\nfn b() {}\n";
        let pos = |line, character| Position { line, character };
        assert_eq!(position_to_byte_offset(text, pos(0, 0)), 0);
        assert_eq!(position_to_byte_offset(text, pos(0, 3)), 3);
        assert_eq!(position_to_byte_offset(text, pos(1, 0)), 10);
        assert_eq!(position_to_byte_offset(text, pos(1, 3)), 13);
        // past end of line clamps to line end
        assert_eq!(position_to_byte_offset(text, pos(0, 99)), 9);
        // past end of text clamps to len
        assert_eq!(position_to_byte_offset(text, pos(9, 0)), text.len());
    }

    #[test]
    fn test_position_to_byte_offset_utf16() {
        // '€' is 3 bytes, 1 UTF-16 unit; '𝄞' is 4 bytes, 2 UTF-16 units.
        let text = "€𝄞x\n";
        let pos = |character| Position { line: 0, character };
        assert_eq!(position_to_byte_offset(text, pos(0)), 0);
        assert_eq!(position_to_byte_offset(text, pos(1)), 3);
        assert_eq!(position_to_byte_offset(text, pos(3)), 7);
        assert_eq!(position_to_byte_offset(text, pos(4)), 8);
    }

    #[test]
    fn test_position_to_byte_offset_crlf() {
        let text = "ab\r\ncd\r\n";
        assert_eq!(
            position_to_byte_offset(
                text,
                Position {
                    line: 1,
                    character: 1
                }
            ),
            5
        );
        // column past the content stops before the \r
        assert_eq!(
            position_to_byte_offset(
                text,
                Position {
                    line: 0,
                    character: 9
                }
            ),
            2
        );
    }

    #[test]
    fn test_range_to_byte_span() {
        let text = "class Calc:\n    def add(self): pass\n";
        let range = Range {
            start: Position {
                line: 1,
                character: 4,
            },
            end: Position {
                line: 1,
                character: 24,
            },
        };
        assert_eq!(&text[range_to_byte_span(text, range)], "def add(self): pass");
    }

    #[test]
    fn test_range_contains() {
        let range = Range {
            start: Position {
                line: 1,
                character: 0,
            },
            end: Position {
                line: 3,
                character: 0,
            },
        };
        let pos = |line, character| Position { line, character };
        assert!(range_contains(range, pos(1, 0)));
        assert!(range_contains(range, pos(2, 17)));
        assert!(!range_contains(range, pos(3, 0)));
        assert!(!range_contains(range, pos(0, 5)));
    }
}
