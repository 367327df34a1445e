//! Writes a pulled session where the DAW's scripts can read it.
//!
//! The Lua form is a chunk `return { ... }` suitable for `dofile()`.

use std::fmt::Write as _;
use std::path::Path;

use clap::ValueEnum;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::document::SessionDocument;
use crate::error::{PeerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SnapshotFormat {
    #[default]
    Lua,
    Json,
}

const LUA_KEYWORDS: [&str; 22] = [
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

pub fn render(document: &SessionDocument, format: SnapshotFormat) -> Result<String> {
    match format {
        SnapshotFormat::Json => Ok(serde_json::to_string_pretty(document)?),
        SnapshotFormat::Lua => {
            let value = serde_json::to_value(document)?;
            let mut out = String::from("return ");
            write_lua(&mut out, &value, 0);
            out.push('\n');
            Ok(out)
        }
    }
}

/// Replaces `path` with the rendered snapshot via a sibling temp file.
pub async fn write(path: &Path, document: &SessionDocument, format: SnapshotFormat) -> Result<()> {
    let contents = render(document, format)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| PeerError::storage(format!("{} is not a file path", path.display())))?;
    let tmp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4()
    ));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(PeerError::storage(format!("cannot write {}: {}", path.display(), e)));
    }
    Ok(())
}

fn write_lua(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Null => out.push_str("nil"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::String(s) => write_lua_string(out, s),
        Value::Array(items) => {
            if items.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{\n");
            for item in items {
                indent(out, depth + 1);
                write_lua(out, item, depth + 1);
                out.push_str(",\n");
            }
            indent(out, depth);
            out.push('}');
        }
        Value::Object(fields) => {
            if fields.is_empty() {
                out.push_str("{}");
                return;
            }
            let mut entries: Vec<_> = fields.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push_str("{\n");
            for (key, item) in entries {
                indent(out, depth + 1);
                if is_lua_identifier(key) {
                    out.push_str(key);
                } else {
                    out.push('[');
                    write_lua_string(out, key);
                    out.push(']');
                }
                out.push_str(" = ");
                write_lua(out, item, depth + 1);
                out.push_str(",\n");
            }
            indent(out, depth);
            out.push('}');
        }
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn is_lua_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic());
    starts_ok
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !LUA_KEYWORDS.contains(&key)
}

fn write_lua_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_control() => {
                // Decimal escape, zero-padded so a following digit is not absorbed.
                let _ = write!(out, "\\{:03}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MixState, TrackKey, TrackRecord, TIMESTAMP_FORMAT};
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    fn sample() -> SessionDocument {
        let mut doc = SessionDocument::default();
        doc.tracks.push(TrackRecord::new(
            "S1",
            TrackKey::new("Guitar", "u1"),
            "Gtr \"clean\"",
            MixState {
                volume: 0.8,
                pan: -0.2,
                mute: 0.0,
                solo: 1.0,
            },
            NaiveDateTime::parse_from_str("2024-05-01 12:30:00", TIMESTAMP_FORMAT).unwrap(),
        ));
        doc.credit("user-2", 20.0);
        doc
    }

    #[test]
    fn lua_snapshot_is_a_table_literal() {
        let lua = render(&sample(), SnapshotFormat::Lua).unwrap();
        let expected = r#"return {
  contributions = {
    ["user-2"] = {
      total_seconds = 20.0,
    },
  },
  tracks = {
    {
      common_track = "Guitar",
      mute = 0.0,
      pan = -0.2,
      solo = 1.0,
      song_folder = "S1",
      track_name = "Gtr \"clean\"",
      updated_at = "2024-05-01 12:30:00",
      user_id = "u1",
      vol = 0.8,
    },
  },
}
"#;
        assert_eq!(lua, expected);
    }

    #[test]
    fn empty_document_renders_empty_tables() {
        let lua = render(&SessionDocument::default(), SnapshotFormat::Lua).unwrap();
        assert_eq!(lua, "return {\n  contributions = {},\n  tracks = {},\n}\n");
    }

    #[test]
    fn keywords_and_odd_keys_are_bracketed() {
        assert!(is_lua_identifier("total_seconds"));
        assert!(!is_lua_identifier("end"));
        assert!(!is_lua_identifier("9lives"));
        assert!(!is_lua_identifier("user id"));

        let mut out = String::new();
        write_lua_string(&mut out, "a\u{1}7\\");
        assert_eq!(out, r#""a\0017\\""#);
    }

    #[tokio::test]
    async fn write_replaces_target_completely() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "stale contents that are longer than the new document").unwrap();

        write(&path, &sample(), SnapshotFormat::Json).await.unwrap();

        let parsed: SessionDocument =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, sample());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
