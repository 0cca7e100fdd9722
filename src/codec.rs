/// Text codec for card and board files.
///
/// Both file kinds share the same outer shape:
///   ---                    header opens
///   key: value             one pair per line
///   ---                    header closes (same marker line)
///                          blank line
///   free-form body
///
/// Card headers are flat key:value pairs. Board headers additionally allow
/// one level of nested array-of-objects (`columns:` and `labels:`), where
/// each object spans multiple indented lines; those blocks go through a
/// small recursive-descent reader instead of the flat scanner.
///
/// The codec knows nothing about files or directories. A card's identity
/// lives in its file name, so `parse_card` takes it from the caller.
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::types::{now, Board, Card, Column, Label};

/// Marker line that both opens and closes a header block.
pub const HEADER_MARKER: &str = "---";

/// Round-trippable timestamp format: UTC, whole seconds.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("no header block found")]
    NoHeader,

    #[error("header opened but never closed")]
    UnterminatedHeader,

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Parse a card file. The identity comes from the file name, not the text.
///
/// `created`/`modified` are replaced with "now" when missing or malformed;
/// an otherwise-valid card is never lost over a bad timestamp. Unknown
/// header keys are ignored.
pub fn parse_card(id: &str, text: &str) -> Result<Card, CodecError> {
    let (header, body) = split_header(text)?;

    let mut title = None;
    let mut column = None;
    let mut position = None;
    let mut created = None;
    let mut modified = None;
    let mut labels = Vec::new();

    for line in &header {
        let Some((key, value)) = split_key_value(line) else {
            continue;
        };
        match key {
            "title" => title = Some(unquote(value)),
            "column" => column = Some(unquote(value)),
            "position" => position = Some(unquote(value)),
            "created" => created = parse_timestamp(value),
            "modified" => modified = parse_timestamp(value),
            "labels" => labels = parse_string_list(value),
            _ => {}
        }
    }

    let title = title.ok_or(CodecError::MissingField("title"))?;
    let column = column.ok_or(CodecError::MissingField("column"))?;
    let position = position.ok_or(CodecError::MissingField("position"))?;

    if created.is_none() || modified.is_none() {
        log::warn!(
            "[tabula.codec.timestamp] Card {:?} has a missing or malformed timestamp, using now",
            title
        );
    }
    let fallback = now();

    Ok(Card {
        id: id.to_string(),
        title,
        column,
        position,
        created: created.unwrap_or(fallback),
        modified: modified.unwrap_or(fallback),
        labels,
        body,
    })
}

/// Serialize a card file. The identity is not written; it is the file name.
pub fn serialize_card(card: &Card) -> String {
    let mut out = String::new();
    out.push_str(HEADER_MARKER);
    out.push('\n');
    out.push_str(&format!("title: {}\n", encode_value(&card.title)));
    out.push_str(&format!("column: {}\n", encode_value(&card.column)));
    out.push_str(&format!("position: {}\n", encode_value(&card.position)));
    out.push_str(&format!("created: {}\n", format_timestamp(card.created)));
    out.push_str(&format!("modified: {}\n", format_timestamp(card.modified)));
    out.push_str(&format!("labels: {}\n", format_string_list(&card.labels)));
    out.push_str(HEADER_MARKER);
    out.push('\n');
    if !card.body.is_empty() {
        out.push('\n');
        out.push_str(&card.body);
        out.push('\n');
    }
    out
}

/// Parse a board file.
pub fn parse_board(text: &str) -> Result<Board, CodecError> {
    let (header, body) = split_header(text)?;

    let mut title = None;
    let mut columns = Vec::new();
    let mut labels = Vec::new();

    let mut i = 0;
    while i < header.len() {
        let line = &header[i];
        if line.starts_with(' ') {
            // Stray continuation line outside any block
            i += 1;
            continue;
        }
        let Some((key, value)) = split_key_value(line) else {
            i += 1;
            continue;
        };
        match key {
            "title" => {
                title = Some(unquote(value));
                i += 1;
            }
            "columns" if value == "[]" => i += 1,
            "columns" => {
                let (items, next) = parse_object_list(&header, i + 1);
                columns = items.into_iter().filter_map(column_from_fields).collect();
                i = next;
            }
            "labels" if value == "[]" => i += 1,
            "labels" => {
                let (items, next) = parse_object_list(&header, i + 1);
                labels = items.into_iter().filter_map(label_from_fields).collect();
                i = next;
            }
            _ => i += 1,
        }
    }

    let title = title.ok_or(CodecError::MissingField("title"))?;
    let template = if body.is_empty() { None } else { Some(body) };

    Ok(Board {
        title,
        columns,
        labels,
        template,
    })
}

/// Serialize a board file. The body is the new-card template, if any.
pub fn serialize_board(board: &Board) -> String {
    let mut out = String::new();
    out.push_str(HEADER_MARKER);
    out.push('\n');
    out.push_str(&format!("title: {}\n", encode_value(&board.title)));

    if board.columns.is_empty() {
        out.push_str("columns: []\n");
    } else {
        out.push_str("columns:\n");
        for col in &board.columns {
            out.push_str(&format!("  - id: {}\n", encode_value(&col.id)));
            out.push_str(&format!("    name: {}\n", encode_value(&col.name)));
            if col.collapsed {
                out.push_str("    collapsed: true\n");
            }
        }
    }

    if board.labels.is_empty() {
        out.push_str("labels: []\n");
    } else {
        out.push_str("labels:\n");
        for label in &board.labels {
            out.push_str(&format!("  - id: {}\n", encode_value(&label.id)));
            out.push_str(&format!("    name: {}\n", encode_value(&label.name)));
            out.push_str(&format!("    color: {}\n", encode_value(&label.color)));
        }
    }

    out.push_str(HEADER_MARKER);
    out.push('\n');
    if let Some(template) = &board.template {
        if !template.is_empty() {
            out.push('\n');
            out.push_str(template);
            out.push('\n');
        }
    }
    out
}

/// Split text into header lines and an edge-trimmed body.
/// Distinguishes "no header at all" from "header opened but never closed".
fn split_header(text: &str) -> Result<(Vec<String>, String), CodecError> {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = text.split('\n').collect();

    let mut i = 0;
    while i < lines.len() && lines[i].trim().is_empty() {
        i += 1;
    }
    if i >= lines.len() || lines[i].trim_end() != HEADER_MARKER {
        return Err(CodecError::NoHeader);
    }
    i += 1;

    let start = i;
    while i < lines.len() && lines[i].trim_end() != HEADER_MARKER {
        i += 1;
    }
    if i >= lines.len() {
        return Err(CodecError::UnterminatedHeader);
    }

    let header = lines[start..i].iter().map(|l| l.to_string()).collect();
    let body = lines[i + 1..].join("\n").trim().to_string();
    Ok((header, body))
}

/// Split a `key: value` line at the first colon. Returns None for lines
/// without one (tolerated and skipped by the callers).
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(':')?;
    Some((line[..idx].trim(), line[idx + 1..].trim()))
}

/// Read a run of `  - key: value` items with `    key: value` continuation
/// lines. Returns the item field maps and the index of the first line after
/// the block.
fn parse_object_list(
    lines: &[String],
    mut i: usize,
) -> (Vec<Vec<(String, String)>>, usize) {
    let mut items = Vec::new();
    while i < lines.len() {
        let Some(first) = lines[i].strip_prefix("  - ") else {
            break;
        };
        let mut fields = Vec::new();
        if let Some((k, v)) = split_key_value(first) {
            fields.push((k.to_string(), unquote(v)));
        }
        i += 1;
        while i < lines.len() {
            let Some(cont) = lines[i].strip_prefix("    ") else {
                break;
            };
            if let Some((k, v)) = split_key_value(cont) {
                fields.push((k.to_string(), unquote(v)));
            }
            i += 1;
        }
        items.push(fields);
    }
    (items, i)
}

fn field<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn column_from_fields(fields: Vec<(String, String)>) -> Option<Column> {
    let Some(id) = field(&fields, "id") else {
        log::warn!("[tabula.codec.board] Skipping column entry without an id");
        return None;
    };
    Some(Column {
        id: id.to_string(),
        name: field(&fields, "name").unwrap_or(id).to_string(),
        collapsed: field(&fields, "collapsed") == Some("true"),
    })
}

fn label_from_fields(fields: Vec<(String, String)>) -> Option<Label> {
    let Some(id) = field(&fields, "id") else {
        log::warn!("[tabula.codec.board] Skipping label entry without an id");
        return None;
    };
    Some(Label {
        id: id.to_string(),
        name: field(&fields, "name").unwrap_or(id).to_string(),
        color: field(&fields, "color").unwrap_or_default().to_string(),
    })
}

/// A raw value needs quoting when writing it bare would change its meaning
/// on re-read: colons, quote characters, a leading `#`, or edge whitespace.
fn needs_quoting(value: &str) -> bool {
    value.contains(':') || value.contains('"') || value.starts_with('#') || value.trim() != value
}

fn encode_value(value: &str) -> String {
    if needs_quoting(value) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        unescape(&value[1..value.len() - 1])
    } else {
        value.to_string()
    }
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// `[a, b, c]` or `[]`. A missing field defaults to empty at the call site.
fn parse_string_list(value: &str) -> Vec<String> {
    let inner = value.trim().trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn format_string_list(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}
