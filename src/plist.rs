//! Library property-list reading and writing.
//!
//! A library export is an XML property list shaped as
//! `plist > dict > (key "Tracks", dict > (key <id>, dict)*)`. Each inner dict is a
//! flat list of alternating `<key>` and value elements. Reading is forgiving per
//! record: malformed entries are skipped and counted, never fatal.

use roxmltree::{Document, Node, ParsingOptions};
use rustc_hash::FxHashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::ParseError;
use crate::models::{
    FieldValue, TrackRecord, KEY_ALBUM, KEY_ARTIST, KEY_GENRE, KEY_NAME, KEY_TRACK_ID, KEY_YEAR,
};

/// Key under which the track collection lives in the top-level dict.
const TRACKS_KEY: &str = "Tracks";

// Keys added to exported records that carry an enrichment result
const KEY_YEAR_CONFIDENCE: &str = "Year Confidence";
const KEY_MATCHED_TITLE: &str = "Matched Title";
const KEY_MATCHED_ARTIST: &str = "Matched Artist";
const KEY_MATCHED_ALBUM: &str = "Matched Album";

#[derive(Clone, Debug, Default)]
pub struct ParseOptions {
    /// Stop after this many records
    pub limit: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ParsedLibrary {
    /// Records in document order
    pub records: Vec<TrackRecord>,
    /// Entries skipped because they were malformed
    pub failures: usize,
    pub warnings: Vec<String>,
}

impl ParsedLibrary {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

// ============================================================================
// Reading
// ============================================================================

fn is_tag(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn element_children<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

/// Locate the dict holding one dict per track.
fn find_tracks_dict<'a, 'input>(outer: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    let children: Vec<Node> = element_children(outer).collect();
    let keyed = children.windows(2).find_map(|pair| {
        let is_tracks_key = is_tag(&pair[0], "key") && pair[0].text() == Some(TRACKS_KEY);
        (is_tracks_key && is_tag(&pair[1], "dict")).then_some(pair[1])
    });
    // Fall back to the first nested dictionary
    keyed.or_else(|| children.into_iter().find(|n| is_tag(n, "dict")))
}

/// Typed value of a property-list value element. `None` means absent.
fn read_value(node: Node) -> Option<FieldValue> {
    let text = node.text().unwrap_or("");
    match node.tag_name().name() {
        "string" => (!text.is_empty()).then(|| FieldValue::Text(text.to_string())),
        "integer" => Some(
            text.trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .unwrap_or_else(|_| FieldValue::Text(text.to_string())),
        ),
        // real, date, data, true, false, array, ... keep only the type tag
        other => Some(FieldValue::Text(other.to_string())),
    }
}

/// Read one track dict. `Err` describes why the record is malformed.
fn read_record(dict: Node, position: usize, warnings: &mut Vec<String>) -> Result<TrackRecord, String> {
    let fields: Vec<Node> = element_children(dict).collect();
    let mut record = TrackRecord::new(position);

    for pair in fields.chunks(2) {
        let key_node = pair[0];
        // Field names pass through verbatim; blank ones are malformed
        let key = match key_node.text() {
            Some(k) if is_tag(&key_node, "key") && !k.trim().is_empty() => k,
            _ => {
                return Err(format!(
                    "expected a non-empty <key>, found <{}>",
                    key_node.tag_name().name()
                ))
            }
        };

        let Some(value_node) = pair.get(1) else {
            warnings.push(format!(
                "Track entry {}: dropped dangling key '{}' with no value",
                position, key
            ));
            break;
        };

        if let Some(value) = read_value(*value_node) {
            record.set_field(key, value);
        }
    }

    Ok(record)
}

/// Parse a library export held in memory.
///
/// Only a document that is not well-formed XML is an error. A document without a
/// track collection yields zero records and a warning.
pub fn parse_library(xml: &str, options: &ParseOptions) -> Result<ParsedLibrary, ParseError> {
    let parsing = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(xml, parsing)?;
    let mut library = ParsedLibrary::default();

    let root = doc.root_element();
    let Some(outer) = element_children(root).find(|n| is_tag(n, "dict")) else {
        library.warn(format!(
            "No top-level dict under <{}>; library has no tracks",
            root.tag_name().name()
        ));
        return Ok(library);
    };
    let Some(tracks) = find_tracks_dict(outer) else {
        library.warn("No track collection found in library".to_string());
        return Ok(library);
    };

    let mut seen_ids: FxHashSet<i64> = FxHashSet::default();
    let mut warnings = Vec::new();

    for (position, entry) in element_children(tracks)
        .filter(|n| is_tag(n, "dict"))
        .enumerate()
    {
        if options.limit.is_some_and(|limit| library.records.len() >= limit) {
            debug!(limit = ?options.limit, "Record limit reached");
            break;
        }

        match read_record(entry, position, &mut warnings) {
            Ok(record) => {
                if let Some(id) = record.track_id {
                    if !seen_ids.insert(id) {
                        warnings.push(format!("Duplicate {} {} at entry {}", KEY_TRACK_ID, id, position));
                    }
                }
                library.records.push(record);
            }
            Err(reason) => {
                warn!(entry = position, "Skipping malformed track entry: {}", reason);
                library.failures += 1;
            }
        }

        for message in warnings.drain(..) {
            library.warn(message);
        }
    }

    info!(
        records = library.records.len(),
        failures = library.failures,
        warnings = library.warnings.len(),
        "Parsed library"
    );
    Ok(library)
}

/// Read and parse a library export from disk.
pub fn parse_library_file(path: &Path, options: &ParseOptions) -> Result<ParsedLibrary, ParseError> {
    let xml = fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_library(&xml, options)
}

// ============================================================================
// Writing
// ============================================================================

/// Escape special characters for XML text.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn push_field(out: &mut String, key: &str, value: &FieldValue) {
    let element = match value {
        FieldValue::Integer(i) => format!("<integer>{}</integer>", i),
        FieldValue::Text(s) => format!("<string>{}</string>", xml_escape(s)),
    };
    out.push_str(&format!("\t\t\t<key>{}</key>{}\n", xml_escape(key), element));
}

fn push_text(out: &mut String, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        push_field(out, key, &FieldValue::Text(v.to_string()));
    }
}

fn push_record(out: &mut String, record: &TrackRecord) {
    out.push_str(&format!("\t\t<key>{}</key>\n\t\t<dict>\n", xml_escape(&record.key())));

    if let Some(id) = record.track_id {
        push_field(out, KEY_TRACK_ID, &FieldValue::Integer(id));
    }
    push_text(out, KEY_NAME, record.name.as_deref());
    push_text(out, KEY_ARTIST, record.artist.as_deref());
    push_text(out, KEY_ALBUM, record.album.as_deref());
    push_text(out, KEY_GENRE, record.genre.as_deref());
    if let Some(year) = &record.year {
        push_field(out, KEY_YEAR, year);
    }
    for (key, value) in &record.extra {
        push_field(out, key, value);
    }

    if let Some(enrichment) = record.enrichment.as_ref().filter(|e| e.is_match()) {
        out.push_str(&format!(
            "\t\t\t<key>{}</key><real>{:.4}</real>\n",
            KEY_YEAR_CONFIDENCE, enrichment.confidence
        ));
        push_text(out, KEY_MATCHED_TITLE, enrichment.matched_title.as_deref());
        push_text(out, KEY_MATCHED_ARTIST, enrichment.matched_artist.as_deref());
        push_text(out, KEY_MATCHED_ALBUM, enrichment.matched_album.as_deref());
    }

    out.push_str("\t\t</dict>\n");
}

/// Render records as a library property list.
pub fn generate_library(records: &[TrackRecord]) -> String {
    let mut out = String::with_capacity(records.len() * 512);

    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n");
    out.push_str("<plist version=\"1.0\">\n<dict>\n");
    out.push_str(&format!("\t<key>{}</key>\n\t<dict>\n", TRACKS_KEY));

    for record in records {
        push_record(&mut out, record);
    }

    out.push_str("\t</dict>\n</dict>\n</plist>\n");
    out
}

/// Write records to a property-list file, creating parent directories if needed.
pub fn write_library(records: &[TrackRecord], path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, generate_library(records))
}
