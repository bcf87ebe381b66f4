//! Rendering records into the store's literal format and splicing them in.

use super::lexer::tokenize;
use super::parser::{ids_in, locate_array};
use crate::{Error, PartnerRecord, Result};

/// Renders `record` as an object-literal block in the store's layout.
///
/// Field order and punctuation match the existing entries so the file keeps
/// parsing the same way. Strings use JSON escaping, which is valid JavaScript.
/// Absent optional fields and an empty phone list are written as `null`.
pub fn render_block(record: &PartnerRecord) -> String {
    let phones = if record.phones.is_empty() {
        "null".to_string()
    } else {
        serde_json::to_string(&record.phones).unwrap_or_else(|_| "null".to_string())
    };

    format!(
        "  {{\n    id: {id},\n    name: {name},\n    category: {category},\n    address: {address},\n    website: {website},\n    phones: {phones},\n    description: {description},\n    logo: {logo},\n    extraLabel: {extra_label},\n  }},\n",
        id = record.id,
        name = quote(&record.name),
        category = quote(&record.category),
        address = quote(&record.address),
        website = quote_optional(record.website.as_deref()),
        description = quote(&record.description),
        logo = quote_optional(record.logo.as_deref()),
        extra_label = quote_optional(record.extra_label.as_deref()),
    )
}

fn quote(value: &str) -> String {
    // Serializing a `str` cannot fail.
    serde_json::to_string(value).unwrap_or_else(|_| String::from("\"\""))
}

fn quote_optional(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => quote(value),
        _ => "null".to_string(),
    }
}

/// Inserts `block` into `text` immediately before the store's closing marker.
///
/// Everything after the closing marker is preserved byte for byte. When the
/// last entry has no trailing comma one is added after it, and when the
/// closing bracket shares its line with other content the block is started on
/// a fresh line. The block takes the file's line ending, so a CRLF file stays
/// CRLF throughout.
///
/// Fails with [`Error::MalformedStore`] when the file does not end with the
/// closing marker, instead of silently returning the text unchanged.
pub fn splice_record(text: &str, block: &str) -> Result<String> {
    let tokens = tokenize(text)?;
    let bounds = locate_array(&tokens)?;
    let close_at = tokens[bounds.close].start;

    let previous = &tokens[bounds.close - 1];
    let needs_comma = bounds.close - 1 != bounds.open && !previous.is_punct(',');

    let line_start = text[..close_at].rfind('\n').map_or(0, |i| i + 1);
    let bracket_on_own_line =
        line_start > previous.end && text[line_start..close_at].trim().is_empty();

    let newline = line_ending(text, close_at);
    let block = if newline == "\r\n" {
        block.replace("\r\n", "\n").replace('\n', newline)
    } else {
        block.to_string()
    };

    let mut out = String::with_capacity(text.len() + block.len() + 2);
    let insert_at = if bracket_on_own_line { line_start } else { close_at };

    if needs_comma {
        out.push_str(&text[..previous.end]);
        out.push(',');
        out.push_str(&text[previous.end..insert_at]);
    } else {
        out.push_str(&text[..insert_at]);
    }
    if !bracket_on_own_line {
        out.push_str(newline);
    }
    out.push_str(&block);
    out.push_str(&text[insert_at..]);
    Ok(out)
}

/// Line ending of the last line break before `at`, or of the first one in the
/// file when the marker sits on the first line.
fn line_ending(text: &str, at: usize) -> &'static str {
    match text[..at].rfind('\n').or_else(|| text.find('\n')) {
        Some(i) if text[..i].ends_with('\r') => "\r\n",
        _ => "\n",
    }
}

/// Renders `record`, splices it in, and checks that the result still parses
/// with the new id present.
pub fn append_record(text: &str, record: &PartnerRecord) -> Result<String> {
    let spliced = splice_record(text, &render_block(record))?;
    let tokens = tokenize(&spliced)?;
    locate_array(&tokens)?;
    if !ids_in(&tokens).contains(&record.id) {
        return Err(Error::MalformedStore {
            reason: format!("record {} not visible after splicing", record.id),
        });
    }
    Ok(spliced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{next_id, parse_records};

    fn record(id: u64) -> PartnerRecord {
        PartnerRecord {
            id,
            name: "Окна \"Север\"".to_string(),
            category: "windows".to_string(),
            address: "Краснодар, ул. Красная, 10".to_string(),
            website: None,
            phones: vec!["79991234567".to_string(), "79997654321".to_string()],
            description: "Пластиковые окна\nи двери".to_string(),
            logo: Some("  ".to_string()),
            extra_label: Some("Скидка 5%".to_string()),
        }
    }

    #[test]
    fn renders_block_layout() {
        let block = render_block(&record(7));
        assert_eq!(
            block,
            concat!(
                "  {\n",
                "    id: 7,\n",
                "    name: \"Окна \\\"Север\\\"\",\n",
                "    category: \"windows\",\n",
                "    address: \"Краснодар, ул. Красная, 10\",\n",
                "    website: null,\n",
                "    phones: [\"79991234567\",\"79997654321\"],\n",
                "    description: \"Пластиковые окна\\nи двери\",\n",
                "    logo: null,\n",
                "    extraLabel: \"Скидка 5%\",\n",
                "  },\n",
            )
        );
    }

    #[test]
    fn empty_phones_render_as_null() {
        let mut r = record(1);
        r.phones.clear();
        assert!(render_block(&r).contains("    phones: null,\n"));
    }

    #[test]
    fn splices_before_closing_marker_and_keeps_trailer() {
        let text = "export const partnersData = [\n  {\n    id: 1,\n  },\n];\n\n";
        let out = splice_record(text, "  { id: 2 },\n").unwrap();
        assert_eq!(
            out,
            "export const partnersData = [\n  {\n    id: 1,\n  },\n  { id: 2 },\n];\n\n"
        );
    }

    #[test]
    fn adds_missing_trailing_comma() {
        let text = "const p = [\n  { id: 1 }\n];";
        let out = splice_record(text, "  { id: 2 },\n").unwrap();
        assert_eq!(out, "const p = [\n  { id: 1 },\n  { id: 2 },\n];");
    }

    #[test]
    fn splices_into_inline_empty_array() {
        let out = splice_record("const p = [];\n", "  { id: 1 },\n").unwrap();
        assert_eq!(out, "const p = [\n  { id: 1 },\n];\n");
        assert_eq!(next_id(&out).unwrap(), 2);
    }

    #[test]
    fn closing_marker_inside_strings_is_ignored() {
        let text = "const p = [\n  { id: 1, note: \"];\" },\n]; // end ];\n";
        let out = splice_record(text, "  { id: 2 },\n").unwrap();
        assert_eq!(
            out,
            "const p = [\n  { id: 1, note: \"];\" },\n  { id: 2 },\n]; // end ];\n"
        );
    }

    #[test]
    fn crlf_files_keep_crlf_line_endings() {
        let text = "export const partnersData = [\r\n  { id: 1 },\r\n];\r\n";
        let out = append_record(text, &record(2)).unwrap();

        assert!(out.starts_with(
            "export const partnersData = [\r\n  { id: 1 },\r\n  {\r\n    id: 2,\r\n"
        ));
        assert!(out.ends_with("  },\r\n];\r\n"));
        let bare_newlines = out
            .match_indices('\n')
            .filter(|(i, _)| !out[..*i].ends_with('\r'))
            .count();
        assert_eq!(bare_newlines, 0);
        assert_eq!(next_id(&out).unwrap(), 3);
    }

    #[test]
    fn crlf_inline_array_gets_a_crlf_break() {
        let out = splice_record("const p = [];\r\n", "  { id: 1 },\n").unwrap();
        assert_eq!(out, "const p = [\r\n  { id: 1 },\r\n];\r\n");
    }

    #[test]
    fn missing_closing_marker_fails() {
        assert!(matches!(
            splice_record("const p = [\n  { id: 1 },\n]\nexport default p;\n", "  {},\n"),
            Err(Error::MalformedStore { .. })
        ));
    }

    #[test]
    fn phones_survive_a_round_trip() {
        let text = "export const partnersData = [\n];\n";
        let out = append_record(text, &record(1)).unwrap();
        let records = parse_records(&out).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].phones(),
            vec!["79991234567".to_string(), "79997654321".to_string()]
        );

        let parsed = PartnerRecord::try_from(&records[0]).unwrap();
        let mut expected = record(1);
        expected.logo = None;
        assert_eq!(parsed, expected);
    }
}
