//! Text extraction from regulatory section XML.
//!
//! The content source returns XML rooted at a section division (`DIV8`),
//! possibly wrapped in higher divisions (`DIV5` part, `DIV6` subpart, ...).
//! [`extract`] walks it and produces an ordered list of [`Fragment`]s: one
//! per heading (`HEAD`, labeled with the enclosing division's `TYPE`) and
//! one per paragraph (`P` / `FP`). Inline markup inside a paragraph is
//! flattened into its text. Citations, notes, and other apparatus are skipped.
//!
//! Word counting uses a single rule everywhere: a word is a run of three or
//! more alphabetic characters. Paragraph labels like `(a)` or `(iv)`, bare
//! numbers, and punctuation do not count.

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

use crate::models::Fragment;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("malformed section XML: {0}")]
    Xml(String),
}

/// Minimum alphabetic run length that counts as a word.
pub const MIN_WORD_LEN: usize = 3;

/// Count words in `text`: alphabetic runs of at least [`MIN_WORD_LEN`] characters.
pub fn word_count(text: &str) -> i64 {
    let mut count = 0i64;
    let mut run = 0usize;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            run += 1;
        } else {
            if run >= MIN_WORD_LEN {
                count += 1;
            }
            run = 0;
        }
    }
    if run >= MIN_WORD_LEN {
        count += 1;
    }
    count
}

/// Snapshot form of a fragment list: fragment texts joined by newlines.
pub fn fragments_to_text(fragments: &[Fragment]) -> String {
    fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A division currently open on the element stack.
struct Division {
    kind: String,
    identifier: String,
}

/// Text being collected for a heading or paragraph.
struct Collecting {
    kind: String,
    identifier: String,
    /// Element name that closes this fragment.
    closes_on: Vec<u8>,
    depth: usize,
    text: String,
}

fn is_division(name: &[u8]) -> bool {
    name.len() > 3 && name.starts_with(b"DIV") && name[3..].iter().all(u8::is_ascii_digit)
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| {
            a.unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned())
        })
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse section XML into ordered fragments. Empty units contribute nothing.
pub fn extract(xml: &str) -> Result<Vec<Fragment>, ExtractError> {
    let mut fragments = Vec::new();
    let mut divisions: Vec<Division> = Vec::new();
    let mut collecting: Option<Collecting> = None;

    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if let Some(c) = collecting.as_mut() {
                    if name == c.closes_on {
                        c.depth += 1;
                    }
                } else if is_division(&name) {
                    divisions.push(Division {
                        kind: attr(&e, b"TYPE").unwrap_or_default(),
                        identifier: attr(&e, b"N").unwrap_or_default(),
                    });
                } else if name == b"HEAD" || name == b"P" || name == b"FP" {
                    let (div_kind, div_id) = divisions
                        .last()
                        .map(|d| (d.kind.clone(), d.identifier.clone()))
                        .unwrap_or_default();
                    let kind = if name == b"HEAD" {
                        if div_kind.is_empty() {
                            "HEAD".to_string()
                        } else {
                            div_kind
                        }
                    } else {
                        "P".to_string()
                    };
                    collecting = Some(Collecting {
                        kind,
                        identifier: div_id,
                        closes_on: name,
                        depth: 0,
                        text: String::new(),
                    });
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name().as_ref().to_vec();
                let finished = match collecting.as_mut() {
                    Some(c) if name == c.closes_on => {
                        if c.depth == 0 {
                            true
                        } else {
                            c.depth -= 1;
                            false
                        }
                    }
                    Some(_) => false,
                    None => {
                        if is_division(&name) {
                            divisions.pop();
                        }
                        false
                    }
                };
                if finished {
                    if let Some(c) = collecting.take() {
                        let text = normalize_whitespace(&c.text);
                        if !text.is_empty() {
                            fragments.push(Fragment {
                                kind: c.kind,
                                identifier: c.identifier,
                                text,
                            });
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(c) = collecting.as_mut() {
                    match t.unescape() {
                        Ok(text) => c.text.push_str(&text),
                        Err(_) => c.text.push_str(&String::from_utf8_lossy(&t)),
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(c) = collecting.as_mut() {
                    c.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::Empty(e)) => {
                // <E T="03"/> style markers carry no text; a self-closing
                // break inside a paragraph still separates words.
                if let Some(c) = collecting.as_mut() {
                    if e.local_name().as_ref() == b"BR" {
                        c.text.push(' ');
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTION: &str = r#"<DIV8 N="5.12" TYPE="SECTION" hierarchy_metadata="{}">
<HEAD>§ 5.12 Scope of this part.</HEAD>
<P>(a) This part applies to <I>all</I> applicants.</P>
<P>(b) [Reserved]</P>
<P>   </P>
<CITA>[82 FR 1234, Jan. 3, 2017]</CITA>
</DIV8>"#;

    #[test]
    fn test_word_count_rule() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("(a) of to be"), 0);
        assert_eq!(word_count("The cat sat"), 3);
        assert_eq!(word_count("§ 5.12 Scope of this part."), 3);
        assert_eq!(word_count("non-compliance"), 2);
        assert_eq!(word_count("end"), 1);
    }

    #[test]
    fn test_extract_section() {
        let fragments = extract(SECTION).unwrap();
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].kind, "SECTION");
        assert_eq!(fragments[0].identifier, "5.12");
        assert_eq!(fragments[0].text, "§ 5.12 Scope of this part.");
        assert_eq!(fragments[1].kind, "P");
        assert_eq!(fragments[1].text, "(a) This part applies to all applicants.");
        assert_eq!(fragments[2].text, "(b) [Reserved]");
    }

    #[test]
    fn test_citation_not_extracted() {
        let text = fragments_to_text(&extract(SECTION).unwrap());
        assert!(!text.contains("82 FR"));
    }

    #[test]
    fn test_nested_divisions() {
        let xml = r#"<DIV5 N="5" TYPE="PART"><HEAD>PART 5—GENERAL</HEAD>
<DIV8 N="5.1" TYPE="SECTION"><HEAD>§ 5.1 Purpose.</HEAD><P>Purpose text here.</P></DIV8>
<DIV8 N="5.2" TYPE="SECTION"><HEAD>§ 5.2 Definitions.</HEAD></DIV8>
</DIV5>"#;
        let fragments = extract(xml).unwrap();
        let ids: Vec<(&str, &str)> = fragments
            .iter()
            .map(|f| (f.kind.as_str(), f.identifier.as_str()))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("PART", "5"),
                ("SECTION", "5.1"),
                ("P", "5.1"),
                ("SECTION", "5.2"),
            ]
        );
    }

    #[test]
    fn test_empty_section_yields_nothing() {
        let fragments = extract(r#"<DIV8 N="9.9" TYPE="SECTION"></DIV8>"#).unwrap();
        assert!(fragments.is_empty());
        assert_eq!(fragments_to_text(&fragments), "");
    }

    #[test]
    fn test_malformed_xml() {
        assert!(extract("<DIV8><P>unclosed</DIV8>").is_err());
    }

    #[test]
    fn test_entities_unescaped() {
        let fragments =
            extract(r#"<DIV8 N="1.1" TYPE="SECTION"><P>Fish &amp; wildlife &#x2014; rules</P></DIV8>"#)
                .unwrap();
        assert_eq!(fragments[0].text, "Fish & wildlife — rules");
    }
}
