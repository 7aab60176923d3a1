//! Java-style `.properties` parsing.
//!
//! Supports `#`/`!` comments, `=`, `:` or whitespace separators, backslash
//! line continuations and the usual escapes (`\t`, `\n`, `\r`, `\f`,
//! `\uXXXX`, and any escaped literal such as `\=` or `\ `).

use std::collections::BTreeMap;

use crate::errors::{TopologyError, TopologyResult};

pub fn parse(contents: &str) -> TopologyResult<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    let mut logical = String::new();
    let mut continuing = false;

    for raw in contents.lines() {
        let line = raw.trim_start();

        if !continuing && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }

        if ends_with_continuation(line) {
            logical.push_str(&line[..line.len() - 1]);
            continuing = true;
            continue;
        }

        logical.push_str(line);
        continuing = false;

        let (key, value) = split_entry(&logical)?;
        entries.insert(key, value);
        logical.clear();
    }

    if !logical.is_empty() {
        let (key, value) = split_entry(&logical)?;
        entries.insert(key, value);
    }

    Ok(entries)
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn split_entry(line: &str) -> TopologyResult<(String, String)> {
    let mut key_end = line.len();
    let mut escaped = false;

    for (idx, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = idx;
                break;
            }
            c if c.is_whitespace() => {
                key_end = idx;
                break;
            }
            _ => {}
        }
    }

    let key = unescape(&line[..key_end])?;

    let mut rest = line[key_end..].trim_start();
    if let Some(stripped) = rest.strip_prefix(['=', ':']) {
        rest = stripped.trim_start();
    }

    Ok((key, unescape(rest)?))
}

fn unescape(raw: &str) -> TopologyResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{000C}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let decoded = (hex.len() == 4)
                    .then(|| u32::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        TopologyError::configuration(format!("malformed \\u escape '\\u{hex}'"))
                    })?;
                out.push(decoded);
            }
            Some(other) => out.push(other),
            None => {}
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separators_and_comments() {
        let entries = parse(
            "# topology\n\
             ! legacy comment\n\
             task_name=ingest1\n\
             kafka_topic : events\n\
             zk_root /storm\n\
             \n\
             hdfs_work_dir   =   /data/events\n",
        )
        .unwrap();

        assert_eq!(entries.len(), 4);
        assert_eq!(entries["task_name"], "ingest1");
        assert_eq!(entries["kafka_topic"], "events");
        assert_eq!(entries["zk_root"], "/storm");
        assert_eq!(entries["hdfs_work_dir"], "/data/events");
    }

    #[test]
    fn test_escapes() {
        let entries = parse("delimiter=\\t\nspace=\\u0020\nkey\\=with\\:colon=v\npipe=|\n").unwrap();

        assert_eq!(entries["delimiter"], "\t");
        assert_eq!(entries["space"], " ");
        assert_eq!(entries["key=with:colon"], "v");
        assert_eq!(entries["pipe"], "|");
    }

    #[test]
    fn test_line_continuation() {
        let entries = parse("nimbus_seeds=10.0.0.1:6627,\\\n    10.0.0.2:6627\nwork_num=4\n").unwrap();

        assert_eq!(entries["nimbus_seeds"], "10.0.0.1:6627,10.0.0.2:6627");
        assert_eq!(entries["work_num"], "4");
    }

    #[test]
    fn test_empty_value_and_later_duplicates_win() {
        let entries = parse("hmaster=\nwork_num=1\nwork_num=2\n").unwrap();

        assert_eq!(entries["hmaster"], "");
        assert_eq!(entries["work_num"], "2");
    }

    #[test]
    fn test_malformed_unicode_escape() {
        let err = parse("delimiter=\\u00G1\n").unwrap_err();
        assert!(err.is_configuration());
    }
}
