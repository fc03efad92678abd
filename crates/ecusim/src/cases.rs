//! Canned request/response table
//!
//! Loaded once at startup from a JSON array of `{"req": "...", "res": "..."}`
//! objects. Hex strings are case-insensitive and may contain whitespace
//! (`"10 03"` and `"1003"` are the same key). Lookup walks the table in file
//! order and the first matching entry wins.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaseTableError {
    #[error("Failed to read case file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse case table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Case #{index}: invalid {field} hex string '{value}'")]
    InvalidHex {
        index: usize,
        field: &'static str,
        value: String,
    },
}

/// On-disk form of a case
#[derive(Debug, Deserialize)]
struct RawCase {
    req: String,
    res: String,
}

/// One canned request/response pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseEntry {
    request: String,
    response: String,
    response_bytes: Vec<u8>,
}

impl CaseEntry {
    /// Normalized request key (uppercase hex, no whitespace)
    pub fn request_hex(&self) -> &str {
        &self.request
    }

    /// Normalized response (uppercase hex, no whitespace)
    pub fn response_hex(&self) -> &str {
        &self.response
    }

    pub fn response_bytes(&self) -> &[u8] {
        &self.response_bytes
    }
}

/// Ordered, immutable case table
#[derive(Debug, Clone, Default)]
pub struct CaseTable {
    entries: Vec<CaseEntry>,
}

impl CaseTable {
    /// Load a case table from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CaseTableError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CaseTableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse a case table from JSON text. Any malformed entry fails the whole load.
    pub fn from_json(json: &str) -> Result<Self, CaseTableError> {
        let raw: Vec<RawCase> = serde_json::from_str(json)?;
        Self::from_pairs(raw.into_iter().map(|case| (case.req, case.res)))
    }

    /// Build a table from (request hex, response hex) pairs
    pub fn from_pairs<I, R, S>(pairs: I) -> Result<Self, CaseTableError>
    where
        I: IntoIterator<Item = (R, S)>,
        R: AsRef<str>,
        S: AsRef<str>,
    {
        let mut entries = Vec::new();

        for (index, (req, res)) in pairs.into_iter().enumerate() {
            let request = normalize_hex(req.as_ref());
            if hex::decode(&request).is_err() {
                return Err(CaseTableError::InvalidHex {
                    index,
                    field: "req",
                    value: req.as_ref().to_string(),
                });
            }

            let response = normalize_hex(res.as_ref());
            let response_bytes =
                hex::decode(&response).map_err(|_| CaseTableError::InvalidHex {
                    index,
                    field: "res",
                    value: res.as_ref().to_string(),
                })?;

            entries.push(CaseEntry {
                request,
                response,
                response_bytes,
            });
        }

        Ok(Self { entries })
    }

    /// Find the first entry whose request key matches `request_hex`
    pub fn find(&self, request_hex: &str) -> Option<&CaseEntry> {
        let key = normalize_hex(request_hex);
        self.entries.iter().find(|entry| entry.request == key)
    }

    /// Find the canned response for a raw request payload
    pub fn find_payload(&self, request: &[u8]) -> Option<&CaseEntry> {
        let key = hex::encode_upper(request);
        self.entries.iter().find(|entry| entry.request == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CaseEntry] {
        &self.entries
    }
}

fn normalize_hex(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"[
        {"req": "10 03", "res": "50 03 00 32 01 F4"},
        {"req": "2EEFE2", "res": "6EEFE2"},
        {"req": "2eefe2", "res": "7F2E22"}
    ]"#;

    #[test]
    fn test_find_is_case_insensitive() {
        let table = CaseTable::from_json(SAMPLE).unwrap();
        let upper = table.find("2EEFE2").map(CaseEntry::response_hex);
        let lower = table.find("2eefe2").map(CaseEntry::response_hex);
        assert_eq!(upper, Some("6EEFE2"));
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_first_match_wins() {
        let table = CaseTable::from_json(SAMPLE).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.find_payload(&[0x2E, 0xEF, 0xE2]).unwrap().response_bytes(),
            &[0x6E, 0xEF, 0xE2]
        );
    }

    #[test]
    fn test_spaced_keys_match_compact_requests() {
        let table = CaseTable::from_json(SAMPLE).unwrap();
        let entry = table.find("1003").unwrap();
        assert_eq!(entry.response_bytes(), &[0x50, 0x03, 0x00, 0x32, 0x01, 0xF4]);
        assert!(table.find("1001").is_none());
    }

    #[test]
    fn test_invalid_hex_fails_whole_load() {
        let result = CaseTable::from_json(
            r#"[{"req": "1003", "res": "5003"}, {"req": "22F1", "res": "62F1X"}]"#,
        );
        match result {
            Err(CaseTableError::InvalidHex { index, field, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(field, "res");
            }
            other => panic!("Expected InvalidHex, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json_fails() {
        assert!(matches!(
            CaseTable::from_json(r#"[{"req": "1003"}]"#),
            Err(CaseTableError::Json(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let table = CaseTable::load(file.path()).unwrap();
        assert_eq!(table.entries()[0].request_hex(), "1003");
    }

    #[test]
    fn test_shipped_case_table_parses() {
        let table = CaseTable::from_json(include_str!("../config/cases.json")).unwrap();
        assert!(table.find("2eefe201").is_some());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = CaseTable::load("/nonexistent/cases.json");
        assert!(matches!(result, Err(CaseTableError::Io { .. })));
    }
}
