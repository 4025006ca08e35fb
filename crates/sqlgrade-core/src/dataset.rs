use crate::errors::DatasetError;
use crate::model::TestCase;
use std::path::Path;

/// Field names accepted for the expected SQL, in order of preference.
pub const EXPECTED_QUERY_FIELDS: &[&str] = &["expected_query", "expected_answer", "query"];

/// Loads an ordered list of test cases from a JSON array (or a YAML sequence
/// when the file extension is `.yaml`/`.yml`).
pub fn load_dataset(path: &Path) -> Result<Vec<TestCase>, DatasetError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: display.clone(),
        source,
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let value: serde_json::Value = if is_yaml {
        serde_yaml::from_str(&raw).map_err(|e| DatasetError::Parse {
            path: display.clone(),
            message: e.to_string(),
        })?
    } else {
        serde_json::from_str(&raw).map_err(|e| DatasetError::Parse {
            path: display.clone(),
            message: e.to_string(),
        })?
    };

    parse_cases(&display, &value)
}

pub fn parse_cases(path: &str, value: &serde_json::Value) -> Result<Vec<TestCase>, DatasetError> {
    let entries = value.as_array().ok_or_else(|| DatasetError::Parse {
        path: path.to_string(),
        message: "expected an array of test cases".into(),
    })?;
    if entries.is_empty() {
        return Err(DatasetError::Empty {
            path: path.to_string(),
        });
    }

    let mut cases = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let index = i + 1;
        if !entry.is_object() {
            return Err(DatasetError::Parse {
                path: path.to_string(),
                message: format!("entry {} is not an object", index),
            });
        }

        let question = non_empty_str(entry, "question").ok_or(DatasetError::MissingField {
            path: path.to_string(),
            index,
            field: "question",
        })?;
        let expected_query = EXPECTED_QUERY_FIELDS
            .iter()
            .find_map(|f| non_empty_str(entry, f))
            .ok_or(DatasetError::MissingField {
                path: path.to_string(),
                index,
                field: "expected_query",
            })?;

        cases.push(TestCase {
            index,
            question,
            expected_query,
        });
    }
    Ok(cases)
}

fn non_empty_str(entry: &serde_json::Value, field: &str) -> Option<String> {
    entry
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(ext: &str, content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(ext).tempfile().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_cases_in_order_with_aliases() {
        let f = write_tmp(
            ".json",
            r#"[
                {"question": "How many users?", "expected_query": "SELECT COUNT(*) FROM users"},
                {"question": "List cities", "expected_answer": "SELECT city FROM users"},
                {"question": "Oldest user", "query": "SELECT MAX(age) FROM users"}
            ]"#,
        );
        let cases = load_dataset(f.path()).unwrap();
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].index, 1);
        assert_eq!(cases[1].expected_query, "SELECT city FROM users");
        assert_eq!(cases[2].index, 3);
        assert_eq!(cases[2].expected_query, "SELECT MAX(age) FROM users");
    }

    #[test]
    fn loads_yaml_by_extension() {
        let f = write_tmp(
            ".yaml",
            "- question: How many users?\n  expected_query: SELECT COUNT(*) FROM users\n",
        );
        let cases = load_dataset(f.path()).unwrap();
        assert_eq!(cases[0].question, "How many users?");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_dataset(Path::new("/nonexistent/cases.json")).unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let f = write_tmp(".json", "[{\"question\": ");
        assert!(matches!(
            load_dataset(f.path()).unwrap_err(),
            DatasetError::Parse { .. }
        ));

        let f = write_tmp(".json", r#"{"question": "x"}"#);
        assert!(matches!(
            load_dataset(f.path()).unwrap_err(),
            DatasetError::Parse { .. }
        ));
    }

    #[test]
    fn missing_field_reports_entry() {
        let f = write_tmp(
            ".json",
            r#"[{"question": "a", "expected_query": "SELECT 1"}, {"question": "b"}]"#,
        );
        match load_dataset(f.path()).unwrap_err() {
            DatasetError::MissingField { index, field, .. } => {
                assert_eq!(index, 2);
                assert_eq!(field, "expected_query");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let f = write_tmp(".json", "[]");
        assert!(matches!(
            load_dataset(f.path()).unwrap_err(),
            DatasetError::Empty { .. }
        ));
    }
}
