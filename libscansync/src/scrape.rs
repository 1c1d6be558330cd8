//! Small text-scraping helpers used by every parser in the crate.
//!
//! The image-file metadata and both log formats embed their values as
//! free text, so everything upstream reduces to "find this key, capture
//! the text that follows it".

/// Capture the text following `key` up to (not including) the next
/// newline, or to the end of `source` when the key sits on the last line.
///
/// Returns None when the key is absent. The captured text is returned
/// untrimmed apart from a trailing carriage return.
pub fn grab_str<'a>(source: &'a str, key: &str) -> Option<&'a str> {
    let start = source.find(key)? + key.len();
    let rest = &source[start..];
    let end = rest.find('\n').unwrap_or(rest.len());
    Some(rest[..end].trim_end_matches('\r'))
}

/// As [`grab_str`] but requiring a non-blank capture, trimmed.
pub fn grab_value<'a>(source: &'a str, key: &str) -> Option<&'a str> {
    grab_str(source, key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Pull every integer out of a blob of bracketed list text, e.g.
/// `" {[0 32767] [-50 224]}"` -> `[0, 32767, -50, 224]`.
pub fn parse_bracketed_ints(text: &str) -> Result<Vec<i64>, std::num::ParseIntError> {
    text.split(|c: char| c.is_whitespace() || matches!(c, '[' | ']' | '{' | '}' | ';' | ','))
        .filter(|t| !t.is_empty())
        .map(str::parse)
        .collect()
}

/// Index of the first element of a sorted slice that does not compare
/// less than `target`, or None when every element does (or the slice is
/// empty).
pub fn lower_bound<T: PartialOrd>(sorted: &[T], target: &T) -> Option<usize> {
    let idx = sorted.partition_point(|v| v < target);
    (idx < sorted.len()).then_some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grab_str() {
        let text = "frameNumbers = 42\nframeTimestamps_sec = 1.5\n";
        assert_eq!(grab_str(text, "frameNumbers ="), Some(" 42"));
        assert_eq!(grab_str(text, "frameTimestamps_sec ="), Some(" 1.5"));
        assert_eq!(grab_str(text, "acqTriggerTimestamps_sec ="), None);
    }

    #[test]
    fn test_grab_str_last_line_without_newline() {
        assert_eq!(grab_str("epoch = [2022 1 18]", "epoch ="), Some(" [2022 1 18]"));
    }

    #[test]
    fn test_grab_value_blank_is_none() {
        assert_eq!(grab_value("key =   \nnext", "key ="), None);
        assert_eq!(grab_value("key = 7\n", "key ="), Some("7"));
    }

    #[test]
    fn test_parse_bracketed_ints() {
        assert_eq!(
            parse_bracketed_ints(" {[0 32767] [-50 224]}").unwrap(),
            vec![0, 32767, -50, 224]
        );
        assert_eq!(parse_bracketed_ints(" [1;2]").unwrap(), vec![1, 2]);
        assert!(parse_bracketed_ints("[a b]").is_err());
    }

    #[test]
    fn test_lower_bound() {
        let v = [0.0, 0.1, 0.2, 0.3];
        assert_eq!(lower_bound(&v, &0.15), Some(2));
        assert_eq!(lower_bound(&v, &0.2), Some(2));
        assert_eq!(lower_bound(&v, &-1.0), Some(0));
        assert_eq!(lower_bound(&v, &0.5), None);
        assert_eq!(lower_bound::<f64>(&[], &0.0), None);
    }
}
