use std::time::Duration;

/// Parses a duration such as "60000", "250ms", "30s", "10m", "5h" or "1d".
///
/// A bare number is taken as milliseconds.
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let split_at = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (value_str, unit) = s.split_at(split_at);

    let value: u64 = value_str
        .parse()
        .map_err(|_| format!("Invalid numeric value in duration: '{}'", s))?;

    let millis_per_unit: u64 = match unit {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        other => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                other
            ))
        }
    };

    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Duration '{}' is too large", s))
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "Connection:keep-alive,Keep-Alive:timeout=5\,max=200"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current_header = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                current_header.push(',');
                chars.next();
            }
            ',' => {
                if !current_header.trim().is_empty() {
                    headers.push(std::mem::take(&mut current_header));
                }
                current_header.clear();
            }
            _ => current_header.push(ch),
        }
    }

    if !current_header.trim().is_empty() {
        headers.push(current_header);
    }

    headers
}

/// Interprets common truthy spellings used in environment variables.
pub fn parse_bool_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    mod duration {
        use super::*;

        #[test]
        fn bare_number_is_milliseconds() {
            assert_eq!(
                parse_duration_string("60000").unwrap(),
                Duration::from_millis(60_000)
            );
        }

        #[test]
        fn parse_milliseconds() {
            assert_eq!(
                parse_duration_string("250ms").unwrap(),
                Duration::from_millis(250)
            );
        }

        #[test]
        fn parse_seconds_minutes_hours_days() {
            assert_eq!(parse_duration_string("30s").unwrap(), Duration::from_secs(30));
            assert_eq!(parse_duration_string("10m").unwrap(), Duration::from_secs(600));
            assert_eq!(parse_duration_string("5h").unwrap(), Duration::from_secs(18000));
            assert_eq!(parse_duration_string("3d").unwrap(), Duration::from_secs(259200));
        }

        #[test]
        fn trims_whitespace() {
            assert_eq!(
                parse_duration_string("  10s  ").unwrap(),
                Duration::from_secs(10)
            );
        }

        #[test]
        fn empty_string_errors() {
            let err = parse_duration_string("   ").unwrap_err();
            assert!(err.contains("empty"), "error was: {}", err);
        }

        #[test]
        fn unknown_suffix_errors() {
            let err = parse_duration_string("10x").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn no_number_errors() {
            let err = parse_duration_string("ms").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }

        #[test]
        fn negative_number_errors() {
            let err = parse_duration_string("-5s").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }

        #[test]
        fn overflow_errors() {
            let err = parse_duration_string("18446744073709551615d").unwrap_err();
            assert!(err.contains("too large"), "error was: {}", err);
        }
    }

    #[test]
    fn test_parse_headers_simple() {
        let result = parse_headers_with_escapes("Content-Type:text/plain,Authorization:Bearer t");
        assert_eq!(result, vec!["Content-Type:text/plain", "Authorization:Bearer t"]);
    }

    #[test]
    fn test_parse_headers_with_escaped_comma() {
        let result = parse_headers_with_escapes("Connection:keep-alive,Keep-Alive:timeout=5\\,max=200");
        assert_eq!(result, vec!["Connection:keep-alive", "Keep-Alive:timeout=5,max=200"]);
    }

    #[test]
    fn test_parse_headers_backslash_not_before_comma() {
        let result = parse_headers_with_escapes("Path:C:\\Users\\test,Host:example.com");
        assert_eq!(result, vec!["Path:C:\\Users\\test", "Host:example.com"]);
    }

    #[test]
    fn test_parse_headers_skips_empty_entries() {
        let result = parse_headers_with_escapes("A:1,  ,B:2,");
        assert_eq!(result, vec!["A:1", "B:2"]);
    }

    #[test]
    fn test_parse_bool_flag() {
        assert!(parse_bool_flag("true"));
        assert!(parse_bool_flag(" TRUE "));
        assert!(parse_bool_flag("1"));
        assert!(!parse_bool_flag("false"));
        assert!(!parse_bool_flag(""));
    }
}
