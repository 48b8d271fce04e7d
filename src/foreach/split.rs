//! Splitting one item line into loop-variable values.

/// ASCII unit separator. When present it is the only field separator.
pub const UNIT_SEPARATOR: char = '\x1F';

const TOKEN_SEPS: &[char] = &[',', ' ', '\t'];
const WS: &[char] = &[' ', '\t'];

/// Split `line` into exactly `nvars` values.
///
/// Fields are taken left to right; the last variable receives the
/// untokenized remainder and variables beyond the available fields get `""`.
pub fn split_item(line: &str, nvars: usize) -> Vec<String> {
    let mut values = Vec::with_capacity(nvars);
    if nvars == 0 {
        return values;
    }

    let data = line
        .trim_end_matches(|c| c == '\n' || c == '\r')
        .trim_start_matches(WS);

    let mut rest = data;
    if data.contains(UNIT_SEPARATOR) {
        while values.len() + 1 < nvars {
            let Some((field, tail)) = rest.split_once(UNIT_SEPARATOR) else {
                break;
            };
            values.push(field.trim_matches(WS).to_string());
            rest = tail;
        }
        values.push(rest.trim_matches(WS).to_string());
    } else {
        while values.len() + 1 < nvars {
            let Some(i) = rest.find(TOKEN_SEPS) else {
                break;
            };
            values.push(rest[..i].to_string());
            rest = rest[i + 1..].trim_start_matches(WS);
        }
        values.push(rest.to_string());
    }

    values.resize(nvars, String::new());
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_var_gets_remainder() {
        assert_eq!(split_item("a b c", 2), vec!["a", "b c"]);
        assert_eq!(split_item("  one, two three", 2), vec!["one", "two three"]);
        assert_eq!(split_item("whole line here", 1), vec!["whole line here"]);
    }

    #[test]
    fn test_missing_fields_are_empty() {
        assert_eq!(split_item("a,b", 3), vec!["a", "b", ""]);
        assert_eq!(split_item("", 2), vec!["", ""]);
    }

    #[test]
    fn test_adjacent_separators_yield_empty_field() {
        assert_eq!(split_item("a,,b", 3), vec!["a", "", "b"]);
    }

    #[test]
    fn test_unit_separator_mode() {
        let line = "  x \x1F y , z\x1Fw \r\n";
        assert_eq!(split_item(line, 3), vec!["x", "y , z", "w"]);
        assert_eq!(split_item("a\x1Fb\x1Fc", 2), vec!["a", "b\x1Fc"]);
        assert_eq!(split_item("a\x1F", 3), vec!["a", "", ""]);
    }

    #[test]
    fn test_no_vars() {
        assert!(split_item("a b", 0).is_empty());
    }
}
