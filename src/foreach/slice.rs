//! Python-style `[start:stop:step]` slices over item lists.

use std::fmt;

use super::error::ForeachError;

/// A slice with omissible components. Negative `start`/`stop` count from the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slice {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl Slice {
    /// Parse `[start:stop:step]`. Brackets and at least one `:` are required.
    pub fn parse(text: &str) -> Result<Slice, ForeachError> {
        let inner = text
            .trim()
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .ok_or_else(|| ForeachError::bad_slice(text, "expected [start:stop:step]"))?;

        let parts: Vec<&str> = inner.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(ForeachError::bad_slice(text, "expected one or two ':'"));
        }

        let component = |s: &str| -> Result<Option<i64>, ForeachError> {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<i64>()
                .map(Some)
                .map_err(|_| ForeachError::bad_slice(text, format!("'{}' is not an integer", s)))
        };

        let slice = Slice {
            start: component(parts[0])?,
            stop: component(parts[1])?,
            step: match parts.get(2) {
                Some(p) => component(p)?,
                None => None,
            },
        };
        if slice.step == Some(0) {
            return Err(ForeachError::bad_slice(text, "step cannot be zero"));
        }
        Ok(slice)
    }

    /// True when the slice selects every item in order.
    pub fn is_identity(&self) -> bool {
        self.start.map_or(true, |s| s == 0)
            && self.stop.is_none()
            && self.step.map_or(true, |s| s == 1)
    }

    /// Indices selected from a list of `len` items, in iteration order.
    pub fn indices(&self, len: usize) -> Vec<usize> {
        let n = len as i64;
        let step = self.step.unwrap_or(1);
        let resolve = |v: i64, lo: i64, hi: i64| {
            let v = if v < 0 { v + n } else { v };
            v.clamp(lo, hi)
        };

        let mut out = Vec::new();
        if step > 0 {
            let start = self.start.map_or(0, |s| resolve(s, 0, n));
            let stop = self.stop.map_or(n, |s| resolve(s, 0, n));
            let mut i = start;
            while i < stop {
                out.push(i as usize);
                i += step;
            }
        } else {
            let start = self.start.map_or(n - 1, |s| resolve(s, -1, n - 1));
            let stop = self.stop.map_or(-1, |s| resolve(s, -1, n - 1));
            let mut i = start;
            while i > stop {
                out.push(i as usize);
                i += step;
            }
        }
        out
    }

    /// Number of items selected from a list of `len`.
    pub fn len_for(&self, len: usize) -> usize {
        self.indices(len).len()
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |v: Option<i64>| v.map(|v| v.to_string()).unwrap_or_default();
        write!(f, "[{}:{}", part(self.start), part(self.stop))?;
        if let Some(step) = self.step {
            write!(f, ":{}", step)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_slice(start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Slice {
        Slice { start, stop, step }
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(Slice::parse("[0:3:2]").unwrap(), range_slice(Some(0), Some(3), Some(2)));
        assert_eq!(Slice::parse("[:]").unwrap(), Slice::default());
        assert_eq!(Slice::parse("[-2:]").unwrap(), range_slice(Some(-2), None, None));
        assert_eq!(Slice::parse("[::-1]").unwrap(), range_slice(None, None, Some(-1)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Slice::parse("0:3").is_err());
        assert!(Slice::parse("[3]").is_err());
        assert!(Slice::parse("[a:b]").is_err());
        assert!(Slice::parse("[1:2:3:4]").is_err());
        assert!(Slice::parse("[::0]").is_err());
    }

    #[test]
    fn test_indices_forward() {
        assert_eq!(Slice::parse("[0:3:2]").unwrap().indices(5), vec![0, 2]);
        assert_eq!(Slice::parse("[1:]").unwrap().indices(4), vec![1, 2, 3]);
        assert_eq!(Slice::parse("[-2:]").unwrap().indices(5), vec![3, 4]);
        assert_eq!(Slice::parse("[:-1]").unwrap().indices(3), vec![0, 1]);
        assert_eq!(Slice::parse("[10:20]").unwrap().indices(5), Vec::<usize>::new());
        assert_eq!(Slice::parse("[3:1]").unwrap().indices(5), Vec::<usize>::new());
    }

    #[test]
    fn test_indices_backward() {
        assert_eq!(Slice::parse("[::-1]").unwrap().indices(4), vec![3, 2, 1, 0]);
        assert_eq!(Slice::parse("[3:0:-2]").unwrap().indices(5), vec![3, 1]);
        assert_eq!(Slice::parse("[-1:-4:-1]").unwrap().indices(5), vec![4, 3, 2]);
        assert_eq!(Slice::parse("[::-1]").unwrap().indices(0), Vec::<usize>::new());
    }

    #[test]
    fn test_matches_python_range_semantics() {
        // Expected values computed with Python's list(range(n))[slice].
        let cases: &[(&str, usize, &[usize])] = &[
            ("[1:8:3]", 10, &[1, 4, 7]),
            ("[-3::1]", 10, &[7, 8, 9]),
            ("[-100:2]", 4, &[0, 1]),
            ("[8:-100:-3]", 10, &[8, 5, 2]),
            ("[:5:-2]", 10, &[9, 7]),
        ];
        for (text, n, expected) in cases {
            assert_eq!(Slice::parse(text).unwrap().indices(*n), expected.to_vec(), "{}", text);
        }
    }

    #[test]
    fn test_identity_and_display() {
        assert!(Slice::parse("[:]").unwrap().is_identity());
        assert!(Slice::parse("[0::1]").unwrap().is_identity());
        assert!(!Slice::parse("[1:]").unwrap().is_identity());
        assert_eq!(Slice::parse("[0:3:2]").unwrap().to_string(), "[0:3:2]");
        assert_eq!(Slice::parse("[:-1]").unwrap().to_string(), "[:-1]");
    }
}
