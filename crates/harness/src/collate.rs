//! Numeric-aware string ordering
//!
//! Digit runs compare by value and everything else compares
//! case-insensitively, so `2_foo` sorts before `10_bar` and
//! `9.0.0.v20200101` before `10.0.0.v20190101`.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let ord = cmp_digits(&take_digits(&mut left), &take_digits(&mut right));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

/// Compare two digit runs by value without overflowing
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("2_x.test.js", "10_y.test.js", Ordering::Less ; "numeric prefix")]
    #[test_case("10_y.test.js", "1_z.test.js", Ordering::Greater ; "longer number is larger")]
    #[test_case("Alpha", "alpha", Ordering::Less ; "case only differences fall back to bytes")]
    #[test_case("abc", "ABD", Ordering::Less ; "case insensitive letters")]
    #[test_case("9.0.0.GA", "10.0.0.GA", Ordering::Less ; "version components")]
    #[test_case("7_2_X", "7_10_X", Ordering::Less ; "branch names")]
    #[test_case("99999999999999999999999", "100000000000000000000000", Ordering::Less ; "no overflow")]
    fn test_natural_cmp(a: &str, b: &str, expected: Ordering) {
        assert_eq!(natural_cmp(a, b), expected);
    }

    #[test]
    fn test_sort_files() {
        let mut files = vec!["2_x.test.js", "10_y.test.js", "1_z.test.js"];
        files.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(files, vec!["1_z.test.js", "2_x.test.js", "10_y.test.js"]);
    }
}
