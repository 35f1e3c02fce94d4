/// Groups the digits of a zero padded number by 3, from the right, with `_`.
fn group_digits(padded: String) -> String {
    let len = padded.len();
    let mut out = String::with_capacity(len + len / 3);

    for (i, c) in padded.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push('_');
        }
        out.push(c);
    }
    out
}

/// Format number in Rust style: `1_000_000`, keep max length of u64, 20 digits.
pub(crate) fn format_pad_u64(n: u64) -> String {
    group_digits(format!("{:020}", n))
}

/// Format number in Rust style with at least 9 digits: `001_000_000`.
pub(crate) fn format_pad9_u64(n: u64) -> String {
    group_digits(format!("{:09}", n))
}

#[cfg(test)]
mod tests {
    use super::format_pad9_u64;
    use super::format_pad_u64;

    #[test]
    fn test_format_pad_u64() {
        assert_eq!("18_446_744_073_709_551_615", format_pad_u64(u64::MAX));
        assert_eq!("00_000_000_000_001_200_000", format_pad_u64(1_200_000));
        assert_eq!("00_000_000_000_000_000_038", format_pad_u64(38));
    }

    #[test]
    fn test_format_pad9_u64() {
        assert_eq!("18_446_744_073_709_551_615", format_pad9_u64(u64::MAX));
        assert_eq!("001_200_000", format_pad9_u64(1_200_000));
        assert_eq!("000_000_024", format_pad9_u64(24));
        assert_eq!("1_000_000_000", format_pad9_u64(1_000_000_000));
    }
}
