/// Truncate tool output if it exceeds `max_bytes`.
/// Truncates at a char boundary and appends a marker showing original vs truncated size.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let boundary = floor_char_boundary(output, max_bytes);
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..boundary],
        output.len(),
        boundary
    )
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_within_limit() {
        assert_eq!(truncate_output("hello world", 1024), "hello world");
    }

    #[test]
    fn truncates_at_limit() {
        let input = "a".repeat(1000);
        let result = truncate_output(&input, 100);
        assert!(result.contains("[truncated: 1000 bytes -> 100 bytes]"));
        assert!(result.starts_with(&"a".repeat(100)));
    }

    #[test]
    fn truncates_at_char_boundary() {
        // 4-byte chars; a 10-byte cap keeps two of them
        let input = "🦀".repeat(100);
        let result = truncate_output(&input, 10);
        assert!(result.starts_with("🦀🦀\n"));
        assert!(result.contains("[truncated: 400 bytes -> 8 bytes]"));
    }

    #[test]
    fn exact_boundary_no_truncation() {
        let input = "a".repeat(100);
        assert_eq!(truncate_output(&input, 100), input);
    }

    #[test]
    fn empty_string() {
        assert_eq!(truncate_output("", 100), "");
    }
}
