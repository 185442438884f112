//! Wildcard matching for IP allow/block list entries.
//!
//! `*` matches zero or more characters, `?` matches exactly one. The
//! pattern is split on `*` into literal chunks: the first chunk anchors the
//! start, the last anchors the end, and the chunks between must appear in
//! order in what remains. Worst case O(pattern * text), with no
//! backtracking blowup on adversarial list entries.

/// Examples:
/// - `"192.168.1.*"` matches `"192.168.1.100"`
/// - `"10.0.?.1"` matches `"10.0.3.1"`
/// - `"*"` matches everything
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let text = text.as_bytes();
    let chunks: Vec<&[u8]> = pattern.split('*').map(str::as_bytes).collect();

    // No `*` at all: the whole pattern is one literal chunk
    if chunks.len() == 1 {
        return chunk_matches(chunks[0], text);
    }

    let first = chunks[0];
    let last = chunks[chunks.len() - 1];
    if text.len() < first.len() + last.len() {
        return false;
    }
    if !chunk_matches(first, &text[..first.len()]) {
        return false;
    }
    if !chunk_matches(last, &text[text.len() - last.len()..]) {
        return false;
    }

    // Middle chunks float: each must occur after the previous one
    let mut pos = first.len();
    let tail_start = text.len() - last.len();
    for chunk in &chunks[1..chunks.len() - 1] {
        if chunk.is_empty() {
            continue;
        }
        let Some(offset) = find_chunk(chunk, &text[pos..tail_start]) else {
            return false;
        };
        pos += offset + chunk.len();
    }
    true
}

/// Literal comparison of equal-length slices, `?` matching any byte.
fn chunk_matches(chunk: &[u8], text: &[u8]) -> bool {
    chunk.len() == text.len() && chunk.iter().zip(text).all(|(p, t)| *p == b'?' || p == t)
}

/// Leftmost position in `text` where `chunk` matches.
fn find_chunk(chunk: &[u8], text: &[u8]) -> Option<usize> {
    if chunk.len() > text.len() {
        return None;
    }
    (0..=text.len() - chunk.len()).find(|&i| chunk_matches(chunk, &text[i..i + chunk.len()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(glob_match("192.168.1.100", "192.168.1.100"));
        assert!(!glob_match("192.168.1.100", "192.168.1.101"));
    }

    #[test]
    fn test_star_suffix() {
        assert!(glob_match("192.168.1.*", "192.168.1.100"));
        assert!(glob_match("192.168.1.*", "192.168.1."));
        assert!(!glob_match("192.168.1.*", "10.0.0.1"));
    }

    #[test]
    fn test_star_prefix_and_middle() {
        assert!(glob_match("*.100", "192.168.1.100"));
        assert!(glob_match("10.*.1", "10.0.0.1"));
        assert!(!glob_match("10.*.1", "11.0.0.1"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("10.0.?.1", "10.0.3.1"));
        assert!(!glob_match("10.0.?.1", "10.0.30.1"));
    }

    #[test]
    fn test_multiple_stars() {
        assert!(glob_match("*.*.*.*", "1.2.3.4"));
        assert!(glob_match("1*.*.4", "1.2.3.4"));
        assert!(!glob_match("1*.*.*.9", "1.2.3.4"));
    }

    #[test]
    fn test_middle_chunks_must_appear_in_order() {
        assert!(glob_match("*2*3*", "1.2.3.4"));
        assert!(!glob_match("*3*2*", "1.2.3.4"));
    }

    #[test]
    fn test_anchors_may_not_overlap() {
        assert!(glob_match("a*a", "aa"));
        assert!(!glob_match("a*a", "a"));
    }

    #[test]
    fn test_single_star() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn test_empty() {
        assert!(glob_match("", ""));
        assert!(!glob_match("", "x"));
    }
}
