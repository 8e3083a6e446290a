//! Small helpers shared across modules.

/// Return the final component of a forward-slash-separated path.
///
/// Remote `file_path` values are always forward-slashed regardless of the
/// remote host OS, so this must not go through `std::path`.
///
/// - `"/mnt/loras/anime/x.safetensors"` → `"x.safetensors"`
/// - `"x.safetensors"` → `"x.safetensors"`
/// - `"/mnt/loras/"` → `""`
pub fn posix_basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Percent-encode a query-string component (RFC 3986 unreserved set kept).
///
/// LoRA display names routinely contain spaces and unicode; anything outside
/// the unreserved set is UTF-8 percent-encoded so the resulting URI parses.
pub fn encode_query_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename_nested() {
        assert_eq!(posix_basename("/mnt/loras/anime/x.safetensors"), "x.safetensors");
    }

    #[test]
    fn test_basename_bare() {
        assert_eq!(posix_basename("x.safetensors"), "x.safetensors");
    }

    #[test]
    fn test_basename_trailing_slash() {
        assert_eq!(posix_basename("/mnt/loras/"), "");
    }

    #[test]
    fn test_encode_query_passthrough() {
        assert_eq!(encode_query_component("plain-name_1.0~x"), "plain-name_1.0~x");
    }

    #[test]
    fn test_encode_query_space_and_unicode() {
        assert_eq!(encode_query_component("a b"), "a%20b");
        assert_eq!(encode_query_component("café"), "caf%C3%A9");
    }
}
