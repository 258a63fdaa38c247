use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Queue key for a storage path: unpadded base64url of the UTF-8 bytes.
///
/// Other processes derive the same key from the same path, so this must stay
/// byte-for-byte stable.
pub fn canonical_path_key(path: &str) -> String {
    URL_SAFE_NO_PAD.encode(path.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_url_safe_alphabet_without_padding() {
        // Standard base64 of these bytes is "Pz8/Pg==" -> '/' becomes '_', padding dropped
        assert_eq!(canonical_path_key("???>"), "Pz8_Pg");
        // Standard "+/8=" style output: 0xfb 0xff -> "+/8=" -> "-_8"
        assert_eq!(
            URL_SAFE_NO_PAD.encode([0xfb_u8, 0xff]),
            "-_8",
            "alphabet sanity check"
        );
    }

    #[test]
    fn typical_storage_path() {
        assert_eq!(
            canonical_path_key("drops/u1/photo.jpg"),
            "ZHJvcHMvdTEvcGhvdG8uanBn"
        );
    }

    #[test]
    fn is_deterministic_and_identifier_safe() {
        let path = "drops/some user/ünïcode ~ file.png";
        let a = canonical_path_key(path);
        let b = canonical_path_key(path);
        assert_eq!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn distinct_paths_get_distinct_keys() {
        assert_ne!(
            canonical_path_key("drops/a.jpg"),
            canonical_path_key("drops/b.jpg")
        );
    }
}
