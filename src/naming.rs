use md5::{Digest, Md5};

/// Autogenerated resource names at or above this length are shortened with a hash.
pub const AUTOGENERATED_NAME_MAX_LENGTH: usize = 53;

/// Domains longer than this cannot be used as the common name of an ACME certificate.
pub const DOMAIN_MAX_LENGTH: usize = 63;

/// How many hex characters of the digest end up in a shortened name.
pub const HASH_PREFIX_LENGTH: usize = 5;

/// Hex-encoded MD5 sum of `text` followed by a newline.
///
/// This is the digest `echo "$text" | md5sum` prints, which is what
/// already deployed resource names were derived from.
pub fn md5_hash_with_newline(text: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    hasher.update(b"\n");
    format!("{:x}", hasher.finalize())
}

/// Shorten `name` into `<FIRST_LABEL>-<HASH>` if it is `max_length` characters or longer, where:
/// * `FIRST_LABEL` is everything up to the first dot, and
/// * `HASH` is the first five characters of [md5_hash_with_newline] of the full name.
///
/// Names below `max_length` are returned as-is.
pub fn shorten_with_hash(name: &str, max_length: usize) -> String {
    if name.len() < max_length {
        return name.to_string();
    }
    let first_label = name.split('.').next().unwrap_or_default();
    let hash = md5_hash_with_newline(name);
    format!("{}-{}", first_label, truncate(&hash, HASH_PREFIX_LENGTH))
}

/// Helper function for truncating a string without panicking.
pub fn truncate(s: &str, length: usize) -> &str {
    if s.len() <= length {
        return s;
    }
    let mut end = length;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
