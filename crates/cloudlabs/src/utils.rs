//! Small helpers shared by the labs.

/// Hex encoded sha256 of some bytes.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, bytes.as_ref());
    data_encoding::HEXUPPER.encode(digest.as_ref())
}

/// Milliseconds since the epoch, used to give lab resources unique names.
pub fn unique_suffix() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Content type of an uploaded asset, judged by its extension.
pub fn content_type_for(key: &str) -> &'static str {
    let key = key.to_ascii_lowercase();
    if key.ends_with(".jpg") || key.ends_with(".jpeg") {
        "image/jpeg"
    } else if key.ends_with(".png") {
        "image/png"
    } else if key.ends_with(".txt") {
        "text/plain"
    } else if key.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn content_types() {
        assert_eq!("image/jpeg", content_type_for("fisher.jpg"));
        assert_eq!("image/jpeg", content_type_for("TANKER.JPEG"));
        assert_eq!("image/png", content_type_for("ships/logo.png"));
        assert_eq!("text/plain", content_type_for("test-sdk.txt"));
        assert_eq!("application/octet-stream", content_type_for("archive.tar.gz"));
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855",
            sha256_hex(b"")
        );
    }
}
