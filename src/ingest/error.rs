use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Feed returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("Feed response too large: {0} bytes (max {1} bytes)")]
    TooLarge(usize, usize),
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_status() {
        let err = FeedError::Status(reqwest::StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "Feed returned HTTP 502 Bad Gateway");
    }

    #[test]
    fn error_display_too_large() {
        let err = FeedError::TooLarge(100, 50);
        assert_eq!(err.to_string(), "Feed response too large: 100 bytes (max 50 bytes)");
    }

    #[test]
    fn error_from_prost_decode_error() {
        let bad_bytes: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let result = <gtfs_realtime::FeedMessage as prost::Message>::decode(bad_bytes);
        let err: FeedError = result.unwrap_err().into();
        assert!(matches!(err, FeedError::Decode(_)));
    }
}
