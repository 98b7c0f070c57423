//! Response compression layer.

use tower_http::compression::CompressionLayer;
use tower_http::compression::predicate::{DefaultPredicate, NotForContentType, Predicate};

/// Builds a gzip compression layer that leaves already-compressed archive
/// downloads alone.
pub fn build_compression_layer() -> CompressionLayer<impl Predicate> {
    let predicate = DefaultPredicate::new().and(NotForContentType::const_new("application/gzip"));
    CompressionLayer::new().compress_when(predicate)
}
