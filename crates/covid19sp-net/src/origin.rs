//! Same-origin checks used to decide which requests the worker intercepts.

use url::{Origin, Url};

/// Whether `url` shares scheme, host and port with `origin_of`.
///
/// Opaque origins (`data:`, `file:` and friends) never match anything.
pub fn is_same_origin(url: &Url, origin_of: &Url) -> bool {
    match (url.origin(), origin_of.origin()) {
        (Origin::Tuple(..), Origin::Tuple(..)) => url.origin() == origin_of.origin(),
        _ => false,
    }
}

/// Serialized origin (`scheme://host[:port]`), `"null"` when opaque.
pub fn origin_string(url: &Url) -> String {
    url.origin().ascii_serialization()
}
