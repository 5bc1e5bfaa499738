pub mod cache_key;
pub mod json_canonical;

pub use cache_key::compute_cache_key;
pub use json_canonical::canonical_json;
