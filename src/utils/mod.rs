pub mod exif;
pub mod hash;
pub mod pagination;

pub use exif::{extract_date_taken, get_image_dimensions};
pub use hash::{directory_cache_key, file_cache_key, hash_path, short_hash};
pub use pagination::{paginate, PageInfo};
