pub mod entity;
pub mod error;
pub mod key;
pub mod value;

pub use entity::{Entity, PropertyMap};
pub use error::{CacheError, GatewayError, ModelError, Result};
pub use key::{EntityKey, Identity};
pub use value::{PropertyValue, StringInput, decode, encode_date, encode_string, encode_string_list};
