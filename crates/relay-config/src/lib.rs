mod model;
mod store;
mod validate;

pub use model::*;
pub use store::load_or_default;
