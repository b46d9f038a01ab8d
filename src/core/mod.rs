pub mod codec;
pub mod layout;
pub mod model;
