pub mod codec;
pub mod error;
pub mod frame;
pub mod model;

pub use codec::*;
pub use error::*;
pub use frame::*;
pub use model::*;
