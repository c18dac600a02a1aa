pub mod data_url;
pub mod error;

pub use data_url::DataUrl;
