pub mod impression;

pub use impression::Impression;
