pub mod device;
pub mod properties;
pub mod selector;
