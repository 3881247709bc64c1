mod info;
pub use info::{InfoLayer, InfoService};
