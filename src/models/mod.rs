mod color;
mod constraints;
mod error;
mod formula;
mod paint;
mod request;

pub use color::*;
pub use constraints::*;
pub use error::*;
pub use formula::*;
pub use paint::*;
pub use request::*;
