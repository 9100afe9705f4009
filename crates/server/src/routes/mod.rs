mod health;
mod personas;
mod sessions;
pub mod sse;

pub use health::*;
pub use personas::*;
pub use sessions::*;
