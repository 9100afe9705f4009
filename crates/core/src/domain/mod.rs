mod axiom;
mod candidate;
mod config;
mod log;
mod output;
mod persona;
mod session;
mod stage;
mod vote;

pub use axiom::*;
pub use candidate::*;
pub use config::*;
pub use log::*;
pub use output::*;
pub use persona::*;
pub use session::*;
pub use stage::*;
pub use vote::*;
