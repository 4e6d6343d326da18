pub mod cancel;
pub mod error;
pub mod state;

pub use cancel::*;
pub use error::*;
pub use state::*;
