mod draft;
mod proposal;
mod user;
mod workflow;

pub use draft::*;
pub use proposal::*;
pub use user::*;
pub use workflow::*;
