pub use crate::time::Timestamp;

pub use counter::*;
pub use id::*;
pub use user::*;
pub use video::*;
pub use view::*;

mod counter;
mod id;
mod user;
mod video;
mod view;
