pub mod bluetooth;
pub mod csvlog;
pub mod error;
pub mod firmware;
pub mod handler;
pub mod protocol;
pub mod session;

pub mod prelude {
    pub use crate::error::GloveError;
    pub use crate::{bluetooth, csvlog, firmware, handler, protocol, session};

    #[derive(Clone, Copy, Debug)]
    pub struct App {
        pub verbose: u8,
        pub scantime: f32,
    }
}
