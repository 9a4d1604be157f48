pub mod contest;
pub mod market;
pub mod portfolio;
pub mod session;

pub use contest::*;
pub use market::*;
pub use portfolio::*;
pub use session::*;
