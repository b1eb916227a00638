pub mod account;
pub mod market;
pub mod order;
pub mod session;

pub use account::*;
pub use market::*;
pub use order::*;
pub use session::*;
