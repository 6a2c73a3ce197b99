pub mod bands;
pub mod dates;
pub mod error;
pub mod limiter;
pub mod traits;
pub mod types;

pub use bands::*;
pub use error::*;
pub use limiter::RateLimiter;
pub use traits::*;
pub use types::*;
