pub mod interceptors;
pub use interceptors::{Counted, LogLevel, Logged, MetricTimed, Timed, log_at_level};

pub mod prelude {
    //! Re-exports of the most commonly used utility interceptors.
    pub use crate::interceptors::{Counted, Logged, MetricTimed, Timed};
}
