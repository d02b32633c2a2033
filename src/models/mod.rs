//! Data models for callbackpool.

mod session;

pub use session::{
    Session, SessionDisplay, SessionState, DEFAULT_MAX_AGE_MINUTES, HEALTHY_SUCCESS_RATE,
    MIN_SAMPLE_FOR_RATE, RETIRE_AFTER_FAILURES,
};
