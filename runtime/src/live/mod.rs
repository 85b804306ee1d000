//! Live interaction with the application view: actions, pacing, the
//! classification surface, and session recovery.

pub mod act;
pub mod pacer;
pub mod session;
pub mod surface;
