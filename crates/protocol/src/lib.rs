#![forbid(unsafe_code)]

mod command;
mod frame;
mod parse;

pub use command::{
    Command, FIELD_ENABLED, FIELD_EXEMPT_PROTECTED, FIELD_IDLE_THRESHOLD, FIELD_SWEEP_INTERVAL,
    PolicyUpdate,
};
pub use frame::Frame;
pub use parse::{Parse, parse_bool};
