mod relay;
mod target;
mod tunnel;

pub use self::{
    target::{ConnectTarget, parse_connect_target},
    tunnel::{ConnectRequest, handle_connect},
};
