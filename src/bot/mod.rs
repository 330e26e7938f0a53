pub mod backoff;
pub mod bot_actions;
pub mod bot_client;
pub mod bot_listener;
pub mod constants;
pub mod session;
pub mod timer;
pub mod utils;

#[cfg(test)]
pub(crate) mod fakes;
