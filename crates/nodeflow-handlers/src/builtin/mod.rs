pub mod boundary;
pub mod condition;
pub mod http;
pub mod repeat;
pub mod variables;
pub mod wait;
