pub mod rest;

pub use rest::{base_url, sign_payload, BybitClient};
