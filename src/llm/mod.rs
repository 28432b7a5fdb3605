pub mod client;
pub mod generative;
