pub mod background;
pub mod constants;
pub mod coordinates;
pub mod dynamics;
pub mod env_state;
pub mod forecast;
pub mod gapcast;
pub mod gapcast_errors;
pub mod mass_function;
pub mod photometry;
pub mod sampler;
pub mod stream;
