pub mod config;
pub mod events;
pub mod item;
pub mod media;
pub mod relay;
pub mod source;
pub mod web;
pub mod tasks {
    pub mod engine;
    pub mod prefetch;
    pub mod probe;
    pub mod sampler;
    pub mod transition;
}
