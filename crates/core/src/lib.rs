#![deny(warnings)]

pub mod aggregator;
pub mod config;
pub mod dsp;
pub mod features;
pub mod formant;
pub mod frame;
pub mod harmonics;
pub mod hub;
pub mod metrics;
pub mod pipeline;
pub mod pitch;
pub mod protocol;
pub mod quality;
pub mod session;
pub mod store;
pub mod transport;
pub mod util;
