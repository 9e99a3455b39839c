//! # APX Modules
//!
//! Stock processing modules hosted by the pipeline runtime's module
//! adapter: gain, mixing, tone generation, sample-rate conversion, and
//! a single-band EQ, plus the driver table that registers them together
//! with the host/DAI endpoint drivers.

pub mod drivers;
pub mod dsp;
pub mod eq;
pub mod gain;
pub mod mixer;
pub mod src_conv;
pub mod tone;

pub use drivers::{
    DAI_UUID, EQ_UUID, GAIN_UUID, HOST_UUID, MIXIN_UUID, MIXOUT_UUID, SRC_UUID, TONE_UUID, drivers, register_all,
};
pub use eq::EqModule;
pub use gain::GainModule;
pub use mixer::{MixinModule, MixoutModule};
pub use src_conv::SrcModule;
pub use tone::ToneModule;
