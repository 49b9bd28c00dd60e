//! Execution Loop
//!
//! Error classification, observations and the bounded ReAct repair loop.

pub mod error_classifier;
pub mod observation;
pub mod react;

pub use error_classifier::*;
pub use observation::*;
pub use react::*;
