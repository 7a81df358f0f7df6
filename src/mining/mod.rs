pub mod engine;
pub mod reconciler;

pub use engine::MiningEngine;
pub use reconciler::Reconciler;
