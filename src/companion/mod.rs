//! Companion orchestration: text generation, visual-intent detection,
//! diagram production, and the background enrichment turn.

pub mod diagram;
pub mod enrich;
pub mod generator;
pub mod intent;
