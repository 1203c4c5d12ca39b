// Capture domain: pipeline graph, frame hand-off, session, and pixel output.

pub mod export;
pub mod graph;
pub mod session;
pub mod slot;
pub mod transform;
