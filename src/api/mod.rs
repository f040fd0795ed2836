// =============================================================================
// Control API — a thin, authenticated surface for driving the engine from
// outside a test harness: health, session lifecycle, pause/resume, and a
// read-only view of the agent configs. No dashboard or WebSocket feed here —
// this engine has no frontend to serve one to.
// =============================================================================

pub mod auth;
pub mod rest;
