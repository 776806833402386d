// =============================================================================
// Transport — two interchangeable front-ends over the same dispatcher
// =============================================================================

pub mod http;
pub mod stdio;
