// ABOUTME: Sealed marker for the runtime capability traits.
// ABOUTME: Only the engine adapter and the in-memory fake may implement them.

/// Implemented by the crate's runtime adapters only, so capability traits
/// can grow methods without breaking downstream code.
pub trait Sealed {}
