//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Every chain implementation module exposes a `Registry` struct implementing
/// this trait, so the name used in `[networks.<name>] implementation = "..."`
/// and the factory that builds it live next to each other.
pub trait ImplementationRegistry {
	/// Name used in configuration files, e.g. `evm_alloy` or `mock`.
	const NAME: &'static str;

	/// Factory function type provided by the implementation.
	type Factory;

	/// Returns the factory function.
	fn factory() -> Self::Factory;
}
