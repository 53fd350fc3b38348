//! Procedural macros for the Trellis plugin host.
//!
//! - `#[plugin("id")]` enrolls a register function in the link-time plugin
//!   registry read by `LinkedPluginSource`.
//!
//! ```rust,ignore
//! use trellis_framework::RegistrationEnv;
//!
//! #[trellis_macros::plugin("catalog")]
//! fn register(env: &mut RegistrationEnv) {
//!     env.register_service(CATALOG_DB, Arc::new(SqlCatalog::default()));
//! }
//! ```

mod plugin;

use proc_macro::TokenStream;

/// Enrolls a `fn(&mut RegistrationEnv)` as the register entry point of a
/// plugin.
///
/// The function is left untouched.  A `static` entry is appended to
/// `trellis_framework::PLUGIN_REGISTRY`; its descriptor carries the given id
/// and the enclosing module path as the plugin path.
///
/// The calling crate must depend on `trellis-framework` directly.
///
/// # Errors (compile time)
///
/// - the id is empty or contains whitespace;
/// - the function is `async`, generic, or does not take exactly one argument.
#[proc_macro_attribute]
pub fn plugin(attr: TokenStream, item: TokenStream) -> TokenStream {
    plugin::plugin(attr, item)
}
