//! Plugin-side API: descriptors, sources, and what `register` may declare.

mod descriptor;
mod env;
mod init;
mod record;
mod source;

pub use descriptor::{PLUGIN_REGISTRY, PluginDescriptor, RegisterFn};
pub use env::RegistrationEnv;
pub use init::{Deps, InitDescriptor, InitFn};
pub use record::{Permission, PermissionAction, PluginRecord};
pub use source::{LinkedPluginSource, PluginSource, StaticPluginSource};
