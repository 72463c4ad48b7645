// Entity Models
// Owners are read-only here: the surrounding client-management flows own
// their lifecycle.

pub mod owner;

pub use owner::{Owner, OwnerColumn, OwnerId, OwnerSet};
