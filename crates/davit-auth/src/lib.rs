//! Principal authentication for Davit
//!
//! Parses `Authorization` headers (`Bearer`, `ApiKey`, `Basic`) and
//! resolves them against the metadata store into an [`AuthResult`] that
//! every downstream operation consults. Evaluation is per-request;
//! nothing here is persisted.

mod resolver;
mod result;

pub use resolver::{AuthResolver, Credentials};
pub use result::{AuthResult, AuthType};
