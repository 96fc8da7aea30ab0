//! Repository implementations

mod audit;
mod principal;

pub use audit::AuditRepo;
pub use principal::PrincipalRepo;
