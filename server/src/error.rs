/// Errors surfaced by the registry operations in [`crate::sql`].
///
/// Every variant is detected before any write is applied, so a failed
/// operation never leaves a partial state behind.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown package: {0}")]
    UnknownPackage(i64),

    #[error("unknown packager: {0}")]
    UnknownPackager(i64),

    #[error("package {0} cannot depend on itself")]
    SelfDependency(i64),

    /// The relation graph reachable from the queried package contains a
    /// cycle. Carries the package ids forming the cycle.
    #[error("dependency cycle through packages {0:?}")]
    CyclicDependency(Vec<i64>),

    /// Catch-all for storage-level failures not classified above.
    #[error("constraint violation: {0}")]
    ConstraintViolation(#[from] sqlx::Error),
}
