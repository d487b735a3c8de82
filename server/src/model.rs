use sqlx::FromRow;

/// Describe the `packager` table
#[derive(FromRow, Debug)]
pub struct Packager {
    /// Unique uid handed to us by the chat platform
    pub uid: i64,
    /// A alias name for the packager
    pub alias: String,
}

/// Describe the `pkg` table
#[derive(FromRow, Debug)]
pub struct Package {
    /// A unique id for this package
    pub id: i64,
    /// Name of the package
    pub name: String,
}

/// Describe the `assignment` table.
///
/// Rows are append-only history. The row with the largest `(assigned_at, id)`
/// for a package is the authoritative one; older rows are superseded, not
/// mutated.
#[derive(FromRow, Debug)]
pub struct Assignment {
    /// Unique ID for one assignment
    pub id: i64,
    /// ID point to the [`Package`] being assigned
    pub pkg: i64,
    /// [`Packager`] assign to the package. Reference to [`Packager`] uid property.
    /// `None` records an explicit unassign.
    pub assignee: Option<i64>,
    /// Unix epoch timestamp
    pub assigned_at: i64,
}

/// Describe the `mark` table
#[derive(FromRow, Debug)]
pub struct Mark {
    /// Unique ID for one mark record
    pub id: i64,
    /// Kind of the event, e.g. "reviewed", "failing"
    pub name: String,
    /// Optional. Describe which [`Packager`] create this mark. Reference to [`Packager`] uid
    /// property.
    pub marked_by: Option<i64>,
    /// Describe when does this mark record create, unix epoch timestamp
    pub marked_at: i64,
    /// Describe which message create this mark
    pub msg_id: i64,
    /// Optional comment attach to a mark record
    pub comment: Option<String>,
    /// Optional. Describe which [`Package`] this mark record for
    pub for_pkg: Option<i64>,
}

/// Describe the `pkg_relation` table: a unsatisfied dependency relationship.
/// The `request` package is blocked until the row is resolved (deleted).
#[derive(FromRow, Debug)]
pub struct PkgRelation {
    /// Why the relation blocks, e.g. "missing_dep" or "outdated_dep"
    pub status: String,
    /// The package being waited on, reference to [`Package`] id property
    pub required: i64,
    /// The package which cannot proceed, reference to [`Package`] id property
    pub request: i64,
}
