/// Direction a migration is executed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Run the apply body, `id - 1 -> id`
    Apply,
    /// Run the revert body, `id -> id - 1`
    Revert,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Apply => Direction::Revert,
            Direction::Revert => Direction::Apply,
        }
    }
}

/// One concrete unit of work handed to a backend
///
/// The backend executes `query` and, on success, persists `version` as the
/// current schema version in the same logical operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Version to record once the query has run
    pub version: u32,
    /// Opaque statement body
    pub query: String,
    /// Run outside of a transaction
    pub disable_tx: bool,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{v:{} q:'{}' notx:{}}}",
            self.version, self.query, self.disable_tx
        )
    }
}
