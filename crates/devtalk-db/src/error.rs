/// Store failures callers need to tell apart from generic SQLite errors.
/// They travel inside `anyhow::Error`; recover them with `downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0}")]
    Invalid(String),

    #[error("{0} already exists")]
    Conflict(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> anyhow::Error {
        Self::NotFound { entity, id }.into()
    }
}
