use nix::unistd::User;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum UserError {
    #[error("unknown user `{0}`")]
    Unknown(String),
    #[error("failed to look up user `{name}`")]
    Lookup {
        name: String,
        #[source]
        source: nix::Error,
    },
}

/// Resolves the run-as user to a uid: numeric ids pass through, names go through the passwd database.
pub fn resolve_uid(user: &str) -> Result<u32, UserError> {
    if let Ok(uid) = user.parse::<u32>() {
        return Ok(uid);
    }
    match User::from_name(user) {
        Ok(Some(entry)) => Ok(entry.uid.as_raw()),
        Ok(None) => Err(UserError::Unknown(user.to_string())),
        Err(source) => Err(UserError::Lookup {
            name: user.to_string(),
            source,
        }),
    }
}
