//! Read-only, process-wide credentials established at pipeline start
//! (spec.md §5: "Credentials ... are read-only process-wide state
//! established at pipeline start").

use std::path::PathBuf;

/// Authentication material for the catalog HTTP API and the staging SSH
/// channel. Immutable for the lifetime of a pipeline run.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
    pub staging_host: String,
    pub staging_username: String,
    pub private_key_path: PathBuf,
}

impl Credentials {
    /// The `Authorization` header value for catalog requests
    /// (spec.md §6: `Authorization: ApiKey <username>:<key>`).
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("ApiKey {}:{}", self.username, self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_header_format() {
        let creds = Credentials {
            username: "alice".into(),
            api_key: "secret".into(),
            staging_host: "staging.example.org".into(),
            staging_username: "mydata".into(),
            private_key_path: PathBuf::from("/home/alice/.ssh/id_rsa"),
        };
        assert_eq!(creds.authorization_header(), "ApiKey alice:secret");
    }
}
