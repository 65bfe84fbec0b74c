use std::path::Path;

/// Identity of the local user, captured once per run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserEnvironment {
    pub home_dir: Option<String>,
    pub user_name: Option<String>,
}

impl UserEnvironment {
    pub fn new(home_dir: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            home_dir: Some(home_dir.into()),
            user_name: Some(user_name.into()),
        }
    }

    /// Read the home directory and account name of the current user
    pub fn current() -> Self {
        let home_dir = dirs::home_dir().map(|p| p.to_string_lossy().into_owned());

        let user_name = ["USER", "USERNAME"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find(|name| !name.trim().is_empty())
            .or_else(|| {
                home_dir
                    .as_deref()
                    .and_then(|home| Path::new(home).file_name())
                    .map(|name| name.to_string_lossy().into_owned())
            });

        tracing::debug!(
            has_home = home_dir.is_some(),
            has_user_name = user_name.is_some(),
            "Captured user environment"
        );

        Self {
            home_dir,
            user_name,
        }
    }
}
